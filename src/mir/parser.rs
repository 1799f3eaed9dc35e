//! A compact textual form of the MIR, used by the file-driven tests and
//! handy for dumping reduced repro cases.
//!
//! ```text
//! ; globals carry only a type
//! global table: [int; 100]
//!
//! fn max(int, int) -> int {
//!     %3: int
//!
//!     bb0 {
//!         %3 = lt %1, %2
//!         brcond %3, bb1, bb2
//!     }
//!     bb1 {
//!         ret %2
//!     }
//!     bb2 {
//!         ret %1
//!     }
//! }
//! ```
//!
//! Parameters take variable ids `1..=n` from the signature and are not
//! re-declared; every other variable is declared at the top of the function,
//! with `mem` marking the memory-resident ones.

use std::collections::BTreeMap;

use either::Either;

use super::{
    BasicBlk, BlockId, FnSig, Function, GlobalValue, Inst, Op, Package, Terminator, Ty, Value, Var,
    VarId,
};

/// Parses a package from its textual form.
pub fn parse(input: &str) -> Result<Package, String> {
    mir_text::package(input).map_err(|err| {
        let found = if input.len() - err.location.offset <= 20 {
            &input[err.location.offset..]
        } else {
            &input[err.location.offset..][..20]
        };
        format!("parse failed: {}, found: {}", err, found)
    })
}

peg::parser! {
    grammar mir_text() for str {
        rule _() = quiet!{ ([' ' | '\t' | '\r' | '\n'] / comment())* }

        rule comment() = ";" [^ '\n']*

        rule id() -> String
            = s:$(['a'..='z' | 'A'..='Z' | '_'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']*) _ {
                s.to_string()
            }

        rule uint() -> u32
            = n:$(['0'..='9']+) _ {? n.parse().map_err(|_| "integer literal") }

        rule num() -> i32
            = "0x" n:$(['0'..='9' | 'a'..='f' | 'A'..='F']+) _ {?
                i32::from_str_radix(n, 16).map_err(|_| "hex literal")
            }
            / n:$("-"? ['0'..='9']+) _ {? n.parse().map_err(|_| "int literal") }

        rule var() -> VarId
            = "%" n:$(['0'..='9']+) _ {? n.parse().map(VarId).map_err(|_| "variable id") }

        rule blockref() -> BlockId
            = "bb" n:$(['0'..='9']+) _ {? n.parse().map_err(|_| "block id") }

        rule ty() -> Ty
            = "int" _ { Ty::Int }
            / "void" _ { Ty::Void }
            / "..." _ { Ty::RestParam }
            / "fn" _ "(" _ params:(ty() ** ("," _)) ")" _ "->" _ ret:ty() {
                Ty::function(params, ret)
            }
            / "*" _ t:ty() { Ty::ptr_to(t) }
            / "[" _ t:ty() ";" _ n:uint() "]" _ { Ty::array_of(t, n) }

        rule value() -> Value
            = v:var() { Value::Var(v) }
            / n:num() { Value::Imm(n) }

        rule binop() -> Op
            = "add" _ { Op::Add }
            / "sub" _ { Op::Sub }
            / "mul" _ { Op::Mul }
            / "div" _ { Op::Div }
            / "rem" _ { Op::Rem }
            / "and" _ { Op::And }
            / "or" _ { Op::Or }
            / "shl" _ { Op::Shl }
            / "shra" _ { Op::ShrA }
            / "shr" _ { Op::Shr }
            / "gte" _ { Op::Gte }
            / "gt" _ { Op::Gt }
            / "lte" _ { Op::Lte }
            / "lt" _ { Op::Lt }
            / "eq" _ { Op::Eq }
            / "neq" _ { Op::Neq }

        rule inst() -> Inst
            = "store" _ d:var() "," _ v:value() o:("," _ o:value() { o })? {
                match o {
                    None => Inst::Store { dest: d, val: v },
                    Some(offset) => Inst::StoreOffset { dest: d, val: v, offset },
                }
            }
            / "call" _ f:id() "(" _ args:(value() ** ("," _)) ")" _ {
                Inst::Call { dest: VarId::VOID, func: f, args }
            }
            / d:var() "=" _ i:inst_rhs(d) { i }

        rule inst_rhs(dest: VarId) -> Inst
            = op:binop() lhs:value() "," _ rhs:value() { Inst::Op { dest, op, lhs, rhs } }
            / "call" _ f:id() "(" _ args:(value() ** ("," _)) ")" _ {
                Inst::Call { dest, func: f, args }
            }
            / "load" _ src:value() o:("," _ o:value() { o })? {
                match o {
                    None => Inst::Load { dest, src },
                    Some(offset) => Inst::LoadOffset { dest, src, offset },
                }
            }
            / "ref" _ "@" s:id() { Inst::Ref { dest, target: Either::Left(s) } }
            / "ref" _ v:var() { Inst::Ref { dest, target: Either::Right(v) } }
            / "ptroff" _ p:var() "," _ o:value() { Inst::PtrOffset { dest, ptr: p, offset: o } }
            / "phi" _ sources:(var() ** ("," _)) { Inst::Phi { dest, sources } }
            / src:value() { Inst::Assign { dest, src } }

        rule terminator() -> Terminator
            = "brcond" _ c:var() "," _ t:blockref() "," _ f:blockref() {
                Terminator::BrCond(c, t, f)
            }
            / "br" _ t:blockref() { Terminator::Br(t) }
            / "ret" _ v:var() { Terminator::Return(Some(v)) }
            / "ret" _ { Terminator::Return(None) }
            / "unreachable" _ { Terminator::Unreachable }
            / "undefined" _ { Terminator::Undefined }

        rule var_decl() -> (VarId, Var)
            = v:var() ":" _ m:("mem" _)? t:ty() {
                (v, match m {
                    Some(_) => Var::new_memory(t),
                    None => Var::new(t),
                })
            }

        rule block_decl() -> (BlockId, BasicBlk)
            = id:blockref() "{" _ inst:inst()* terminator:terminator() "}" _ {
                (id, BasicBlk { inst, terminator })
            }

        rule fn_decl() -> Function
            = "fn" _ name:id() "(" _ params:(ty() ** ("," _)) ")" _ "->" _ ret:ty() "{" _
              vars:var_decl()*
              blocks:block_decl()*
              "}" _ {
                let mut variables = BTreeMap::new();
                for (i, ty) in params.iter().enumerate() {
                    variables.insert(VarId(i as u32 + 1), Var::new(ty.clone()));
                }
                for (id, var) in vars {
                    variables.insert(id, var);
                }
                let basic_blks = blocks.into_iter().collect();
                Function {
                    name,
                    sig: FnSig::new(params, ret),
                    basic_blks,
                    variables,
                }
            }

        rule item() -> Either<(String, GlobalValue), Function>
            = "global" _ name:id() ":" _ t:ty() { Either::Left((name, GlobalValue { ty: t })) }
            / f:fn_decl() { Either::Right(f) }

        pub rule package() -> Package
            = _ items:item()* ![_] {
                let mut package = Package::default();
                for item in items {
                    match item {
                        Either::Left((name, global)) => {
                            package.global_values.insert(name, global);
                        }
                        Either::Right(func) => {
                            package.functions.insert(func.name.clone(), func);
                        }
                    }
                }
                package
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_small_package() {
        let src = r#"
            ; a global and two functions
            global table: [int; 4]

            fn id(int) -> int {
                bb0 {
                    ret %1
                }
            }

            fn sum(int, int) -> int {
                %3: int
                %4: mem [int; 2]

                bb0 {
                    %3 = add %1, %2
                    store %4, %3
                    br bb1
                }
                bb1 {
                    ret %3
                }
            }
        "#;
        let package = parse(src).unwrap();
        assert_eq!(package.global_values.len(), 1);
        assert_eq!(package.functions.len(), 2);

        let sum = &package.functions["sum"];
        assert_eq!(sum.param_count(), 2);
        assert_eq!(sum.basic_blks.len(), 2);
        assert!(sum.variables[&VarId(4)].is_memory_var);
        assert_eq!(sum.variables[&VarId(4)].size(), Some(8));

        let bb0 = &sum.basic_blks[&0];
        assert_eq!(bb0.inst.len(), 2);
        assert!(matches!(
            bb0.inst[0],
            Inst::Op { op: Op::Add, dest: VarId(3), .. }
        ));
        assert!(matches!(bb0.terminator, Terminator::Br(1)));
    }

    #[test]
    fn parse_instruction_forms() {
        let src = r#"
            global g: int

            fn probe(int, ...) -> void {
                %3: *int
                %4: int
                %5: int
                %6: *fn(int) -> void

                bb0 {
                    %3 = ref @g
                    %4 = load %3
                    %5 = ptroff %3, 1
                    store %5, %4, 4
                    %4 = load %3, 8
                    call probe(%4, 1, 2)
                    %4 = call probe(0)
                    %4 = phi %4, %5
                    %4 = 0x12345
                    ret
                }
            }
        "#;
        let package = parse(src).unwrap();
        let probe = &package.functions["probe"];
        let bb0 = &probe.basic_blks[&0];
        assert_eq!(bb0.inst.len(), 9);
        assert!(matches!(bb0.inst[0], Inst::Ref { .. }));
        assert!(matches!(bb0.inst[3], Inst::StoreOffset { .. }));
        assert!(matches!(bb0.inst[4], Inst::LoadOffset { .. }));
        assert!(matches!(
            bb0.inst[5],
            Inst::Call { dest: VarId::VOID, .. }
        ));
        assert!(matches!(bb0.inst[8], Inst::Assign { src: Value::Imm(0x12345), .. }));
        assert!(matches!(bb0.terminator, Terminator::Return(None)));
        assert!(probe.sig.params[1].is_rest_param());

        // A pointer to code is word-sized; the function type itself is not.
        let fn_ptr = &probe.variables[&VarId(6)].ty;
        assert_eq!(fn_ptr.size(), Some(4));
        assert_eq!(fn_ptr.to_string(), "*fn(int) -> void");
        match fn_ptr {
            Ty::Ptr(inner) => match inner.as_ref() {
                Ty::Fn(params, ret) => {
                    assert_eq!(params.as_slice(), &[Ty::Int]);
                    assert_eq!(ret.as_ref(), &Ty::Void);
                    assert_eq!(inner.size(), None);
                }
                other => panic!("expected a function type, got {}", other),
            },
            other => panic!("expected a pointer type, got {}", other),
        }
    }

    #[test]
    fn parse_error_reports_location() {
        let err = parse("fn broken( -> int { }").unwrap_err();
        assert!(err.contains("parse failed"));
    }
}
