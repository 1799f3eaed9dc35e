use std::fmt;

/// The MIR type registry. The source language only has 32-bit integers,
/// arrays of them, and pointers produced by address-taking and parameter
/// decay, so this stays small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Int,
    Void,
    Ptr(Box<Ty>),
    Array(Box<Ty>, u32),
    /// A function's type: parameter types and return type. Only reached
    /// through pointers; a function is code, not a sized stack value.
    Fn(Vec<Ty>, Box<Ty>),
    /// Marker type on a callee's final parameter indicating variadic
    /// behavior. Never sized, never given a frame slot.
    RestParam,
}

impl Ty {
    pub fn ptr_to(item: Ty) -> Ty {
        Ty::Ptr(Box::new(item))
    }

    pub fn array_of(item: Ty, len: u32) -> Ty {
        Ty::Array(Box::new(item), len)
    }

    pub fn function(params: Vec<Ty>, ret: Ty) -> Ty {
        Ty::Fn(params, Box::new(ret))
    }

    /// Size of a value of this type in bytes, if it has one.
    pub fn size(&self) -> Option<u32> {
        match self {
            Ty::Int => Some(4),
            Ty::Ptr(_) => Some(4),
            Ty::Array(item, len) => item.size().map(|s| s * len),
            Ty::Void | Ty::Fn(..) | Ty::RestParam => None,
        }
    }

    pub fn is_rest_param(&self) -> bool {
        matches!(self, Ty::RestParam)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => write!(f, "int"),
            Ty::Void => write!(f, "void"),
            Ty::Ptr(item) => write!(f, "*{}", item),
            Ty::Array(item, len) => write!(f, "[{}; {}]", item, len),
            Ty::Fn(params, ret) => {
                let params = params
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "fn({}) -> {}", params, ret)
            }
            Ty::RestParam => write!(f, "..."),
        }
    }
}

/// A function signature: parameter types in order, then the return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

impl FnSig {
    pub fn new(params: Vec<Ty>, ret: Ty) -> Self {
        FnSig { params, ret }
    }
}
