//! Instruction selection from a mid-level IR to 32-bit ARM assembly
//! (ARMv7-A, cortex-a7 class).
//!
//! The crate takes a finalized [`mir::Package`] and lowers each function to
//! an [`arm::Function`]: a sequence of ARM instructions over an unbounded
//! virtual register file, plus a per-function constant pool and frame size.
//! Register allocation, the `_mod` pseudo-op expansion, conditional
//! execution and the final assembly printing all happen in later passes that
//! consume this output together with the register maps published into the
//! [`extra_data`] dictionary.
//!
//! ```
//! use mir2arm::{compile_package, mir, BuildConfig};
//!
//! let package = mir::parser::parse(
//!     "fn id(int) -> int { bb0 { ret %1 } }",
//! )
//! .unwrap();
//! let mut extra = Default::default();
//! let asm = compile_package(&package, &BuildConfig::default(), &mut extra).unwrap();
//! assert!(asm.to_string().contains("push {fp, lr}"));
//! ```

use std::fmt;

pub mod arm;
mod build_config;
pub mod codegen;
mod error;
pub mod extra_data;
pub mod mir;

pub use build_config::BuildConfig;
pub use error::CodegenError;

use extra_data::ExtraData;

/// The lowered form of a whole package: one [`arm::Function`] per MIR
/// function, in package order.
#[derive(Debug, Clone, Default)]
pub struct ArmCode {
    pub functions: Vec<arm::Function>,
}

impl fmt::Display for ArmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for function in &self.functions {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}

/// Lowers every function in `package`. Register maps are published into
/// `extra` under [`extra_data::MIR_VARIABLE_TO_ARM_VREG`] as each function
/// completes; a failed function aborts the package compile.
pub fn compile_package(
    package: &mir::Package,
    config: &BuildConfig,
    extra: &mut ExtraData,
) -> Result<ArmCode, CodegenError> {
    let mut functions = Vec::with_capacity(package.functions.len());
    for func in package.functions.values() {
        let lowered = codegen::FnCodegen::new(func, package, extra).translate_function(extra)?;
        if config.print_lowered_asm {
            println!("{}", lowered);
        }
        functions.push(lowered);
    }
    Ok(ArmCode { functions })
}
