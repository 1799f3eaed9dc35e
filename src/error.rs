use crate::mir::BlockId;
use thiserror::Error;

/// Errors raised while lowering a single function. All of these are fatal to
/// the function being lowered; there is no partial output to salvage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A `call` names a function that is not present in the package.
    #[error("call to unknown function `{0}`")]
    FunctionNotFound(String),

    /// The externally supplied block ordering names a block id that the
    /// function body does not contain.
    #[error("block ordering references unknown block {0}")]
    UnknownBlock(BlockId),

    /// A lowering path that the instruction selector does not support.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A visited block ends in an `undefined` terminator, which upstream
    /// passes must have replaced before code generation.
    #[error("block {0} has an undefined terminator")]
    UndefinedTerminator(BlockId),

    /// An internal impossible-state marker.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
