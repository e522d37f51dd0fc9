//! Recoverable factory errors and the fatal contract-violation path.

use thiserror::Error;

/// Errors a factory reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    #[error("factory `{factory}`: allocator could not provide {size} bytes")]
    OutOfMemory { factory: String, size: usize },

    #[error("factory `{factory}`: no builder registered for type {kind}")]
    UnknownType { factory: String, kind: String },

    #[error("factory `{factory}`: a builder is already registered for type {kind}")]
    AlreadyRegistered { factory: String, kind: String },

    #[error("factory `{factory}`: builder for type {kind} produced no object")]
    BuildFailed { factory: String, kind: String },
}

/// Abort the current operation on a broken usage contract.
///
/// Contract violations are programming errors in the consuming code and are
/// never recovered from.
#[cold]
#[track_caller]
#[allow(clippy::panic)]
pub(crate) fn contract_violation(message: &str) -> ! {
    panic!("{message}")
}
