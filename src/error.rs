use thiserror::Error;

/// Result alias used across the hub.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure conditions surfaced by the hub's administrative surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed path, wrong entry kind for the operation, or a type
    /// mismatch on a push, default or override.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Pool exhaustion at entry, resource or sample level.
    #[error("{0} exhausted")]
    NoMemory(&'static str),

    /// The requested routing edge would close a cycle.
    #[error("route would create a cycle")]
    Duplicate,

    /// The rendered result does not fit the byte budget.
    #[error("result exceeds {0} bytes")]
    Overflow(usize),

    /// The entry is not beneath the supplied base.
    #[error("entry is not under the given base")]
    NotFound,

    /// Push refused while an admin update window is open.
    #[error("admin update in progress")]
    InProgress,

    /// Other resource-layer failures, surfaced verbatim.
    #[error("{0}")]
    Fault(String),
}
