use thiserror::Error;

/// Errors produced by the adapter's core engine (transport, protocol,
/// session, breakpoints, variables). Front ends (DAP surface, console
/// surface) wrap these in `anyhow` at their own boundary, same as
/// bugstalker's binaries wrap `debugger::Error`.
#[derive(Debug, Error)]
pub enum Error {
    // --------------------------------- transport ------------------------------------------------
    #[error("failed to connect to hgdb at {0}: {1}")]
    ConnectFailed(String, String),
    #[error("session ended: {0}")]
    SessionEnded(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // --------------------------------- protocol -------------------------------------------------
    #[error("malformed message from hgdb: {0}")]
    MalformedMessage(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("response missing required field `{0}`")]
    MissingField(&'static str),

    // --------------------------------- breakpoints ----------------------------------------------
    #[error("no breakpoint id known for instance {0}")]
    NoBreakpointForInstance(u64),
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(u32),

    // --------------------------------- variables -------------------------------------------------
    #[error("unknown variablesReference {0}")]
    UnknownVariablesReference(i64),
    #[error("variable handle is malformed: {0}")]
    MalformedHandle(String),
    #[error("cannot set a non-integer value: {0}")]
    NonIntegerValue(String),
    #[error("no breakpoint id in scope for `set`")]
    NoScopeForSet,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Hint to a front end whether the session must end after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectFailed(..) | Error::SessionEnded(_))
    }
}

/// Transforms `Result` into `Option` and logs a warning if it occurs.
/// Mirrors the teacher's `weak_error!`: a failed variable render or a
/// dropped malformed frame should not abort the session (spec.md §7).
/// An optional second argument picks the log target (default `"adapter"`),
/// so call sites can log under the component they actually describe
/// (`"breakpoint"`, `"protocol"`, ...).
#[macro_export]
macro_rules! weak_error {
    ($res:expr) => {
        $crate::weak_error!($res, "adapter")
    };
    ($res:expr, $target:literal) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: $target, "{e:#}");
                None
            }
        }
    };
}

/// Like [`weak_error`] but logs at `debug` level instead of `warn`.
#[macro_export]
macro_rules! muted_error {
    ($res:expr) => {
        $crate::muted_error!($res, "adapter")
    };
    ($res:expr, $target:literal) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!(target: $target, "{e:#}");
                None
            }
        }
    };
}
