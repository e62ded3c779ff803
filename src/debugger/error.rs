use crate::debugger::address::RemoteAddress;
use crate::debugger::remote::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error("no process is being debugged")]
    NoProcess,
    #[error("process already attached")]
    AlreadyAttached,

    // --------------------------------- remote agent errors ---------------------------------------
    #[error("remote call `{0}` failed: {1}")]
    Remote(&'static str, AgentError),
    #[error("connection to target lost")]
    Disconnected,

    // --------------------------------- debugger entity not found ---------------------------------
    #[error("thread {0:#X} not found")]
    ThreadNotFound(u64),
    #[error("no breakpoint at address {0}")]
    BreakpointNotFound(RemoteAddress),
    #[error("register index {0} out of range")]
    RegisterIndex(usize),
    #[error("unknown register {0:?}")]
    RegisterNameNotFound(String),

    // --------------------------------- step engine errors ----------------------------------------
    #[error("program counter is unavailable for thread {0:#X}")]
    NoProgramCounter(u64),
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole session.
    ///
    /// Remote-call failures are soft: the host is expected to detect repeated
    /// failures and terminate the debug session itself.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::NoProcess => false,
            Error::AlreadyAttached => false,
            Error::Remote(_, _) => false,
            Error::ThreadNotFound(_) => false,
            Error::BreakpointNotFound(_) => false,
            Error::RegisterIndex(_) => false,
            Error::RegisterNameNotFound(_) => false,
            Error::NoProgramCounter(_) => false,

            // currently fatal errors
            Error::Disconnected => true,
        }
    }
}

/// Closed taxonomy for breakpoint feasibility checks, advisory to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BptError {
    #[error("unsupported breakpoint kind on this target")]
    BadType,
    #[error("hardware watchpoints must be 8 byte aligned")]
    BadAlign,
    #[error("a single hardware watchpoint may be armed at a time")]
    TooMany,
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "bridge", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "bridge", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
