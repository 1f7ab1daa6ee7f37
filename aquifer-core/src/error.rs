//! Error and Result types.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::io;

/// A specialized `Result` type for aquifer.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which lifecycle hook failed, carried on [`Error::HookFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// The `before_acquire` hook, run inside the lease boundary before the
    /// connection is handed to the caller.
    BeforeAcquire,
    /// The `after_release` hook, run just before the entry is returned to
    /// the pool (or destroyed).
    AfterRelease,
}

impl Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeAcquire => f.write_str("before_acquire"),
            HookPhase::AfterRelease => f.write_str("after_release"),
        }
    }
}

/// A generic error that represents all the ways a pool operation can fail.
#[derive(Debug)]
pub enum Error {
    /// A transport-level error, surfaced from a [`crate::ConnectionFactory`]
    /// or a validation/ping call.
    Io(io::Error),

    /// A `PoolOptions` preflight check failed (e.g. `min_connections >
    /// max_connections`).
    Configuration(String),

    /// The pool has been closed; no further connections will be handed out.
    PoolClosed,

    /// The caller waited past `connection_timeout` without being granted a
    /// connection.
    AcquireTimeout,

    /// The circuit breaker is OPEN; the pool is refusing new connection
    /// attempts without calling the factory.
    CircuitOpen,

    /// The factory failed to create a new connection.
    CreateFailed {
        cause: Box<dyn StdError + Send + Sync>,
        /// Permanent causes (bad credentials, unknown database) bypass the
        /// circuit breaker's backoff and are surfaced immediately rather
        /// than counted toward `failure_threshold`.
        permanent: bool,
    },

    /// A freshly-acquired entry failed validation for every retry attempt.
    ValidationFailed {
        attempts: u32,
        last_cause: Box<dyn StdError + Send + Sync>,
    },

    /// A lifecycle hook returned an error.
    HookFailed {
        phase: HookPhase,
        cause: Box<dyn StdError + Send + Sync>,
    },

    /// A lease was released with a stale or already-consumed token.
    DoubleRelease,
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::CreateFailed { cause, .. } => Some(&**cause),
            Error::ValidationFailed { last_cause, .. } => Some(&**last_cause),
            Error::HookFailed { cause, .. } => Some(&**cause),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Configuration(msg) => write!(f, "invalid pool configuration: {msg}"),
            Error::PoolClosed => f.write_str("attempted to acquire a connection on a closed pool"),
            Error::AcquireTimeout => f.write_str("timed out while waiting for a connection"),
            Error::CircuitOpen => f.write_str("circuit breaker is open; refusing new connections"),
            Error::CreateFailed { cause, permanent } => {
                write!(
                    f,
                    "failed to create a new connection ({}): {cause}",
                    if *permanent { "permanent" } else { "transient" }
                )
            }
            Error::ValidationFailed {
                attempts,
                last_cause,
            } => write!(
                f,
                "connection failed validation after {attempts} attempt(s): {last_cause}"
            ),
            Error::HookFailed { phase, cause } => {
                write!(f, "{phase} hook failed: {cause}")
            }
            Error::DoubleRelease => {
                f.write_str("lease released with a stale token (double release)")
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
