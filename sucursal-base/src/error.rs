// Error taxonomy for the whole workspace. We want a few things here:
// 1. A single Error type with a backtrace, convertible from any source error.
// 2. A kind so callers (Router, UI) can branch on taxonomy, not string text.
// 3. Centralized logging of errors at the point they're created.

use std::borrow::Cow;
use std::fmt;

use backtrace_error::DynBacktraceError;
use tracing::error;

#[cfg(test)]
use test_log::test;

/// Coarse error taxonomy from the design's error-handling section. Kept
/// small and closed: every caller that needs to distinguish behavior
/// switches on this, never on the message text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Duplicate username/card/code, unknown entity, wrong arity.
    Validation,
    /// ConnectionRefused / NoRouteToHost / Timeout reaching a peer.
    Transport,
    /// Malformed command, unknown verb, oversized frame.
    Protocol,
    /// Constraint violation at apply time.
    Store,
    /// Unrecoverable startup failure (e.g. listener bind).
    Fatal,
    /// Anything else (programmer errors, invariant breaks).
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}

pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);

impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        error!(target: "sucursal", kind = ?kind, "{:?}", err);
        Error {
            kind,
            inner: DynBacktraceError::from(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.inner)
    }
}

impl std::error::Error for Error {}

pub fn err(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

pub fn validation(msg: impl Into<Cow<'static, str>>) -> Error {
    err(ErrorKind::Validation, msg)
}

pub fn protocol(msg: impl Into<Cow<'static, str>>) -> Error {
    err(ErrorKind::Protocol, msg)
}

pub fn transport(msg: impl Into<Cow<'static, str>>) -> Error {
    err(ErrorKind::Transport, msg)
}

pub fn store(msg: impl Into<Cow<'static, str>>) -> Error {
    err(ErrorKind::Store, msg)
}

pub fn fatal(msg: impl Into<Cow<'static, str>>) -> Error {
    err(ErrorKind::Fatal, msg)
}

#[cfg(unix)]
fn is_unreachable(e: &std::io::Error) -> bool {
    // ENETUNREACH / EHOSTUNREACH: std's ErrorKind doesn't expose these
    // portably, but the errno is stable on Linux.
    matches!(e.raw_os_error(), Some(101) | Some(113))
}
#[cfg(not(unix))]
fn is_unreachable(_: &std::io::Error) -> bool {
    false
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        let kind = if is_unreachable(&e) {
            ErrorKind::Transport
        } else {
            match e.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::AddrNotAvailable => ErrorKind::Transport,
                _ => ErrorKind::Internal,
            }
        };
        Error::new(kind, e)
    }
}

#[test]
fn test_error_kind_roundtrips() {
    let e = validation("duplicate card");
    assert_eq!(e.kind(), ErrorKind::Validation);
    assert!(format!("{e}").contains("duplicate card"));
}
