//! Error types for this crate.

use std::fmt::Display;

use futures_channel::oneshot;
use gattlink::{ConnectionState, GattStatus};

/// A convenience type alias for a `Result` with an `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate.
#[derive(Debug, Clone)]
pub struct Error {
    data: ErrorData,
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The link reported a non-success status for a correlated request.
    OperationFailed(GattStatus),
    /// The operation requires a connection state the session is not in.
    InvalidState(ConnectionState),
    /// An event referenced an attribute that is not in the current registry.
    RoutingMiss,
    /// The link is not connected.
    NotConnected,
    /// A device address could not be parsed.
    InvalidAddress,
    /// The link refused to start the command.
    Rejected,
    /// The operation was canceled.
    Canceled,
    /// A broadcast channel lagged.
    Lagged,
    /// An unknown or other error.
    Other,
}

#[derive(Debug, Clone)]
enum ErrorData {
    Link(gattlink::Error),
    Simple(ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Link(error) => error.fmt(f),
            ErrorData::Simple(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<gattlink::Error> for Error {
    fn from(error: gattlink::Error) -> Self {
        Error {
            data: ErrorData::Link(error),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<gattlink::error::ErrorKind> for Error {
    fn from(kind: gattlink::error::ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind.into()),
        }
    }
}

impl From<oneshot::Canceled> for Error {
    fn from(_value: oneshot::Canceled) -> Self {
        ErrorKind::Canceled.into()
    }
}

impl From<async_broadcast::RecvError> for Error {
    fn from(_value: async_broadcast::RecvError) -> Self {
        ErrorKind::Lagged.into()
    }
}

impl Error {
    pub(crate) fn operation_failed(status: GattStatus) -> Self {
        ErrorKind::OperationFailed(status).into()
    }

    /// Converts a status reported by the link into a result.
    pub(crate) fn check(status: GattStatus) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::operation_failed(status))
        }
    }

    /// If this error came from the link, returns a reference to the underlying `gattlink::Error`.
    pub fn get_ref(&self) -> Option<&gattlink::Error> {
        match &self.data {
            ErrorData::Link(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// If this error came from the link, returns the underlying `gattlink::Error`.
    pub fn into_inner(self) -> Option<gattlink::Error> {
        match self.data {
            ErrorData::Link(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Link(error) => error.kind().into(),
            ErrorData::Simple(kind) => *kind,
        }
    }

    /// The status code carried by an [`ErrorKind::OperationFailed`] error.
    pub fn status(&self) -> Option<GattStatus> {
        match self.kind() {
            ErrorKind::OperationFailed(status) => Some(status),
            _ => None,
        }
    }
}

impl From<gattlink::error::ErrorKind> for ErrorKind {
    fn from(kind: gattlink::error::ErrorKind) -> Self {
        match kind {
            gattlink::error::ErrorKind::Status(status) => ErrorKind::OperationFailed(status),
            gattlink::error::ErrorKind::NotConnected => ErrorKind::NotConnected,
            gattlink::error::ErrorKind::InvalidAddress => ErrorKind::InvalidAddress,
            gattlink::error::ErrorKind::Rejected => ErrorKind::Rejected,
            gattlink::error::ErrorKind::Other => ErrorKind::Other,
        }
    }
}

impl TryFrom<ErrorKind> for gattlink::error::ErrorKind {
    type Error = ErrorKind;

    fn try_from(kind: ErrorKind) -> std::result::Result<Self, Self::Error> {
        match kind {
            ErrorKind::OperationFailed(status) => Ok(gattlink::error::ErrorKind::Status(status)),
            ErrorKind::NotConnected => Ok(gattlink::error::ErrorKind::NotConnected),
            ErrorKind::InvalidAddress => Ok(gattlink::error::ErrorKind::InvalidAddress),
            ErrorKind::Rejected => Ok(gattlink::error::ErrorKind::Rejected),
            ErrorKind::Other => Ok(gattlink::error::ErrorKind::Other),
            ErrorKind::InvalidState(_)
            | ErrorKind::RoutingMiss
            | ErrorKind::Canceled
            | ErrorKind::Lagged => Err(kind),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::OperationFailed(status) => write!(f, "operation failed: {status}"),
            ErrorKind::InvalidState(state) => write!(f, "invalid connection state: {state:?}"),
            ErrorKind::RoutingMiss => f.write_str("attribute not found in the current services"),
            ErrorKind::NotConnected => gattlink::error::ErrorKind::NotConnected.fmt(f),
            ErrorKind::InvalidAddress => gattlink::error::ErrorKind::InvalidAddress.fmt(f),
            ErrorKind::Rejected => gattlink::error::ErrorKind::Rejected.fmt(f),
            ErrorKind::Other => gattlink::error::ErrorKind::Other.fmt(f),
            ErrorKind::Canceled => f.write_str("canceled"),
            ErrorKind::Lagged => f.write_str("lagged"),
        }
    }
}
