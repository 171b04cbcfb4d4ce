//! Error types for this crate.

use std::fmt::Display;
use std::sync::Arc;

/// A convenience type alias for a `Result` with an `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by a link implementation.
#[derive(Debug, Clone)]
pub struct Error {
    data: ErrorData,
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The link reported a non-success GATT status.
    Status(GattStatus),
    /// The link is not connected.
    NotConnected,
    /// A device address could not be parsed.
    InvalidAddress,
    /// The driver refused to start the command.
    Rejected,
    /// An unknown or other error.
    Other,
}

#[derive(Debug, Clone)]
enum ErrorData {
    Backend(Arc<dyn std::error::Error + Send + Sync>),
    Simple(ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Backend(error) => error.fmt(f),
            ErrorData::Simple(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<GattStatus> for Error {
    fn from(status: GattStatus) -> Self {
        ErrorKind::Status(status).into()
    }
}

impl Error {
    /// Wraps an error produced by the native driver behind a link.
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error {
            data: ErrorData::Backend(Arc::new(error)),
        }
    }

    /// If this is a backend error, returns a reference to it.
    pub fn get_ref(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match &self.data {
            ErrorData::Backend(error) => Some(&**error),
            ErrorData::Simple(_) => None,
        }
    }

    /// Returns the kind of error. Backend errors are reported as [`ErrorKind::Other`].
    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Backend(_) => ErrorKind::Other,
            ErrorData::Simple(kind) => *kind,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Status(status) => status.fmt(f),
            ErrorKind::NotConnected => f.write_str("not connected"),
            ErrorKind::InvalidAddress => f.write_str("invalid device address"),
            ErrorKind::Rejected => f.write_str("command rejected by the link"),
            ErrorKind::Other => f.write_str("other error"),
        }
    }
}

/// A GATT operation status code as reported by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INVALID_PDU: Self = Self(0x04);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    pub const INVALID_OFFSET: Self = Self(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: Self = Self(0x08);
    pub const PREPARE_QUEUE_FULL: Self = Self(0x09);
    pub const ATTRIBUTE_NOT_FOUND: Self = Self(0x0a);
    pub const ATTRIBUTE_NOT_LONG: Self = Self(0x0b);
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: Self = Self(0x0c);
    pub const INVALID_ATTRIBUTE_LENGTH: Self = Self(0x0d);
    pub const UNLIKELY_ERROR: Self = Self(0x0e);
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x0f);
    pub const UNSUPPORTED_GROUP_TYPE: Self = Self(0x10);
    pub const INSUFFICIENT_RESOURCES: Self = Self(0x11);
    pub const GATT_ERROR: Self = Self(0x85);
    pub const CONNECTION_CONGESTED: Self = Self(0x8f);
    pub const FAILURE: Self = Self(0x101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl Display for GattStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GattStatus::SUCCESS => f.write_str("success"),
            GattStatus::INVALID_HANDLE => f.write_str("invalid handle"),
            GattStatus::READ_NOT_PERMITTED => f.write_str("read not permitted"),
            GattStatus::WRITE_NOT_PERMITTED => f.write_str("write not permitted"),
            GattStatus::INVALID_PDU => f.write_str("invalid PDU"),
            GattStatus::INSUFFICIENT_AUTHENTICATION => f.write_str("insufficient authentication"),
            GattStatus::REQUEST_NOT_SUPPORTED => f.write_str("request not supported"),
            GattStatus::INVALID_OFFSET => f.write_str("invalid offset"),
            GattStatus::INSUFFICIENT_AUTHORIZATION => f.write_str("insufficient authorization"),
            GattStatus::PREPARE_QUEUE_FULL => f.write_str("prepare queue full"),
            GattStatus::ATTRIBUTE_NOT_FOUND => f.write_str("attribute not found"),
            GattStatus::ATTRIBUTE_NOT_LONG => f.write_str("attribute not long"),
            GattStatus::INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                f.write_str("insufficient encryption key size")
            }
            GattStatus::INVALID_ATTRIBUTE_LENGTH => f.write_str("invalid attribute value length"),
            GattStatus::UNLIKELY_ERROR => f.write_str("unlikely error"),
            GattStatus::INSUFFICIENT_ENCRYPTION => f.write_str("insufficient encryption"),
            GattStatus::UNSUPPORTED_GROUP_TYPE => f.write_str("unsupported group type"),
            GattStatus::INSUFFICIENT_RESOURCES => f.write_str("insufficient resources"),
            GattStatus::GATT_ERROR => f.write_str("GATT error"),
            GattStatus::CONNECTION_CONGESTED => f.write_str("connection congested"),
            GattStatus::FAILURE => f.write_str("failure"),
            GattStatus(code) => write!(f, "unknown GATT status ({code:#x})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_covers_unknown_codes() {
        assert_eq!(GattStatus::INVALID_OFFSET.to_string(), "invalid offset");
        assert_eq!(GattStatus(0x42).to_string(), "unknown GATT status (0x42)");
    }

    #[test]
    fn backend_errors_report_other() {
        let error = Error::backend(std::io::Error::other("radio off"));
        assert_eq!(error.kind(), ErrorKind::Other);
        assert_eq!(error.to_string(), "radio off");
        assert!(error.get_ref().is_some());

        let error = Error::from(GattStatus::WRITE_NOT_PERMITTED);
        assert_eq!(
            error.kind(),
            ErrorKind::Status(GattStatus::WRITE_NOT_PERMITTED)
        );
        assert!(error.get_ref().is_none());
    }
}
