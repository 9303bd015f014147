//! Crate-wide error type.
//!
//! A flat, `#[non_exhaustive]` kind enum with `displaydoc::Display`
//! messages, plus a free-form `message` carried alongside for context from
//! the failing layer (D-Bus error text, JSON parse position, etc).

use std::fmt;

/// IPC-level failure reasons, taken from the cloud-client framing protocol.
#[derive(Clone, Copy, Debug, displaydoc::Display, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum IpcErrorKind {
    /// invalid JSON in received packet
    InvalidJson,
    /// command packet is missing an `op` field
    MissingOp,
    /// received packet exceeds the receive-buffer cap
    OversizedPacket,
    /// unknown protocol name
    UnknownProtocol,
    /// unknown property name
    UnknownProperty,
    /// invalid arguments for operation
    InvalidArgs,
    /// value type does not match the property's declared type
    InvalidType,
    /// value rejected by the property
    BadValue,
}

impl IpcErrorKind {
    /// The wire error code emitted in a NAK for this failure, e.g. `INVAL_JSON`.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::InvalidJson => "INVAL_JSON",
            Self::MissingOp => "OP",
            Self::OversizedPacket => "PKTSIZE",
            Self::UnknownProtocol => "UNKWN_PROTO",
            Self::UnknownProperty => "UNKWN_PROP",
            Self::InvalidArgs => "INVAL_ARGS",
            Self::InvalidType => "INVAL_TYPE",
            Self::BadValue => "BAD_VAL",
        }
    }
}

/// Internal error kind, analogous to `bluer::InternalErrorKind`.
#[derive(Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum InternalErrorKind {
    /// invalid UUID: {0}
    InvalidUuid(String),
    /// D-Bus error: {0}
    DBus(String),
    /// I/O error: {0}
    Io(std::io::Error),
    /// JSON error: {0}
    Json(serde_json::Error),
    /// persistence error: {0}
    Persistence(String),
}

/// Gateway core error kind.
#[derive(Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum ErrorKind {
    /// duplicate template for service UUID {0}
    DuplicateTemplate(crate::ident::Uuid),
    /// node address {0} already managed
    DuplicateNode(String),
    /// property {0}/{1}/{2} already defined with a different type or direction
    PropertyRedefined(String, String, String),
    /// value too large for property buffer
    ValueTooLarge,
    /// property direction does not permit this operation
    WrongDirection,
    /// node {0} is unknown
    UnknownNode(String),
    /// file transfer queue is full
    QueueFull,
    /// IPC framing error: {0}
    Ipc(IpcErrorKind),
    /// internal error: {0}
    Internal(InternalErrorKind),
}

/// Gateway core error.
#[derive(Debug)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Additional human-readable detail.
    pub message: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<dbus::Error> for Error {
    fn from(err: dbus::Error) -> Self {
        Self::with_message(
            ErrorKind::Internal(InternalErrorKind::DBus(err.name().unwrap_or_default().to_string())),
            err.message().unwrap_or_default(),
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Internal(InternalErrorKind::Io(err)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal(InternalErrorKind::Json(err)))
    }
}

/// Gateway core result.
pub type Result<T> = std::result::Result<T, Error>;
