use alloc::borrow::Cow;

/// The category an [`ErrorKind`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection and delivery failures of the underlying medium.
    Transport,
    /// Data-shape problems while encoding or decoding messages.
    Protocol,
    /// Sensor and actuator bookkeeping failures.
    Registry,
    /// An operation invoked in the wrong lifecycle state.
    State,
    /// Invalid construction-time values.
    Configuration,
}

impl core::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
            Self::Registry => "Registry",
            Self::State => "State",
            Self::Configuration => "Configuration",
        }
        .fmt(f)
    }
}

/// All error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport has no active session.
    NotConnected,
    /// Failure while establishing or tearing down a transport session.
    Connection,
    /// The transport failed to deliver a message.
    SendFailure,
    /// The transport failed to subscribe to or unsubscribe from a channel.
    Subscription,
    /// A channel does not follow the naming scheme of the node.
    UnrecognizedChannel,
    /// A payload cannot be decoded.
    MalformedPayload,
    /// A value cannot be serialized.
    Encoding,
    /// An entity with the same identifier is already registered.
    DuplicateId,
    /// No entity is registered with the given identifier.
    NotFound,
    /// No sensor is registered with the given identifier.
    UnknownSensor,
    /// The communication has already left its initial state.
    AlreadyConnected,
    /// The operation is not allowed in the current state.
    InvalidState,
    /// Device information is invalid.
    InvalidDeviceInfo,
    /// An identifier cannot be used to build a channel.
    InvalidId,
}

impl ErrorKind {
    /// Returns the [`ErrorCategory`] of an [`ErrorKind`].
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::NotConnected | Self::Connection | Self::SendFailure | Self::Subscription => {
                ErrorCategory::Transport
            }
            Self::UnrecognizedChannel | Self::MalformedPayload | Self::Encoding => {
                ErrorCategory::Protocol
            }
            Self::DuplicateId | Self::NotFound | Self::UnknownSensor => ErrorCategory::Registry,
            Self::AlreadyConnected | Self::InvalidState => ErrorCategory::State,
            Self::InvalidDeviceInfo | Self::InvalidId => ErrorCategory::Configuration,
        }
    }

    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::NotConnected => "Not Connected",
            Self::Connection => "Connection",
            Self::SendFailure => "Send Failure",
            Self::Subscription => "Subscription",
            Self::UnrecognizedChannel => "Unrecognized Channel",
            Self::MalformedPayload => "Malformed Payload",
            Self::Encoding => "Encoding",
            Self::DuplicateId => "Duplicate Identifier",
            Self::NotFound => "Not Found",
            Self::UnknownSensor => "Unknown Sensor",
            Self::AlreadyConnected => "Already Connected",
            Self::InvalidState => "Invalid State",
            Self::InvalidDeviceInfo => "Invalid Device Information",
            Self::InvalidId => "Invalid Identifier",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.description().fmt(f)
    }
}

/// A library error.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.kind.category(), self.description)
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks whether the error belongs to the [`ErrorCategory::Protocol`]
    /// category.
    ///
    /// Protocol errors only concern a single message and never invalidate
    /// the communication.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Protocol)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Encoding, alloc::format!("Json error caused by {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::{Error, ErrorCategory, ErrorKind};

    #[test]
    fn kinds_categories() {
        assert_eq!(ErrorKind::SendFailure.category(), ErrorCategory::Transport);
        assert_eq!(
            ErrorKind::UnrecognizedChannel.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ErrorKind::UnknownSensor.category(), ErrorCategory::Registry);
        assert_eq!(ErrorKind::AlreadyConnected.category(), ErrorCategory::State);
        assert_eq!(ErrorKind::InvalidId.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn display_error() {
        let error = Error::new(ErrorKind::DuplicateId, "`temp` is already registered");

        assert_eq!(error.kind(), ErrorKind::DuplicateId);
        assert!(!error.is_recoverable());
        assert_eq!(
            error.to_string(),
            "Duplicate Identifier (Registry): `temp` is already registered"
        );
    }

    #[test]
    fn protocol_errors_are_recoverable() {
        let error = Error::new(ErrorKind::MalformedPayload, "bad frame");
        assert!(error.is_recoverable());
    }
}
