use std::fmt;

/// Outcome classes reported by the RPC client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RpcStatus {
    Success,
    NullParameter,
    Uninitialized,
    AllocationError,
    ConnectionSetupFailed,
    ConnectionAccessDenied,
    ConnectionAlreadyEstablished,
    ConnectionClosed,
    ContinuationClosed,
    UnknownProtocolMessage,
    UnmappedData,
    UnsupportedContentType,
    /// The transport layer failed; the numeric code is carried on [`RpcError`].
    Transport,
}

impl RpcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NullParameter => "null parameter",
            Self::Uninitialized => "uninitialized",
            Self::AllocationError => "allocation error",
            Self::ConnectionSetupFailed => "connection setup failed",
            Self::ConnectionAccessDenied => "connection access denied",
            Self::ConnectionAlreadyEstablished => "connection already established",
            Self::ConnectionClosed => "connection closed",
            Self::ContinuationClosed => "continuation closed",
            Self::UnknownProtocolMessage => "unknown protocol message",
            Self::UnmappedData => "unmapped data",
            Self::UnsupportedContentType => "unsupported content type",
            Self::Transport => "transport error",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status plus the transport error code that produced it, if any.
///
/// `transport_code` is zero unless `status` is [`RpcStatus::Transport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{status}{}", transport_suffix(.transport_code))]
pub struct RpcError {
    status: RpcStatus,
    transport_code: i32,
}

fn transport_suffix(code: &i32) -> String {
    match TransportError::describe_code(*code) {
        Some(name) => format!(" ({name}, code {code})"),
        None if *code != 0 => format!(" (code {code})"),
        None => String::new(),
    }
}

impl RpcError {
    pub const fn new(status: RpcStatus) -> Self {
        Self { status, transport_code: 0 }
    }

    pub const fn success() -> Self {
        Self::new(RpcStatus::Success)
    }

    pub const fn transport(code: i32) -> Self {
        Self { status: RpcStatus::Transport, transport_code: code }
    }

    pub fn status(&self) -> RpcStatus {
        self.status
    }

    pub fn transport_code(&self) -> i32 {
        self.transport_code
    }

    pub fn is_success(&self) -> bool {
        self.status == RpcStatus::Success
    }

    pub fn status_to_string(&self) -> String {
        self.to_string()
    }
}

impl From<RpcStatus> for RpcError {
    fn from(status: RpcStatus) -> Self {
        Self::new(status)
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        Self::transport(err.code())
    }
}

impl From<&TransportError> for RpcError {
    fn from(err: &TransportError) -> Self {
        Self::transport(err.code())
    }
}

/// Errors raised by a [`crate::transport::Connector`] or its link halves.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection refused: {reason}")]
    ConnectionRefused { reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid state: {detail}")]
    InvalidState { detail: String },

    #[error("protocol error: {detail}")]
    ProtocolError { detail: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
}

impl TransportError {
    pub const CONNECTION_REFUSED: i32 = 1;
    pub const CONNECTION_CLOSED: i32 = 2;
    pub const INVALID_STATE: i32 = 3;
    pub const PROTOCOL_ERROR: i32 = 4;
    pub const IO: i32 = 5;
    pub const INVALID_CONFIG: i32 = 6;

    /// Stable numeric code carried through [`RpcError::transport_code`].
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionRefused { .. } => Self::CONNECTION_REFUSED,
            Self::ConnectionClosed => Self::CONNECTION_CLOSED,
            Self::InvalidState { .. } => Self::INVALID_STATE,
            Self::ProtocolError { .. } => Self::PROTOCOL_ERROR,
            Self::Io { .. } => Self::IO,
            Self::InvalidConfig { .. } => Self::INVALID_CONFIG,
        }
    }

    pub fn describe_code(code: i32) -> Option<&'static str> {
        match code {
            Self::CONNECTION_REFUSED => Some("connection refused"),
            Self::CONNECTION_CLOSED => Some("connection closed"),
            Self::INVALID_STATE => Some("invalid state"),
            Self::PROTOCOL_ERROR => Some("protocol error"),
            Self::IO => Some("io error"),
            Self::INVALID_CONFIG => Some("invalid config"),
            _ => None,
        }
    }

    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::InvalidState { detail: detail.into() }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::ProtocolError { detail: detail.into() }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self::ConnectionRefused { reason: reason.into() }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

/// Failures converting between shapes and payload bytes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ShapeError {
    #[error("failed to encode {model_name}: {source}")]
    Encode {
        model_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {model_name}: {source}")]
    Decode {
        model_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ShapeError {
    pub fn model_name(&self) -> &str {
        match self {
            Self::Encode { model_name, .. } | Self::Decode { model_name, .. } => model_name,
        }
    }
}
