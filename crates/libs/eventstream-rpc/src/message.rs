use crate::header::{find_header, Header};
use std::fmt;
use std::ops::BitOr;

pub const VERSION_HEADER: &str = ":version";
pub const EVENTSTREAM_RPC_VERSION: &str = "0.1.0";
pub const CONTENT_TYPE_HEADER: &str = ":content-type";
pub const CONTENT_TYPE_APPLICATION_JSON: &str = "application/json";
pub const SERVICE_MODEL_TYPE_HEADER: &str = "service-model-type";
/// Names the operation on the first message of a stream.
pub const OPERATION_HEADER: &str = "operation";

/// Stream id reserved for connection-level messages.
pub const CONNECTION_STREAM_ID: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MessageType {
    ApplicationMessage,
    ApplicationError,
    Ping,
    PingResponse,
    Connect,
    ConnectAck,
    ProtocolError,
    InternalError,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplicationMessage => "application_message",
            Self::ApplicationError => "application_error",
            Self::Ping => "ping",
            Self::PingResponse => "ping_response",
            Self::Connect => "connect",
            Self::ConnectAck => "connect_ack",
            Self::ProtocolError => "protocol_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(u32);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    pub const CONNECTION_ACCEPTED: Self = Self(0x1);
    pub const TERMINATE_STREAM: Self = Self(0x2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub headers: Vec<Header>,
    pub payload: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub flags: MessageFlags,
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self { headers: Vec::new(), payload: None, message_type, flags: MessageFlags::NONE }
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn header(&self, name: &str) -> Option<&Header> {
        find_header(&self.headers, name)
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    pub fn terminates_stream(&self) -> bool {
        self.flags.contains(MessageFlags::TERMINATE_STREAM)
    }
}

/// A message addressed to a stream, as exchanged with the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: i32,
    pub message: Message,
}

impl Frame {
    pub fn new(stream_id: i32, message: Message) -> Self {
        Self { stream_id, message }
    }

    pub fn connection(message: Message) -> Self {
        Self::new(CONNECTION_STREAM_ID, message)
    }

    pub fn is_connection_level(&self) -> bool {
        self.stream_id == CONNECTION_STREAM_ID
    }
}
