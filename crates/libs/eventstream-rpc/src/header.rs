use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Typed value carried by an event-stream header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Timestamp(#[serde(with = "time::serde::timestamp")] OffsetDateTime),
    String(String),
    ByteBuf(Vec<u8>),
    Uuid([u8; 16]),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Timestamp(_) => "timestamp",
            Self::String(_) => "string",
            Self::ByteBuf(_) => "byte_buf",
            Self::Uuid(_) => "uuid",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    name: String,
    value: HeaderValue,
}

impl Header {
    pub fn new(name: impl Into<String>, value: HeaderValue) -> Self {
        Self { name: name.into(), value }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, HeaderValue::String(value.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }

    /// The value as a string, if this is a string header.
    pub fn value_as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// First header in `headers` whose name matches exactly.
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a Header> {
    headers.iter().find(|header| header.name == name)
}

/// Extra headers and an optional payload merged into the CONNECT message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAmendment {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    payload: Option<Vec<u8>>,
}

impl MessageAmendment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: Vec<Header>) -> Self {
        Self { headers, payload: None }
    }

    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self { headers: Vec::new(), payload: Some(payload) }
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    pub fn set_payload(&mut self, payload: Option<Vec<u8>>) {
        self.payload = payload;
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn into_parts(self) -> (Vec<Header>, Option<Vec<u8>>) {
        (self.headers, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_compare_by_name_and_value() {
        assert_eq!(Header::string("client-name", "a"), Header::string("client-name", "a"));
        assert_ne!(Header::string("client-name", "a"), Header::string("client-name", "b"));
        assert_ne!(
            Header::string("client-name", "a"),
            Header::new("client-name", HeaderValue::ByteBuf(b"a".to_vec()))
        );
    }

    #[test]
    fn find_header_returns_first_match() {
        let headers = vec![
            Header::new("count", HeaderValue::Int32(7)),
            Header::string("name", "first"),
            Header::string("name", "second"),
        ];
        assert_eq!(find_header(&headers, "name").and_then(Header::value_as_str), Some("first"));
        assert_eq!(find_header(&headers, "count").and_then(Header::value_as_str), None);
        assert!(find_header(&headers, "missing").is_none());
    }

    #[test]
    fn amendment_accumulates_headers() {
        let mut amendment = MessageAmendment::with_payload(b"{}".to_vec());
        amendment.add_header(Header::string("client-name", "accepted.testy_mc_testerson"));
        assert_eq!(amendment.headers().len(), 1);
        assert_eq!(amendment.payload(), Some(&b"{}"[..]));

        amendment.set_payload(None);
        let (headers, payload) = amendment.into_parts();
        assert_eq!(headers[0].name(), "client-name");
        assert!(payload.is_none());
    }

    #[test]
    fn header_values_round_trip_through_toml() {
        let amendment = MessageAmendment::with_headers(vec![
            Header::string("client-name", "x"),
            Header::new("flag", HeaderValue::Bool(true)),
        ]);
        let encoded = toml::to_string(&amendment).expect("encode");
        let decoded: MessageAmendment = toml::from_str(&encoded).expect("decode");
        assert_eq!(decoded, amendment);
    }
}
