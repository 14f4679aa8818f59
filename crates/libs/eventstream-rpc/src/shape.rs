//! Contracts generated service models implement.
//!
//! The engine only needs two things from a shape: its model name and its
//! payload bytes. Decoding goes the other way through factories registered
//! in [`crate::model`].

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::ShapeError;

pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A request, response, event or error model.
pub trait Shape: AsAny + fmt::Debug {
    fn model_name(&self) -> &str;

    fn to_payload(&self) -> Result<Vec<u8>, ShapeError>;
}

/// A modeled error returned by a service operation.
pub trait OperationError: Shape {
    fn message(&self) -> Option<&str> {
        None
    }
}

impl dyn Shape {
    pub fn is<T: Shape>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }

    pub fn downcast_ref<T: Shape>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }
}

impl dyn OperationError {
    pub fn is<T: OperationError>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }

    pub fn downcast_ref<T: OperationError>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }
}

/// Takes ownership of the concrete shape behind `shape`, if it is a `T`.
pub fn downcast_shape<T: Shape>(shape: Box<dyn Shape>) -> Option<Box<T>> {
    shape.into_any().downcast::<T>().ok()
}

/// Serde-backed model with a fixed name, encoded as JSON.
pub trait JsonModel: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const MODEL_NAME: &'static str;
}

impl<T: JsonModel> Shape for T {
    fn model_name(&self) -> &str {
        T::MODEL_NAME
    }

    fn to_payload(&self) -> Result<Vec<u8>, ShapeError> {
        serde_json::to_vec(self)
            .map_err(|source| ShapeError::Encode { model_name: T::MODEL_NAME.to_owned(), source })
    }
}

/// Builds a shape from payload bytes.
pub type ShapeFactory = fn(&[u8]) -> Result<Box<dyn Shape>, ShapeError>;

/// Builds an operation error from payload bytes.
pub type ErrorFactory = fn(&[u8]) -> Result<Box<dyn OperationError>, ShapeError>;

/// Decodes a JSON payload; an empty payload reads as `{}`.
pub fn decode_json<T: JsonModel>(payload: &[u8]) -> Result<T, ShapeError> {
    let payload = if payload.is_empty() { b"{}".as_slice() } else { payload };
    serde_json::from_slice(payload)
        .map_err(|source| ShapeError::Decode { model_name: T::MODEL_NAME.to_owned(), source })
}

pub fn json_shape_factory<T: JsonModel>() -> ShapeFactory {
    decode_json_shape::<T>
}

pub fn json_error_factory<T: JsonModel + OperationError>() -> ErrorFactory {
    decode_json_error::<T>
}

fn decode_json_shape<T: JsonModel>(payload: &[u8]) -> Result<Box<dyn Shape>, ShapeError> {
    Ok(Box::new(decode_json::<T>(payload)?))
}

fn decode_json_error<T: JsonModel + OperationError>(
    payload: &[u8],
) -> Result<Box<dyn OperationError>, ShapeError> {
    Ok(Box::new(decode_json::<T>(payload)?))
}

/// An application error whose model name has no registered factory.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericOperationError {
    model_name: String,
    message: Option<String>,
    body: JsonValue,
}

impl GenericOperationError {
    pub fn from_payload(model_name: &str, payload: &[u8]) -> Self {
        let body = serde_json::from_slice::<JsonValue>(payload).unwrap_or(JsonValue::Null);
        let message = body.get("message").and_then(JsonValue::as_str).map(str::to_owned);
        Self { model_name: model_name.to_owned(), message, body }
    }

    /// The decoded payload, or `Null` if it was not JSON.
    pub fn body(&self) -> &JsonValue {
        &self.body
    }
}

impl Shape for GenericOperationError {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn to_payload(&self) -> Result<Vec<u8>, ShapeError> {
        serde_json::to_vec(&self.body)
            .map_err(|source| ShapeError::Encode { model_name: self.model_name.clone(), source })
    }
}

impl OperationError for GenericOperationError {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
