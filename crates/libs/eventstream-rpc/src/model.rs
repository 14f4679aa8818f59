use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ShapeError;
use crate::shape::{
    json_shape_factory, ErrorFactory, JsonModel, OperationError, Shape, ShapeFactory,
};

/// Error model name to factory, shared by every operation of a service.
///
/// Registration happens while the service client is being built; after that
/// the model is read-only and shared behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ServiceModel {
    errors: HashMap<String, ErrorFactory>,
}

impl ServiceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `model_name`; a later registration replaces an earlier one.
    pub fn assign_model_name_to_error_response(
        &mut self,
        model_name: impl Into<String>,
        factory: ErrorFactory,
    ) {
        self.errors.insert(model_name.into(), factory);
    }

    pub fn has_error_model(&self, model_name: &str) -> bool {
        self.errors.contains_key(model_name)
    }

    /// `None` when no factory is registered for `model_name`.
    pub fn allocate_operation_error_from_payload(
        &self,
        model_name: &str,
        payload: &[u8],
    ) -> Option<Result<Box<dyn OperationError>, ShapeError>> {
        self.errors.get(model_name).map(|factory| factory(payload))
    }
}

/// Static description of one operation: its name and the models it exchanges.
#[derive(Clone, Debug)]
pub struct OperationModelContext {
    service_model: Arc<ServiceModel>,
    operation_name: String,
    request_model_name: String,
    initial_response_model_name: String,
    initial_response_factory: ShapeFactory,
    streaming_response: Option<(String, ShapeFactory)>,
}

impl OperationModelContext {
    pub fn new(
        service_model: Arc<ServiceModel>,
        operation_name: impl Into<String>,
        request_model_name: impl Into<String>,
        initial_response_model_name: impl Into<String>,
        initial_response_factory: ShapeFactory,
    ) -> Self {
        Self {
            service_model,
            operation_name: operation_name.into(),
            request_model_name: request_model_name.into(),
            initial_response_model_name: initial_response_model_name.into(),
            initial_response_factory,
            streaming_response: None,
        }
    }

    /// Context for an operation whose request and response are JSON models.
    pub fn for_models<Req: JsonModel, Resp: JsonModel>(
        service_model: Arc<ServiceModel>,
        operation_name: impl Into<String>,
    ) -> Self {
        Self::new(
            service_model,
            operation_name,
            Req::MODEL_NAME,
            Resp::MODEL_NAME,
            json_shape_factory::<Resp>(),
        )
    }

    pub fn with_streaming_response(
        mut self,
        model_name: impl Into<String>,
        factory: ShapeFactory,
    ) -> Self {
        self.streaming_response = Some((model_name.into(), factory));
        self
    }

    pub fn with_streaming_model<Event: JsonModel>(self) -> Self {
        self.with_streaming_response(Event::MODEL_NAME, json_shape_factory::<Event>())
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn request_model_name(&self) -> &str {
        &self.request_model_name
    }

    pub fn initial_response_model_name(&self) -> &str {
        &self.initial_response_model_name
    }

    pub fn streaming_response_model_name(&self) -> Option<&str> {
        self.streaming_response.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_response.is_some()
    }

    pub fn service_model(&self) -> &ServiceModel {
        &self.service_model
    }

    pub fn allocate_initial_response_from_payload(
        &self,
        payload: &[u8],
    ) -> Result<Box<dyn Shape>, ShapeError> {
        (self.initial_response_factory)(payload)
    }

    /// `None` for operations without a streaming response.
    pub fn allocate_streaming_response_from_payload(
        &self,
        payload: &[u8],
    ) -> Option<Result<Box<dyn Shape>, ShapeError>> {
        self.streaming_response.as_ref().map(|(_, factory)| factory(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{json_error_factory, GenericOperationError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Ask {}

    impl JsonModel for Ask {
        const MODEL_NAME: &'static str = "test#Ask";
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Answer {
        #[serde(default)]
        value: i64,
    }

    impl JsonModel for Answer {
        const MODEL_NAME: &'static str = "test#Answer";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Denied {
        message: String,
    }

    impl JsonModel for Denied {
        const MODEL_NAME: &'static str = "test#Denied";
    }

    impl OperationError for Denied {
        fn message(&self) -> Option<&str> {
            Some(&self.message)
        }
    }

    fn generic_error(payload: &[u8]) -> Result<Box<dyn OperationError>, ShapeError> {
        Ok(Box::new(GenericOperationError::from_payload("test#Override", payload)))
    }

    #[test]
    fn unregistered_error_model_yields_none() {
        let model = ServiceModel::new();
        assert!(model.allocate_operation_error_from_payload("test#Denied", b"{}").is_none());
    }

    #[test]
    fn registered_error_model_decodes() {
        let mut model = ServiceModel::new();
        model.assign_model_name_to_error_response("test#Denied", json_error_factory::<Denied>());
        assert!(model.has_error_model("test#Denied"));

        let err = model
            .allocate_operation_error_from_payload("test#Denied", br#"{"message":"no"}"#)
            .expect("registered")
            .expect("decoded");
        assert_eq!(err.message(), Some("no"));

        let malformed = model.allocate_operation_error_from_payload("test#Denied", b"[]");
        assert!(matches!(malformed, Some(Err(_))));
    }

    #[test]
    fn later_registration_wins() {
        let mut model = ServiceModel::new();
        model.assign_model_name_to_error_response("test#Denied", json_error_factory::<Denied>());
        model.assign_model_name_to_error_response("test#Denied", generic_error);
        let err = model
            .allocate_operation_error_from_payload("test#Denied", b"{}")
            .expect("registered")
            .expect("decoded");
        assert_eq!(err.model_name(), "test#Override");
    }

    #[test]
    fn context_describes_unary_and_streaming_operations() {
        let model = Arc::new(ServiceModel::new());
        let unary = OperationModelContext::for_models::<Ask, Answer>(model.clone(), "test#Ask");
        assert_eq!(unary.operation_name(), "test#Ask");
        assert_eq!(unary.request_model_name(), "test#Ask");
        assert_eq!(unary.initial_response_model_name(), "test#Answer");
        assert!(!unary.is_streaming());
        assert!(unary.allocate_streaming_response_from_payload(b"{}").is_none());

        let response =
            unary.allocate_initial_response_from_payload(br#"{"value":42}"#).expect("answer");
        assert_eq!(response.downcast_ref::<Answer>().map(|a| a.value), Some(42));

        let streaming = unary.clone().with_streaming_model::<Answer>();
        assert_eq!(streaming.streaming_response_model_name(), Some("test#Answer"));
        assert!(matches!(streaming.allocate_streaming_response_from_payload(b"{}"), Some(Ok(_))));
    }
}
