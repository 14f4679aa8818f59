//! Shapes of the `awstest` echo service, written the way generated models look.

use std::collections::BTreeMap;
use std::sync::Arc;

use eventstream_rpc::{
    json_error_factory, JsonModel, OperationError, OperationModelContext, ServiceModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub const ECHO_MESSAGE: &str = "awstest#EchoMessage";
pub const ECHO_STREAM_MESSAGES: &str = "awstest#EchoStreamMessages";
pub const GET_ALL_PRODUCTS: &str = "awstest#GetAllProducts";
pub const GET_ALL_CUSTOMERS: &str = "awstest#GetAllCustomers";
pub const CAUSE_SERVICE_ERROR: &str = "awstest#CauseServiceError";
pub const CAUSE_STREAM_SERVICE_TO_ERROR: &str = "awstest#CauseStreamServiceToError";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f32>,
}

impl JsonModel for Product {
    const MODEL_NAME: &'static str = "awstest#Product";
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: Some(key.into()), value: Some(value.into()) }
    }
}

impl JsonModel for Pair {
    const MODEL_NAME: &'static str = "awstest#Pair";
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl JsonModel for Customer {
    const MODEL_NAME: &'static str = "awstest#Customer";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FruitEnum {
    #[serde(rename = "apl")]
    Apple,
    #[serde(rename = "org")]
    Orange,
    #[serde(rename = "ban")]
    Banana,
    #[serde(rename = "pin")]
    Pineapple,
}

/// One field of every kind the echo service round-trips.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boolean_message: Option<bool>,
    /// Seconds since the epoch with millisecond precision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_message: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_message: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_message: Option<FruitEnum>,
    #[serde(default, with = "blob", skip_serializing_if = "Option::is_none")]
    pub blob_message: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_list_message: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_value_pair_list: Option<Vec<Pair>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_to_value: Option<BTreeMap<String, Product>>,
}

impl MessageData {
    pub fn string(message: impl Into<String>) -> Self {
        Self { string_message: Some(message.into()), ..Self::default() }
    }

    pub fn set_time(&mut self, time: OffsetDateTime) {
        let millis = time.unix_timestamp_nanos() / 1_000_000;
        self.time_message = Some(millis as f64 / 1000.0);
    }

    pub fn time(&self) -> Option<OffsetDateTime> {
        let seconds = self.time_message?;
        let nanos = (seconds * 1000.0).round() as i128 * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }
}

impl JsonModel for MessageData {
    const MODEL_NAME: &'static str = "awstest#MessageData";
}

mod blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        blob: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match blob {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .filter(|encoded| !encoded.is_empty())
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Exactly one member is set on the wire: `{"streamMessage": …}` or `{"keyValuePair": …}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EchoStreamingMessage {
    StreamMessage(MessageData),
    KeyValuePair(Pair),
}

impl JsonModel for EchoStreamingMessage {
    const MODEL_NAME: &'static str = "awstest#EchoStreamingMessage";
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl JsonModel for ServiceError {
    const MODEL_NAME: &'static str = "awstest#ServiceError";
}

impl OperationError for ServiceError {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAllProductsRequest {}

impl JsonModel for GetAllProductsRequest {
    const MODEL_NAME: &'static str = "awstest#GetAllProductsRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAllProductsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<BTreeMap<String, Product>>,
}

impl JsonModel for GetAllProductsResponse {
    const MODEL_NAME: &'static str = "awstest#GetAllProductsResponse";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAllCustomersRequest {}

impl JsonModel for GetAllCustomersRequest {
    const MODEL_NAME: &'static str = "awstest#GetAllCustomersRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAllCustomersResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customers: Option<Vec<Customer>>,
}

impl JsonModel for GetAllCustomersResponse {
    const MODEL_NAME: &'static str = "awstest#GetAllCustomersResponse";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageData>,
}

impl JsonModel for EchoMessageRequest {
    const MODEL_NAME: &'static str = "awstest#EchoMessageRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoMessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageData>,
}

impl JsonModel for EchoMessageResponse {
    const MODEL_NAME: &'static str = "awstest#EchoMessageResponse";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoStreamingRequest {}

impl JsonModel for EchoStreamingRequest {
    const MODEL_NAME: &'static str = "awstest#EchoStreamingRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoStreamingResponse {}

impl JsonModel for EchoStreamingResponse {
    const MODEL_NAME: &'static str = "awstest#EchoStreamingResponse";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CauseServiceErrorRequest {}

impl JsonModel for CauseServiceErrorRequest {
    const MODEL_NAME: &'static str = "awstest#CauseServiceErrorRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CauseServiceErrorResponse {}

impl JsonModel for CauseServiceErrorResponse {
    const MODEL_NAME: &'static str = "awstest#CauseServiceErrorResponse";
}

/// The echo service's error registry: `awstest#ServiceError` is its only modeled error.
pub fn echo_test_service_model() -> ServiceModel {
    let mut model = ServiceModel::new();
    model.assign_model_name_to_error_response(
        ServiceError::MODEL_NAME,
        json_error_factory::<ServiceError>(),
    );
    model
}

/// Operation contexts of the echo service, sharing one service model.
#[derive(Clone, Debug)]
pub struct EchoTestRpcContexts {
    pub echo_message: Arc<OperationModelContext>,
    pub echo_stream_messages: Arc<OperationModelContext>,
    pub get_all_products: Arc<OperationModelContext>,
    pub get_all_customers: Arc<OperationModelContext>,
    pub cause_service_error: Arc<OperationModelContext>,
    pub cause_stream_service_to_error: Arc<OperationModelContext>,
}

impl EchoTestRpcContexts {
    pub fn new(service_model: Arc<ServiceModel>) -> Self {
        let context = |name: &str, build: fn(Arc<ServiceModel>, String) -> OperationModelContext| {
            Arc::new(build(service_model.clone(), name.to_owned()))
        };
        Self {
            echo_message: context(ECHO_MESSAGE, unary::<EchoMessageRequest, EchoMessageResponse>),
            echo_stream_messages: context(ECHO_STREAM_MESSAGES, streaming_echo_context),
            get_all_products: context(
                GET_ALL_PRODUCTS,
                unary::<GetAllProductsRequest, GetAllProductsResponse>,
            ),
            get_all_customers: context(
                GET_ALL_CUSTOMERS,
                unary::<GetAllCustomersRequest, GetAllCustomersResponse>,
            ),
            cause_service_error: context(
                CAUSE_SERVICE_ERROR,
                unary::<CauseServiceErrorRequest, CauseServiceErrorResponse>,
            ),
            cause_stream_service_to_error: context(
                CAUSE_STREAM_SERVICE_TO_ERROR,
                streaming_echo_context,
            ),
        }
    }
}

fn unary<Req: JsonModel, Resp: JsonModel>(
    model: Arc<ServiceModel>,
    name: String,
) -> OperationModelContext {
    OperationModelContext::for_models::<Req, Resp>(model, name)
}

fn streaming_echo_context(model: Arc<ServiceModel>, name: String) -> OperationModelContext {
    OperationModelContext::for_models::<EchoStreamingRequest, EchoStreamingResponse>(model, name)
        .with_streaming_model::<EchoStreamingMessage>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstream_rpc::Shape;
    use time::macros::datetime;

    #[test]
    fn streaming_message_sets_exactly_one_member() {
        let message = EchoStreamingMessage::KeyValuePair(Pair::new("hello", "world"));
        let payload = message.to_payload().expect("encode");
        assert_eq!(payload, br#"{"keyValuePair":{"key":"hello","value":"world"}}"#);

        let decoded: EchoStreamingMessage =
            serde_json::from_slice(br#"{"streamMessage":{"stringMessage":"hi"}}"#).expect("decode");
        assert_eq!(decoded, EchoStreamingMessage::StreamMessage(MessageData::string("hi")));
    }

    #[test]
    fn message_data_uses_wire_names() {
        let data = MessageData {
            enum_message: Some(FruitEnum::Pineapple),
            blob_message: Some(vec![1, 2, 3, 4]),
            string_list_message: Some(vec!["a".to_owned()]),
            ..MessageData::default()
        };
        let payload = data.to_payload().expect("encode");
        let json: Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(json["enumMessage"], "pin");
        assert_eq!(json["blobMessage"], "AQIDBA==");
        assert_eq!(json["stringListMessage"][0], "a");
        assert!(json.get("stringMessage").is_none());
    }

    #[test]
    fn empty_blob_reads_as_unset() {
        let data: MessageData = serde_json::from_str(r#"{"blobMessage":""}"#).expect("decode");
        assert_eq!(data.blob_message, None);
    }

    #[test]
    fn time_keeps_millisecond_precision() {
        let mut data = MessageData::default();
        data.set_time(datetime!(2021-06-15 12:30:45.123456 UTC));
        assert_eq!(data.time(), Some(datetime!(2021-06-15 12:30:45.123 UTC)));
    }

    #[test]
    fn service_error_is_registered() {
        let model = echo_test_service_model();
        assert!(model.has_error_model(ServiceError::MODEL_NAME));
        let error = model
            .allocate_operation_error_from_payload(ServiceError::MODEL_NAME, br#"{"message":"no"}"#)
            .expect("registered")
            .expect("decoded");
        assert_eq!(error.message(), Some("no"));
    }

    #[test]
    fn streaming_contexts_carry_the_event_model() {
        let contexts = EchoTestRpcContexts::new(Arc::new(echo_test_service_model()));
        assert_eq!(contexts.echo_message.operation_name(), ECHO_MESSAGE);
        assert!(!contexts.echo_message.is_streaming());
        assert_eq!(
            contexts.cause_stream_service_to_error.streaming_response_model_name(),
            Some(EchoStreamingMessage::MODEL_NAME)
        );
        assert_eq!(
            contexts.get_all_products.initial_response_model_name(),
            GetAllProductsResponse::MODEL_NAME
        );
    }
}
