use std::sync::Arc;

use eventstream_rpc::{RpcError, RpcStatus};
use test_support::model::{EchoStreamingMessage, MessageData, Pair};
use test_support::{
    init_logging, wait_until, within, EchoTestRpcClient, EchoTestServer, LifecycleRecorder,
    StreamRecorder, STREAM_SERVICE_ERROR_MESSAGE,
};

const STREAM_MESSAGE_COUNT: usize = 10;

async fn connected(server: &EchoTestServer) -> (EchoTestRpcClient, Arc<LifecycleRecorder>) {
    init_logging();
    let client = server.client();
    let lifecycle = Arc::new(LifecycleRecorder::default());
    within(client.connect(lifecycle.clone())).await.unwrap();
    (client, lifecycle)
}

#[tokio::test]
async fn echoes_stream_messages_back_as_events() {
    let server = EchoTestServer::start();
    let (client, _lifecycle) = connected(&server).await;
    let recorder = Arc::new(StreamRecorder::default());

    let operation = client.new_echo_stream_messages(recorder.clone());
    within(operation.activate(&Default::default(), None)).await.unwrap();
    assert!(within(operation.get_result()).await.is_success());

    let sent: Vec<_> = (0..STREAM_MESSAGE_COUNT)
        .map(|n| EchoStreamingMessage::StreamMessage(MessageData::string(format!("Hello {n}"))))
        .collect();
    for message in &sent {
        within(operation.send_stream_message(message, None)).await.unwrap();
    }
    wait_until(|| recorder.events().len() == STREAM_MESSAGE_COUNT).await;
    assert_eq!(recorder.events(), sent);

    within(operation.close(None)).await.unwrap();
    wait_until(|| recorder.closed() == 1).await;
    assert_eq!(operation.inner().message_count(), 1 + STREAM_MESSAGE_COUNT as u32);
    assert_eq!(recorder.other_errors(), 0);
}

#[tokio::test]
async fn echoes_key_value_pair_events() {
    let server = EchoTestServer::start();
    let (client, _lifecycle) = connected(&server).await;
    let recorder = Arc::new(StreamRecorder::default());

    let operation = client.new_echo_stream_messages(recorder.clone());
    within(operation.activate(&Default::default(), None)).await.unwrap();
    within(operation.get_result()).await;

    let pair = EchoStreamingMessage::KeyValuePair(Pair::new("hello", "world"));
    within(operation.send_stream_message(&pair, None)).await.unwrap();
    wait_until(|| !recorder.events().is_empty()).await;
    assert_eq!(recorder.events(), vec![pair]);
}

#[tokio::test]
async fn stream_service_error_reaches_the_declared_handler() {
    let server = EchoTestServer::start();
    let (client, lifecycle) = connected(&server).await;
    let recorder = Arc::new(StreamRecorder::default());

    let operation = client.new_cause_stream_service_to_error(recorder.clone());
    within(operation.activate(&Default::default(), None)).await.unwrap();
    assert!(within(operation.get_result()).await.is_success());

    let trigger = EchoStreamingMessage::StreamMessage(MessageData::string("fail please"));
    within(operation.send_stream_message(&trigger, None)).await.unwrap();
    wait_until(|| recorder.closed() == 1).await;

    let errors = recorder.service_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message.as_deref(), Some(STREAM_SERVICE_ERROR_MESSAGE));
    assert!(recorder.events().is_empty());
    assert_eq!(recorder.other_errors(), 0);
    assert!(operation.is_closed());
    assert!(client.is_connected());
    assert!(lifecycle.errors().is_empty());
}

#[tokio::test]
async fn messages_after_close_are_rejected() {
    let server = EchoTestServer::start();
    let (client, _lifecycle) = connected(&server).await;
    let recorder = Arc::new(StreamRecorder::default());

    let operation = client.new_echo_stream_messages(recorder.clone());
    within(operation.activate(&Default::default(), None)).await.unwrap();
    within(operation.get_result()).await;
    within(operation.close(None)).await.unwrap();

    let message = EchoStreamingMessage::KeyValuePair(Pair::new("late", "message"));
    let sent = within(operation.send_stream_message(&message, None)).await;
    assert_eq!(sent, Err(RpcError::new(RpcStatus::ContinuationClosed)));
    let closed_again = within(operation.close(None)).await;
    assert_eq!(closed_again, Err(RpcError::new(RpcStatus::ContinuationClosed)));

    wait_until(|| recorder.closed() == 1).await;
}

#[tokio::test]
async fn dropping_the_operation_closes_its_stream() {
    let server = EchoTestServer::start();
    let (client, _lifecycle) = connected(&server).await;
    let recorder = Arc::new(StreamRecorder::default());

    let operation = client.new_echo_stream_messages(recorder.clone());
    within(operation.activate(&Default::default(), None)).await.unwrap();
    within(operation.get_result()).await;
    drop(operation);
    wait_until(|| recorder.closed() == 1).await;

    // The connection keeps serving new operations.
    let echo = client.new_echo_message();
    within(echo.activate(&Default::default(), None)).await.unwrap();
    assert!(within(echo.get_result()).await.is_success());
    assert!(recorder.events().is_empty());
    assert_eq!(recorder.closed(), 1);
}

#[tokio::test]
async fn connection_close_ends_every_stream() {
    let server = EchoTestServer::start();
    let (client, lifecycle) = connected(&server).await;
    let first = Arc::new(StreamRecorder::default());
    let second = Arc::new(StreamRecorder::default());

    let one = client.new_echo_stream_messages(first.clone());
    let two = client.new_echo_stream_messages(second.clone());
    for operation in [&one, &two] {
        within(operation.activate(&Default::default(), None)).await.unwrap();
        assert!(within(operation.get_result()).await.is_success());
    }

    client.close();
    wait_until(|| lifecycle.disconnects().len() == 1).await;
    assert_eq!((first.closed(), second.closed()), (1, 1));
    assert!(one.is_closed() && two.is_closed());
}
