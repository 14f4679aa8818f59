//! Echo service fixtures for exercising `eventstream-rpc` end to end.

mod client;
pub mod model;
mod recorder;
mod server;

use std::future::Future;
use std::time::Duration;

pub use client::{
    default_connection_config, CauseServiceErrorOperation, EchoMessageOperation,
    EchoStreamOperation, EchoTestRpcClient, GetAllCustomersOperation, GetAllProductsOperation,
    ACCEPTED_CLIENT_NAME, DEFAULT_HOST, DEFAULT_PORT,
};
pub use recorder::{LifecycleRecorder, StreamRecorder};
pub use server::{
    customer_list, product_catalogue, EchoTestServer, ACCEPTED_CLIENT_PREFIX,
    SERVICE_ERROR_MESSAGE, SERVICE_ERROR_VALUE, STREAM_SERVICE_ERROR_MESSAGE,
};

const WAIT: Duration = Duration::from_secs(5);

/// Routes `log` output through the test harness; repeated calls are fine.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Awaits `future`, panicking if it takes longer than a few seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

/// Polls `condition` until it holds, under the same deadline as [`within`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
