//! Inter-worker dispatch channel.
//!
//! Every call to [`WorkerInvoker::invoke`] addresses a brand new worker
//! instance named by the payload's freshly minted handle. Application-level
//! outcomes come back as a [`WorkerReply`]; channel failures come back as a
//! [`DispatchError`] so the caller can tell the two apart.

use std::sync::Arc;

use aws_sdk_lambda::types::InvocationType;
use futures::future::BoxFuture;

use crate::adapters::transport::Transport;
use crate::handlers::dispatch::{handle_worker_payload, WorkerRuntime};
use crate::runtime::contract::{WorkerPayload, WorkerReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Transport(String),
    FunctionError(String),
    Join(String),
    Serialization(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Transport(message) => write!(f, "dispatch failed: {message}"),
            DispatchError::FunctionError(message) => write!(f, "worker raised: {message}"),
            DispatchError::Join(message) => write!(f, "worker task aborted: {message}"),
            DispatchError::Serialization(message) => {
                write!(f, "worker payload serialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

pub trait WorkerInvoker: Send + Sync {
    fn invoke(&self, payload: WorkerPayload) -> BoxFuture<'static, Result<WorkerReply, DispatchError>>;
}

/// Runs each worker invocation as its own tokio task in this process.
///
/// The task starts as soon as `invoke` is called and keeps running even if
/// the returned future is dropped.
#[derive(Clone)]
pub struct LocalWorkerInvoker {
    transport: Arc<dyn Transport>,
}

impl LocalWorkerInvoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl WorkerInvoker for LocalWorkerInvoker {
    fn invoke(&self, payload: WorkerPayload) -> BoxFuture<'static, Result<WorkerReply, DispatchError>> {
        let runtime = WorkerRuntime::new(self.transport.clone(), Arc::new(self.clone()));
        let task = tokio::spawn(handle_worker_payload(payload, runtime));
        Box::pin(async move {
            task.await
                .map_err(|error| DispatchError::Join(error.to_string()))
        })
    }
}

/// Invokes the worker Lambda synchronously, one invocation per handle.
#[derive(Debug, Clone)]
pub struct LambdaWorkerInvoker {
    lambda_client: aws_sdk_lambda::Client,
    function_name: String,
}

impl LambdaWorkerInvoker {
    pub fn new(lambda_client: aws_sdk_lambda::Client, function_name: impl Into<String>) -> Self {
        Self {
            lambda_client,
            function_name: function_name.into(),
        }
    }
}

impl WorkerInvoker for LambdaWorkerInvoker {
    fn invoke(&self, payload: WorkerPayload) -> BoxFuture<'static, Result<WorkerReply, DispatchError>> {
        let client = self.lambda_client.clone();
        let function_name = self.function_name.clone();

        Box::pin(async move {
            let request_payload = serde_json::to_vec(&payload)
                .map_err(|error| DispatchError::Serialization(error.to_string()))?;

            let output = client
                .invoke()
                .function_name(function_name)
                .invocation_type(InvocationType::RequestResponse)
                .set_payload(Some(request_payload.into()))
                .send()
                .await
                .map_err(|error| {
                    DispatchError::Transport(format!("failed to invoke worker lambda: {error}"))
                })?;

            if let Some(function_error) = output.function_error() {
                return Err(DispatchError::FunctionError(function_error.to_string()));
            }

            let body = output
                .payload()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default();
            decode_worker_reply(&body)
        })
    }
}

pub fn decode_worker_reply(body: &[u8]) -> Result<WorkerReply, DispatchError> {
    serde_json::from_slice::<WorkerReply>(body)
        .map_err(|error| DispatchError::Serialization(format!("invalid worker reply: {error}")))
}
