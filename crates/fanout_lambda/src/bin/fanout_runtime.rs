use std::sync::Arc;

use fanout_lambda::adapters::invoke::{LambdaWorkerInvoker, LocalWorkerInvoker, WorkerInvoker};
use fanout_lambda::adapters::transport::{ReqwestTransport, Transport};
use fanout_lambda::handlers::dispatch::{handle_worker_payload, WorkerRuntime};
use fanout_lambda::handlers::entry::{handle_entry_event, EntrySettings};
use fanout_lambda::runtime::contract::WorkerPayload;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct RuntimeDependencies {
    settings: EntrySettings,
    transport: Arc<dyn Transport>,
    invoker: Arc<dyn WorkerInvoker>,
}

impl RuntimeDependencies {
    async fn load() -> Result<Self, Error> {
        let settings = EntrySettings::from_env().map_err(|error| Error::from(error.message()))?;
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(None).map_err(|error| Error::from(error.to_string()))?,
        );

        let invoker: Arc<dyn WorkerInvoker> = match std::env::var("FANOUT_WORKER_FUNCTION") {
            Ok(function_name) if !function_name.trim().is_empty() => {
                let aws_config =
                    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                Arc::new(LambdaWorkerInvoker::new(
                    aws_sdk_lambda::Client::new(&aws_config),
                    function_name,
                ))
            }
            _ => Arc::new(LocalWorkerInvoker::new(transport.clone())),
        };

        Ok(Self {
            settings,
            transport,
            invoker,
        })
    }
}

async fn handle_request(event: LambdaEvent<Value>, deps: &RuntimeDependencies) -> Result<Value, Error> {
    if is_worker_event(&event.payload) {
        let payload: WorkerPayload = serde_json::from_value(event.payload)
            .map_err(|error| Error::from(format!("invalid worker payload: {error}")))?;
        let runtime = WorkerRuntime::new(deps.transport.clone(), deps.invoker.clone());
        let reply = handle_worker_payload(payload, runtime).await;
        serde_json::to_value(reply)
            .map_err(|error| Error::from(format!("failed to serialize worker reply: {error}")))
    } else {
        let response = handle_entry_event(event.payload, &deps.settings, deps.invoker.clone()).await;
        serde_json::to_value(response)
            .map_err(|error| Error::from(format!("failed to serialize api response: {error}")))
    }
}

fn is_worker_event(event: &Value) -> bool {
    event
        .get("worker_handle")
        .and_then(Value::as_str)
        .map(|handle| !handle.is_empty())
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let deps = Arc::new(RuntimeDependencies::load().await?);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = deps.clone();
        async move { handle_request(event, &deps).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detects_worker_payload_shape() {
        let event = json!({
            "run_id": "run-1",
            "worker_handle": "0f",
            "depth": 1,
            "targets": [],
            "config": {}
        });
        assert!(is_worker_event(&event));
    }

    #[test]
    fn api_gateway_events_are_entry_events() {
        let event = json!({
            "httpMethod": "GET",
            "queryStringParameters": {"amount": "10"}
        });
        assert!(!is_worker_event(&event));
    }

    #[test]
    fn blank_handle_is_not_a_worker_event() {
        assert!(!is_worker_event(&json!({"worker_handle": ""})));
    }
}
