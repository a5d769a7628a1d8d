use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::adapters::invoke::WorkerInvoker;
use crate::handlers::admission::run_admission;
use crate::runtime::config::{window_ms_from_env, DispatchConfig, DEFAULT_WINDOW_MS};
use crate::runtime::contract::{
    normalize_request, request_fingerprint, resolve_targets, FetchRequest, FetchResponse,
    TargetSource, ValidationError, DEFAULT_MAX_TARGETS, ORCHESTRATION_SCHEMA_VERSION,
};
use crate::telemetry::{log_error, log_info, log_warn};

pub const DEFAULT_URL_TEMPLATE: &str = "https://hacker-news.firebaseio.com/v0/item/{random}.json";

/// Ceiling used when workers run as Lambda invocations. A root payload
/// carries every url of its window and a synchronous invoke is capped at
/// 6 MB, which a much larger list would overflow.
pub const DEFAULT_LAMBDA_MAX_TARGETS: usize = 50_000;

/// Query-string parameters lifted into the request body. Values arrive as
/// strings; every one except `run_id` must parse as a non-negative integer.
const QUERY_PARAMETERS: [&str; 4] = ["amount", "batchSize", "rateLimit", "run_id"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

/// Deployment-level settings for the entry handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySettings {
    pub url_template: String,
    pub max_targets: usize,
    pub window_ms: u64,
    pub base_config: DispatchConfig,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            max_targets: DEFAULT_MAX_TARGETS,
            window_ms: DEFAULT_WINDOW_MS,
            base_config: DispatchConfig::default(),
        }
    }
}

impl EntrySettings {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let base_config = DispatchConfig::default().with_env_overrides(&lookup)?;
        let window_ms = window_ms_from_env(&lookup)?;

        let max_targets = match lookup("FANOUT_MAX_TARGETS") {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<usize>().map_err(|_| {
                ValidationError::new(format!(
                    "FANOUT_MAX_TARGETS must be a valid number, got '{raw}'"
                ))
            })?,
            _ if lookup("FANOUT_WORKER_FUNCTION").is_some_and(|name| !name.trim().is_empty()) => {
                DEFAULT_LAMBDA_MAX_TARGETS
            }
            _ => DEFAULT_MAX_TARGETS,
        };

        Ok(Self {
            url_template: lookup("FANOUT_URL_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string()),
            max_targets,
            window_ms,
            base_config,
        })
    }
}

pub async fn handle_entry_event(
    event: Value,
    settings: &EntrySettings,
    invoker: Arc<dyn WorkerInvoker>,
) -> ApiGatewayResponse {
    log_info(
        "entry_handler",
        "entry_received",
        json!({
            "has_body": event.get("body").is_some(),
            "has_query": event.get("queryStringParameters").is_some_and(|value| !value.is_null()),
        }),
    );

    match process_entry(event, settings, invoker).await {
        Ok(response) => {
            log_info(
                "entry_handler",
                "entry_completed",
                json!({
                    "run_id": response.run_id.clone(),
                    "total_targets": response.total_targets,
                    "duration_ms": response.duration,
                    "results": response.results.clone(),
                }),
            );
            success_response(200, response)
        }
        Err(rejection) => {
            log_warn(
                "entry_handler",
                "entry_rejected",
                json!({
                    "status_code": rejection.status_code,
                    "body": rejection.body.clone(),
                }),
            );
            rejection
        }
    }
}

async fn process_entry(
    event: Value,
    settings: &EntrySettings,
    invoker: Arc<dyn WorkerInvoker>,
) -> Result<FetchResponse, ApiGatewayResponse> {
    let payload = normalize_apigw_event(event).map_err(|message| validation_error_response(&message))?;

    let request = serde_json::from_value::<FetchRequest>(payload)
        .map_err(|error| validation_error_response(&format!("Malformed request: {error}")))?;

    let normalized = normalize_request(request, settings.max_targets)
        .map_err(|error| validation_error_response(error.message()))?;

    if matches!(normalized.source, TargetSource::Generated { .. })
        && settings.url_template.trim().is_empty()
    {
        return Err(error_response(
            500,
            json!({
                "error": "misconfiguration",
                "message": "FANOUT_URL_TEMPLATE must be configured to generate targets",
            }),
        ));
    }

    let mut config = settings.base_config.clone();
    if let Some(batch_size) = normalized.batch_size {
        config = config.with_base_case_threshold(batch_size);
    }
    if let Some(rate_limit) = normalized.rate_limit {
        config = config.with_admission(settings.window_ms, rate_limit);
    }
    config
        .validate()
        .map_err(|error| validation_error_response(error.message()))?;

    let fingerprint = request_fingerprint(&normalized);
    let targets = {
        let mut rng = rand::thread_rng();
        resolve_targets(&normalized, &settings.url_template, &mut rng)
    };

    let started_at = Instant::now();
    let results = run_admission(&normalized.run_id, targets, &config, invoker)
        .await
        .map_err(|error| {
            log_error(
                "entry_handler",
                "admission_failed",
                json!({
                    "run_id": normalized.run_id.clone(),
                    "error": error.message(),
                }),
            );
            error_response(
                500,
                json!({
                    "error": "dispatch_failed",
                    "message": error.message(),
                }),
            )
        })?;

    Ok(FetchResponse {
        run_id: normalized.run_id,
        results,
        duration: started_at.elapsed().as_millis() as u64,
        total_targets: normalized.total_targets,
        request_fingerprint: fingerprint,
        schema_version: ORCHESTRATION_SCHEMA_VERSION.to_string(),
    })
}

/// Reduces an API Gateway proxy event (or a bare request object) to the
/// JSON request body, with query-string parameters filling fields the body
/// leaves unset.
fn normalize_apigw_event(event: Value) -> Result<Value, String> {
    let Some(object) = event.as_object() else {
        return Err("Request payload must be a JSON object".to_string());
    };

    let query = object
        .get("queryStringParameters")
        .cloned()
        .unwrap_or(Value::Null);

    let body = match object.get("body") {
        None if is_proxy_event(object) => json!({}),
        None => event.clone(),
        Some(Value::Null) => json!({}),
        Some(body @ Value::Object(_)) => body.clone(),
        Some(Value::String(text)) if text.trim().is_empty() => json!({}),
        Some(Value::String(text)) => {
            serde_json::from_str(text).map_err(|error| format!("Malformed JSON body: {error}"))?
        }
        Some(_) => return Err("Request body must be a JSON object".to_string()),
    };

    let Value::Object(mut fields) = body else {
        return Err("Request body must be a JSON object".to_string());
    };
    apply_query_parameters(&mut fields, &query)?;
    Ok(Value::Object(fields))
}

fn is_proxy_event(object: &Map<String, Value>) -> bool {
    ["queryStringParameters", "requestContext", "httpMethod"]
        .iter()
        .any(|key| object.contains_key(*key))
}

fn apply_query_parameters(fields: &mut Map<String, Value>, query: &Value) -> Result<(), String> {
    let Some(parameters) = query.as_object() else {
        return Ok(());
    };

    for name in QUERY_PARAMETERS {
        let Some(raw) = parameters.get(name).and_then(Value::as_str) else {
            continue;
        };
        if fields.contains_key(name) || fields.contains_key(&snake_case(name)) {
            continue;
        }
        let value = if name == "run_id" {
            Value::from(raw)
        } else {
            let parsed = raw.trim().parse::<u64>().map_err(|_| {
                format!("{name} must be a non-negative integer, got '{raw}'")
            })?;
            Value::from(parsed)
        };
        fields.insert(name.to_string(), value);
    }
    Ok(())
}

fn snake_case(name: &str) -> String {
    match name {
        "batchSize" => "batch_size".to_string(),
        "rateLimit" => "rate_limit".to_string(),
        other => other.to_string(),
    }
}

fn validation_error_response(message: &str) -> ApiGatewayResponse {
    error_response(
        400,
        json!({
            "error": "validation_error",
            "message": message,
        }),
    )
}

fn success_response(status_code: u16, payload: impl Serialize) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: serde_json::to_string(&payload).expect("response payload should serialize"),
    }
}

fn error_response(status_code: u16, payload: Value) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: payload.to_string(),
    }
}
