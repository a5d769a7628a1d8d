use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DispatchConfig;
use crate::outcome::OutcomeMap;

pub const ORCHESTRATION_SCHEMA_VERSION: &str = "v1";
pub const DEFAULT_AMOUNT: usize = 1;
pub const DEFAULT_MAX_TARGETS: usize = 1_000_000;
pub const MAX_TREE_DEPTH: usize = 64;

/// One unit of external work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Target {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
        }
    }

    pub fn with_id(url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: Some(id.into()),
        }
    }
}

/// One-shot identity of a single worker invocation.
///
/// Handles are minted from 128 random bits and never reused: retrying a
/// failed child dispatch mints a new handle rather than addressing the
/// instance that just failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct WorkerHandle(String);

impl WorkerHandle {
    pub fn mint() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound request as accepted at the external boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchRequest {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub amount: Option<usize>,
    #[serde(default)]
    pub targets: Option<Vec<Target>>,
    #[serde(default, alias = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSource {
    Generated { amount: usize },
    Explicit { targets: Vec<Target> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedFetchRequest {
    pub run_id: String,
    pub source: TargetSource,
    pub total_targets: usize,
    pub batch_size: Option<usize>,
    pub rate_limit: Option<usize>,
}

/// Message carried on the inter-worker dispatch channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPayload {
    pub run_id: String,
    pub worker_handle: WorkerHandle,
    #[serde(default)]
    pub depth: usize,
    pub targets: Vec<Target>,
    pub config: DispatchConfig,
}

impl WorkerPayload {
    /// Payload for a freshly minted root worker.
    pub fn root(run_id: impl Into<String>, targets: Vec<Target>, config: DispatchConfig) -> Self {
        Self {
            run_id: run_id.into(),
            worker_handle: WorkerHandle::mint(),
            depth: 0,
            targets,
            config,
        }
    }

    /// Payload for one child chunk. The config is inherited unchanged.
    pub fn child(&self, targets: Vec<Target>) -> Self {
        Self {
            run_id: self.run_id.clone(),
            worker_handle: WorkerHandle::mint(),
            depth: self.depth + 1,
            targets,
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerReply {
    pub status_code: u16,
    pub outcomes: OutcomeMap,
}

impl WorkerReply {
    pub fn completed(outcomes: OutcomeMap) -> Self {
        Self {
            status_code: 200,
            outcomes,
        }
    }

    pub fn failed(outcomes: OutcomeMap) -> Self {
        Self {
            status_code: 500,
            outcomes,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// True when the outcome counts sum to exactly `batch_len`.
    pub fn accounts_for(&self, batch_len: usize) -> bool {
        self.outcomes.total() == batch_len as u64
    }

    /// A successful worker whose counts cover the whole batch.
    pub fn is_complete(&self, batch_len: usize) -> bool {
        self.is_ok() && self.accounts_for(batch_len)
    }

    /// A failed worker that still attributed every target it was handed.
    pub fn is_accounted_failure(&self, batch_len: usize) -> bool {
        self.status_code == 500 && self.accounts_for(batch_len)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchResponse {
    pub run_id: String,
    pub results: OutcomeMap,
    pub duration: u64,
    pub total_targets: usize,
    pub request_fingerprint: String,
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn normalize_request(
    payload: FetchRequest,
    max_targets: usize,
) -> Result<NormalizedFetchRequest, ValidationError> {
    let run_id = match payload.run_id {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(ValidationError::new("run_id cannot be empty"));
            }
            trimmed
        }
        None => format!("run-{}", WorkerHandle::mint()),
    };

    let source = match (payload.amount, payload.targets) {
        (Some(_), Some(_)) => {
            return Err(ValidationError::new(
                "Provide either amount or targets, not both",
            ));
        }
        (None, None) => TargetSource::Generated {
            amount: DEFAULT_AMOUNT,
        },
        (Some(amount), None) => {
            if amount == 0 {
                return Err(ValidationError::new("amount must be a positive integer"));
            }
            TargetSource::Generated { amount }
        }
        (None, Some(targets)) => {
            if targets.is_empty() {
                return Err(ValidationError::new("targets cannot be empty"));
            }
            if let Some(position) = targets.iter().position(|target| target.url.trim().is_empty())
            {
                return Err(ValidationError::new(format!(
                    "Target at index {position} has an empty url"
                )));
            }
            TargetSource::Explicit { targets }
        }
    };

    let total_targets = match &source {
        TargetSource::Generated { amount } => *amount,
        TargetSource::Explicit { targets } => targets.len(),
    };
    if total_targets > max_targets {
        return Err(ValidationError::new(format!(
            "Request exceeds the maximum of {max_targets} targets"
        )));
    }

    if let Some(0) = payload.batch_size {
        return Err(ValidationError::new(
            "batch_size must be a positive integer",
        ));
    }

    Ok(NormalizedFetchRequest {
        run_id,
        source,
        total_targets,
        batch_size: payload.batch_size,
        rate_limit: payload.rate_limit.filter(|value| *value > 0),
    })
}

/// Expands `amount` targets from a url template.
///
/// `{index}` is replaced with the zero-based position and `{random}` with a
/// fresh draw in `1..=42_000_000`, so generated urls bypass upstream caches.
pub fn generate_targets<R: Rng + ?Sized>(
    amount: usize,
    url_template: &str,
    rng: &mut R,
) -> Vec<Target> {
    (0..amount)
        .map(|index| {
            let mut url = url_template.replace("{index}", &index.to_string());
            while url.contains("{random}") {
                let draw: u32 = rng.gen_range(1..=42_000_000);
                url = url.replacen("{random}", &draw.to_string(), 1);
            }
            Target::with_id(url, (index + 1).to_string())
        })
        .collect()
}

pub fn resolve_targets<R: Rng + ?Sized>(
    request: &NormalizedFetchRequest,
    url_template: &str,
    rng: &mut R,
) -> Vec<Target> {
    match &request.source {
        TargetSource::Generated { amount } => generate_targets(*amount, url_template, rng),
        TargetSource::Explicit { targets } => targets.clone(),
    }
}

pub fn request_fingerprint(request: &NormalizedFetchRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(request));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn normalize_request_rejects_empty_run_id() {
        let request = FetchRequest {
            run_id: Some(" ".to_string()),
            amount: Some(5),
            ..FetchRequest::default()
        };

        let error = normalize_request(request, DEFAULT_MAX_TARGETS).expect_err("request should fail");
        assert_eq!(error.message(), "run_id cannot be empty");
    }

    #[test]
    fn normalize_request_rejects_non_positive_amount() {
        let request = FetchRequest {
            amount: Some(0),
            ..FetchRequest::default()
        };

        let error = normalize_request(request, DEFAULT_MAX_TARGETS).expect_err("request should fail");
        assert_eq!(error.message(), "amount must be a positive integer");
    }

    #[test]
    fn normalize_request_enforces_target_ceiling() {
        let request = FetchRequest {
            amount: Some(9_001),
            ..FetchRequest::default()
        };

        let error = normalize_request(request, 9_000).expect_err("request should fail");
        assert_eq!(error.message(), "Request exceeds the maximum of 9000 targets");
    }

    #[test]
    fn normalize_request_rejects_both_target_sources() {
        let both = FetchRequest {
            amount: Some(1),
            targets: Some(vec![Target::new("https://example.test/a")]),
            ..FetchRequest::default()
        };
        let error = normalize_request(both, DEFAULT_MAX_TARGETS).expect_err("request should fail");
        assert_eq!(error.message(), "Provide either amount or targets, not both");
    }

    #[test]
    fn normalize_request_defaults_to_a_single_generated_target() {
        let normalized =
            normalize_request(FetchRequest::default(), DEFAULT_MAX_TARGETS).expect("request should normalize");

        assert_eq!(
            normalized.source,
            TargetSource::Generated {
                amount: DEFAULT_AMOUNT
            }
        );
        assert_eq!(normalized.total_targets, 1);
    }

    #[test]
    fn normalize_request_rejects_blank_target_urls() {
        let request = FetchRequest {
            targets: Some(vec![Target::new("https://example.test/a"), Target::new("  ")]),
            ..FetchRequest::default()
        };

        let error = normalize_request(request, DEFAULT_MAX_TARGETS).expect_err("request should fail");
        assert_eq!(error.message(), "Target at index 1 has an empty url");
    }

    #[test]
    fn normalize_request_treats_zero_rate_limit_as_disabled() {
        let request = FetchRequest {
            run_id: Some("run-1".to_string()),
            amount: Some(3),
            rate_limit: Some(0),
            batch_size: Some(2),
            ..FetchRequest::default()
        };

        let normalized = normalize_request(request, DEFAULT_MAX_TARGETS).expect("request should pass");
        assert_eq!(normalized.rate_limit, None);
        assert_eq!(normalized.batch_size, Some(2));
        assert_eq!(normalized.total_targets, 3);
    }

    #[test]
    fn fetch_request_accepts_camel_case_aliases() {
        let request: FetchRequest =
            serde_json::from_str(r#"{"amount": 10, "batchSize": 4, "rateLimit": 3}"#)
                .expect("request should parse");
        assert_eq!(request.batch_size, Some(4));
        assert_eq!(request.rate_limit, Some(3));
    }

    #[test]
    fn generated_targets_fill_placeholders_and_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        let targets = generate_targets(3, "https://example.test/{index}?r={random}", &mut rng);

        assert_eq!(targets.len(), 3);
        assert!(targets[2].url.starts_with("https://example.test/2?r="));
        assert!(!targets[0].url.contains("{random}"));
        assert_eq!(targets[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn child_payload_inherits_config_and_mints_fresh_handle() {
        let root = WorkerPayload::root(
            "run-1",
            vec![Target::new("https://example.test/a")],
            DispatchConfig::default(),
        );
        let child = root.child(root.targets.clone());

        assert_ne!(root.worker_handle, child.worker_handle);
        assert_eq!(child.depth, 1);
        assert_eq!(child.config, root.config);
        assert_eq!(child.run_id, "run-1");
    }

    #[test]
    fn fingerprint_is_stable_for_identical_requests() {
        let request = FetchRequest {
            run_id: Some("run-1".to_string()),
            amount: Some(10),
            ..FetchRequest::default()
        };
        let a = normalize_request(request.clone(), DEFAULT_MAX_TARGETS).expect("request should pass");
        let b = normalize_request(request, DEFAULT_MAX_TARGETS).expect("request should pass");

        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
        assert_eq!(request_fingerprint(&a).len(), 64);
    }

    #[test]
    fn accounted_failure_requires_full_attribution() {
        let reply = WorkerReply::failed(OutcomeMap::single("Catch in handling multiple URLs", 4));
        assert!(reply.is_accounted_failure(4));
        assert!(!reply.is_accounted_failure(5));
        assert!(!WorkerReply::completed(OutcomeMap::single("200", 4)).is_accounted_failure(4));
    }

    #[test]
    fn completed_reply_must_cover_the_whole_batch() {
        let reply = WorkerReply::completed(OutcomeMap::single("200", 3));
        assert!(reply.is_complete(3));
        assert!(!reply.is_complete(4));
        assert!(!reply.is_complete(2));
        assert!(!WorkerReply::failed(OutcomeMap::single("500", 3)).is_complete(3));
    }
}
