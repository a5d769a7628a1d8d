use futures::future::join_all;
use serde_json::json;

use crate::adapters::transport::Transport;
use crate::handlers::retry::{retry_with_backoff, AttemptOutcome};
use crate::runtime::config::DispatchConfig;
use crate::runtime::contract::Target;
use crate::runtime::outcome::{is_retryable_status, response_key, OutcomeMap, RETRIES_EXHAUSTED_KEY};
use crate::telemetry::log_warn;

/// Fetches one target, retrying overload signals and transport errors.
///
/// Always resolves to an outcome key: a 200 maps to the success key, any
/// other terminal status to `"{status}:{excerpt}"`, and a spent attempt
/// budget to [`RETRIES_EXHAUSTED_KEY`].
pub async fn execute_target(
    transport: &dyn Transport,
    target: &Target,
    config: &DispatchConfig,
) -> String {
    let policy = config.backoff_policy();

    let result = retry_with_backoff(
        &policy,
        config.max_retries,
        |_attempt| async move {
            match transport.fetch(target).await {
                Ok(reply) if is_retryable_status(reply.status_code) => {
                    AttemptOutcome::Retry(format!("Rate limited: {}", reply.status_code))
                }
                Ok(reply) => AttemptOutcome::Done(response_key(reply.status_code, &reply.body)),
                Err(error) => AttemptOutcome::Retry(error.to_string()),
            }
        },
        || 0,
        |_, _| {},
    )
    .await;

    match result {
        Ok(key) => key,
        Err(exhausted) => {
            log_warn(
                "leaf_executor",
                "leaf_exhausted",
                json!({
                    "url": target.url.clone(),
                    "target_id": target.id.clone(),
                    "attempts": exhausted.attempts,
                    "last_reason": exhausted.last_reason,
                }),
            );
            RETRIES_EXHAUSTED_KEY.to_string()
        }
    }
}

/// Runs every target concurrently and counts one outcome per target.
pub async fn execute_batch(
    transport: &dyn Transport,
    targets: &[Target],
    config: &DispatchConfig,
) -> OutcomeMap {
    join_all(
        targets
            .iter()
            .map(|target| execute_target(transport, target, config)),
    )
    .await
    .into_iter()
    .collect()
}
