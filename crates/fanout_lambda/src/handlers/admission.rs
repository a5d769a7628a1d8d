//! Root-level admission control.
//!
//! Splits the full target list into windows of `per_window` targets and
//! starts one root worker per window, spacing window starts by at least
//! `window_ms`. With admission off the whole list goes to a single root.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::time::{sleep_until, Instant};

use crate::adapters::invoke::WorkerInvoker;
use crate::runtime::config::DispatchConfig;
use crate::runtime::contract::{Target, ValidationError, WorkerPayload};
use crate::runtime::outcome::{merge, OutcomeMap, TREE_FAILURE_KEY};
use crate::runtime::partition::plan_windows;
use crate::telemetry::{log_error, log_info};

pub async fn run_admission(
    run_id: &str,
    targets: Vec<Target>,
    config: &DispatchConfig,
    invoker: Arc<dyn WorkerInvoker>,
) -> Result<OutcomeMap, ValidationError> {
    if targets.is_empty() {
        return Ok(OutcomeMap::new());
    }

    let admission = config.admission;
    let windows = plan_windows(targets.len(), admission.map(|window| window.per_window))?;
    let spacing = Duration::from_millis(admission.map_or(0, |window| window.window_ms));
    let window_count = windows.len();

    let mut trees = Vec::with_capacity(window_count);
    for (position, window) in windows.iter().enumerate() {
        let window_started = Instant::now();
        let payload = WorkerPayload::root(
            run_id,
            targets[window.range()].to_vec(),
            config.clone(),
        );

        log_info(
            "admission_scheduler",
            "window_dispatched",
            json!({
                "run_id": run_id,
                "window": window.chunk_id,
                "windows": window_count,
                "window_size": window.len(),
                "worker_handle": payload.worker_handle.as_str(),
            }),
        );

        let tree_size = window.len() as u64;
        let tree_handle = payload.worker_handle.to_string();
        let task = tokio::spawn(invoker.invoke(payload));
        trees.push(async move { (tree_handle, tree_size, task.await) });

        if position + 1 < window_count {
            sleep_until(window_started + spacing).await;
        }
    }

    let outcomes = join_all(trees).await.into_iter().map(|(handle, size, joined)| {
        let failure = match joined {
            Ok(Ok(reply))
                if reply.is_complete(size as usize) || reply.is_accounted_failure(size as usize) =>
            {
                return reply.outcomes;
            }
            Ok(Ok(reply)) if reply.is_ok() => format!(
                "root worker accounted for {} of {size} targets",
                reply.outcomes.total()
            ),
            Ok(Ok(reply)) => format!("root worker replied {}", reply.status_code),
            Ok(Err(error)) => error.to_string(),
            Err(error) => format!("root worker task aborted: {error}"),
        };
        log_error(
            "admission_scheduler",
            "tree_failed",
            json!({
                "run_id": run_id,
                "worker_handle": handle,
                "tree_size": size,
                "error": failure,
            }),
        );
        OutcomeMap::single(TREE_FAILURE_KEY, size)
    });

    Ok(merge(outcomes.collect::<Vec<_>>()))
}
