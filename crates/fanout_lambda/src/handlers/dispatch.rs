//! The recursive dispatch worker.
//!
//! One invocation either fetches its whole batch directly or splits it into
//! at most `branching_factor` chunks and hands each chunk to a freshly
//! addressed child worker, then merges the children's outcome maps. Nothing
//! escapes the worker boundary: orchestration errors and panics become a
//! failed reply that still accounts for every target in the batch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;

use crate::adapters::invoke::WorkerInvoker;
use crate::adapters::transport::Transport;
use crate::handlers::leaf::execute_batch;
use crate::handlers::retry::{retry_with_backoff, AttemptOutcome};
use crate::runtime::config::DispatchConfig;
use crate::runtime::contract::{
    Target, ValidationError, WorkerPayload, WorkerReply, MAX_TREE_DEPTH,
};
use crate::runtime::outcome::{
    dispatch_failed_key, is_retryable_status, merge, OutcomeMap, INTERNAL_FAILURE_KEY,
};
use crate::runtime::partition::plan_partitions;
use crate::telemetry::{log_error, log_info, log_warn};

/// Collaborators available to one worker invocation.
#[derive(Clone)]
pub struct WorkerRuntime {
    pub transport: Arc<dyn Transport>,
    pub invoker: Arc<dyn WorkerInvoker>,
}

impl WorkerRuntime {
    pub fn new(transport: Arc<dyn Transport>, invoker: Arc<dyn WorkerInvoker>) -> Self {
        Self { transport, invoker }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Direct,
    Recursive,
}

pub fn select_mode(batch_len: usize, config: &DispatchConfig) -> WorkerMode {
    if batch_len <= config.base_case_threshold {
        WorkerMode::Direct
    } else {
        WorkerMode::Recursive
    }
}

pub async fn handle_worker_payload(payload: WorkerPayload, runtime: WorkerRuntime) -> WorkerReply {
    let started_at = Instant::now();
    let batch_len = payload.targets.len();
    log_info(
        "dispatch_worker",
        "worker_started",
        json!({
            "run_id": payload.run_id.clone(),
            "worker_handle": payload.worker_handle.as_str(),
            "depth": payload.depth,
            "batch_size": batch_len,
        }),
    );

    let result = AssertUnwindSafe(run_worker(&payload, &runtime))
        .catch_unwind()
        .await;

    let failure = match result {
        Ok(Ok(outcomes)) => {
            log_info(
                "dispatch_worker",
                "worker_completed",
                json!({
                    "run_id": payload.run_id.clone(),
                    "worker_handle": payload.worker_handle.as_str(),
                    "depth": payload.depth,
                    "batch_size": batch_len,
                    "duration_ms": started_at.elapsed().as_millis(),
                    "outcomes": outcomes.clone(),
                }),
            );
            return WorkerReply::completed(outcomes);
        }
        Ok(Err(error)) => error.message().to_string(),
        Err(panic_payload) => format!("worker panicked: {}", panic_message(panic_payload.as_ref())),
    };

    log_error(
        "dispatch_worker",
        "worker_failed",
        json!({
            "run_id": payload.run_id.clone(),
            "worker_handle": payload.worker_handle.as_str(),
            "depth": payload.depth,
            "batch_size": batch_len,
            "duration_ms": started_at.elapsed().as_millis(),
            "error": failure,
        }),
    );
    WorkerReply::failed(OutcomeMap::single(INTERNAL_FAILURE_KEY, batch_len as u64))
}

async fn run_worker(
    payload: &WorkerPayload,
    runtime: &WorkerRuntime,
) -> Result<OutcomeMap, ValidationError> {
    if payload.targets.is_empty() {
        return Ok(OutcomeMap::new());
    }

    if payload.depth > MAX_TREE_DEPTH {
        return Err(ValidationError::new(format!(
            "Worker depth {} exceeds MAX_TREE_DEPTH={MAX_TREE_DEPTH}",
            payload.depth
        )));
    }
    payload.config.validate()?;

    match select_mode(payload.targets.len(), &payload.config) {
        WorkerMode::Direct => Ok(execute_batch(
            runtime.transport.as_ref(),
            &payload.targets,
            &payload.config,
        )
        .await),
        WorkerMode::Recursive => fan_out(payload, runtime).await,
    }
}

async fn fan_out(
    payload: &WorkerPayload,
    runtime: &WorkerRuntime,
) -> Result<OutcomeMap, ValidationError> {
    let partitions = plan_partitions(payload.targets.len(), payload.config.branching_factor)?;
    let in_flight = AtomicUsize::new(0);

    let children = partitions.iter().map(|partition| {
        dispatch_child(
            payload,
            &payload.targets[partition.range()],
            runtime.invoker.as_ref(),
            &in_flight,
        )
    });

    Ok(merge(join_all(children).await))
}

/// Dispatches one chunk, re-addressing a new child on every retry.
async fn dispatch_child(
    parent: &WorkerPayload,
    chunk: &[Target],
    invoker: &dyn WorkerInvoker,
    in_flight: &AtomicUsize,
) -> OutcomeMap {
    let config = &parent.config;
    let policy = config.backoff_policy();
    let chunk_len = chunk.len();

    let result = retry_with_backoff(
        &policy,
        config.max_retries,
        |_attempt| {
            let child = parent.child(chunk.to_vec());
            async move {
                in_flight.fetch_add(1, Ordering::SeqCst);
                let reply = invoker.invoke(child).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);

                match reply {
                    Ok(reply)
                        if reply.is_complete(chunk_len) || reply.is_accounted_failure(chunk_len) =>
                    {
                        AttemptOutcome::Done(reply.outcomes)
                    }
                    Ok(reply) if reply.is_ok() => AttemptOutcome::Retry(format!(
                        "Miscounted reply: {} of {chunk_len}",
                        reply.outcomes.total()
                    )),
                    Ok(reply) if is_retryable_status(reply.status_code) => {
                        AttemptOutcome::Retry(format!("Rate limited: {}", reply.status_code))
                    }
                    Ok(reply) => AttemptOutcome::Retry(format!("Other status: {}", reply.status_code)),
                    Err(error) => AttemptOutcome::Retry(error.to_string()),
                }
            }
        },
        || in_flight.load(Ordering::SeqCst),
        |state, reason| {
            log_warn(
                "dispatch_worker",
                "dispatch_retry",
                json!({
                    "run_id": parent.run_id.clone(),
                    "parent_handle": parent.worker_handle.as_str(),
                    "chunk_size": chunk_len,
                    "attempt": state.attempt,
                    "delay_ms": state.last_delay.as_millis(),
                    "reason": reason,
                }),
            );
        },
    )
    .await;

    match result {
        Ok(outcomes) => outcomes,
        Err(exhausted) => {
            log_error(
                "dispatch_worker",
                "dispatch_exhausted",
                json!({
                    "run_id": parent.run_id.clone(),
                    "parent_handle": parent.worker_handle.as_str(),
                    "chunk_size": chunk_len,
                    "attempts": exhausted.attempts,
                    "last_reason": exhausted.last_reason.clone(),
                }),
            );
            OutcomeMap::single(dispatch_failed_key(&exhausted.last_reason), chunk_len as u64)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
