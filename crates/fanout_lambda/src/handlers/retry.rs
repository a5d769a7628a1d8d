//! Bounded fetch-classify-retry loop shared by leaf fetches and child
//! dispatches.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::runtime::backoff::BackoffPolicy;

pub enum AttemptOutcome<T> {
    Done(T),
    Retry(String),
}

/// Transient state of one retry loop; dropped when the loop returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub last_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last_reason: String,
}

/// Runs `operation` until it returns [`AttemptOutcome::Done`] or
/// `max_attempts` attempts have been made.
///
/// `local_load` is sampled right before each sleep and feeds the policy's
/// overload stretch. `on_retry` sees the state after the delay was chosen.
pub async fn retry_with_backoff<T, F, Fut, L, R>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    mut operation: F,
    local_load: L,
    mut on_retry: R,
) -> Result<T, RetriesExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
    L: Fn() -> usize,
    R: FnMut(&RetryState, &str),
{
    let mut state = RetryState::default();

    loop {
        let reason = match operation(state.attempt + 1).await {
            AttemptOutcome::Done(value) => return Ok(value),
            AttemptOutcome::Retry(reason) => reason,
        };

        state.attempt += 1;
        if state.attempt >= max_attempts {
            return Err(RetriesExhausted {
                attempts: state.attempt,
                last_reason: reason,
            });
        }

        state.last_delay = {
            let mut rng = rand::thread_rng();
            policy.next_delay(state.attempt, local_load(), &mut rng)
        };
        on_retry(&state, &reason);
        sleep(state.last_delay).await;
    }
}
