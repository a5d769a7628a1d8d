#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanout_lambda::adapters::invoke::{DispatchError, WorkerInvoker};
use fanout_lambda::adapters::transport::Transport;
use fanout_lambda::handlers::dispatch::{handle_worker_payload, WorkerRuntime};
use fanout_lambda::runtime::contract::{WorkerPayload, WorkerReply};
use fanout_lambda::runtime::outcome::OutcomeMap;
use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct Invocation {
    pub worker_handle: String,
    pub depth: usize,
    pub urls: Vec<String>,
    pub at: Instant,
}

/// How a scripted invocation misbehaves before the worker ever runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flake {
    Status(u16),
    /// Replies with the status only after holding the dispatch open.
    SlowStatus(u16, Duration),
    ChannelError,
}

#[derive(Default)]
struct InvokerState {
    invocations: Mutex<Vec<Invocation>>,
    remaining_flakes: Mutex<usize>,
}

/// In-process invoker that records every dispatch and can reject the first
/// few before running the real worker as a tokio task.
#[derive(Clone)]
pub struct RecordingInvoker {
    transport: Arc<dyn Transport>,
    flake: Flake,
    state: Arc<InvokerState>,
}

impl RecordingInvoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::flaky(transport, 0, Flake::Status(503))
    }

    pub fn flaky(transport: Arc<dyn Transport>, failures: usize, flake: Flake) -> Self {
        let state = InvokerState::default();
        *state.remaining_flakes.lock().expect("poisoned mutex") = failures;
        Self {
            transport,
            flake,
            state: Arc::new(state),
        }
    }

    pub fn runtime(&self) -> WorkerRuntime {
        WorkerRuntime::new(self.transport.clone(), Arc::new(self.clone()))
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state
            .invocations
            .lock()
            .expect("poisoned mutex")
            .clone()
    }

    fn take_flake(&self) -> bool {
        let mut remaining = self.state.remaining_flakes.lock().expect("poisoned mutex");
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

impl WorkerInvoker for RecordingInvoker {
    fn invoke(
        &self,
        payload: WorkerPayload,
    ) -> BoxFuture<'static, Result<WorkerReply, DispatchError>> {
        self.state
            .invocations
            .lock()
            .expect("poisoned mutex")
            .push(Invocation {
                worker_handle: payload.worker_handle.to_string(),
                depth: payload.depth,
                urls: payload.targets.iter().map(|target| target.url.clone()).collect(),
                at: Instant::now(),
            });

        if self.take_flake() {
            let flake = self.flake;
            return Box::pin(async move {
                match flake {
                    Flake::Status(status_code) => Ok(WorkerReply {
                        status_code,
                        outcomes: OutcomeMap::new(),
                    }),
                    Flake::SlowStatus(status_code, delay) => {
                        sleep(delay).await;
                        Ok(WorkerReply {
                            status_code,
                            outcomes: OutcomeMap::new(),
                        })
                    }
                    Flake::ChannelError => {
                        Err(DispatchError::Transport("connection reset".to_string()))
                    }
                }
            });
        }

        let task = tokio::spawn(handle_worker_payload(payload, self.runtime()));
        Box::pin(async move {
            task.await
                .map_err(|error| DispatchError::Join(error.to_string()))
        })
    }
}
