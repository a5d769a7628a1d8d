#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use fanout_lambda::adapters::transport::{FetchReply, Transport, TransportError};
use fanout_lambda::runtime::contract::Target;
use futures::future::BoxFuture;

type Script = dyn Fn(&Target, u32) -> Result<FetchReply, TransportError> + Send + Sync;

/// Transport whose replies come from a closure of `(target, attempt)`.
///
/// Attempts are counted per url and start at 1.
pub struct ScriptedTransport {
    script: Box<Script>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    pub fn new(
        script: impl Fn(&Target, u32) -> Result<FetchReply, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn always(status_code: u16) -> Self {
        Self::new(move |_, _| Ok(reply(status_code, "")))
    }

    pub fn attempts_for(&self, url: &str) -> u32 {
        self.attempts
            .lock()
            .expect("poisoned mutex")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().expect("poisoned mutex").values().sum()
    }

    pub fn distinct_urls(&self) -> usize {
        self.attempts.lock().expect("poisoned mutex").len()
    }
}

impl Transport for ScriptedTransport {
    fn fetch<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<FetchReply, TransportError>> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("poisoned mutex");
            let counter = attempts.entry(target.url.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let result = (self.script)(target, attempt);
        Box::pin(async move { result })
    }
}

pub fn reply(status_code: u16, body: &str) -> FetchReply {
    FetchReply {
        status_code,
        body: body.to_string(),
    }
}

pub fn targets(count: usize) -> Vec<Target> {
    (0..count)
        .map(|index| Target::with_id(format!("https://items.test/{index}"), (index + 1).to_string()))
        .collect()
}
