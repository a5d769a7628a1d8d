pub use fanout_core::{backoff, config, contract, outcome, partition};
