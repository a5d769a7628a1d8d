//! Per-tree dispatch configuration.
//!
//! A [`DispatchConfig`] is fixed at the external boundary and travels inside
//! every worker payload, so each recursive child sees exactly the parameters
//! its root was started with.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::contract::ValidationError;

pub const DEFAULT_BRANCHING_FACTOR: usize = 10;
pub const DEFAULT_BASE_CASE_THRESHOLD: usize = 60;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_JITTER_MAX_MS: u64 = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_OVERLOAD_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_WINDOW_MS: u64 = 1_000;

/// Half the fan-out: a parent with more than this many children pending at
/// once backs off harder.
pub fn default_overload_threshold(branching_factor: usize) -> usize {
    (branching_factor / 2).max(1)
}

/// Time-windowed admission control applied at the root only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionWindow {
    pub window_ms: u64,
    pub per_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    pub branching_factor: usize,
    pub base_case_threshold: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_max_ms: u64,
    pub max_retries: u32,
    /// In-flight child dispatches above which retry delays are stretched.
    pub overload_threshold: usize,
    pub overload_multiplier: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionWindow>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::controlled()
    }
}

impl DispatchConfig {
    /// Ten-way fan-out with sixty direct fetches per worker.
    pub fn controlled() -> Self {
        Self {
            branching_factor: DEFAULT_BRANCHING_FACTOR,
            base_case_threshold: DEFAULT_BASE_CASE_THRESHOLD,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter_max_ms: DEFAULT_JITTER_MAX_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            overload_threshold: default_overload_threshold(DEFAULT_BRANCHING_FACTOR),
            overload_multiplier: DEFAULT_OVERLOAD_MULTIPLIER,
            admission: None,
        }
    }

    /// Three-way fan-out down to a single fetch per leaf worker.
    pub fn highly_recursive() -> Self {
        Self {
            branching_factor: 3,
            base_case_threshold: 1,
            overload_threshold: default_overload_threshold(3),
            ..Self::controlled()
        }
    }

    /// Hundred-way fan-out with a hundred direct fetches per worker.
    pub fn wide() -> Self {
        Self {
            branching_factor: 100,
            base_case_threshold: 100,
            overload_threshold: default_overload_threshold(100),
            ..Self::controlled()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "controlled" => Some(Self::controlled()),
            "highly-recursive" | "highly_recursive" => Some(Self::highly_recursive()),
            "wide" => Some(Self::wide()),
            _ => None,
        }
    }

    pub fn with_base_case_threshold(mut self, threshold: usize) -> Self {
        self.base_case_threshold = threshold;
        self
    }

    pub fn with_admission(mut self, window_ms: u64, per_window: usize) -> Self {
        self.admission = Some(AdmissionWindow {
            window_ms,
            per_window,
        });
        self
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_config(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.branching_factor < 2 {
            return Err(ValidationError::new(
                "branching_factor must be at least 2",
            ));
        }
        if self.base_case_threshold == 0 {
            return Err(ValidationError::new(
                "base_case_threshold must be a positive integer",
            ));
        }
        if self.max_retries == 0 {
            return Err(ValidationError::new(
                "max_retries must be a positive integer",
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ValidationError::new(
                "initial_backoff_ms cannot exceed max_backoff_ms",
            ));
        }
        if !self.overload_multiplier.is_finite() || self.overload_multiplier < 1.0 {
            return Err(ValidationError::new(
                "overload_multiplier must be a finite value >= 1.0",
            ));
        }
        if let Some(window) = self.admission {
            if window.window_ms == 0 {
                return Err(ValidationError::new("window_ms must be a positive integer"));
            }
            if window.per_window == 0 {
                return Err(ValidationError::new(
                    "per_window must be a positive integer",
                ));
            }
        }
        Ok(())
    }

    /// Applies `FANOUT_*` overrides resolved through `lookup`.
    ///
    /// `FANOUT_WINDOW_MS` only takes effect once admission is enabled for a
    /// request, so it is returned separately rather than stored here.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ValidationError> {
        if let Some(value) = parse_override::<usize>(&lookup, "FANOUT_BRANCHING_FACTOR")? {
            self.branching_factor = value;
            self.overload_threshold = default_overload_threshold(value);
        }
        if let Some(value) = parse_override::<usize>(&lookup, "FANOUT_OVERLOAD_THRESHOLD")? {
            self.overload_threshold = value;
        }
        if let Some(value) = parse_override::<usize>(&lookup, "FANOUT_BASE_CASE_THRESHOLD")? {
            self.base_case_threshold = value;
        }
        if let Some(value) = parse_override::<u64>(&lookup, "FANOUT_INITIAL_BACKOFF_MS")? {
            self.initial_backoff_ms = value;
        }
        if let Some(value) = parse_override::<u64>(&lookup, "FANOUT_MAX_BACKOFF_MS")? {
            self.max_backoff_ms = value;
        }
        if let Some(value) = parse_override::<u64>(&lookup, "FANOUT_JITTER_MAX_MS")? {
            self.jitter_max_ms = value;
        }
        if let Some(value) = parse_override::<u32>(&lookup, "FANOUT_MAX_RETRIES")? {
            self.max_retries = value;
        }
        self.validate()?;
        Ok(self)
    }
}

pub fn window_ms_from_env(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<u64, ValidationError> {
    Ok(parse_override::<u64>(&lookup, "FANOUT_WINDOW_MS")?.unwrap_or(DEFAULT_WINDOW_MS))
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ValidationError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ValidationError::new(format!("{key} must be a valid number, got '{raw}'"))),
    }
}
