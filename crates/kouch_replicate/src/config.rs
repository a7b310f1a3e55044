//! Retry policy and replication options.

use crate::error::{ReplicateError, ReplicateResult};
use kouch_protocol::{ChangesOptions, Options};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

/// Default number of change records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default upper bound on the serialized manifest size of one batch.
pub const DEFAULT_BATCH_BYTES: usize = 1024 * 1024;

/// Changes feed parameters that one-shot replication always sets itself.
const FIXED_CHANGES_KEYS: [&str; 3] = ["feed", "style", "since"];

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt. Negative means unlimited.
    pub max_attempts: i64,
    /// Fixed delay between attempts. Unset selects exponential backoff.
    pub delay: Option<Duration>,
    /// Wall-clock budget for the whole retry loop.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` retries.
    pub fn new(max_attempts: i64) -> Self {
        Self {
            max_attempts,
            delay: None,
            deadline: None,
        }
    }

    /// Creates a policy that runs the unit of work once.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Creates a policy that retries until success, a permanent error or the
    /// deadline.
    pub fn unlimited() -> Self {
        Self::new(-1)
    }

    /// Sets a fixed delay. `Duration::ZERO` retries immediately.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the retry loop deadline. A zero deadline is treated as unset.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }

    /// Total number of tries, or `None` when unlimited.
    pub fn max_tries(&self) -> Option<u64> {
        u64::try_from(self.max_attempts)
            .ok()
            .map(|n| n.saturating_add(1))
    }

    /// Selects the backoff strategy for this policy.
    pub fn backoff(&self) -> Backoff {
        match self.delay {
            Some(d) if d.is_zero() => Backoff::Zero,
            Some(d) => Backoff::Constant(d),
            None => Backoff::Exponential(ExponentialBackoff::default()),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

/// Delay strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    Zero,
    /// Wait the same amount every time.
    Constant(Duration),
    /// Grow the delay geometrically with random jitter.
    Exponential(ExponentialBackoff),
}

impl Backoff {
    /// Returns the delay before the next attempt and advances the state.
    pub fn next_delay(&mut self) -> Duration {
        match self {
            Backoff::Zero => Duration::ZERO,
            Backoff::Constant(d) => *d,
            Backoff::Exponential(exp) => exp.next_delay(),
        }
    }
}

/// Exponential backoff with randomized intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// First interval.
    pub initial_interval: Duration,
    /// Growth factor applied after each interval.
    pub multiplier: f64,
    /// Cap on the un-jittered interval.
    pub max_interval: Duration,
    /// Jitter as a fraction of the interval, in `[0, 1]`.
    pub randomization_factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff with the given parameters.
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        randomization_factor: f64,
    ) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_interval,
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
            current: initial_interval,
        }
    }

    /// Restarts from the initial interval.
    pub fn reset(&mut self) {
        self.current = self.initial_interval;
    }

    /// Returns the next jittered interval and grows the base interval.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let spread = base * self.randomization_factor;
        let delay = if spread > 0.0 {
            rand::thread_rng().gen_range((base - spread)..=(base + spread))
        } else {
            base
        };

        let max = self.max_interval.as_secs_f64();
        let grown = (base * self.multiplier).min(max);
        self.current = Duration::from_secs_f64(grown);

        Duration::from_secs_f64(delay.max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 1.5, Duration::from_secs(60), 0.5)
    }
}

/// Options recognized by the replication engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateOptions {
    /// Copy the source security object to the target after the documents.
    pub copy_security: bool,
    /// Restrict replication to these document ids.
    pub doc_ids: Vec<String>,
    /// Server-side filter function for the source changes feed.
    pub filter: Option<String>,
    /// Create the target database when it does not exist.
    pub create_target: bool,
    /// Maximum change records per batch.
    pub batch_size: usize,
    /// Maximum serialized manifest size per batch.
    pub batch_bytes: usize,
    /// Unrecognized options, passed to the changes request unchanged.
    pub extra: Options,
}

impl ReplicateOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            copy_security: false,
            doc_ids: Vec::new(),
            filter: None,
            create_target: false,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_bytes: DEFAULT_BATCH_BYTES,
            extra: Options::new(),
        }
    }

    /// Sets whether the security object is copied.
    pub fn with_copy_security(mut self, copy: bool) -> Self {
        self.copy_security = copy;
        self
    }

    /// Restricts replication to the given document ids.
    pub fn with_doc_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the changes filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets whether a missing target is created.
    pub fn with_create_target(mut self, create: bool) -> Self {
        self.create_target = create;
        self
    }

    /// Sets the batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the manifest byte limit per batch.
    pub fn with_batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = bytes.max(1);
        self
    }

    /// Builds typed options from a heterogeneous option bag.
    ///
    /// `source` and `target` are consumed by the caller and dropped here.
    /// Unrecognized keys end up in `extra`.
    pub fn from_options(mut opts: Options) -> ReplicateResult<Self> {
        let mut out = Self::new();
        opts.remove("source");
        opts.remove("target");
        if let Some(key) = FIXED_CHANGES_KEYS.iter().find(|k| opts.contains(k)) {
            return Err(ReplicateError::usage(format!(
                "{key} cannot be set for one-shot replication"
            )));
        }

        if let Some(v) = opts.remove("copy_security") {
            out.copy_security = bool_option("copy_security", &v)?;
        }
        if let Some(v) = opts.remove("create_target") {
            out.create_target = bool_option("create_target", &v)?;
        }
        if let Some(v) = opts.remove("doc_ids") {
            out.doc_ids = match v {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        other => Err(ReplicateError::usage(format!(
                            "doc_ids: expected string, got {other}"
                        ))),
                    })
                    .collect::<ReplicateResult<_>>()?,
                Value::String(s) => s
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                other => {
                    return Err(ReplicateError::usage(format!(
                        "doc_ids: expected list of strings, got {other}"
                    )))
                }
            };
        }
        if let Some(v) = opts.remove("filter") {
            match v {
                Value::String(s) => out.filter = Some(s),
                other => {
                    return Err(ReplicateError::usage(format!(
                        "filter: expected string, got {other}"
                    )))
                }
            }
        }
        out.extra = opts;
        out.validate()?;
        Ok(out)
    }

    /// Checks for option combinations the changes request cannot express.
    pub fn validate(&self) -> ReplicateResult<()> {
        if !self.doc_ids.is_empty() && self.filter.is_some() {
            return Err(ReplicateError::usage("doc_ids and filter cannot be combined"));
        }
        if let Some(key) = FIXED_CHANGES_KEYS.iter().find(|k| self.extra.contains(k)) {
            return Err(ReplicateError::usage(format!(
                "{key} cannot be set for one-shot replication"
            )));
        }
        Ok(())
    }

    /// The changes request used to scan the source.
    pub fn changes_options(&self) -> ChangesOptions {
        ChangesOptions {
            filter: self.filter.clone(),
            doc_ids: self.doc_ids.clone(),
            extra: self.extra.clone(),
            ..ChangesOptions::replication()
        }
    }
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn bool_option(key: &str, value: &Value) -> ReplicateResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => s
            .parse()
            .map_err(|_| ReplicateError::usage(format!("{key}: invalid boolean \"{s}\""))),
        other => Err(ReplicateError::usage(format!(
            "{key}: expected boolean, got {other}"
        ))),
    }
}
