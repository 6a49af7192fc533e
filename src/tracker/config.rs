use crate::core::{Result, Timestamp, TrackerError};
use crate::eventlog::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tracker configuration
///
/// Defaults match an agent that flushes allocation batches every 500ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Widening applied to both ends of every slice query, and the lookahead
    /// used when fetching context. Batches are stamped when they are flushed,
    /// so events near a slice boundary can sit in a batch stamped later.
    pub query_buffer: Duration,

    /// Attempts per log query before NOT_READY becomes a load failure
    pub max_load_attempts: u32,

    /// Sleep between NOT_READY retries
    pub retry_interval: Duration,

    /// Earliest point of the event log; snapshot replays start here
    pub session_start: Timestamp,

    /// Also reconcile JNI global references held on tracked objects
    pub enable_jni_refs_tracking: bool,
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self {
            query_buffer: Duration::from_secs(5),
            max_load_attempts: 20,
            retry_interval: Duration::from_millis(50),
            session_start: 0,
            enable_jni_refs_tracking: false,
        }
    }

    /// Set the slice query buffer
    pub fn query_buffer(mut self, buffer: Duration) -> Self {
        self.query_buffer = buffer;
        self
    }

    /// Set the maximum attempts per log query
    pub fn max_load_attempts(mut self, attempts: u32) -> Self {
        self.max_load_attempts = attempts;
        self
    }

    /// Set the NOT_READY retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the session start timestamp
    pub fn session_start(mut self, start: Timestamp) -> Self {
        self.session_start = start;
        self
    }

    /// Enable or disable JNI global reference tracking
    pub fn enable_jni_refs_tracking(mut self, enabled: bool) -> Self {
        self.enable_jni_refs_tracking = enabled;
        self
    }

    /// Query buffer in timeline nanoseconds
    pub fn query_buffer_ns(&self) -> i64 {
        i64::try_from(self.query_buffer.as_nanos()).unwrap_or(i64::MAX)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_load_attempts, self.retry_interval)
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_load_attempts == 0 {
            return Err(TrackerError::Config(
                "max_load_attempts must be > 0".to_string(),
            ));
        }

        if i64::try_from(self.query_buffer.as_nanos()).is_err() {
            return Err(TrackerError::Config(
                "query_buffer does not fit the timeline".to_string(),
            ));
        }

        if self.retry_interval > Duration::from_secs(60) {
            return Err(TrackerError::Config(
                "retry_interval must not exceed 60s".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}
