//! Exponential backoff gate for heartbeat delivery.
//!
//! After a failed send, further attempts are suppressed for
//! `15 * 2^retries` seconds from the latest failure, but never for longer
//! than an hour. The first success after a failure streak resets the state.
//!
//! State lives in the internal config file (section `internal`, keys
//! `backoff_retries` and `backoff_at`) so it survives across invocations.
//! It is re-read on every gated call and written back afterwards.
//! Concurrent invocations race on it; last writer wins.

use std::collections::BTreeMap;
use std::rc::Rc;

use jiff::{SignedDuration, Timestamp};
use tracing::{debug, warn};

use crate::config::{ConfigError, ConfigStore};
use crate::model::{Heartbeat, HeartbeatResult};
use crate::pipeline::{Error, Next, Result, Stage};

/// Upper bound, in seconds, on how long any streak can suppress sends.
pub const RESET_AFTER: i64 = 3600;

/// Base delay in seconds, doubled for every consecutive failure.
pub const FACTOR: i64 = 15;

const SECTION: &str = "internal";
const RETRIES_KEY: &str = "backoff_retries";
const AT_KEY: &str = "backoff_at";

/// Durable record of the current failure streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    /// Consecutive failures.
    pub retries: u32,
    /// Instant of the latest failure in the streak; `None` when healthy.
    pub since: Option<Timestamp>,
}

impl BackoffState {
    /// Reads the state. Absent or malformed values read as healthy.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let retries = store
            .read(SECTION, RETRIES_KEY)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let since = store
            .read(SECTION, AT_KEY)
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| match s.trim().parse::<Timestamp>() {
                Ok(t) => Some(t),
                Err(e) => {
                    debug!("ignoring invalid {AT_KEY} {s:?}: {e}");
                    None
                }
            });
        Self { retries, since }
    }

    pub fn save(&self, store: &dyn ConfigStore) -> core::result::Result<(), ConfigError> {
        let mut values = BTreeMap::new();
        values.insert(RETRIES_KEY.to_string(), self.retries.to_string());
        values.insert(
            AT_KEY.to_string(),
            self.since.map(|t| t.to_string()).unwrap_or_default(),
        );
        store.write(SECTION, &values)
    }

    /// Whether a send attempted at `now` should be suppressed.
    pub fn should_backoff(&self, now: Timestamp) -> bool {
        let Some(since) = self.since else {
            return false;
        };
        if self.retries < 1 {
            return false;
        }

        let window = delay_secs(self.retries).min(RESET_AFTER);
        let until = since
            .checked_add(SignedDuration::from_secs(window))
            .unwrap_or(Timestamp::MAX);

        debug!(
            "exponential backoff tried {} times since {since}, will retry at {until}",
            self.retries
        );

        now < until
    }

    /// The state after one more failure at `now`.
    #[must_use]
    pub fn failed(self, now: Timestamp) -> Self {
        Self {
            retries: self.retries.saturating_add(1),
            since: Some(now),
        }
    }
}

/// `FACTOR * 2^retries`, saturating.
fn delay_secs(retries: u32) -> i64 {
    2_i64
        .checked_pow(retries)
        .and_then(|p| p.checked_mul(FACTOR))
        .unwrap_or(i64::MAX)
}

/// Pipeline stage that suppresses sends while the endpoint is failing.
pub struct BackoffGate {
    store: Rc<dyn ConfigStore>,
    clock: fn() -> Timestamp,
}

impl BackoffGate {
    pub fn new(store: Rc<dyn ConfigStore>) -> Self {
        Self {
            store,
            clock: Timestamp::now,
        }
    }

    /// Replaces the wall clock, for deterministic tests.
    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }
}

impl Stage for BackoffGate {
    fn process(&self, heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        debug!("execute heartbeat backoff algorithm");

        let state = BackoffState::load(self.store.as_ref());
        if state.should_backoff((self.clock)()) {
            return Err(Error::Backoff);
        }

        match next.run(heartbeats) {
            Err(e) => {
                debug!("incrementing backoff due to error");
                let failed = state.failed((self.clock)());
                if let Err(write_err) = failed.save(self.store.as_ref()) {
                    warn!("failed to update backoff settings: {write_err}");
                }
                Err(e)
            }
            Ok(results) => {
                if state.since.is_some()
                    && let Err(write_err) = BackoffState::default().save(self.store.as_ref())
                {
                    warn!("failed to reset backoff settings: {write_err}");
                }
                Ok(results)
            }
        }
    }
}
