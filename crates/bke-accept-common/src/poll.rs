//! Poll-until-converged protocol
//!
//! A poll takes a fresh snapshot, evaluates a predicate over its rendered
//! text and sleeps a fixed interval when the predicate fails. There is no
//! backoff and no cancellation: the loop ends on the first satisfied
//! predicate or after `floor(timeout / interval)` attempts.
//!
//! Not converging is an outcome, not an error. Only a failing snapshot
//! (API unreachable, artifact unwritable) aborts the poll.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::status::{NODE_TABLE_HEADER, POD_TABLE_HEADER};
use crate::{Error, Result};

/// Default total poll window
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);
/// Default interval between snapshots
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Produces one rendered snapshot of cluster state per call.
///
/// Implementations discard whatever the previous call produced before
/// taking the next snapshot.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotSource: Send {
    /// Take a snapshot and return its rendered text
    async fn snapshot(&mut self) -> Result<String>;
}

/// Timeout and cadence of a poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    timeout: Duration,
    interval: Duration,
}

impl PollConfig {
    /// Validated poll settings: the interval must be non-zero and no longer
    /// than the timeout
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if interval > timeout {
            return Err(Error::config(format!(
                "poll interval {:?} exceeds poll timeout {:?}",
                interval, timeout
            )));
        }
        Ok(Self { timeout, interval })
    }

    /// Total poll window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sleep between snapshots
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of snapshots taken before giving up
    pub fn attempts(&self) -> u32 {
        let attempts = self.timeout.as_millis() / self.interval.as_millis().max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a poll ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The predicate was satisfied
    Converged,
    /// The window ran out while the cluster still reported rows
    TimedOut,
    /// The window ran out and the last snapshot had no rows at all
    TimedOutEmpty,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Converged => "converged",
            Verdict::TimedOut => "timed out",
            Verdict::TimedOutEmpty => "timed out with empty snapshot",
        })
    }
}

/// Result of one poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollOutcome {
    /// Whether the predicate was satisfied
    pub converged: bool,
    /// Text of the last snapshot taken
    pub last_snapshot: String,
}

impl PollOutcome {
    /// True when the last snapshot carried no table rows
    pub fn snapshot_empty(&self) -> bool {
        table_rows(&self.last_snapshot).next().is_none()
    }

    /// Classify the outcome, separating the empty-snapshot timeout
    pub fn verdict(&self) -> Verdict {
        match (self.converged, self.snapshot_empty()) {
            (true, _) => Verdict::Converged,
            (false, false) => Verdict::TimedOut,
            (false, true) => Verdict::TimedOutEmpty,
        }
    }
}

/// Poll `source` until `predicate` holds over a snapshot or the window in
/// `config` is exhausted.
///
/// Each failed attempt is followed by one interval sleep, so a predicate
/// that never holds costs exactly [`PollConfig::attempts`] sleeps.
pub async fn poll_for_convergence<S, P>(
    source: &mut S,
    predicate: P,
    config: &PollConfig,
    description: &str,
) -> Result<PollOutcome>
where
    S: SnapshotSource + ?Sized,
    P: Fn(&str) -> bool,
{
    let attempts = config.attempts();
    let mut last_snapshot = String::new();

    for attempt in 1..=attempts {
        last_snapshot = source.snapshot().await?;
        if predicate(&last_snapshot) {
            info!(check = description, attempt, "Converged");
            return Ok(PollOutcome {
                converged: true,
                last_snapshot,
            });
        }
        debug!(check = description, attempt, attempts, "Not converged yet");
        tokio::time::sleep(config.interval()).await;
    }

    let outcome = PollOutcome {
        converged: false,
        last_snapshot,
    };
    match outcome.verdict() {
        Verdict::TimedOutEmpty => error!(
            check = description,
            timeout = ?config.timeout(),
            "Timed out and the last snapshot was empty"
        ),
        _ => warn!(check = description, timeout = ?config.timeout(), "Timed out"),
    }
    Ok(outcome)
}

/// Non-blank lines of a rendered snapshot, minus table headers
pub fn table_rows(snapshot: &str) -> impl Iterator<Item = &str> {
    snapshot.lines().filter(|line| {
        let line = line.trim_end();
        !line.is_empty() && line != NODE_TABLE_HEADER && line != POD_TABLE_HEADER
    })
}

fn lists_node(snapshot: &str, name: &str) -> bool {
    table_rows(snapshot).any(|row| row.split_whitespace().next() == Some(name))
}

/// Predicate satisfied once no row is named `name`
pub fn node_absent(name: &str) -> impl Fn(&str) -> bool + '_ {
    move |snapshot| !lists_node(snapshot, name)
}

/// Predicate satisfied once a row is named `name`
pub fn node_present(name: &str) -> impl Fn(&str) -> bool + '_ {
    move |snapshot| lists_node(snapshot, name)
}
