//! Short-window suppression of duplicate automatic rank-change records.
//!
//! The reconciler may run from the interval timer and from point events at
//! the same time and observe the same external state twice. `DedupGuard`
//! makes the second `(member, old, new)` inside the window a no-op.

use crate::error::Result;
use crate::store::Repository;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source. Production code uses [`SystemClock`]; tests inject
/// [`ManualClock`] to step time without sleeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// DedupEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub member: String,
    pub old_rank: String,
    pub new_rank: String,
    pub created_at: DateTime<Utc>,
}

impl DedupEntry {
    /// Identity of the triple. Unit separator cannot appear in rank names
    /// loaded from YAML without escaping, so the key is unambiguous.
    pub fn key(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.member, self.old_rank, self.new_rank)
    }

    /// True while `now` is inside this entry's window.
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now < self.created_at + window
    }
}

// ---------------------------------------------------------------------------
// DedupGuard
// ---------------------------------------------------------------------------

pub struct DedupGuard {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl DedupGuard {
    pub const DEFAULT_WINDOW_SECS: u64 = 60;

    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            repo,
            clock,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `ShouldLog(member, old, new)`. Returns false and records nothing when
    /// a live entry for the same triple exists; otherwise records a new entry
    /// and returns true. The check and insert are a single store operation.
    pub fn should_log(&self, member: &str, old_rank: &str, new_rank: &str) -> Result<bool> {
        let entry = DedupEntry {
            member: member.to_string(),
            old_rank: old_rank.to_string(),
            new_rank: new_rank.to_string(),
            created_at: self.clock.now(),
        };
        let fresh = self.repo.record_dedup(&entry, self.window)?;
        if !fresh {
            tracing::debug!(
                member,
                old_rank,
                new_rank,
                "suppressed duplicate automatic rank change"
            );
        }
        Ok(fresh)
    }

    /// Drop entries whose window has closed. Returns the number removed.
    pub fn prune(&self) -> Result<u32> {
        self.repo.prune_dedup(self.clock.now() - self.window)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use chrono::TimeZone;

    fn guard() -> (Arc<ManualClock>, DedupGuard) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let repo = Arc::new(MemoryRepository::new());
        let g = DedupGuard::new(repo, clock.clone(), Duration::seconds(60));
        (clock, g)
    }

    #[test]
    fn second_identical_change_inside_window_is_suppressed() {
        let (clock, g) = guard();
        assert!(g.should_log("7", "Airman", "Airman First Class").unwrap());
        clock.advance(Duration::seconds(30));
        assert!(!g.should_log("7", "Airman", "Airman First Class").unwrap());
    }

    #[test]
    fn different_triples_are_independent() {
        let (_clock, g) = guard();
        assert!(g.should_log("7", "Airman", "Airman First Class").unwrap());
        assert!(g.should_log("8", "Airman", "Airman First Class").unwrap());
        assert!(g.should_log("7", "Airman First Class", "Airman").unwrap());
    }

    #[test]
    fn window_expiry_allows_logging_again() {
        let (clock, g) = guard();
        assert!(g.should_log("7", "Airman", "Airman First Class").unwrap());
        clock.advance(Duration::seconds(60));
        assert!(g.should_log("7", "Airman", "Airman First Class").unwrap());
        clock.advance(Duration::seconds(59));
        assert!(!g.should_log("7", "Airman", "Airman First Class").unwrap());
    }

    #[test]
    fn prune_removes_expired_entries() {
        let (clock, g) = guard();
        g.should_log("7", "Airman", "Airman First Class").unwrap();
        clock.advance(Duration::seconds(30));
        g.should_log("8", "Airman", "Airman First Class").unwrap();
        clock.advance(Duration::seconds(45));
        assert_eq!(g.prune().unwrap(), 1);
    }

    #[test]
    fn entry_liveness() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let e = DedupEntry {
            member: "1".into(),
            old_rank: "A".into(),
            new_rank: "B".into(),
            created_at: t,
        };
        assert!(e.is_live(t + Duration::seconds(59), Duration::seconds(60)));
        assert!(!e.is_live(t + Duration::seconds(60), Duration::seconds(60)));
    }
}
