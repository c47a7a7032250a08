//! Role sync reconciler.
//!
//! Brings each member's canonical record into agreement with the roles the
//! external source reports, applies XP-driven automatic rank changes below
//! the XP ceiling, raises XP to the rank floor and recomputes capability
//! flags. Work for one member is serialized through [`MemberLocks`]; a
//! failure for one member never aborts a full pass.

use crate::config::SyncConfig;
use crate::dedup::{Clock, DedupGuard};
use crate::error::{Result, RosterError};
use crate::ladder::RankLadder;
use crate::member::MemberRecord;
use crate::paths::validate_member_id;
use crate::source::{ExternalRoleSource, ObservedMember};
use crate::store::Repository;
use crate::workflow::WorkflowRequest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// MemberLocks
// ---------------------------------------------------------------------------

/// At most one in-flight mutation per member. No cross-member locking.
#[derive(Default)]
pub struct MemberLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, member_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(member_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding `member_id`'s lock.
    pub fn with<T>(&self, member_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.entry(member_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub member: String,
    pub from: String,
    pub to: String,
    pub promoted: bool,
    /// False when the dedup guard suppressed the log record.
    pub logged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSync {
    pub record: MemberRecord,
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_change: Option<RankChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp_raised: Option<(u64, u64)>,
    /// An outward role correction failed; the member is flagged for retry.
    pub correction_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub member: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub observed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub corrections_failed: usize,
    pub rank_changes: Vec<RankChange>,
    pub failures: Vec<SyncFailure>,
    /// Members on record that the source no longer reports.
    pub stale: Vec<String>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    ladder: RankLadder,
    settings: SyncConfig,
    repo: Arc<dyn Repository>,
    source: Arc<dyn ExternalRoleSource>,
    dedup: DedupGuard,
    clock: Arc<dyn Clock>,
    locks: Arc<MemberLocks>,
}

impl Reconciler {
    pub fn new(
        ladder: RankLadder,
        settings: SyncConfig,
        repo: Arc<dyn Repository>,
        source: Arc<dyn ExternalRoleSource>,
        clock: Arc<dyn Clock>,
        locks: Arc<MemberLocks>,
    ) -> Result<Self> {
        ladder.rank(&settings.xp_ceiling)?;
        let window =
            chrono::Duration::seconds(i64::try_from(settings.dedup_window_secs).unwrap_or(i64::MAX));
        let dedup = DedupGuard::new(repo.clone(), clock.clone(), window);
        Ok(Self {
            ladder,
            settings,
            repo,
            source,
            dedup,
            clock,
            locks,
        })
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.ladder
    }

    pub fn source(&self) -> &dyn ExternalRoleSource {
        self.source.as_ref()
    }

    pub fn locks(&self) -> &Arc<MemberLocks> {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Full and targeted passes
    // -----------------------------------------------------------------------

    /// Reconcile every member the source reports.
    pub fn sync_all(&self) -> Result<SyncReport> {
        let observed = self.source.list_members_with_roles()?;
        let mut report = SyncReport {
            observed: observed.len(),
            ..SyncReport::default()
        };

        let mut seen = BTreeSet::new();
        for member in &observed {
            seen.insert(member.member_id.clone());
            match self.sync_member(member) {
                Ok(outcome) => {
                    report.succeeded += 1;
                    if outcome.created {
                        report.created += 1;
                    }
                    if outcome.correction_failed {
                        report.corrections_failed += 1;
                    }
                    if let Some(change) = outcome.rank_change {
                        report.rank_changes.push(change);
                    }
                }
                Err(e) => {
                    tracing::warn!(member = %member.member_id, error = %e, "member sync failed");
                    report.failed += 1;
                    report.failures.push(SyncFailure {
                        member: member.member_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.stale = self
            .repo
            .list_members()?
            .into_iter()
            .map(|m| m.external_id)
            .filter(|id| !seen.contains(id))
            .collect();

        let pruned = self.dedup.prune()?;
        tracing::info!(
            observed = report.observed,
            succeeded = report.succeeded,
            failed = report.failed,
            rank_changes = report.rank_changes.len(),
            corrections_failed = report.corrections_failed,
            pruned,
            "sync pass complete"
        );
        Ok(report)
    }

    /// Point lookup at the source, then reconcile that one member.
    pub fn sync_member_by_id(&self, member_id: &str) -> Result<MemberSync> {
        validate_member_id(member_id)?;
        let observed = self
            .source
            .member_roles(member_id)?
            .ok_or_else(|| RosterError::MemberNotFound(member_id.to_string()))?;
        self.sync_member(&observed)
    }

    /// Reconcile one member under that member's lock. The member's roles are
    /// read again once the lock is held; `observed` stands in only when that
    /// lookup fails or the source no longer lists the member.
    pub fn sync_member(&self, observed: &ObservedMember) -> Result<MemberSync> {
        validate_member_id(&observed.member_id)?;
        self.locks
            .with(&observed.member_id, || self.sync_locked(observed))
    }

    fn sync_locked(&self, snapshot: &ObservedMember) -> Result<MemberSync> {
        let id = snapshot.member_id.as_str();
        let now = self.clock.now();
        // The snapshot may predate a change made under this lock; reconcile
        // against what the source holds now.
        let fresh = match self.source.member_roles(id) {
            Ok(Some(current)) => Some(current),
            Ok(None) => None,
            Err(e) if e.is_external() => {
                tracing::warn!(member = id, error = %e, "source lookup failed; using listed roles");
                None
            }
            Err(e) => return Err(e),
        };
        let observed = fresh.as_ref().unwrap_or(snapshot);
        let mut roles = observed.roles.clone();
        let mut observed_rank = self.ladder.highest_observed(&roles).name.clone();

        // 1-2. Existing record, or a new one at the observed rank.
        let existing = self.repo.get_member(id)?;
        let created = existing.is_none();
        let mut record = match existing {
            Some(r) => r,
            None => {
                let xp = if self.settings.seed_xp_from_rank {
                    self.ladder.threshold_for(&observed_rank)?
                } else {
                    0
                };
                tracing::info!(member = id, rank = %observed_rank, xp, "tracking new member");
                MemberRecord::new(id, &observed_rank, xp, &self.ladder, now)?
            }
        };
        if observed.username.is_some() {
            record.username = observed.username.clone();
        }

        let mut correction_failed = false;
        let mut canonical = observed_rank.clone();

        // A manually approved rank that never reached the source goes first.
        if let Some(pending) = record.pending_rank.clone() {
            match self.push_roles(id, &roles, &pending) {
                Ok(Some(updated)) => {
                    tracing::info!(member = id, rank = %pending, "replayed approved rank to source");
                    roles = updated;
                    observed_rank = pending.clone();
                    canonical = pending;
                    record.pending_rank = None;
                }
                Ok(None) => {
                    observed_rank = pending.clone();
                    canonical = pending;
                    record.pending_rank = None;
                }
                Err(e) if e.is_external() => {
                    tracing::warn!(member = id, rank = %pending, error = %e, "approved rank still not applied at source");
                    correction_failed = true;
                    canonical = pending;
                }
                Err(RosterError::RankNotFound(rank)) => {
                    tracing::warn!(member = id, rank = %rank, "dropping pending rank missing from ladder");
                    record.pending_rank = None;
                }
                Err(e) => return Err(e),
            }
        }

        // 3. XP-driven automatic adjustment below the ceiling.
        let mut rank_change = None;
        if !correction_failed && self.xp_governed(&observed_rank)? {
            let xp_rank = self
                .ladder
                .rank_from_xp_capped(record.xp, &self.settings.xp_ceiling)?
                .name
                .clone();
            if xp_rank != observed_rank {
                let promoted = self.ladder.rank_of(&xp_rank)? > self.ladder.rank_of(&observed_rank)?;
                match self.push_roles(id, &roles, &xp_rank) {
                    Ok(updated) => {
                        if let Some(updated) = updated {
                            roles = updated;
                        }
                        canonical = xp_rank.clone();
                        let logged = self.log_change(id, &observed_rank, &xp_rank, promoted, record.xp)?;
                        tracing::info!(
                            member = id,
                            from = %observed_rank,
                            to = %xp_rank,
                            xp = record.xp,
                            logged,
                            "automatic rank change"
                        );
                        rank_change = Some(RankChange {
                            member: id.to_string(),
                            from: observed_rank.clone(),
                            to: xp_rank,
                            promoted,
                            logged,
                        });
                    }
                    Err(e) if e.is_external() => {
                        tracing::warn!(member = id, to = %xp_rank, error = %e, "role correction failed; will retry next pass");
                        correction_failed = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // 4-5. Floor, flags, snapshot.
        record.set_rank(&canonical, &self.ladder)?;
        let xp_raised = record.raise_xp_floor(&self.ladder)?;
        if let Some((old, new)) = xp_raised {
            tracing::info!(member = id, rank = %canonical, old, new, "raised XP to rank floor");
        }
        record.external_roles = roles;
        record.needs_resync = correction_failed;
        record.last_synced_at = now;
        self.repo.upsert_member(&record)?;

        if !created && rank_change.is_none() && xp_raised.is_none() && !correction_failed {
            tracing::debug!(member = id, rank = %canonical, "member already in sync");
        }

        Ok(MemberSync {
            record,
            created,
            rank_change,
            xp_raised,
            correction_failed,
        })
    }

    /// True while `rank` is at or below the XP ceiling and not an officer
    /// rank.
    pub fn xp_governed(&self, rank: &str) -> Result<bool> {
        let ceiling = self.ladder.rank_of(&self.settings.xp_ceiling)?;
        let index = self.ladder.rank_of(rank)?;
        Ok(index <= ceiling && !self.ladder.capabilities_for(rank)?.officer)
    }

    /// Make the source hold exactly `target` among ladder roles. Returns the
    /// resulting role set, or `None` when nothing had to change.
    fn push_roles(
        &self,
        member_id: &str,
        roles: &BTreeSet<String>,
        target: &str,
    ) -> Result<Option<BTreeSet<String>>> {
        let correction = self.ladder.correction_for(roles, target)?;
        if correction.is_noop_for(roles) {
            return Ok(None);
        }
        self.source.apply_role_correction(member_id, &correction)?;
        Ok(Some(correction.applied_to(roles)))
    }

    fn log_change(
        &self,
        member: &str,
        from: &str,
        to: &str,
        promoted: bool,
        xp: u64,
    ) -> Result<bool> {
        if !self.dedup.should_log(member, from, to)? {
            return Ok(false);
        }
        let record =
            WorkflowRequest::automatic_rank_change(member, from, to, promoted, xp, self.clock.now());
        self.repo.upsert_request(&record)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Manual rank replay
    // -----------------------------------------------------------------------

    /// Replay a manually approved rank to the source. The caller holds the
    /// member's lock and persists `record`. On an external failure the rank
    /// is kept as `pending_rank` for the next pass and `Ok(false)` returned.
    pub fn push_rank(&self, record: &mut MemberRecord, rank: &str) -> Result<bool> {
        let roles = match self.source.member_roles(&record.external_id) {
            Ok(Some(observed)) => observed.roles,
            Ok(None) => record.external_roles.clone(),
            Err(e) if e.is_external() => {
                tracing::warn!(member = %record.external_id, error = %e, "source lookup failed; using last snapshot");
                record.external_roles.clone()
            }
            Err(e) => return Err(e),
        };
        match self.push_roles(&record.external_id, &roles, rank) {
            Ok(updated) => {
                record.external_roles = updated.unwrap_or(roles);
                record.pending_rank = None;
                record.needs_resync = false;
                Ok(true)
            }
            Err(e) if e.is_external() => {
                tracing::warn!(member = %record.external_id, rank, error = %e, "approved rank not applied at source; queued for retry");
                record.pending_rank = Some(rank.to_string());
                record.needs_resync = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
