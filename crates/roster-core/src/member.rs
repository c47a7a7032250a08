use crate::capability::{ActorContext, CapabilityFlags};
use crate::error::{Result, RosterError};
use crate::ladder::RankLadder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// MemberRecord
// ---------------------------------------------------------------------------

/// Canonical per-member state, reconciled from the external role source.
///
/// `capabilities` is always `CapabilityDeriver(canonical_rank)`; only
/// [`MemberRecord::set_rank`] writes either field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub canonical_rank: String,
    pub xp: u64,
    pub capabilities: CapabilityFlags,
    #[serde(default)]
    pub external_roles: BTreeSet<String>,
    /// A manually approved rank that has not yet been replayed to the
    /// external source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_rank: Option<String>,
    #[serde(default)]
    pub needs_resync: bool,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn new(
        external_id: impl Into<String>,
        rank: &str,
        xp: u64,
        ladder: &RankLadder,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let capabilities = ladder.capabilities_for(rank)?;
        Ok(Self {
            external_id: external_id.into(),
            username: None,
            canonical_rank: rank.to_string(),
            xp,
            capabilities,
            external_roles: BTreeSet::new(),
            pending_rank: None,
            needs_resync: false,
            created_at: now,
            last_synced_at: now,
        })
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.external_id)
    }

    /// Set the canonical rank and recompute capability flags from it.
    pub fn set_rank(&mut self, rank: &str, ladder: &RankLadder) -> Result<()> {
        self.capabilities = ladder.capabilities_for(rank)?;
        self.canonical_rank = rank.to_string();
        Ok(())
    }

    /// Raise XP to the canonical rank's threshold. Returns the previous and
    /// new XP when a raise happened.
    pub fn raise_xp_floor(&mut self, ladder: &RankLadder) -> Result<Option<(u64, u64)>> {
        let floor = ladder.threshold_for(&self.canonical_rank)?;
        if self.xp < floor {
            let old = self.xp;
            self.xp = floor;
            return Ok(Some((old, floor)));
        }
        Ok(None)
    }

    /// Apply a signed XP change, saturating at zero.
    pub fn adjust_xp(&mut self, delta: i64) {
        self.xp = if delta < 0 {
            self.xp.saturating_sub(delta.unsigned_abs())
        } else {
            self.xp.saturating_add(delta as u64)
        };
    }

    /// Check the record's invariants against `ladder`.
    pub fn check(&self, ladder: &RankLadder) -> Result<()> {
        let expected = ladder.capabilities_for(&self.canonical_rank)?;
        if self.capabilities != expected {
            return Err(RosterError::InvalidConfig(format!(
                "capabilities of {} do not match rank '{}'",
                self.external_id, self.canonical_rank
            )));
        }
        if !self.capabilities.is_monotonic() {
            return Err(RosterError::InvalidConfig(format!(
                "capabilities of {} are not monotonic",
                self.external_id
            )));
        }
        Ok(())
    }
}

impl ActorContext for MemberRecord {
    fn actor_id(&self) -> &str {
        &self.external_id
    }

    fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }
}
