//! Persistence boundary for member records, workflow requests and dedup
//! entries.

mod db;
mod memory;

pub use db::RedbRepository;
pub use memory::MemoryRepository;

use crate::dedup::DedupEntry;
use crate::error::{Result, RosterError};
use crate::member::MemberRecord;
use crate::workflow::{WorkflowKind, WorkflowRequest, WorkflowState};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub trait Repository: Send + Sync {
    fn get_member(&self, id: &str) -> Result<Option<MemberRecord>>;

    /// Sorted by external id.
    fn list_members(&self) -> Result<Vec<MemberRecord>>;

    fn upsert_member(&self, member: &MemberRecord) -> Result<()>;

    /// Returns false if there was no such member.
    fn remove_member(&self, id: &str) -> Result<bool>;

    fn get_request(&self, id: Uuid) -> Result<Option<WorkflowRequest>>;

    /// Newest first.
    fn list_requests(&self) -> Result<Vec<WorkflowRequest>>;

    fn find_requests(
        &self,
        kind: Option<WorkflowKind>,
        state: Option<WorkflowState>,
    ) -> Result<Vec<WorkflowRequest>> {
        Ok(self
            .list_requests()?
            .into_iter()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .filter(|r| state.map_or(true, |s| r.state == s))
            .collect())
    }

    fn upsert_request(&self, request: &WorkflowRequest) -> Result<()>;

    /// Store `request` only if the stored history is still `expected_len`
    /// events long and `request` extends it. A concurrent writer that got
    /// there first makes this fail with `Conflict`.
    fn append_stage_events(&self, request: &WorkflowRequest, expected_len: usize) -> Result<()>;

    /// Atomic check-and-insert. False if a live entry for the same triple
    /// exists at `entry.created_at`.
    fn record_dedup(&self, entry: &DedupEntry, window: Duration) -> Result<bool>;

    /// Remove entries created at or before `before`.
    fn prune_dedup(&self, before: DateTime<Utc>) -> Result<u32>;
}

/// Shared precondition check for `append_stage_events`.
pub(crate) fn check_append(
    stored: Option<&WorkflowRequest>,
    next: &WorkflowRequest,
    expected_len: usize,
) -> Result<()> {
    let stored = stored.ok_or_else(|| RosterError::RequestNotFound(next.id.to_string()))?;
    if stored.history.len() != expected_len {
        return Err(RosterError::Conflict(format!(
            "request {} has {} stage events, expected {expected_len}",
            next.id,
            stored.history.len()
        )));
    }
    if next.history.len() <= expected_len || next.history[..expected_len] != stored.history[..] {
        return Err(RosterError::Conflict(format!(
            "request {} update does not extend its stage history",
            next.id
        )));
    }
    Ok(())
}
