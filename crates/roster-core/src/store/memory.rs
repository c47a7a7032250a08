use super::{check_append, Repository};
use crate::dedup::DedupEntry;
use crate::error::Result;
use crate::member::MemberRecord;
use crate::workflow::WorkflowRequest;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    members: BTreeMap<String, MemberRecord>,
    requests: HashMap<Uuid, WorkflowRequest>,
    dedup: HashMap<String, DedupEntry>,
}

/// In-process repository. Used by tests and by callers that bring their own
/// persistence.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dedup_len(&self) -> usize {
        self.lock().dedup.len()
    }
}

impl Repository for MemoryRepository {
    fn get_member(&self, id: &str) -> Result<Option<MemberRecord>> {
        Ok(self.lock().members.get(id).cloned())
    }

    fn list_members(&self) -> Result<Vec<MemberRecord>> {
        Ok(self.lock().members.values().cloned().collect())
    }

    fn upsert_member(&self, member: &MemberRecord) -> Result<()> {
        self.lock()
            .members
            .insert(member.external_id.clone(), member.clone());
        Ok(())
    }

    fn remove_member(&self, id: &str) -> Result<bool> {
        Ok(self.lock().members.remove(id).is_some())
    }

    fn get_request(&self, id: Uuid) -> Result<Option<WorkflowRequest>> {
        Ok(self.lock().requests.get(&id).cloned())
    }

    fn list_requests(&self) -> Result<Vec<WorkflowRequest>> {
        let mut out: Vec<_> = self.lock().requests.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn upsert_request(&self, request: &WorkflowRequest) -> Result<()> {
        self.lock().requests.insert(request.id, request.clone());
        Ok(())
    }

    fn append_stage_events(&self, request: &WorkflowRequest, expected_len: usize) -> Result<()> {
        let mut inner = self.lock();
        check_append(inner.requests.get(&request.id), request, expected_len)?;
        inner.requests.insert(request.id, request.clone());
        Ok(())
    }

    fn record_dedup(&self, entry: &DedupEntry, window: Duration) -> Result<bool> {
        let mut inner = self.lock();
        let key = entry.key();
        if let Some(existing) = inner.dedup.get(&key) {
            if existing.is_live(entry.created_at, window) {
                return Ok(false);
            }
        }
        inner.dedup.insert(key, entry.clone());
        Ok(true)
    }

    fn prune_dedup(&self, before: DateTime<Utc>) -> Result<u32> {
        let mut inner = self.lock();
        let len = inner.dedup.len();
        inner.dedup.retain(|_, e| e.created_at > before);
        Ok((len - inner.dedup.len()) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RosterError;
    use crate::ladder::RankLadder;
    use crate::workflow::{StageAction, StageEvent, WorkflowState};

    fn request() -> WorkflowRequest {
        WorkflowRequest::automatic_rank_change("1", "Airman", "Airman First Class", true, 25, Utc::now())
    }

    #[test]
    fn members_are_listed_by_id() {
        let repo = MemoryRepository::new();
        let ladder = RankLadder::default();
        for id in ["b", "a", "c"] {
            let m = MemberRecord::new(id, "Citizen", 0, &ladder, Utc::now()).unwrap();
            repo.upsert_member(&m).unwrap();
        }
        let ids: Vec<_> = repo
            .list_members()
            .unwrap()
            .into_iter()
            .map(|m| m.external_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(repo.remove_member("b").unwrap());
        assert!(!repo.remove_member("b").unwrap());
    }

    #[test]
    fn append_requires_matching_history_length() {
        let repo = MemoryRepository::new();
        let req = request();
        repo.upsert_request(&req).unwrap();

        let mut next = req.clone();
        next.history.push(StageEvent {
            actor: "2".into(),
            action: StageAction::Hold,
            from: Some(WorkflowState::Approved),
            to: WorkflowState::Hold,
            at: Utc::now(),
            notes: None,
        });
        repo.append_stage_events(&next, 1).unwrap();

        let err = repo.append_stage_events(&next, 1).unwrap_err();
        assert!(matches!(err, RosterError::Conflict(_)));
        assert_eq!(repo.get_request(req.id).unwrap().unwrap().history.len(), 2);
    }

    #[test]
    fn append_to_unknown_request_fails() {
        let repo = MemoryRepository::new();
        let err = repo.append_stage_events(&request(), 0).unwrap_err();
        assert!(matches!(err, RosterError::RequestNotFound(_)));
    }
}
