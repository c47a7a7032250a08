use super::{ExternalRoleSource, ObservedMember};
use crate::error::{Result, RosterError};
use crate::ladder::RoleCorrection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    members: BTreeMap<String, ObservedMember>,
    failing: BTreeSet<String>,
    listing_fails: bool,
    applied: Vec<(String, RoleCorrection)>,
}

/// In-process role source with failure injection.
#[derive(Default)]
pub struct MemoryRoleSource {
    state: Mutex<State>,
}

impl MemoryRoleSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_member(self, member: ObservedMember) -> Self {
        self.upsert(member);
        self
    }

    pub fn upsert(&self, member: ObservedMember) {
        self.lock()
            .members
            .insert(member.member_id.clone(), member);
    }

    pub fn set_roles<I, S>(&self, member_id: &str, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        let entry = state
            .members
            .entry(member_id.to_string())
            .or_insert_with(|| ObservedMember::new(member_id, Vec::<String>::new()));
        entry.roles = roles.into_iter().map(Into::into).collect();
    }

    pub fn remove(&self, member_id: &str) {
        self.lock().members.remove(member_id);
    }

    pub fn roles_of(&self, member_id: &str) -> Option<BTreeSet<String>> {
        self.lock().members.get(member_id).map(|m| m.roles.clone())
    }

    /// Make corrections for `member_id` fail until [`heal`](Self::heal).
    pub fn fail_corrections_for(&self, member_id: &str) {
        self.lock().failing.insert(member_id.to_string());
    }

    pub fn heal(&self, member_id: &str) {
        self.lock().failing.remove(member_id);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().listing_fails = fail;
    }

    /// Every correction applied so far, in order.
    pub fn applied(&self) -> Vec<(String, RoleCorrection)> {
        self.lock().applied.clone()
    }
}

impl ExternalRoleSource for MemoryRoleSource {
    fn list_members_with_roles(&self) -> Result<Vec<ObservedMember>> {
        let state = self.lock();
        if state.listing_fails {
            return Err(RosterError::ExternalSource("member listing unavailable".into()));
        }
        Ok(state.members.values().cloned().collect())
    }

    fn member_roles(&self, member_id: &str) -> Result<Option<ObservedMember>> {
        let state = self.lock();
        if state.listing_fails {
            return Err(RosterError::ExternalSource("member lookup unavailable".into()));
        }
        Ok(state.members.get(member_id).cloned())
    }

    fn apply_role_correction(&self, member_id: &str, correction: &RoleCorrection) -> Result<()> {
        let mut state = self.lock();
        if state.failing.contains(member_id) {
            return Err(RosterError::ExternalSource(format!(
                "role update rejected for {member_id}"
            )));
        }
        let member = state.members.get_mut(member_id).ok_or_else(|| {
            RosterError::ExternalSource(format!("unknown member {member_id}"))
        })?;
        member.roles = correction.applied_to(&member.roles);
        state
            .applied
            .push((member_id.to_string(), correction.clone()));
        Ok(())
    }
}
