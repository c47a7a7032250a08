//! Service facade: one reconciler, one workflow engine, one store, and the
//! code that applies approved effects to member records.

use crate::capability::Actor;
use crate::config::Config;
use crate::dedup::{Clock, SystemClock};
use crate::error::{Result, RosterError};
use crate::io::{ensure_dir, write_if_missing};
use crate::ladder::RankLadder;
use crate::member::MemberRecord;
use crate::paths;
use crate::source::{self, ExternalRoleSource};
use crate::store::{RedbRepository, Repository};
use crate::sync::{MemberLocks, MemberSync, Reconciler, SyncReport};
use crate::workflow::{
    ActionKind, Effect, Outcome, Proposal, StageAction, WorkflowEngine, WorkflowKind,
    WorkflowRequest, WorkflowState,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const ROLES_TEMPLATE: &str = "# Role assignments as reported by the community platform.\nmembers: []\n";

/// What a create or stage action did.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub request: WorkflowRequest,
    pub effects: Vec<Effect>,
    /// Members whose new rank has not reached the source yet. The next sync
    /// pass retries it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<String>,
    /// Members named by an effect that have no record. Nothing was applied
    /// to them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

#[derive(Default)]
struct Applied {
    deferred: Vec<String>,
    skipped: Vec<String>,
}

pub struct Roster {
    config: Config,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    engine: WorkflowEngine,
}

impl Roster {
    /// Write `.roster/config.yaml` and an empty `roles.yaml` under `root`.
    /// Existing files are left alone. Returns the files created.
    pub fn init(root: &Path, community: &str) -> Result<Vec<PathBuf>> {
        ensure_dir(&paths::roster_dir(root))?;
        let mut created = Vec::new();

        let config_path = paths::config_path(root);
        let config = serde_yaml::to_string(&Config::new(community))?;
        if write_if_missing(&config_path, config.as_bytes())? {
            created.push(config_path);
        }
        let roles_path = paths::roles_path(root);
        if write_if_missing(&roles_path, ROLES_TEMPLATE.as_bytes())? {
            created.push(roles_path);
        }
        Ok(created)
    }

    /// Open the project at `root`: its config, its configured role source
    /// and the redb store.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        config.check()?;
        let source = source::from_config(root, &config.source)?;
        ensure_dir(&paths::roster_dir(root))?;
        let repo = RedbRepository::open(&paths::db_path(root))?;
        Self::with_parts(config, Arc::new(repo), Arc::from(source), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: Config,
        repo: Arc<dyn Repository>,
        source: Arc<dyn ExternalRoleSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.check()?;
        let reconciler = Reconciler::new(
            config.ladder.clone(),
            config.sync.clone(),
            repo.clone(),
            source,
            clock.clone(),
            Arc::new(MemberLocks::new()),
        )?;
        let engine = WorkflowEngine::new(config.ladder.clone(), config.workflow.clone());
        Ok(Self {
            config,
            repo,
            clock,
            reconciler,
            engine,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.config.ladder
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub fn sync_all(&self) -> Result<SyncReport> {
        self.reconciler.sync_all()
    }

    pub fn sync_member(&self, member_id: &str) -> Result<MemberSync> {
        self.reconciler.sync_member_by_id(member_id)
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    pub fn members(&self) -> Result<Vec<MemberRecord>> {
        self.repo.list_members()
    }

    pub fn member(&self, member_id: &str) -> Result<MemberRecord> {
        paths::validate_member_id(member_id)?;
        self.repo
            .get_member(member_id)?
            .ok_or_else(|| RosterError::MemberNotFound(member_id.to_string()))
    }

    /// Delete a member record. Sync only reports members the source dropped;
    /// removing them is an operator decision.
    pub fn remove_member(&self, member_id: &str) -> Result<()> {
        paths::validate_member_id(member_id)?;
        let removed = self
            .reconciler
            .locks()
            .with(member_id, || self.repo.remove_member(member_id))?;
        if !removed {
            return Err(RosterError::MemberNotFound(member_id.to_string()));
        }
        tracing::info!(member = member_id, "member record removed");
        Ok(())
    }

    /// Resolve an acting member. `system` holds every capability.
    pub fn actor(&self, actor_id: &str) -> Result<Actor> {
        if actor_id == Actor::SYSTEM_ID {
            return Ok(Actor::system());
        }
        let record = self.member(actor_id)?;
        Ok(Actor::new(record.external_id, record.capabilities))
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Look a request up by full id or by a unique prefix of its hex form.
    pub fn request(&self, reference: &str) -> Result<WorkflowRequest> {
        if let Ok(id) = Uuid::parse_str(reference) {
            return self
                .repo
                .get_request(id)?
                .ok_or_else(|| RosterError::RequestNotFound(reference.to_string()));
        }
        let prefix = reference.to_ascii_lowercase().replace('-', "");
        if prefix.is_empty() {
            return Err(RosterError::RequestNotFound(reference.to_string()));
        }
        let mut matches: Vec<WorkflowRequest> = self
            .repo
            .list_requests()?
            .into_iter()
            .filter(|r| r.id.simple().to_string().starts_with(&prefix))
            .collect();
        match matches.len() {
            0 => Err(RosterError::RequestNotFound(reference.to_string())),
            1 => Ok(matches.remove(0)),
            n => Err(RosterError::RequestNotFound(format!(
                "{reference} is ambiguous ({n} matches)"
            ))),
        }
    }

    pub fn requests(
        &self,
        kind: Option<WorkflowKind>,
        state: Option<WorkflowState>,
    ) -> Result<Vec<WorkflowRequest>> {
        self.repo.find_requests(kind, state)
    }

    /// Open requests `actor_id` can act on, with the actions available.
    pub fn pending_for(&self, actor_id: &str) -> Result<Vec<(WorkflowRequest, Vec<ActionKind>)>> {
        let actor = self.actor(actor_id)?;
        Ok(self
            .repo
            .list_requests()?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .filter_map(|r| {
                let actions = self.engine.available_actions(&r, &actor);
                (!actions.is_empty()).then_some((r, actions))
            })
            .collect())
    }

    /// Open a request on behalf of `actor_id`.
    pub fn submit(
        &self,
        actor_id: &str,
        subject: &str,
        proposal: Proposal,
        notes: Option<String>,
    ) -> Result<Submission> {
        let actor = self.actor(actor_id)?;
        let subject_record = self.repo.get_member(subject)?;
        let outcome = self.engine.create(
            &actor,
            subject,
            subject_record.as_ref(),
            proposal,
            notes,
            self.clock.now(),
        )?;
        self.check_effects(&outcome.effects)?;
        self.repo.upsert_request(&outcome.request)?;
        tracing::info!(
            request = %outcome.request.id,
            kind = %outcome.request.kind,
            subject,
            state = %outcome.request.state,
            actor = actor_id,
            "workflow request created"
        );
        self.finish(outcome)
    }

    /// Apply one stage action to the request `reference` names.
    pub fn act(
        &self,
        actor_id: &str,
        reference: &str,
        action: StageAction,
        notes: Option<String>,
    ) -> Result<Submission> {
        let actor = self.actor(actor_id)?;
        let current = self.request(reference)?;
        let outcome = self
            .engine
            .transition(&actor, &current, action, notes, self.clock.now())?;
        self.check_effects(&outcome.effects)?;
        // Only one caller can extend a given history; effects follow the
        // winning append.
        self.repo
            .append_stage_events(&outcome.request, current.history.len())?;
        tracing::info!(
            request = %outcome.request.id,
            from = %current.state,
            to = %outcome.request.state,
            actor = actor_id,
            "workflow request advanced"
        );
        self.finish(outcome)
    }

    fn finish(&self, outcome: Outcome) -> Result<Submission> {
        let applied = self.apply_effects(&outcome.effects)?;
        Ok(Submission {
            request: outcome.request,
            effects: outcome.effects,
            deferred: applied.deferred,
            skipped: applied.skipped,
        })
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    /// Reject a stage whose rank change names a member with no record. Runs
    /// before the request is stored so a failure leaves it untouched.
    fn check_effects(&self, effects: &[Effect]) -> Result<()> {
        for effect in effects {
            if let Effect::SetRank { member, .. } = effect {
                if self.repo.get_member(member)?.is_none() {
                    return Err(RosterError::MemberNotFound(member.clone()));
                }
            }
        }
        Ok(())
    }

    fn apply_effects(&self, effects: &[Effect]) -> Result<Applied> {
        let mut applied = Applied::default();
        for effect in effects {
            match effect {
                Effect::SetRank { member, rank } => match self.set_rank(member, rank)? {
                    Some(true) => {}
                    Some(false) => applied.deferred.push(member.clone()),
                    None => {
                        tracing::warn!(member = %member, rank = %rank, "no record for approved rank change; skipped");
                        applied.skipped.push(member.clone());
                    }
                },
                Effect::AdjustXp { member, delta } => {
                    let found = self.update_member(member, |m| {
                        m.adjust_xp(*delta);
                        tracing::info!(member = %m.external_id, delta, xp = m.xp, "XP adjusted");
                        Ok(())
                    })?;
                    if !found {
                        applied.skipped.push(member.clone());
                    }
                }
                Effect::AwardXp { grants } => {
                    for (member, amount) in grants {
                        let found = self.update_member(member, |m| {
                            m.xp = m.xp.saturating_add(*amount);
                            tracing::info!(member = %m.external_id, amount, xp = m.xp, "XP awarded");
                            Ok(())
                        })?;
                        if !found {
                            tracing::warn!(member = %member, amount, "no record for XP grant; skipped");
                            applied.skipped.push(member.clone());
                        }
                    }
                }
                Effect::Place {
                    recruit,
                    username,
                    rank,
                    unit,
                } => {
                    if !self.place(recruit, username.as_deref(), rank, unit)? {
                        applied.deferred.push(recruit.clone());
                    }
                }
            }
        }
        Ok(applied)
    }

    /// Load, modify and store one record under its lock. False if the
    /// member has no record.
    fn update_member<F>(&self, member_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut MemberRecord) -> Result<()>,
    {
        self.reconciler.locks().with(member_id, || {
            let Some(mut record) = self.repo.get_member(member_id)? else {
                return Ok(false);
            };
            f(&mut record)?;
            self.repo.upsert_member(&record)?;
            Ok(true)
        })
    }

    /// Apply a manually approved rank. Promotions raise XP to the new floor;
    /// demotions into XP-governed ranks clamp XP below the next threshold.
    /// `Some(false)` when the source did not take the change, `None` when the
    /// member has no record.
    fn set_rank(&self, member_id: &str, rank: &str) -> Result<Option<bool>> {
        let ladder = &self.config.ladder;
        let mut pushed = true;
        let found = self.update_member(member_id, |record| {
            let old = record.canonical_rank.clone();
            record.set_rank(rank, ladder)?;
            record.raise_xp_floor(ladder)?;
            if self.reconciler.xp_governed(rank)? && rank != self.config.sync.xp_ceiling {
                if let Some(next) = ladder.next_above(rank)? {
                    if record.xp >= next.xp {
                        record.xp = next.xp - 1;
                    }
                }
            }
            pushed = self.reconciler.push_rank(record, rank)?;
            tracing::info!(
                member = member_id,
                from = %old,
                to = rank,
                xp = record.xp,
                pushed,
                "approved rank change applied"
            );
            Ok(())
        })?;
        Ok(found.then_some(pushed))
    }

    /// Ensure the recruit has a record. Existing members keep their rank.
    fn place(&self, recruit: &str, username: Option<&str>, rank: &str, unit: &str) -> Result<bool> {
        let ladder = &self.config.ladder;
        self.reconciler.locks().with(recruit, || {
            if let Some(existing) = self.repo.get_member(recruit)? {
                tracing::info!(member = recruit, rank = %existing.canonical_rank, unit, "recruit already tracked");
                return Ok(true);
            }
            let xp = if self.config.sync.seed_xp_from_rank {
                ladder.threshold_for(rank)?
            } else {
                0
            };
            let mut record = MemberRecord::new(recruit, rank, xp, ladder, self.clock.now())?
                .with_username(username.map(str::to_string));
            let pushed = self.reconciler.push_rank(&mut record, rank)?;
            self.repo.upsert_member(&record)?;
            tracing::info!(member = recruit, rank, unit, pushed, "recruit placed");
            Ok(pushed)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
