use crate::capability::ActorContext;
use crate::config::WorkflowConfig;
use crate::error::{Result, RosterError};
use crate::ladder::RankLadder;
use crate::member::MemberRecord;
use crate::paths::validate_member_id;
use crate::workflow::proposal::{DisciplinaryGrade, Proposal, ProposalContext, XpAward};
use crate::workflow::request::WorkflowRequest;
use crate::workflow::table::{default_rules, RuleContext, Target, TransitionRule};
use crate::workflow::types::{ActionKind, StageAction, StageEvent, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// A change to member state produced by an approving transition. The engine
/// hands these out once per request; applying them is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    SetRank {
        member: String,
        rank: String,
    },
    AdjustXp {
        member: String,
        delta: i64,
    },
    AwardXp {
        grants: Vec<(String, u64)>,
    },
    Place {
        recruit: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        rank: String,
        unit: String,
    },
}

impl Effect {
    /// Members whose records this effect touches.
    pub fn members(&self) -> Vec<&str> {
        match self {
            Effect::SetRank { member, .. } | Effect::AdjustXp { member, .. } => vec![member],
            Effect::AwardXp { grants } => grants.iter().map(|(m, _)| m.as_str()).collect(),
            Effect::Place { recruit, .. } => vec![recruit],
        }
    }
}

/// Result of a create or transition: the updated request and any effects to
/// apply. `effects` is non-empty at most once in a request's life.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request: WorkflowRequest,
    pub effects: Vec<Effect>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Generic approval state machine over a transition table.
///
/// Every method is pure: requests are taken by reference and returned
/// updated, so a failed call leaves nothing half-applied.
pub struct WorkflowEngine {
    ladder: RankLadder,
    settings: WorkflowConfig,
    rules: Vec<TransitionRule>,
}

impl WorkflowEngine {
    pub fn new(ladder: RankLadder, settings: WorkflowConfig) -> Self {
        Self::with_rules(ladder, settings, default_rules())
    }

    pub fn with_rules(
        ladder: RankLadder,
        settings: WorkflowConfig,
        rules: Vec<TransitionRule>,
    ) -> Self {
        Self {
            ladder,
            settings,
            rules,
        }
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.ladder
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    fn find_rule(
        &self,
        request: &WorkflowRequest,
        action: ActionKind,
        from: Option<WorkflowState>,
    ) -> Result<&TransitionRule> {
        self.rules
            .iter()
            .find(|r| r.matches(request.kind, action, from))
            .ok_or_else(|| RosterError::InvalidTransition {
                from: from.map_or_else(|| "new".to_string(), |s| s.to_string()),
                action: action.to_string(),
                reason: format!("{} requests have no such transition", request.kind),
            })
    }

    fn resolve(
        &self,
        rule: &TransitionRule,
        request: &WorkflowRequest,
        action: &StageAction,
    ) -> Result<WorkflowState> {
        match rule.target {
            Target::To(s) => Ok(s),
            Target::Stay => Ok(request.state),
            Target::Restore => request.previous_state.ok_or_else(|| RosterError::InvalidTransition {
                from: request.state.to_string(),
                action: action.to_string(),
                reason: "no state recorded to restore".into(),
            }),
            Target::Decide(decide, _) => Ok(decide(&RuleContext {
                request,
                action,
                ladder: &self.ladder,
                settings: &self.settings,
            })),
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Open a new request. `subject_record` is the subject's current record,
    /// if one exists.
    pub fn create(
        &self,
        actor: &dyn ActorContext,
        subject: &str,
        subject_record: Option<&MemberRecord>,
        mut proposal: Proposal,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        validate_member_id(subject)?;
        let kind = proposal.kind();
        let mut request = WorkflowRequest {
            id: Uuid::new_v4(),
            kind,
            subject: subject.to_string(),
            created_by: actor.actor_id().to_string(),
            proposal: proposal.clone(),
            state: WorkflowState::Pending,
            previous_state: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            effects_applied: false,
            automatic: false,
        };

        let rule = self.find_rule(&request, ActionKind::Create, None)?;
        if let Some(cap) = rule.requires {
            actor.require(cap, &format!("create {kind}"))?;
        }

        proposal.prepare(&ProposalContext {
            subject: subject_record,
            ladder: &self.ladder,
            settings: &self.settings,
        })?;
        request.proposal = proposal;

        let action = StageAction::Create;
        let to = self.resolve(rule, &request, &action)?;
        Ok(self.advance(request, actor, action, to, notes, now))
    }

    // -----------------------------------------------------------------------
    // Transition
    // -----------------------------------------------------------------------

    /// Apply one stage action. Fails without side effects if the request is
    /// terminal, the kind has no such transition from the current state, the
    /// actor lacks the gating capability, or the action's data is invalid.
    pub fn transition(
        &self,
        actor: &dyn ActorContext,
        request: &WorkflowRequest,
        action: StageAction,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        if request.state.is_terminal() {
            return Err(RosterError::TerminalState {
                id: request.id.to_string(),
                state: request.state.to_string(),
            });
        }

        let rule = self.find_rule(request, action.kind(), Some(request.state))?;
        if let Some(cap) = rule.requires {
            actor.require(cap, action.kind().as_str())?;
        }
        self.check_action(request, &action)?;

        let to = self.resolve(rule, request, &action)?;
        Ok(self.advance(request.clone(), actor, action, to, notes, now))
    }

    fn check_action(&self, request: &WorkflowRequest, action: &StageAction) -> Result<()> {
        let invalid = |reason: &str| RosterError::InvalidTransition {
            from: request.state.to_string(),
            action: action.to_string(),
            reason: reason.to_string(),
        };
        match action {
            StageAction::Reject { reason } if reason.trim().is_empty() => {
                Err(invalid("a rejection reason is required"))
            }
            StageAction::AcceptRejection { alternate_unit } if alternate_unit.trim().is_empty() => {
                Err(invalid("an alternate unit is required"))
            }
            StageAction::AwardXp { amount: 0 } => Err(invalid("award must be at least 1 XP")),
            StageAction::Distribute { assignments } => {
                let Proposal::TrainingCredit(p) = &request.proposal else {
                    return Err(invalid("only training credit can be distributed"));
                };
                if assignments.is_empty() {
                    return Err(invalid("no trainees named"));
                }
                match assignments.keys().find(|t| !p.trainees.contains(t)) {
                    Some(t) => Err(invalid(&format!("'{t}' is not a trainee on this request"))),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    /// Record the event, fold the action into the proposal, and hand out
    /// effects if this is the approving transition.
    fn advance(
        &self,
        mut request: WorkflowRequest,
        actor: &dyn ActorContext,
        action: StageAction,
        to: WorkflowState,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let from = request.history.last().map(|_| request.state);
        // History stays ordered even if the caller's clock steps backward.
        let at = request.history.last().map_or(now, |e| e.at.max(now));

        match &action {
            StageAction::Hold => request.previous_state = from,
            StageAction::Release => request.previous_state = None,
            _ => {}
        }
        fold_action(&mut request.proposal, actor.actor_id(), &action, to, at);

        request.history.push(StageEvent {
            actor: actor.actor_id().to_string(),
            action,
            from,
            to,
            at,
            notes,
        });
        request.state = to;
        request.updated_at = at;

        let mut effects = Vec::new();
        if to.is_approval() && !request.effects_applied {
            effects = effects_for(&request);
            request.effects_applied = true;
            tracing::info!(
                request = %request.id,
                kind = %request.kind,
                subject = %request.subject,
                state = %to,
                effects = effects.len(),
                "workflow request approved"
            );
        }
        Outcome { request, effects }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Actions `actor` may take on `request` right now.
    pub fn available_actions(
        &self,
        request: &WorkflowRequest,
        actor: &dyn ActorContext,
    ) -> Vec<ActionKind> {
        if request.state.is_terminal() {
            return Vec::new();
        }
        let mut out: Vec<ActionKind> = Vec::new();
        for rule in self
            .rules
            .iter()
            .filter(|r| r.action != ActionKind::Create)
            .filter(|r| r.matches(request.kind, r.action, Some(request.state)))
        {
            let allowed = rule.requires.map_or(true, |c| actor.capabilities().has(c));
            if allowed && !out.contains(&rule.action) {
                out.push(rule.action);
            }
        }
        out
    }

    /// Replay `history` from the initial state and check that every event is
    /// a legal transition and the result matches the stored state.
    pub fn replay(&self, request: &WorkflowRequest) -> Result<WorkflowState> {
        let broken = |i: usize, reason: String| RosterError::InvalidTransition {
            from: format!("history[{i}]"),
            action: "replay".into(),
            reason,
        };

        let mut state: Option<WorkflowState> = None;
        let mut held: Option<WorkflowState> = None;
        let mut last_at: Option<DateTime<Utc>> = None;

        for (i, event) in request.history.iter().enumerate() {
            if event.from != state {
                return Err(broken(
                    i,
                    format!("event starts from {:?}, request was in {:?}", event.from, state),
                ));
            }
            if let Some(s) = state.filter(|s| s.is_terminal()) {
                return Err(broken(i, format!("event after terminal state {s}")));
            }
            if last_at.is_some_and(|t| event.at < t) {
                return Err(broken(i, "events are out of time order".into()));
            }
            let rule = self
                .find_rule(request, event.action.kind(), state)
                .map_err(|e| broken(i, e.to_string()))?;
            if !rule.target.admits(state, held, event.to) {
                return Err(broken(
                    i,
                    format!("rule '{}' cannot lead to {}", rule.id, event.to),
                ));
            }
            match event.action {
                StageAction::Hold => held = state,
                StageAction::Release => held = None,
                _ => {}
            }
            state = Some(event.to);
            last_at = Some(event.at);
        }

        let state = state.ok_or_else(|| broken(0, "empty history".into()))?;
        if state != request.state || held != request.previous_state {
            return Err(broken(
                request.history.len(),
                format!(
                    "replayed state {state} does not match stored state {}",
                    request.state
                ),
            ));
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Proposal updates and effects
// ---------------------------------------------------------------------------

fn fold_action(
    proposal: &mut Proposal,
    actor: &str,
    action: &StageAction,
    to: WorkflowState,
    at: DateTime<Utc>,
) {
    match (proposal, action) {
        (Proposal::PerformanceReport(p), StageAction::Review { flag, remarks }) => {
            p.flag = Some(*flag);
            p.senior_remarks = Some(remarks.clone());
        }
        (Proposal::PerformanceReport(p), StageAction::AwardXp { amount }) => {
            p.xp_awards.push(XpAward {
                actor: actor.to_string(),
                amount: *amount,
                at,
            });
        }
        (Proposal::TrainingCredit(p), StageAction::Distribute { assignments }) => {
            p.final_xp = assignments.clone();
        }
        (Proposal::TrainingCredit(p), _) if to == WorkflowState::Approved => {
            p.final_xp = p.uniform_grants();
        }
        (Proposal::RecruitmentPlacement(p), StageAction::AcceptRejection { alternate_unit }) => {
            p.alternate_unit = Some(alternate_unit.clone());
            p.final_unit = Some(alternate_unit.clone());
        }
        (Proposal::RecruitmentPlacement(p), StageAction::Approve | StageAction::Veto) => {
            p.final_unit = Some(p.target_unit.clone());
        }
        _ => {}
    }
}

fn effects_for(request: &WorkflowRequest) -> Vec<Effect> {
    let member = request.subject.clone();
    match &request.proposal {
        Proposal::Promotion(p) => vec![Effect::SetRank {
            member,
            rank: p.target_rank.clone(),
        }],
        Proposal::Demotion(p) => vec![Effect::SetRank {
            member,
            rank: p.target_rank.clone(),
        }],
        Proposal::DisciplinaryAction(p) => {
            // Deduct before re-ranking so the demotion's XP clamp is final.
            let mut out = Vec::new();
            if p.xp_deduction > 0 {
                out.push(Effect::AdjustXp {
                    member: member.clone(),
                    delta: -i64::try_from(p.xp_deduction).unwrap_or(i64::MAX),
                });
            }
            if p.grade == DisciplinaryGrade::Demotion {
                if let Some(rank) = &p.demotion_rank {
                    out.push(Effect::SetRank {
                        member,
                        rank: rank.clone(),
                    });
                }
            }
            out
        }
        Proposal::TrainingCredit(p) => {
            let grants: Vec<(String, u64)> = p
                .final_xp
                .iter()
                .filter(|(_, xp)| **xp > 0)
                .map(|(m, xp)| (m.clone(), *xp))
                .collect();
            if grants.is_empty() {
                Vec::new()
            } else {
                vec![Effect::AwardXp { grants }]
            }
        }
        Proposal::RecruitmentPlacement(p) => match &p.final_unit {
            Some(unit) => vec![Effect::Place {
                recruit: p.recruit_id.clone(),
                username: p.recruit_username.clone(),
                rank: p.recruit_rank.clone(),
                unit: unit.clone(),
            }],
            None => Vec::new(),
        },
        Proposal::PerformanceReport(p) => match p.total_awarded() {
            0 => Vec::new(),
            total => vec![Effect::AwardXp {
                grants: vec![(member, total)],
            }],
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Actor, CapabilityFlags, Tier};
    use crate::workflow::proposal::{
        DisciplinaryProposal, PerformanceReportProposal, PromotionProposal, RecruitmentProposal,
        ReportFlag, ReportScores, TrainingProposal, TrainingType,
    };
    use crate::workflow::types::WorkflowKind;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(RankLadder::default(), WorkflowConfig::default())
    }

    fn actor(id: &str, tier: Tier) -> Actor {
        Actor::new(id, CapabilityFlags::for_tier(tier))
    }

    fn member(id: &str, rank: &str, xp: u64) -> MemberRecord {
        MemberRecord::new(id, rank, xp, &RankLadder::default(), Utc::now()).unwrap()
    }

    fn discipline(grade: DisciplinaryGrade, xp: u64) -> Proposal {
        Proposal::DisciplinaryAction(DisciplinaryProposal {
            grade,
            reason: "absent without leave".into(),
            xp_deduction: xp,
            demotion_rank: None,
        })
    }

    fn recruitment() -> Proposal {
        Proposal::RecruitmentPlacement(RecruitmentProposal {
            recruit_id: "900".into(),
            recruit_username: Some("rookie".into()),
            recruit_rank: String::new(),
            target_unit: "Alpha".into(),
            position: None,
            alternate_unit: None,
            final_unit: None,
        })
    }

    fn report() -> Proposal {
        Proposal::PerformanceReport(PerformanceReportProposal {
            period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            scores: ReportScores {
                communication: 3,
                discipline: 2,
                teamwork: 3,
                leadership_potential: 2,
                technical_skill: 3,
            },
            calculated_score: 0.0,
            strengths: "reliable".into(),
            weaknesses: "punctuality".into(),
            remarks: String::new(),
            flag: None,
            senior_remarks: None,
            xp_awards: Vec::new(),
        })
    }

    fn training(xp: u64) -> Proposal {
        Proposal::TrainingCredit(TrainingProposal {
            training_type: TrainingType::Training,
            trainees: vec!["11".into(), "12".into()],
            xp_amount: xp,
            final_xp: BTreeMap::new(),
        })
    }

    // -- promotion ---------------------------------------------------------

    #[test]
    fn promotion_below_ceiling_is_auto_approved() {
        let e = engine();
        let senior = actor("1", Tier::Senior);
        let subject = member("7", "Airman", 10);
        let out = e
            .create(
                &senior,
                "7",
                Some(&subject),
                Proposal::Promotion(PromotionProposal {
                    current_rank: String::new(),
                    target_rank: "Senior Airman".into(),
                    reason: "steady".into(),
                }),
                None,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out.request.state, WorkflowState::Approved);
        assert_eq!(
            out.effects,
            vec![Effect::SetRank {
                member: "7".into(),
                rank: "Senior Airman".into()
            }]
        );
    }

    #[test]
    fn promotion_at_ceiling_needs_officer() {
        let e = engine();
        let senior = actor("1", Tier::Senior);
        let subject = member("7", "Technical Sergeant", 175);
        let out = e
            .create(
                &senior,
                "7",
                Some(&subject),
                Proposal::Promotion(PromotionProposal {
                    current_rank: String::new(),
                    target_rank: "Master Sergeant".into(),
                    reason: "leadership".into(),
                }),
                None,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out.request.state, WorkflowState::Pending);
        assert!(out.effects.is_empty());

        let err = e
            .transition(&senior, &out.request, StageAction::Approve, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RosterError::Unauthorized { .. }));

        let officer = actor("2", Tier::Officer);
        let err = e
            .transition(
                &officer,
                &out.request,
                StageAction::Reject { reason: " ".into() },
                None,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, RosterError::InvalidTransition { .. }));

        let done = e
            .transition(&officer, &out.request, StageAction::Approve, None, Utc::now())
            .unwrap();
        assert_eq!(done.request.state, WorkflowState::Approved);
        assert_eq!(done.effects.len(), 1);
    }

    #[test]
    fn creating_a_promotion_requires_senior() {
        let e = engine();
        let instructor = actor("1", Tier::Instructor);
        let subject = member("7", "Airman", 10);
        let err = e
            .create(
                &instructor,
                "7",
                Some(&subject),
                Proposal::Promotion(PromotionProposal {
                    current_rank: String::new(),
                    target_rank: "Senior Airman".into(),
                    reason: "x".into(),
                }),
                None,
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "'create promotion' requires senior capability");
    }

    // -- disciplinary --------------------------------------------------------

    #[test]
    fn low_grades_complete_on_creation() {
        let e = engine();
        let senior = actor("1", Tier::Senior);
        let subject = member("7", "Airman", 12);
        let warn = e
            .create(&senior, "7", Some(&subject), discipline(DisciplinaryGrade::Warning, 0), None, Utc::now())
            .unwrap();
        assert_eq!(warn.request.state, WorkflowState::Completed);
        assert!(warn.effects.is_empty());

        let minor = e
            .create(&senior, "7", Some(&subject), discipline(DisciplinaryGrade::ViolationII, 9), None, Utc::now())
            .unwrap();
        assert_eq!(minor.request.state, WorkflowState::Completed);
        assert_eq!(
            minor.effects,
            vec![Effect::AdjustXp {
                member: "7".into(),
                delta: -9
            }]
        );
    }

    #[test]
    fn grade_three_at_threshold_needs_officer_and_applies_once() {
        let e = engine();
        let senior = actor("1", Tier::Senior);
        let officer = actor("2", Tier::Officer);
        let subject = member("7", "Airman", 12);
        let created = e
            .create(&senior, "7", Some(&subject), discipline(DisciplinaryGrade::ViolationII, 15), None, Utc::now())
            .unwrap();
        assert_eq!(created.request.state, WorkflowState::Pending);
        assert!(created.effects.is_empty());

        let approved = e
            .transition(&officer, &created.request, StageAction::Approve, None, Utc::now())
            .unwrap();
        assert_eq!(approved.request.state, WorkflowState::Approved);
        assert_eq!(
            approved.effects,
            vec![Effect::AdjustXp {
                member: "7".into(),
                delta: -15
            }]
        );

        let again = e
            .transition(&officer, &approved.request, StageAction::Approve, None, Utc::now())
            .unwrap_err();
        assert!(matches!(again, RosterError::TerminalState { .. }));
        assert_eq!(approved.request.history.len(), 2);
    }

    // -- training ------------------------------------------------------------

    #[test]
    fn small_training_is_self_executing() {
        let e = engine();
        let instructor = actor("3", Tier::Instructor);
        let out = e
            .create(&instructor, "3", None, training(4), None, Utc::now())
            .unwrap();
        assert_eq!(out.request.state, WorkflowState::Approved);
        assert_eq!(
            out.effects,
            vec![Effect::AwardXp {
                grants: vec![("11".into(), 4), ("12".into(), 4)]
            }]
        );
    }

    #[test]
    fn training_review_chain_with_distribution() {
        let e = engine();
        let instructor = actor("3", Tier::Instructor);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let now = Utc::now();

        let out = e.create(&instructor, "3", None, training(20), None, now).unwrap();
        assert_eq!(out.request.state, WorkflowState::Pending);

        let err = e
            .transition(&senior, &out.request, StageAction::BumpBack, None, now)
            .unwrap_err();
        assert!(matches!(err, RosterError::InvalidTransition { .. }));

        let up = e
            .transition(&senior, &out.request, StageAction::BumpUp, None, now)
            .unwrap();
        assert_eq!(up.request.state, WorkflowState::BumpedUp);

        let err = e
            .transition(&senior, &up.request, StageAction::Approve, None, now)
            .unwrap_err();
        assert!(matches!(err, RosterError::Unauthorized { .. }));

        let mut assignments = BTreeMap::new();
        assignments.insert("11".to_string(), 20);
        assignments.insert("12".to_string(), 5);
        let done = e
            .transition(
                &officer,
                &up.request,
                StageAction::Distribute { assignments },
                None,
                now,
            )
            .unwrap();
        assert_eq!(done.request.state, WorkflowState::Approved);
        assert_eq!(
            done.effects,
            vec![Effect::AwardXp {
                grants: vec![("11".into(), 20), ("12".into(), 5)]
            }]
        );
    }

    #[test]
    fn distribute_rejects_unknown_trainee() {
        let e = engine();
        let instructor = actor("3", Tier::Instructor);
        let officer = actor("5", Tier::Officer);
        let out = e.create(&instructor, "3", None, training(20), None, Utc::now()).unwrap();
        let mut assignments = BTreeMap::new();
        assignments.insert("99".to_string(), 20);
        let err = e
            .transition(&officer, &out.request, StageAction::Distribute { assignments }, None, Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("'99' is not a trainee"));
    }

    // -- recruitment ---------------------------------------------------------

    #[test]
    fn bumped_recruitment_final_reject_is_terminal() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let now = Utc::now();

        let out = e.create(&recruiter, "900", None, recruitment(), None, now).unwrap();
        assert_eq!(out.request.state, WorkflowState::Pending);
        let up = e
            .transition(&senior, &out.request, StageAction::BumpUp, None, now)
            .unwrap();
        let rejected = e
            .transition(&officer, &up.request, StageAction::FinalReject, None, now)
            .unwrap();
        assert_eq!(rejected.request.state, WorkflowState::FinalRejected);
        assert!(rejected.effects.is_empty());

        for a in [&recruiter, &senior, &officer] {
            let err = e
                .transition(a, &rejected.request, StageAction::Approve, None, now)
                .unwrap_err();
            assert!(matches!(err, RosterError::TerminalState { .. }));
        }
    }

    #[test]
    fn accept_rejection_places_in_alternate_unit() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let now = Utc::now();

        let out = e.create(&recruiter, "900", None, recruitment(), None, now).unwrap();
        let up = e.transition(&senior, &out.request, StageAction::BumpUp, None, now).unwrap();
        let placed = e
            .transition(
                &officer,
                &up.request,
                StageAction::AcceptRejection {
                    alternate_unit: "Bravo".into(),
                },
                None,
                now,
            )
            .unwrap();
        assert_eq!(placed.request.state, WorkflowState::Approved);
        assert_eq!(
            placed.effects,
            vec![Effect::Place {
                recruit: "900".into(),
                username: Some("rookie".into()),
                rank: "Citizen".into(),
                unit: "Bravo".into()
            }]
        );
    }

    #[test]
    fn bump_back_returns_to_senior_review() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let now = Utc::now();

        let out = e.create(&recruiter, "900", None, recruitment(), None, now).unwrap();
        let up = e.transition(&senior, &out.request, StageAction::BumpUp, None, now).unwrap();
        let back = e.transition(&officer, &up.request, StageAction::BumpBack, None, now).unwrap();
        assert_eq!(back.request.state, WorkflowState::BumpedBack);
        let ok = e.transition(&senior, &back.request, StageAction::Approve, None, now).unwrap();
        assert_eq!(ok.request.state, WorkflowState::Approved);
        assert_eq!(e.replay(&ok.request).unwrap(), WorkflowState::Approved);
    }

    // -- performance report --------------------------------------------------

    #[test]
    fn red_flag_then_hold_release_restores_flagged() {
        let e = engine();
        let instructor = actor("3", Tier::Instructor);
        let senior = actor("4", Tier::Senior);
        let subject = member("7", "Airman", 10);
        let now = Utc::now();

        let draft = e.create(&instructor, "7", Some(&subject), report(), None, now).unwrap();
        assert_eq!(draft.request.state, WorkflowState::Draft);
        let submitted = e
            .transition(&instructor, &draft.request, StageAction::Submit, None, now)
            .unwrap();
        assert_eq!(submitted.request.state, WorkflowState::Submitted);

        let flagged = e
            .transition(
                &senior,
                &submitted.request,
                StageAction::Review {
                    flag: ReportFlag::Red,
                    remarks: "needs attention".into(),
                },
                None,
                now,
            )
            .unwrap();
        assert_eq!(flagged.request.state, WorkflowState::Flagged);

        let held = e.transition(&senior, &flagged.request, StageAction::Hold, None, now).unwrap();
        assert_eq!(held.request.state, WorkflowState::Hold);
        assert_eq!(held.request.previous_state, Some(WorkflowState::Flagged));

        let err = e.transition(&senior, &held.request, StageAction::Hold, None, now).unwrap_err();
        assert!(matches!(err, RosterError::InvalidTransition { .. }));

        let released = e
            .transition(&senior, &held.request, StageAction::Release, None, now)
            .unwrap();
        assert_eq!(released.request.state, WorkflowState::Flagged);
        assert_eq!(released.request.previous_state, None);
        assert_eq!(e.replay(&released.request).unwrap(), WorkflowState::Flagged);
    }

    #[test]
    fn report_awards_accumulate_and_apply_at_finalize() {
        let e = engine();
        let instructor = actor("3", Tier::Instructor);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let subject = member("7", "Airman", 10);
        let now = Utc::now();

        let mut req = e.create(&instructor, "7", Some(&subject), report(), None, now).unwrap().request;
        for step in [
            (&senior, StageAction::AwardXp { amount: 3 }),
            (&instructor, StageAction::Submit),
            (&senior, StageAction::AwardXp { amount: 2 }),
            (
                &senior,
                StageAction::Review {
                    flag: ReportFlag::Green,
                    remarks: "solid".into(),
                },
            ),
        ] {
            let out = e.transition(step.0, &req, step.1, None, now).unwrap();
            assert!(out.effects.is_empty());
            req = out.request;
        }
        assert_eq!(req.state, WorkflowState::Reviewed);
        match &req.proposal {
            Proposal::PerformanceReport(p) => {
                assert_eq!(p.xp_awards.len(), 2);
                assert_eq!(p.flag, Some(ReportFlag::Green));
            }
            _ => unreachable!(),
        }

        let fin = e.transition(&officer, &req, StageAction::Finalize, None, now).unwrap();
        assert_eq!(fin.request.state, WorkflowState::Finalized);
        assert_eq!(
            fin.effects,
            vec![Effect::AwardXp {
                grants: vec![("7".into(), 5)]
            }]
        );
    }

    // -- generic -------------------------------------------------------------

    #[test]
    fn demotion_applies_immediately_for_officers_only() {
        let e = engine();
        let subject = member("7", "Staff Sergeant", 100);
        let proposal = Proposal::Demotion(crate::workflow::proposal::DemotionProposal {
            previous_rank: String::new(),
            target_rank: "Senior Airman".into(),
            reason: "conduct".into(),
        });
        let senior = actor("4", Tier::Senior);
        assert!(e
            .create(&senior, "7", Some(&subject), proposal.clone(), None, Utc::now())
            .is_err());
        let officer = actor("5", Tier::Officer);
        let out = e
            .create(&officer, "7", Some(&subject), proposal, None, Utc::now())
            .unwrap();
        assert_eq!(out.request.kind, WorkflowKind::Demotion);
        assert_eq!(out.request.state, WorkflowState::Approved);
        assert_eq!(out.effects.len(), 1);
    }

    #[test]
    fn history_timestamps_never_go_backwards() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let senior = actor("4", Tier::Senior);
        let now = Utc::now();
        let out = e.create(&recruiter, "900", None, recruitment(), None, now).unwrap();
        let earlier = now - Duration::seconds(30);
        let up = e
            .transition(&senior, &out.request, StageAction::BumpUp, None, earlier)
            .unwrap();
        assert!(up.request.history[1].at >= up.request.history[0].at);
        e.replay(&up.request).unwrap();
    }

    #[test]
    fn replay_detects_tampered_state() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let mut req = e
            .create(&recruiter, "900", None, recruitment(), None, Utc::now())
            .unwrap()
            .request;
        req.state = WorkflowState::Approved;
        assert!(e.replay(&req).is_err());
    }

    #[test]
    fn automatic_records_replay_cleanly() {
        let e = engine();
        let req = WorkflowRequest::automatic_rank_change("7", "Airman", "Airman First Class", true, 30, Utc::now());
        assert_eq!(e.replay(&req).unwrap(), WorkflowState::Approved);
    }

    #[test]
    fn available_actions_follow_capabilities() {
        let e = engine();
        let recruiter = actor("6", Tier::Recruiter);
        let senior = actor("4", Tier::Senior);
        let officer = actor("5", Tier::Officer);
        let out = e.create(&recruiter, "900", None, recruitment(), None, Utc::now()).unwrap();
        assert!(e.available_actions(&out.request, &recruiter).is_empty());
        let acts = e.available_actions(&out.request, &senior);
        assert!(acts.contains(&ActionKind::Approve));
        assert!(acts.contains(&ActionKind::BumpUp));
        assert!(acts.contains(&ActionKind::Hold));
        assert!(!acts.contains(&ActionKind::Veto));
        let up = e.transition(&senior, &out.request, StageAction::BumpUp, None, Utc::now()).unwrap();
        assert!(e.available_actions(&up.request, &officer).contains(&ActionKind::Veto));
    }
}
