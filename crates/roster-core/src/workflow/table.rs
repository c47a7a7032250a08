//! Per-kind transition rules. One generic engine walks this table; kinds
//! differ only in which rows apply to them.

use crate::capability::Capability;
use crate::config::WorkflowConfig;
use crate::ladder::RankLadder;
use crate::workflow::proposal::{Proposal, ReportFlag};
use crate::workflow::request::WorkflowRequest;
use crate::workflow::types::{ActionKind, StageAction, WorkflowKind, WorkflowState};

use WorkflowKind::*;
use WorkflowState as S;

// ---------------------------------------------------------------------------
// RuleContext
// ---------------------------------------------------------------------------

/// Inputs a target resolver may consult.
pub struct RuleContext<'a> {
    /// The request as it stood before this action (for creation, after the
    /// proposal was prepared).
    pub request: &'a WorkflowRequest,
    pub action: &'a StageAction,
    pub ladder: &'a RankLadder,
    pub settings: &'a WorkflowConfig,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// States a rule fires from.
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    /// The creating event.
    New,
    In(&'static [WorkflowState]),
    /// Any non-terminal state except `Hold`.
    Open,
}

impl Origin {
    pub fn accepts(self, state: Option<WorkflowState>) -> bool {
        match (self, state) {
            (Origin::New, None) => true,
            (Origin::In(states), Some(s)) => states.contains(&s),
            (Origin::Open, Some(s)) => s.is_open() && s != S::Hold,
            _ => false,
        }
    }
}

/// Where a rule leads.
#[derive(Clone, Copy)]
pub enum Target {
    To(WorkflowState),
    /// State is unchanged; only the proposal is updated.
    Stay,
    /// Back to the state recorded when the request was held.
    Restore,
    /// Decided from the request; the result is always one of the listed states.
    Decide(fn(&RuleContext) -> WorkflowState, &'static [WorkflowState]),
}

impl Target {
    /// True if `to` is a state this target may produce from `from`.
    pub fn admits(
        &self,
        from: Option<WorkflowState>,
        held: Option<WorkflowState>,
        to: WorkflowState,
    ) -> bool {
        match self {
            Target::To(s) => *s == to,
            Target::Stay => from == Some(to),
            Target::Restore => held == Some(to),
            Target::Decide(_, allowed) => allowed.contains(&to),
        }
    }
}

pub struct TransitionRule {
    pub id: &'static str,
    pub kinds: &'static [WorkflowKind],
    pub action: ActionKind,
    pub from: Origin,
    pub requires: Option<Capability>,
    pub target: Target,
}

impl TransitionRule {
    pub fn matches(
        &self,
        kind: WorkflowKind,
        action: ActionKind,
        from: Option<WorkflowState>,
    ) -> bool {
        self.action == action && self.kinds.contains(&kind) && self.from.accepts(from)
    }
}

macro_rules! rule {
    ($id:expr, $kinds:expr, $action:ident, $from:expr, $requires:expr, $target:expr) => {
        TransitionRule {
            id: $id,
            kinds: $kinds,
            action: ActionKind::$action,
            from: $from,
            requires: $requires,
            target: $target,
        }
    };
}

// ---------------------------------------------------------------------------
// Target resolvers
// ---------------------------------------------------------------------------

fn promotion_on_create(ctx: &RuleContext) -> WorkflowState {
    let Proposal::Promotion(p) = &ctx.request.proposal else {
        return S::Pending;
    };
    let target = ctx.ladder.index_of(&p.target_rank);
    let ceiling = ctx.ladder.index_of(&ctx.settings.promotion_approval_rank);
    match (target, ceiling) {
        (Some(t), Some(c)) if t < c => S::Approved,
        _ => S::Pending,
    }
}

fn disciplinary_on_create(ctx: &RuleContext) -> WorkflowState {
    match &ctx.request.proposal {
        Proposal::DisciplinaryAction(p) if !p.needs_officer(ctx.settings) => S::Completed,
        _ => S::Pending,
    }
}

fn training_on_create(ctx: &RuleContext) -> WorkflowState {
    match &ctx.request.proposal {
        Proposal::TrainingCredit(p) if p.xp_amount < ctx.settings.training_review_xp => {
            S::Approved
        }
        _ => S::Pending,
    }
}

fn report_on_review(ctx: &RuleContext) -> WorkflowState {
    match ctx.action {
        StageAction::Review {
            flag: ReportFlag::Red,
            ..
        } => S::Flagged,
        _ => S::Reviewed,
    }
}

// ---------------------------------------------------------------------------
// Default table
// ---------------------------------------------------------------------------

const ALL: &[WorkflowKind] = &[
    Promotion,
    Demotion,
    DisciplinaryAction,
    TrainingCredit,
    RecruitmentPlacement,
    PerformanceReport,
];

const SENIOR_REVIEW: &[WorkflowState] = &[S::Pending, S::BumpedBack];
const REPORT_OPEN: &[WorkflowState] = &[S::Draft, S::Submitted, S::Reviewed, S::Flagged, S::Hold];

/// The transition rules for every kind, first match wins.
pub fn default_rules() -> Vec<TransitionRule> {
    use Capability::{Instructor, Officer, Recruiter, Senior};

    vec![
        // -- promotion ------------------------------------------------------
        rule!(
            "promotion-create",
            &[Promotion],
            Create,
            Origin::New,
            Some(Senior),
            Target::Decide(promotion_on_create, &[S::Approved, S::Pending])
        ),
        rule!(
            "promotion-approve",
            &[Promotion],
            Approve,
            Origin::In(&[S::Pending]),
            Some(Officer),
            Target::To(S::Approved)
        ),
        rule!(
            "promotion-reject",
            &[Promotion],
            Reject,
            Origin::In(&[S::Pending]),
            Some(Officer),
            Target::To(S::Rejected)
        ),
        // -- demotion -------------------------------------------------------
        rule!(
            "demotion-create",
            &[Demotion],
            Create,
            Origin::New,
            Some(Officer),
            Target::To(S::Approved)
        ),
        // -- disciplinary ---------------------------------------------------
        rule!(
            "disciplinary-create",
            &[DisciplinaryAction],
            Create,
            Origin::New,
            Some(Senior),
            Target::Decide(disciplinary_on_create, &[S::Completed, S::Pending])
        ),
        rule!(
            "disciplinary-approve",
            &[DisciplinaryAction],
            Approve,
            Origin::In(&[S::Pending]),
            Some(Officer),
            Target::To(S::Approved)
        ),
        rule!(
            "disciplinary-reject",
            &[DisciplinaryAction],
            Reject,
            Origin::In(&[S::Pending]),
            Some(Officer),
            Target::To(S::Rejected)
        ),
        // -- training -------------------------------------------------------
        rule!(
            "training-create",
            &[TrainingCredit],
            Create,
            Origin::New,
            Some(Instructor),
            Target::Decide(training_on_create, &[S::Approved, S::Pending])
        ),
        rule!(
            "training-senior-approve",
            &[TrainingCredit],
            Approve,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::Approved)
        ),
        rule!(
            "training-senior-reject",
            &[TrainingCredit],
            Reject,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::Rejected)
        ),
        rule!(
            "training-bump-up",
            &[TrainingCredit],
            BumpUp,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::BumpedUp)
        ),
        rule!(
            "training-bump-back",
            &[TrainingCredit],
            BumpBack,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::BumpedBack)
        ),
        rule!(
            "training-officer-approve",
            &[TrainingCredit],
            Approve,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::Approved)
        ),
        rule!(
            "training-officer-reject",
            &[TrainingCredit],
            Reject,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::Rejected)
        ),
        rule!(
            "training-distribute",
            &[TrainingCredit],
            Distribute,
            Origin::In(&[S::Pending, S::BumpedUp, S::BumpedBack]),
            Some(Officer),
            Target::To(S::Approved)
        ),
        // -- recruitment ----------------------------------------------------
        rule!(
            "recruitment-create",
            &[RecruitmentPlacement],
            Create,
            Origin::New,
            Some(Recruiter),
            Target::To(S::Pending)
        ),
        rule!(
            "recruitment-approve",
            &[RecruitmentPlacement],
            Approve,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::Approved)
        ),
        rule!(
            "recruitment-reject",
            &[RecruitmentPlacement],
            Reject,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::Rejected)
        ),
        rule!(
            "recruitment-bump-up",
            &[RecruitmentPlacement],
            BumpUp,
            Origin::In(SENIOR_REVIEW),
            Some(Senior),
            Target::To(S::BumpedUp)
        ),
        rule!(
            "recruitment-veto",
            &[RecruitmentPlacement],
            Veto,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::VetoApproved)
        ),
        rule!(
            "recruitment-accept-rejection",
            &[RecruitmentPlacement],
            AcceptRejection,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::Approved)
        ),
        rule!(
            "recruitment-final-reject",
            &[RecruitmentPlacement],
            FinalReject,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::FinalRejected)
        ),
        rule!(
            "recruitment-bump-back",
            &[RecruitmentPlacement],
            BumpBack,
            Origin::In(&[S::BumpedUp]),
            Some(Officer),
            Target::To(S::BumpedBack)
        ),
        // -- performance report ---------------------------------------------
        rule!(
            "report-create",
            &[PerformanceReport],
            Create,
            Origin::New,
            Some(Instructor),
            Target::To(S::Draft)
        ),
        rule!(
            "report-submit",
            &[PerformanceReport],
            Submit,
            Origin::In(&[S::Draft]),
            Some(Instructor),
            Target::To(S::Submitted)
        ),
        rule!(
            "report-review",
            &[PerformanceReport],
            Review,
            Origin::In(&[S::Submitted]),
            Some(Senior),
            Target::Decide(report_on_review, &[S::Reviewed, S::Flagged])
        ),
        rule!(
            "report-finalize",
            &[PerformanceReport],
            Finalize,
            Origin::In(&[S::Reviewed, S::Flagged]),
            Some(Officer),
            Target::To(S::Finalized)
        ),
        rule!(
            "report-award-xp",
            &[PerformanceReport],
            AwardXp,
            Origin::In(REPORT_OPEN),
            Some(Senior),
            Target::Stay
        ),
        // -- hold / release (every kind) ------------------------------------
        rule!(
            "hold",
            ALL,
            Hold,
            Origin::Open,
            Some(Senior),
            Target::To(S::Hold)
        ),
        rule!(
            "release",
            ALL,
            Release,
            Origin::In(&[S::Hold]),
            Some(Senior),
            Target::Restore
        ),
    ]
}

/// Rules that fire for `kind` from `from`, in table order.
pub fn rules_from<'r>(
    rules: &'r [TransitionRule],
    kind: WorkflowKind,
    from: Option<WorkflowState>,
) -> impl Iterator<Item = &'r TransitionRule> {
    rules
        .iter()
        .filter(move |r| r.kinds.contains(&kind) && r.from.accepts(from))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_ids_are_unique() {
        let rules = default_rules();
        let mut ids: Vec<_> = rules.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn every_kind_has_exactly_one_create_rule() {
        let rules = default_rules();
        for kind in WorkflowKind::all() {
            let n = rules
                .iter()
                .filter(|r| r.matches(*kind, ActionKind::Create, None))
                .count();
            assert_eq!(n, 1, "{kind}");
        }
    }

    #[test]
    fn no_rule_fires_from_a_terminal_state() {
        let rules = default_rules();
        for state in WorkflowState::all().iter().filter(|s| s.is_terminal()) {
            for kind in WorkflowKind::all() {
                assert_eq!(
                    rules_from(&rules, *kind, Some(*state)).count(),
                    0,
                    "{kind} from {state}"
                );
            }
        }
    }

    #[test]
    fn hold_is_not_reentrant() {
        assert!(Origin::Open.accepts(Some(S::Flagged)));
        assert!(!Origin::Open.accepts(Some(S::Hold)));
        assert!(!Origin::Open.accepts(Some(S::Approved)));
        assert!(!Origin::Open.accepts(None));
    }

    #[test]
    fn no_two_rules_share_kind_action_and_origin_state() {
        let rules = default_rules();
        for kind in WorkflowKind::all() {
            for state in WorkflowState::all() {
                let mut seen = std::collections::HashSet::new();
                for r in rules_from(&rules, *kind, Some(*state)) {
                    assert!(
                        seen.insert(r.action),
                        "{kind}: two rules for {} from {state}",
                        r.action
                    );
                }
            }
        }
    }

    #[test]
    fn restore_admits_only_the_held_state() {
        let t = Target::Restore;
        assert!(t.admits(Some(S::Hold), Some(S::Flagged), S::Flagged));
        assert!(!t.admits(Some(S::Hold), Some(S::Flagged), S::Submitted));
    }
}
