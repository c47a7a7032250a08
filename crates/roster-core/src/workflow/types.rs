use crate::error::RosterError;
use crate::workflow::proposal::ReportFlag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// WorkflowKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Promotion,
    Demotion,
    DisciplinaryAction,
    TrainingCredit,
    RecruitmentPlacement,
    PerformanceReport,
}

impl WorkflowKind {
    pub fn all() -> &'static [WorkflowKind] {
        &[
            WorkflowKind::Promotion,
            WorkflowKind::Demotion,
            WorkflowKind::DisciplinaryAction,
            WorkflowKind::TrainingCredit,
            WorkflowKind::RecruitmentPlacement,
            WorkflowKind::PerformanceReport,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Promotion => "promotion",
            WorkflowKind::Demotion => "demotion",
            WorkflowKind::DisciplinaryAction => "disciplinary_action",
            WorkflowKind::TrainingCredit => "training_credit",
            WorkflowKind::RecruitmentPlacement => "recruitment_placement",
            WorkflowKind::PerformanceReport => "performance_report",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promotion" => Ok(WorkflowKind::Promotion),
            "demotion" => Ok(WorkflowKind::Demotion),
            "disciplinary_action" | "discipline" => Ok(WorkflowKind::DisciplinaryAction),
            "training_credit" | "training" => Ok(WorkflowKind::TrainingCredit),
            "recruitment_placement" | "recruitment" => Ok(WorkflowKind::RecruitmentPlacement),
            "performance_report" | "report" => Ok(WorkflowKind::PerformanceReport),
            _ => Err(RosterError::InvalidProposal(format!(
                "unknown workflow kind '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Union of the states used by every workflow kind. Each kind's transition
/// rules touch only a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    Submitted,
    Pending,
    BumpedUp,
    BumpedBack,
    Reviewed,
    Flagged,
    Hold,
    Approved,
    Completed,
    VetoApproved,
    Rejected,
    FinalRejected,
    Finalized,
}

impl WorkflowState {
    pub fn all() -> &'static [WorkflowState] {
        &[
            WorkflowState::Draft,
            WorkflowState::Submitted,
            WorkflowState::Pending,
            WorkflowState::BumpedUp,
            WorkflowState::BumpedBack,
            WorkflowState::Reviewed,
            WorkflowState::Flagged,
            WorkflowState::Hold,
            WorkflowState::Approved,
            WorkflowState::Completed,
            WorkflowState::VetoApproved,
            WorkflowState::Rejected,
            WorkflowState::FinalRejected,
            WorkflowState::Finalized,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Draft => "draft",
            WorkflowState::Submitted => "submitted",
            WorkflowState::Pending => "pending",
            WorkflowState::BumpedUp => "bumped_up",
            WorkflowState::BumpedBack => "bumped_back",
            WorkflowState::Reviewed => "reviewed",
            WorkflowState::Flagged => "flagged",
            WorkflowState::Hold => "hold",
            WorkflowState::Approved => "approved",
            WorkflowState::Completed => "completed",
            WorkflowState::VetoApproved => "veto_approved",
            WorkflowState::Rejected => "rejected",
            WorkflowState::FinalRejected => "final_rejected",
            WorkflowState::Finalized => "finalized",
        }
    }

    /// No stage event is accepted once a request is here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Approved
                | WorkflowState::Completed
                | WorkflowState::VetoApproved
                | WorkflowState::Rejected
                | WorkflowState::FinalRejected
                | WorkflowState::Finalized
        )
    }

    /// Terminal states that carry the request's effects.
    pub fn is_approval(self) -> bool {
        matches!(
            self,
            WorkflowState::Approved
                | WorkflowState::Completed
                | WorkflowState::VetoApproved
                | WorkflowState::Finalized
        )
    }

    /// States in which an actor still has something to do.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::all()
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| RosterError::InvalidProposal(format!("unknown workflow state '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// ActionKind / StageAction
// ---------------------------------------------------------------------------

/// Discriminant of [`StageAction`], used as the transition table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Submit,
    Approve,
    Reject,
    BumpUp,
    BumpBack,
    Veto,
    AcceptRejection,
    FinalReject,
    Review,
    Finalize,
    Hold,
    Release,
    AwardXp,
    Distribute,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Create,
            ActionKind::Submit,
            ActionKind::Approve,
            ActionKind::Reject,
            ActionKind::BumpUp,
            ActionKind::BumpBack,
            ActionKind::Veto,
            ActionKind::AcceptRejection,
            ActionKind::FinalReject,
            ActionKind::Review,
            ActionKind::Finalize,
            ActionKind::Hold,
            ActionKind::Release,
            ActionKind::AwardXp,
            ActionKind::Distribute,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Submit => "submit",
            ActionKind::Approve => "approve",
            ActionKind::Reject => "reject",
            ActionKind::BumpUp => "bump_up",
            ActionKind::BumpBack => "bump_back",
            ActionKind::Veto => "veto",
            ActionKind::AcceptRejection => "accept_rejection",
            ActionKind::FinalReject => "final_reject",
            ActionKind::Review => "review",
            ActionKind::Finalize => "finalize",
            ActionKind::Hold => "hold",
            ActionKind::Release => "release",
            ActionKind::AwardXp => "award_xp",
            ActionKind::Distribute => "distribute",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = RosterError;

    /// Accepts `bump-up` as well as `bump_up`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        ActionKind::all()
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| RosterError::InvalidTransition {
                from: "-".into(),
                action: s.to_string(),
                reason: "unknown action".into(),
            })
    }
}

/// One stage action with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StageAction {
    Create,
    Submit,
    Approve,
    Reject {
        reason: String,
    },
    BumpUp,
    BumpBack,
    Veto,
    AcceptRejection {
        alternate_unit: String,
    },
    FinalReject,
    Review {
        flag: ReportFlag,
        remarks: String,
    },
    Finalize,
    Hold,
    Release,
    AwardXp {
        amount: u64,
    },
    /// Explicit per-trainee XP. Trainees not named receive nothing.
    Distribute {
        assignments: BTreeMap<String, u64>,
    },
}

impl StageAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            StageAction::Create => ActionKind::Create,
            StageAction::Submit => ActionKind::Submit,
            StageAction::Approve => ActionKind::Approve,
            StageAction::Reject { .. } => ActionKind::Reject,
            StageAction::BumpUp => ActionKind::BumpUp,
            StageAction::BumpBack => ActionKind::BumpBack,
            StageAction::Veto => ActionKind::Veto,
            StageAction::AcceptRejection { .. } => ActionKind::AcceptRejection,
            StageAction::FinalReject => ActionKind::FinalReject,
            StageAction::Review { .. } => ActionKind::Review,
            StageAction::Finalize => ActionKind::Finalize,
            StageAction::Hold => ActionKind::Hold,
            StageAction::Release => ActionKind::Release,
            StageAction::AwardXp { .. } => ActionKind::AwardXp,
            StageAction::Distribute { .. } => ActionKind::Distribute,
        }
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

// ---------------------------------------------------------------------------
// StageEvent
// ---------------------------------------------------------------------------

/// One entry of a request's append-only stage history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub actor: String,
    #[serde(flatten)]
    pub action: StageAction,
    /// `None` only for the creating event.
    pub from: Option<WorkflowState>,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
