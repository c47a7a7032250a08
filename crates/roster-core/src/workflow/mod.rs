//! Multi-stage approval workflows.
//!
//! Six kinds share one engine. A kind is a set of rows in the transition
//! table; the engine checks the current state, the actor's capability and
//! the action's data, appends a stage event, and returns the effects of an
//! approving transition exactly once.

pub mod engine;
pub mod proposal;
pub mod request;
pub mod table;
pub mod types;

pub use engine::{Effect, Outcome, WorkflowEngine};
pub use proposal::{
    DemotionProposal, DisciplinaryGrade, DisciplinaryProposal, PerformanceReportProposal,
    PromotionProposal, Proposal, RecruitmentProposal, ReportFlag, ReportScores, TrainingProposal,
    TrainingType, XpAward,
};
pub use request::WorkflowRequest;
pub use types::{ActionKind, StageAction, StageEvent, WorkflowKind, WorkflowState};
