use crate::capability::Actor;
use crate::workflow::proposal::{DemotionProposal, PromotionProposal, Proposal};
use crate::workflow::types::{StageAction, StageEvent, WorkflowKind, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowRequest
// ---------------------------------------------------------------------------

/// One approval flow instance. `state` is always the result of replaying
/// `history` through the kind's transition rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: Uuid,
    pub kind: WorkflowKind,
    /// Member the request is about. For training credit this is the
    /// instructor; trainees live in the proposal.
    pub subject: String,
    pub created_by: String,
    pub proposal: Proposal,
    pub state: WorkflowState,
    /// State to restore when a held request is released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<WorkflowState>,
    pub history: Vec<StageEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once effects for the approving transition have been handed out.
    #[serde(default)]
    pub effects_applied: bool,
    /// Created by the reconciler rather than an actor.
    #[serde(default)]
    pub automatic: bool,
}

impl WorkflowRequest {
    /// Record of a rank change the reconciler already applied. Created
    /// directly in `Approved` with its effects marked as applied.
    pub fn automatic_rank_change(
        member: &str,
        old_rank: &str,
        new_rank: &str,
        promoted: bool,
        xp: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let direction = if promoted { "promotion" } else { "demotion" };
        let reason = format!("Automatic {direction} due to XP threshold ({xp} XP)");
        let proposal = if promoted {
            Proposal::Promotion(PromotionProposal {
                current_rank: old_rank.to_string(),
                target_rank: new_rank.to_string(),
                reason: reason.clone(),
            })
        } else {
            Proposal::Demotion(DemotionProposal {
                previous_rank: old_rank.to_string(),
                target_rank: new_rank.to_string(),
                reason: reason.clone(),
            })
        };
        let kind = proposal.kind();
        Self {
            id: Uuid::new_v4(),
            kind,
            subject: member.to_string(),
            created_by: Actor::SYSTEM_ID.to_string(),
            proposal,
            state: WorkflowState::Approved,
            previous_state: None,
            history: vec![StageEvent {
                actor: Actor::SYSTEM_ID.to_string(),
                action: StageAction::Create,
                from: None,
                to: WorkflowState::Approved,
                at: now,
                notes: Some(reason),
            }],
            created_at: now,
            updated_at: now,
            effects_applied: true,
            automatic: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn last_event(&self) -> Option<&StageEvent> {
        self.history.last()
    }

    /// Short id used in CLI listings.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Text of the most recent rejection, if any.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|e| match &e.action {
            StageAction::Reject { reason } => Some(reason.as_str()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automatic_promotion_record() {
        let now = Utc::now();
        let req = WorkflowRequest::automatic_rank_change(
            "7",
            "Airman",
            "Airman First Class",
            true,
            30,
            now,
        );
        assert_eq!(req.kind, WorkflowKind::Promotion);
        assert_eq!(req.state, WorkflowState::Approved);
        assert!(req.automatic && req.effects_applied);
        assert_eq!(req.created_by, "system");
        assert_eq!(req.history.len(), 1);
        assert_eq!(
            req.history[0].notes.as_deref(),
            Some("Automatic promotion due to XP threshold (30 XP)")
        );
    }

    #[test]
    fn automatic_demotion_uses_demotion_kind() {
        let req =
            WorkflowRequest::automatic_rank_change("7", "Airman", "Airman Basic", false, 4, Utc::now());
        assert_eq!(req.kind, WorkflowKind::Demotion);
        match &req.proposal {
            Proposal::Demotion(d) => {
                assert_eq!(d.previous_rank, "Airman");
                assert_eq!(d.target_rank, "Airman Basic");
            }
            other => panic!("unexpected proposal {other:?}"),
        }
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let req =
            WorkflowRequest::automatic_rank_change("7", "Airman", "Airman Basic", false, 4, Utc::now());
        let short = req.short_id();
        assert_eq!(short.len(), 8);
        assert!(req.id.to_string().replace('-', "").starts_with(&short));
    }
}
