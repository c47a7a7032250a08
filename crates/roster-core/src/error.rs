use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("not initialized: run 'roster init'")]
    NotInitialized,

    #[error("rank not found in ladder: {0}")]
    RankNotFound(String),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("workflow request not found: {0}")]
    RequestNotFound(String),

    #[error("invalid member id '{0}': must be 1-64 characters of [A-Za-z0-9_.-]")]
    InvalidMemberId(String),

    #[error("'{action}' requires {required} capability")]
    Unauthorized { action: String, required: String },

    #[error("request {id} is in terminal state '{state}' and accepts no further stage events")]
    TerminalState { id: String, state: String },

    #[error("invalid transition from {from} via {action}: {reason}")]
    InvalidTransition {
        from: String,
        action: String,
        reason: String,
    },

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("external role source error: {0}")]
    ExternalSource(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RosterError {
    /// True for failures at the external role source boundary. These are
    /// recorded per member and retried on the next pass.
    pub fn is_external(&self) -> bool {
        matches!(self, RosterError::ExternalSource(_))
    }
}

pub type Result<T> = std::result::Result<T, RosterError>;
