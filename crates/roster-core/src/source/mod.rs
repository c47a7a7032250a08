//! The externally owned role assignment source.
//!
//! The reconciler owns one `ExternalRoleSource` instance for its lifetime.
//! Every failure at this boundary surfaces as `RosterError::ExternalSource`
//! so callers can tell it apart from invariant violations.

mod file;
mod http;
mod memory;

pub use file::FileRoleSource;
pub use http::HttpRoleSource;
pub use memory::MemoryRoleSource;

use crate::config::RoleSourceConfig;
use crate::error::Result;
use crate::ladder::RoleCorrection;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// One member as the source reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMember {
    #[serde(rename = "id")]
    pub member_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl ObservedMember {
    pub fn new<I, S>(member_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            member_id: member_id.into(),
            username: None,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

pub trait ExternalRoleSource: Send + Sync {
    /// `ListMembersWithRoles`.
    fn list_members_with_roles(&self) -> Result<Vec<ObservedMember>>;

    /// Point lookup. `None` if the source does not know the member.
    fn member_roles(&self, member_id: &str) -> Result<Option<ObservedMember>> {
        Ok(self
            .list_members_with_roles()?
            .into_iter()
            .find(|m| m.member_id == member_id))
    }

    /// `ApplyRoleCorrection(memberId, rolesToRemove, rolesToAdd)`.
    fn apply_role_correction(&self, member_id: &str, correction: &RoleCorrection) -> Result<()>;
}

/// Build the source named in config. Relative file paths resolve against
/// `root`.
pub fn from_config(root: &Path, config: &RoleSourceConfig) -> Result<Box<dyn ExternalRoleSource>> {
    match config {
        RoleSourceConfig::File { path } => Ok(Box::new(FileRoleSource::new(paths::resolve(
            root, path,
        )))),
        RoleSourceConfig::Http {
            base_url,
            token_env,
            timeout_secs,
        } => {
            let token = token_env.as_deref().and_then(|var| std::env::var(var).ok());
            Ok(Box::new(HttpRoleSource::new(
                base_url,
                token,
                Duration::from_secs(*timeout_secs),
            )?))
        }
    }
}
