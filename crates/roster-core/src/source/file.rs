use super::{ExternalRoleSource, ObservedMember};
use crate::error::{Result, RosterError};
use crate::io::atomic_write;
use crate::ladder::RoleCorrection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RolesFile {
    #[serde(default)]
    members: Vec<ObservedMember>,
}

/// Role source kept in a YAML file. Operators edit it by hand or another
/// process mirrors the real platform into it.
///
/// ```yaml
/// members:
///   - id: "1001"
///     username: alice
///     roles: [Airman, Enlisted, Enlisted Personnel]
/// ```
pub struct FileRoleSource {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRoleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn external(&self, e: impl std::fmt::Display) -> RosterError {
        RosterError::ExternalSource(format!("{}: {e}", self.path.display()))
    }

    fn load(&self) -> Result<RolesFile> {
        if !self.path.exists() {
            return Ok(RolesFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| self.external(e))?;
        if data.trim().is_empty() {
            return Ok(RolesFile::default());
        }
        serde_yaml::from_str(&data).map_err(|e| self.external(e))
    }

    fn save(&self, file: &RolesFile) -> Result<()> {
        let data = serde_yaml::to_string(file).map_err(|e| self.external(e))?;
        atomic_write(&self.path, data.as_bytes()).map_err(|e| self.external(e))
    }

    /// Replace the whole member list.
    pub fn write_members(&self, members: Vec<ObservedMember>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.save(&RolesFile { members })
    }
}

impl ExternalRoleSource for FileRoleSource {
    fn list_members_with_roles(&self) -> Result<Vec<ObservedMember>> {
        Ok(self.load()?.members)
    }

    fn apply_role_correction(&self, member_id: &str, correction: &RoleCorrection) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.load()?;
        let member = file
            .members
            .iter_mut()
            .find(|m| m.member_id == member_id)
            .ok_or_else(|| self.external(format!("member {member_id} is not listed")))?;
        member.roles = correction.applied_to(&member.roles);
        self.save(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[test]
    fn missing_or_empty_file_lists_nobody() {
        let dir = TempDir::new().unwrap();
        let src = FileRoleSource::new(dir.path().join("roles.yaml"));
        assert!(src.list_members_with_roles().unwrap().is_empty());
        std::fs::write(src.path(), "").unwrap();
        assert!(src.list_members_with_roles().unwrap().is_empty());
    }

    #[test]
    fn reads_hand_written_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roles.yaml");
        std::fs::write(
            &path,
            "members:\n  - id: \"1001\"\n    username: alice\n    roles: [Airman, Enlisted]\n  - id: \"1002\"\n",
        )
        .unwrap();
        let src = FileRoleSource::new(&path);
        let members = src.list_members_with_roles().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].username.as_deref(), Some("alice"));
        assert!(members[1].roles.is_empty());
        assert_eq!(
            src.member_roles("1001").unwrap().unwrap().roles.len(),
            2
        );
        assert!(src.member_roles("9").unwrap().is_none());
    }

    #[test]
    fn correction_is_written_back() {
        let dir = TempDir::new().unwrap();
        let src = FileRoleSource::new(dir.path().join("roles.yaml"));
        src.write_members(vec![ObservedMember::new("7", ["Airman", "Enlisted"])])
            .unwrap();
        let correction = RoleCorrection {
            remove: ["Airman".to_string()].into_iter().collect(),
            add: ["Airman First Class".to_string()].into_iter().collect(),
        };
        src.apply_role_correction("7", &correction).unwrap();
        let roles = &src.list_members_with_roles().unwrap()[0].roles;
        let expected: BTreeSet<String> = ["Airman First Class", "Enlisted"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(roles, &expected);
    }

    #[test]
    fn unknown_member_is_an_external_failure() {
        let dir = TempDir::new().unwrap();
        let src = FileRoleSource::new(dir.path().join("roles.yaml"));
        let err = src
            .apply_role_correction("404", &RoleCorrection::default())
            .unwrap_err();
        assert!(err.is_external());
    }

    #[test]
    fn malformed_yaml_is_an_external_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roles.yaml");
        std::fs::write(&path, "members: {not: [a list").unwrap();
        let err = FileRoleSource::new(&path)
            .list_members_with_roles()
            .unwrap_err();
        assert!(err.is_external());
    }
}
