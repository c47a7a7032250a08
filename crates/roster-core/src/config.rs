use crate::capability::Tier;
use crate::error::{Result, RosterError};
use crate::ladder::RankLadder;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Full reconciliation period.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// How often `watch` polls the source for joined or changed members.
    #[serde(default = "default_poll")]
    pub poll_secs: u64,
    /// Seed a new member's XP at their observed rank's threshold instead of 0.
    #[serde(default = "default_true")]
    pub seed_xp_from_rank: bool,
    /// Highest rank the reconciler moves members into or out of by XP.
    #[serde(default = "default_xp_ceiling")]
    pub xp_ceiling: String,
}

fn default_interval() -> u64 {
    300
}

fn default_dedup_window() -> u64 {
    60
}

fn default_poll() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_xp_ceiling() -> String {
    "First Sergeant".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            dedup_window_secs: default_dedup_window(),
            poll_secs: default_poll(),
            seed_xp_from_rank: default_true(),
            xp_ceiling: default_xp_ceiling(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Promotions to this rank or above wait for an officer.
    #[serde(default = "default_promotion_approval_rank")]
    pub promotion_approval_rank: String,
    /// Grade 3 deductions at or above this wait for an officer.
    #[serde(default = "default_disciplinary_approval_xp")]
    pub disciplinary_approval_xp: u64,
    /// Fixed deduction for a grade 2 violation.
    #[serde(default = "default_violation_xp")]
    pub violation_xp: u64,
    /// Training credit at or above this goes to review.
    #[serde(default = "default_training_review_xp")]
    pub training_review_xp: u64,
}

fn default_promotion_approval_rank() -> String {
    "Master Sergeant".to_string()
}

fn default_disciplinary_approval_xp() -> u64 {
    10
}

fn default_violation_xp() -> u64 {
    1
}

fn default_training_review_xp() -> u64 {
    5
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            promotion_approval_rank: default_promotion_approval_rank(),
            disciplinary_approval_xp: default_disciplinary_approval_xp(),
            violation_xp: default_violation_xp(),
            training_review_xp: default_training_review_xp(),
        }
    }
}

// ---------------------------------------------------------------------------
// RoleSourceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleSourceConfig {
    File {
        #[serde(default = "default_roles_path")]
        path: String,
    },
    Http {
        base_url: String,
        /// Environment variable holding a bearer token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
}

fn default_roles_path() -> String {
    paths::ROLES_FILE.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for RoleSourceConfig {
    fn default() -> Self {
        RoleSourceConfig::File {
            path: default_roles_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub community: CommunityConfig,
    #[serde(default)]
    pub ladder: RankLadder,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub source: RoleSourceConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(community_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            community: CommunityConfig {
                name: community_name.into(),
                description: None,
            },
            ladder: RankLadder::default(),
            sync: SyncConfig::default(),
            workflow: WorkflowConfig::default(),
            source: RoleSourceConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RosterError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Err(e) = self.ladder.validate() {
            warnings.push(ConfigWarning::error(format!("ladder: {e}")));
            // Rank lookups below are meaningless on a broken ladder.
            return warnings;
        }

        if self.ladder.lowest().xp != 0 {
            warnings.push(ConfigWarning::warning(format!(
                "lowest rank '{}' has threshold {}; new members below it are floor-raised",
                self.ladder.lowest().name,
                self.ladder.lowest().xp
            )));
        }

        match self.ladder.tier_of(&self.sync.xp_ceiling) {
            Err(_) => warnings.push(ConfigWarning::error(format!(
                "sync.xp_ceiling '{}' is not a rank in the ladder",
                self.sync.xp_ceiling
            ))),
            Ok(Tier::Officer) => warnings.push(ConfigWarning::warning(format!(
                "sync.xp_ceiling '{}' is an officer rank; XP alone can commission members",
                self.sync.xp_ceiling
            ))),
            Ok(_) => {}
        }

        if self.ladder.get(&self.workflow.promotion_approval_rank).is_none() {
            warnings.push(ConfigWarning::error(format!(
                "workflow.promotion_approval_rank '{}' is not a rank in the ladder",
                self.workflow.promotion_approval_rank
            )));
        }

        if self.sync.interval_secs == 0 {
            warnings.push(ConfigWarning::error("sync.interval_secs must be greater than 0"));
        }
        if self.sync.poll_secs == 0 {
            warnings.push(ConfigWarning::error("sync.poll_secs must be greater than 0"));
        }
        if self.sync.dedup_window_secs == 0 {
            warnings.push(ConfigWarning::warning(
                "sync.dedup_window_secs is 0; duplicate automatic rank changes are not suppressed",
            ));
        }
        if self.workflow.training_review_xp == 0 {
            warnings.push(ConfigWarning::warning(
                "workflow.training_review_xp is 0; every training credit goes to review",
            ));
        }
        if self.workflow.violation_xp == 0 {
            warnings.push(ConfigWarning::warning(
                "workflow.violation_xp is 0; grade 2 violations deduct nothing",
            ));
        }

        if let RoleSourceConfig::Http {
            base_url,
            token_env,
            timeout_secs,
        } = &self.source
        {
            if base_url.trim().is_empty() {
                warnings.push(ConfigWarning::error("source.base_url is empty"));
            }
            if *timeout_secs == 0 {
                warnings.push(ConfigWarning::error("source.timeout_secs must be greater than 0"));
            }
            if let Some(var) = token_env {
                if std::env::var_os(var).is_none() {
                    warnings.push(ConfigWarning::warning(format!(
                        "source.token_env '{var}' is not set"
                    )));
                }
            }
        }

        warnings
    }

    /// Fail on the first error-level warning.
    pub fn check(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(RosterError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.sync.dedup_window_secs).unwrap_or(i64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::Rank;
    use tempfile::TempDir;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg: Config = serde_yaml::from_str("community:\n  name: 1st Wing\n").unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.sync.interval_secs, 300);
        assert_eq!(cfg.sync.dedup_window_secs, 60);
        assert_eq!(cfg.sync.xp_ceiling, "First Sergeant");
        assert_eq!(cfg.workflow.promotion_approval_rank, "Master Sergeant");
        assert_eq!(cfg.workflow.disciplinary_approval_xp, 10);
        assert_eq!(cfg.ladder.len(), 28);
        assert_eq!(
            cfg.source,
            RoleSourceConfig::File {
                path: ".roster/roles.yaml".into()
            }
        );
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".roster")).unwrap();
        let mut cfg = Config::new("Test Wing");
        cfg.sync.interval_secs = 120;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.community.name, "Test Wing");
        assert_eq!(loaded.sync.interval_secs, 120);
        assert_eq!(loaded.ladder, RankLadder::default());
    }

    #[test]
    fn load_without_init_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(RosterError::NotInitialized)
        ));
    }

    #[test]
    fn unknown_ceiling_is_an_error() {
        let mut cfg = Config::new("x");
        cfg.sync.xp_ceiling = "Sergeant Major".into();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("xp_ceiling")));
        assert!(cfg.check().is_err());
    }

    #[test]
    fn broken_ladder_stops_validation() {
        let mut cfg = Config::new("x");
        cfg.ladder = serde_yaml::from_str::<RankLadder>(
            "- {name: A, xp: 0, tier: member}\n- {name: B, xp: 0, tier: member}\n",
        )
        .unwrap();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with("ladder:"));
    }

    #[test]
    fn zero_intervals_are_errors() {
        let mut cfg = Config::new("x");
        cfg.sync.interval_secs = 0;
        cfg.sync.poll_secs = 0;
        let errors = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn officer_ceiling_is_only_a_warning() {
        let mut cfg = Config::new("x");
        cfg.sync.xp_ceiling = "Captain".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        cfg.check().unwrap();
    }

    #[test]
    fn http_source_parses() {
        let yaml = "community:\n  name: x\nsource:\n  type: http\n  base_url: http://localhost:9000\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.source,
            RoleSourceConfig::Http {
                base_url: "http://localhost:9000".into(),
                token_env: None,
                timeout_secs: 30
            }
        );
    }

    #[test]
    fn custom_ladder_round_trips() {
        let mut cfg = Config::new("x");
        cfg.ladder = RankLadder::new(vec![
            Rank::new("Recruit", 0, Tier::Member, &[]),
            Rank::new("Sergeant", 50, Tier::Senior, &["NCO"]),
            Rank::new("Lieutenant", 200, Tier::Officer, &["Officers"]),
        ])
        .unwrap();
        cfg.sync.xp_ceiling = "Sergeant".into();
        cfg.workflow.promotion_approval_rank = "Lieutenant".into();
        assert!(cfg.validate().is_empty());
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.ladder, cfg.ladder);
    }
}
