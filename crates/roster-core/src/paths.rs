use crate::error::{Result, RosterError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ROSTER_DIR: &str = ".roster";
pub const CONFIG_FILE: &str = ".roster/config.yaml";
pub const ROLES_FILE: &str = ".roster/roles.yaml";
pub const DB_FILE: &str = ".roster/roster.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn roster_dir(root: &Path) -> PathBuf {
    root.join(ROSTER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn roles_path(root: &Path) -> PathBuf {
    root.join(ROLES_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

/// Resolve a path from config relative to the project root. Absolute paths
/// are returned unchanged.
pub fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

// ---------------------------------------------------------------------------
// Member id validation
// ---------------------------------------------------------------------------

static MEMBER_ID_RE: OnceLock<Regex> = OnceLock::new();

fn member_id_re() -> &'static Regex {
    MEMBER_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").unwrap())
}

/// External ids become store keys and URL path segments.
pub fn validate_member_id(id: &str) -> Result<()> {
    if !member_id_re().is_match(id) {
        return Err(RosterError::InvalidMemberId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
