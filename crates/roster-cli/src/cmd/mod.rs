pub mod config;
pub mod init;
pub mod ladder;
pub mod member;
pub mod request;
pub mod sync;
pub mod watch;

use anyhow::Context;
use roster_core::Roster;
use std::path::Path;

/// Open the project at `root` or explain why not.
pub fn open(root: &Path) -> anyhow::Result<Roster> {
    Roster::open(root).with_context(|| format!("failed to open roster at {}", root.display()))
}
