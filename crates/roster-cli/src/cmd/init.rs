use crate::output::print_json;
use anyhow::Context;
use roster_core::{paths, Roster};
use std::path::Path;

pub fn run(root: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let created = Roster::init(root, name).context("failed to initialize roster")?;

    if json {
        print_json(&serde_json::json!({
            "root": root,
            "created": created,
        }))?;
        return Ok(());
    }

    if created.is_empty() {
        println!("Already initialized at {}", paths::roster_dir(root).display());
    } else {
        for path in &created {
            println!("created {}", path.display());
        }
        println!("Edit {} to list members and their roles, then run 'roster sync'.", paths::ROLES_FILE);
    }
    Ok(())
}
