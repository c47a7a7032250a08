use crate::output::{list_or_none, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum MemberSubcommand {
    /// List tracked members
    List {
        /// Only members whose last role correction failed
        #[arg(long)]
        unsynced: bool,
    },
    /// Show one member record
    Show { id: String },
    /// Delete a member record (after the source stopped reporting them)
    Remove { id: String },
}

pub fn run(root: &Path, subcmd: MemberSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        MemberSubcommand::List { unsynced } => list(root, unsynced, json),
        MemberSubcommand::Show { id } => show(root, &id, json),
        MemberSubcommand::Remove { id } => remove(root, &id, json),
    }
}

fn list(root: &Path, unsynced: bool, json: bool) -> anyhow::Result<()> {
    let roster = super::open(root)?;
    let members: Vec<_> = roster
        .members()
        .context("failed to list members")?
        .into_iter()
        .filter(|m| !unsynced || m.needs_resync)
        .collect();

    if json {
        return print_json(&members);
    }

    let rows = members
        .iter()
        .map(|m| {
            vec![
                m.external_id.clone(),
                m.username.clone().unwrap_or_default(),
                m.canonical_rank.clone(),
                m.xp.to_string(),
                list_or_none(&m.capabilities.labels()),
                if m.needs_resync { "pending" } else { "ok" }.to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "RANK", "XP", "CAPABILITIES", "SYNC"],
        rows,
        "No members tracked. Run 'roster sync'.",
    );
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let roster = super::open(root)?;
    let m = roster
        .member(id)
        .with_context(|| format!("member '{id}' not found"))?;

    if json {
        return print_json(&m);
    }

    println!("Member:       {} ({})", m.display_name(), m.external_id);
    println!("Rank:         {}", m.canonical_rank);
    println!("XP:           {}", m.xp);
    if let Some(next) = roster.ladder().next_above(&m.canonical_rank)? {
        println!("Next rank:    {} at {} XP", next.name, next.xp);
    }
    println!("Capabilities: {}", list_or_none(&m.capabilities.labels()));
    let roles: Vec<&String> = m.external_roles.iter().collect();
    println!("Roles:        {}", list_or_none(&roles));
    if let Some(pending) = &m.pending_rank {
        println!("Pending rank: {pending} (not yet applied at the source)");
    }
    println!("Last synced:  {}", m.last_synced_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

fn remove(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let roster = super::open(root)?;
    roster
        .remove_member(id)
        .with_context(|| format!("failed to remove member '{id}'"))?;
    if json {
        print_json(&serde_json::json!({ "removed": id }))?;
    } else {
        println!("Removed member {id}");
    }
    Ok(())
}
