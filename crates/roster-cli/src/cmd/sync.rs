use crate::output::{print_json, print_table};
use anyhow::Context;
use roster_core::sync::{MemberSync, SyncReport};
use std::path::Path;

pub fn run(root: &Path, member: Option<&str>, json: bool) -> anyhow::Result<()> {
    let roster = super::open(root)?;

    if let Some(id) = member {
        let outcome = roster
            .sync_member(id)
            .with_context(|| format!("failed to sync member '{id}'"))?;
        if json {
            return print_json(&outcome);
        }
        print_member(&outcome);
        return Ok(());
    }

    let report = roster.sync_all().context("sync pass failed")?;
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    if report.failed > 0 {
        anyhow::bail!("{} member(s) failed to sync", report.failed);
    }
    Ok(())
}

pub fn print_member(outcome: &MemberSync) {
    let m = &outcome.record;
    let verb = if outcome.created { "tracked" } else { "synced" };
    println!("{verb} {} as {} ({} XP)", m.display_name(), m.canonical_rank, m.xp);
    if let Some(change) = &outcome.rank_change {
        let dir = if change.promoted { "promoted" } else { "demoted" };
        println!("  {dir} {} -> {}", change.from, change.to);
    }
    if let Some((old, new)) = outcome.xp_raised {
        println!("  XP raised to rank floor: {old} -> {new}");
    }
    if outcome.correction_failed {
        println!("  role correction failed; will retry on the next pass");
    }
}

pub fn print_report(report: &SyncReport) {
    println!(
        "Synced {}/{} members ({} new, {} failed, {} corrections pending)",
        report.succeeded, report.observed, report.created, report.failed, report.corrections_failed
    );

    if !report.rank_changes.is_empty() {
        println!();
        let rows = report
            .rank_changes
            .iter()
            .map(|c| {
                vec![
                    c.member.clone(),
                    c.from.clone(),
                    c.to.clone(),
                    if c.logged { "logged" } else { "duplicate" }.to_string(),
                ]
            })
            .collect();
        print_table(&["MEMBER", "FROM", "TO", "LOG"], rows, "");
    }

    for f in &report.failures {
        println!("failed: {}: {}", f.member, f.error);
    }
    if !report.stale.is_empty() {
        println!(
            "{} member(s) no longer reported by the source: {}",
            report.stale.len(),
            report.stale.join(", ")
        );
    }
}
