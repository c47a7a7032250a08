use crate::output::{list_or_none, print_json, print_table};
use anyhow::Context;
use roster_core::capability::Tier;
use roster_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let ladder = &config.ladder;
    let ceiling = ladder.index_of(&config.sync.xp_ceiling);
    // Ranks the reconciler moves members between by XP alone.
    let governed = |i: usize, tier: Tier| Some(i) <= ceiling && tier != Tier::Officer;

    let mut rows = Vec::new();
    let mut ranks = Vec::new();
    for (i, r) in ladder.ranks().iter().enumerate() {
        let caps = ladder.capabilities_for(&r.name)?.labels();
        if json {
            ranks.push(serde_json::json!({
                "name": r.name,
                "xp": r.xp,
                "tier": r.tier,
                "categories": r.categories,
                "capabilities": caps,
                "xp_governed": governed(i, r.tier),
            }));
        } else {
            rows.push(vec![
                r.name.clone(),
                r.xp.to_string(),
                r.tier.to_string(),
                list_or_none(&caps),
                if governed(i, r.tier) { "xp" } else { "manual" }.to_string(),
            ]);
        }
    }

    if json {
        return print_json(&ranks);
    }
    print_table(
        &["RANK", "XP", "TIER", "CAPABILITIES", "PROMOTION"],
        rows,
        "Ladder is empty.",
    );
    Ok(())
}
