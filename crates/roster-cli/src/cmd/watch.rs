use roster_core::source::ObservedMember;
use roster_core::Roster;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

type Snapshot = BTreeMap<String, BTreeSet<String>>;

pub fn run(root: &Path, interval: Option<u64>, poll: Option<u64>) -> anyhow::Result<()> {
    let roster = Arc::new(super::open(root)?);
    let interval = Duration::from_secs(interval.unwrap_or(roster.config().sync.interval_secs).max(1));
    let poll = Duration::from_secs(poll.unwrap_or(roster.config().sync.poll_secs).max(1));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        tracing::info!(
            community = %roster.config().community.name,
            interval_secs = interval.as_secs(),
            poll_secs = poll.as_secs(),
            "watching role source"
        );
        let full = tokio::spawn(full_passes(roster.clone(), interval));
        let events = tokio::spawn(point_events(roster, poll));

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");
        full.abort();
        events.abort();
        Ok::<(), anyhow::Error>(())
    })
}

/// Full reconciliation on a fixed timer. The first tick fires immediately.
async fn full_passes(roster: Arc<Roster>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let r = roster.clone();
        match tokio::task::spawn_blocking(move || r.sync_all()).await {
            Ok(Ok(report)) if report.failed > 0 => {
                tracing::warn!(failed = report.failed, "full pass finished with failures")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "full pass failed"),
            Err(e) => tracing::warn!(error = %e, "full pass task join error"),
        }
    }
}

/// Poll the source and reconcile members who joined or whose roles
/// changed since the previous poll. Runs alongside full passes; the
/// reconciler serializes work per member.
async fn point_events(roster: Arc<Roster>, every: Duration) {
    let mut previous: Option<Snapshot> = None;
    loop {
        tokio::time::sleep(every).await;

        let r = roster.clone();
        let observed =
            match tokio::task::spawn_blocking(move || r.reconciler().source().list_members_with_roles())
                .await
            {
                Ok(Ok(list)) => list,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "role source poll failed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "role source poll join error");
                    continue;
                }
            };

        let Some(prev) = previous.replace(snapshot(&observed)) else {
            continue;
        };
        for id in departed(&prev, &observed) {
            tracing::info!(member = %id, "member no longer reported by source");
        }

        let mut tasks = JoinSet::new();
        for member in changed(&prev, observed) {
            let r = roster.clone();
            tracing::debug!(member = %member.member_id, "roles changed; targeted sync");
            tasks.spawn_blocking(move || {
                let id = member.member_id.clone();
                (id, r.reconciler().sync_member(&member))
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((id, Err(e))) => tracing::warn!(member = %id, error = %e, "targeted sync failed"),
                Err(e) => tracing::warn!(error = %e, "targeted sync join error"),
            }
        }
    }
}

fn snapshot(observed: &[ObservedMember]) -> Snapshot {
    observed
        .iter()
        .map(|m| (m.member_id.clone(), m.roles.clone()))
        .collect()
}

/// Members that joined, or whose role set differs from `prev`.
fn changed(prev: &Snapshot, observed: Vec<ObservedMember>) -> Vec<ObservedMember> {
    observed
        .into_iter()
        .filter(|m| prev.get(&m.member_id) != Some(&m.roles))
        .collect()
}

fn departed(prev: &Snapshot, observed: &[ObservedMember]) -> Vec<String> {
    let now: BTreeSet<&str> = observed.iter().map(|m| m.member_id.as_str()).collect();
    prev.keys()
        .filter(|id| !now.contains(id.as_str()))
        .cloned()
        .collect()
}
