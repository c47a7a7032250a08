#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn roster(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("roster").unwrap();
    cmd.current_dir(dir.path()).env("ROSTER_ROOT", dir.path());
    cmd
}

const ROLES: &str = r#"members:
  - id: "100"
    username: sergeant
    roles: [Master Sergeant, Enlisted, NCO]
  - id: "200"
    username: captain
    roles: [Captain, Commissioned Officers]
  - id: "300"
    username: airman
    roles: [Airman, Enlisted]
"#;

/// Initialized project with three members tracked.
fn synced_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();
    std::fs::write(dir.path().join(".roster/roles.yaml"), ROLES).unwrap();
    roster(&dir).arg("sync").assert().success();
    dir
}

fn json(cmd: &mut Command) -> Value {
    let out = cmd.arg("--json").output().unwrap();
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn member(dir: &TempDir, id: &str) -> Value {
    json(roster(dir).args(["member", "show", id]))
}

fn roles_file(dir: &TempDir) -> String {
    std::fs::read_to_string(dir.path().join(".roster/roles.yaml")).unwrap()
}

// ---------------------------------------------------------------------------
// roster init / ladder / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_roles_file() {
    let dir = TempDir::new().unwrap();
    roster(&dir)
        .args(["init", "--name", "Test Wing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));

    assert!(dir.path().join(".roster/config.yaml").exists());
    assert!(dir.path().join(".roster/roles.yaml").exists());
    let config = std::fs::read_to_string(dir.path().join(".roster/config.yaml")).unwrap();
    assert!(config.contains("Test Wing"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();
    roster(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already initialized"));
}

#[test]
fn commands_fail_before_init() {
    let dir = TempDir::new().unwrap();
    roster(&dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn ladder_lists_ranks_with_promotion_mode() {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();
    roster(&dir)
        .arg("ladder")
        .assert()
        .success()
        .stdout(predicate::str::contains("Staff Sergeant"))
        .stdout(predicate::str::contains("manual"));

    let ranks = json(roster(&dir).arg("ladder"));
    let ranks = ranks.as_array().unwrap();
    assert_eq!(ranks[0]["name"], "Citizen");
    assert_eq!(ranks[0]["xp"], 0);
    let captain = ranks.iter().find(|r| r["name"] == "Captain").unwrap();
    assert_eq!(captain["xp_governed"], false);
}

#[test]
fn config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();
    roster(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_rejects_unknown_ceiling() {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();

    let path = dir.path().join(".roster/config.yaml");
    let mut config: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    config["sync"]["xp_ceiling"] = serde_yaml::Value::from("Grand Admiral");
    std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

    roster(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Grand Admiral"));
}

// ---------------------------------------------------------------------------
// roster sync
// ---------------------------------------------------------------------------

#[test]
fn sync_tracks_new_members_at_their_rank_floor() {
    let dir = TempDir::new().unwrap();
    roster(&dir).arg("init").assert().success();
    std::fs::write(dir.path().join(".roster/roles.yaml"), ROLES).unwrap();

    let report = json(roster(&dir).arg("sync"));
    assert_eq!(report["observed"], 3);
    assert_eq!(report["created"], 3);
    assert_eq!(report["failed"], 0);

    let airman = member(&dir, "300");
    assert_eq!(airman["canonical_rank"], "Airman");
    assert_eq!(airman["xp"], 10);
    let captain = member(&dir, "200");
    assert_eq!(captain["xp"], 5000);
}

#[test]
fn sync_reverts_rank_not_backed_by_xp() {
    let dir = synced_project();
    let edited = roles_file(&dir).replace("[Airman, Enlisted]", "[Staff Sergeant, Enlisted]");
    std::fs::write(dir.path().join(".roster/roles.yaml"), edited).unwrap();

    let outcome = json(roster(&dir).args(["sync", "--member", "300"]));
    assert_eq!(outcome["rank_change"]["from"], "Staff Sergeant");
    assert_eq!(outcome["rank_change"]["to"], "Airman");
    assert!(!roles_file(&dir).contains("Staff Sergeant"));
}

#[test]
fn second_sync_is_a_no_op() {
    let dir = synced_project();
    let report = json(roster(&dir).arg("sync"));
    assert_eq!(report["created"], 0);
    assert_eq!(report["rank_changes"].as_array().unwrap().len(), 0);
}

#[test]
fn sync_reports_members_gone_from_source() {
    let dir = synced_project();
    std::fs::write(
        dir.path().join(".roster/roles.yaml"),
        "members:\n  - id: \"100\"\n    roles: [Master Sergeant]\n",
    )
    .unwrap();
    roster(&dir)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("no longer reported"));
}

// ---------------------------------------------------------------------------
// roster member
// ---------------------------------------------------------------------------

#[test]
fn member_list_and_show() {
    let dir = synced_project();
    roster(&dir)
        .args(["member", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sergeant"))
        .stdout(predicate::str::contains("Captain"));
    roster(&dir)
        .args(["member", "show", "100"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Next rank:    First Sergeant at 500 XP"));
}

#[test]
fn member_show_unknown_fails() {
    let dir = synced_project();
    roster(&dir)
        .args(["member", "show", "999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("999"));
}

#[test]
fn member_remove_deletes_record() {
    let dir = synced_project();
    roster(&dir)
        .args(["member", "remove", "300"])
        .assert()
        .success();
    roster(&dir)
        .args(["member", "show", "300"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// roster request
// ---------------------------------------------------------------------------

#[test]
fn senior_promotion_below_approval_rank_applies_immediately() {
    let dir = synced_project();
    let done = json(roster(&dir).args([
        "request",
        "promote",
        "300",
        "--to",
        "Airman First Class",
        "--reason",
        "steady attendance",
        "--as",
        "100",
    ]));
    assert_eq!(done["request"]["state"], "approved");

    let airman = member(&dir, "300");
    assert_eq!(airman["canonical_rank"], "Airman First Class");
    assert_eq!(airman["xp"], 25);
    assert!(roles_file(&dir).contains("Airman First Class"));
}

#[test]
fn promotion_needs_senior_submitter() {
    let dir = synced_project();
    roster(&dir)
        .args([
            "request", "promote", "100", "--to", "First Sergeant", "--reason", "x", "--as", "300",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("senior"));
}

#[test]
fn high_promotion_waits_for_officer() {
    let dir = synced_project();
    let done = json(roster(&dir).args([
        "request",
        "promote",
        "300",
        "--to",
        "Master Sergeant",
        "--reason",
        "acting flight lead",
        "--as",
        "100",
    ]));
    assert_eq!(done["request"]["state"], "pending");
    let id = done["request"]["id"].as_str().unwrap().to_string();

    let pending = json(roster(&dir).args(["request", "pending", "--as", "200"]));
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0]["actions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a == "approve"));

    // The submitting senior cannot approve their own escalation.
    roster(&dir)
        .args(["request", "act", &id, "approve", "--as", "100"])
        .assert()
        .failure();

    roster(&dir)
        .args(["request", "act", &id[..8], "approve", "--as", "200"])
        .assert()
        .success()
        .stdout(predicate::str::contains("approved"));
    assert_eq!(member(&dir, "300")["canonical_rank"], "Master Sergeant");

    roster(&dir)
        .args(["request", "act", &id, "approve", "--as", "200"])
        .assert()
        .failure();

    roster(&dir)
        .args(["request", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Master Sergeant"))
        .stdout(predicate::str::contains("200"));
}

#[test]
fn approved_training_xp_drives_next_sync_promotion() {
    let dir = synced_project();
    let done = json(roster(&dir).args([
        "request", "train", "--xp", "20", "300", "--as", "100",
    ]));
    assert_eq!(done["request"]["state"], "pending");
    let id = done["request"]["id"].as_str().unwrap().to_string();

    roster(&dir)
        .args(["request", "act", &id, "approve", "--as", "200"])
        .assert()
        .success();
    let airman = member(&dir, "300");
    assert_eq!(airman["xp"], 30);
    assert_eq!(airman["canonical_rank"], "Airman");

    let outcome = json(roster(&dir).args(["sync", "--member", "300"]));
    assert_eq!(outcome["rank_change"]["to"], "Airman First Class");
    assert_eq!(outcome["rank_change"]["promoted"], true);
    assert!(roles_file(&dir).contains("Airman First Class"));

    // The automatic change is recorded but hidden from the default list.
    let listed = json(roster(&dir).args(["request", "list"]));
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let all = json(roster(&dir).args(["request", "list", "--all"]));
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[test]
fn act_rejects_unknown_action_name() {
    let dir = synced_project();
    roster(&dir)
        .args(["request", "act", "deadbeef", "promote-now", "--as", "200"])
        .assert()
        .failure();
}

#[test]
fn request_list_starts_empty() {
    let dir = synced_project();
    roster(&dir)
        .args(["request", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No requests."));
}
