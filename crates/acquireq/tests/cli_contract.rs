//! CLI contract tests: every subcommand prints one JSON line on success and
//! maps core errors to stable exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn acquireq(dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_acquireq"));
    cmd.current_dir(dir.path())
        .env_remove("ACQUIREQ_DATABASE_PATH")
        .env_remove("ACQUIREQ_DEFAULT_OFFER_DURATION_SECS")
        .env_remove("ACQUIREQ_SNAPSHOT_BUFFER")
        .env_remove("ACQUIREQ_LOG")
        .env("RUST_LOG", "warn")
        .arg("--db")
        .arg(dir.path().join("leases.db"));
    cmd
}

fn run_json(dir: &TempDir, args: &[&str]) -> Value {
    let output = acquireq(dir).args(args).assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap_or(Value::Null)
}

fn create(dir: &TempDir, extra: &[&str]) -> String {
    let mut args = vec!["create", "printer"];
    args.extend_from_slice(extra);
    let reply = run_json(dir, &args);
    reply["ok"]["id"].as_str().unwrap_or_default().to_string()
}

#[test]
fn create_returns_id_and_admin_secret() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let reply = run_json(&dir, &["create", "printer", "--description", "2nd floor"]);
    assert!(reply["ok"]["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(reply["ok"]["adminSecret"].as_str().is_some());
    Ok(())
}

#[test]
fn join_accept_release_round() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let resource = create(&dir, &["--offer-duration", "30"]);

    let alice = run_json(&dir, &["join", &resource, "alice"]);
    let alice_id = alice["ok"]["claimantId"].as_i64().unwrap_or_default();
    let bob = run_json(&dir, &["join", &resource, "bob", "--contact", "desk 4"]);
    let bob_id = bob["ok"]["claimantId"].as_i64().unwrap_or_default();
    assert_ne!(alice_id, bob_id);

    let status = run_json(&dir, &["status", &resource]);
    assert_eq!(status["ok"]["queue"][0]["label"], "alice");
    assert_eq!(status["ok"]["queue"][0]["isOffered"], true);
    assert_eq!(status["ok"]["queue"][1]["isOffered"], false);
    assert!(status["ok"]["offerDeadline"].is_string());

    let out_of_turn = run_json(&dir, &["accept", &resource, &bob_id.to_string()]);
    assert_eq!(out_of_turn["ok"]["applied"], false);

    let accepted = run_json(&dir, &["accept", &resource, &alice_id.to_string()]);
    assert_eq!(accepted["ok"]["applied"], true);

    let held = run_json(&dir, &["status", &resource]);
    assert_eq!(held["ok"]["holder"]["label"], "alice");
    assert!(held["ok"]["offerDeadline"].is_null());

    let released = run_json(&dir, &["release", &resource, &alice_id.to_string()]);
    assert_eq!(released["ok"]["applied"], true);

    let next = run_json(&dir, &["status", &resource]);
    assert!(next["ok"]["holder"].is_null());
    assert_eq!(next["ok"]["queue"][0]["label"], "bob");
    assert_eq!(next["ok"]["queue"][0]["isOffered"], true);
    Ok(())
}

#[test]
fn offer_lapsed_between_runs_is_expired_on_start() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let resource = create(&dir, &["--offer-duration", "1"]);
    run_json(&dir, &["join", &resource, "alice"]);
    run_json(&dir, &["join", &resource, "bob"]);

    std::thread::sleep(std::time::Duration::from_millis(1500));

    let status = run_json(&dir, &["status", &resource]);
    assert_eq!(status["ok"]["queue"][0]["label"], "bob");
    assert_eq!(status["ok"]["queue"][0]["isOffered"], true);
    assert_eq!(status["ok"]["queue"][1]["label"], "alice");
    Ok(())
}

#[test]
fn unknown_resource_exits_with_not_found_code() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    acquireq(&dir)
        .args(["status", "no-such-resource"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("RESOURCE_NOT_FOUND"));
    Ok(())
}

#[test]
fn zero_offer_duration_is_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    acquireq(&dir)
        .args(["create", "printer", "--offer-duration", "0"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn blank_name_is_invalid_resource() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    acquireq(&dir)
        .args(["create", "   "])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("INVALID_RESOURCE"));
    Ok(())
}

#[test]
fn recover_reports_counts() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let resource = create(&dir, &["--offer-duration", "60"]);
    run_json(&dir, &["join", &resource, "alice"]);

    let report = run_json(&dir, &["recover"]);
    assert_eq!(report["ok"]["rearmed"], 1);
    assert_eq!(report["ok"]["expired"], 0);
    Ok(())
}

#[test]
fn serve_answers_each_line() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let resource = create(&dir, &[]);

    let input = format!(
        "{{\"op\":\"join\",\"resourceId\":\"{resource}\",\"label\":\"alice\"}}\n\
         {{\"op\":\"nonsense\"}}\n\
         {{\"op\":\"status\",\"resourceId\":\"{resource}\"}}\n"
    );
    acquireq(&dir)
        .arg("serve")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"claimantId\":1"))
        .stdout(predicate::str::contains("BAD_REQUEST"))
        .stdout(predicate::str::contains("\"isOffered\":true"));
    Ok(())
}

#[test]
fn help_lists_operations() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_acquireq"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("join"))
        .stdout(predicate::str::contains("accept"))
        .stdout(predicate::str::contains("serve"));
}
