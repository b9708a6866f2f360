use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;

use keytrust::core::models::fingerprint::Fingerprint;

const FP_A: &str = "aa00000000000000000000000000000000000000000000000000000000000001";
const FP_B: &str = "bb00000000000000000000000000000000000000000000000000000000000002";

/// Run keytrust with given args.
fn keytrust() -> Command {
    let mut cmd = cargo_bin_cmd!("keytrust");
    cmd.env_remove("KEYTRUST_DIR").env_remove("KEYTRUST_LOG");
    cmd
}

/// Initialize a fresh data directory in a temp dir.
fn setup() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    keytrust()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    dir
}

fn run(dir: &assert_fs::TempDir, args: &[&str]) -> assert_cmd::assert::Assert {
    keytrust().current_dir(dir.path()).args(args).assert()
}

// ─── init / status ───────────────────────────────────────────────

#[test]
fn init_creates_config_and_audit_log() {
    let dir = setup();

    dir.child(".keytrust/keytrust.toml").assert(predicate::path::exists());
    let log = std::fs::read_to_string(dir.path().join(".keytrust/audit.log")).unwrap();
    assert!(log.contains("\"action\":\"init\""));
}

#[test]
fn init_twice_fails() {
    let dir = setup();

    run(&dir, &["init"])
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn commands_require_init() {
    let dir = assert_fs::TempDir::new().unwrap();

    keytrust()
        .current_dir(dir.path())
        .args(["trust", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("keytrust init"));
}

#[test]
fn dir_flag_selects_data_directory() {
    let dir = assert_fs::TempDir::new().unwrap();
    let data = dir.path().join("elsewhere");

    keytrust()
        .current_dir(dir.path())
        .arg("--dir")
        .arg(&data)
        .arg("init")
        .assert()
        .success();

    assert!(data.join("keytrust.toml").exists());
    assert!(!dir.path().join(".keytrust").exists());

    keytrust()
        .current_dir(dir.path())
        .env("KEYTRUST_DIR", &data)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No current key"));
}

// ─── keys ────────────────────────────────────────────────────────

#[test]
fn generate_list_and_rotate_keys() {
    let dir = setup();

    run(&dir, &["keys", "generate", "--id", "first"])
        .success()
        .stdout(predicate::str::contains("Generated ed25519 key first"))
        .stdout(predicate::str::contains("current key"));
    dir.child(".keytrust/keys/first.pub.pem").assert(predicate::path::exists());

    run(&dir, &["keys", "rotate"])
        .success()
        .stdout(predicate::str::contains("Archived first"));
    dir.child(".keytrust/archive/first.pub.pem").assert(predicate::path::exists());

    run(&dir, &["keys", "list"])
        .success()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("archived"));

    run(&dir, &["keys", "stats"])
        .success()
        .stdout(predicate::str::contains("Archived"));
}

#[test]
fn generate_rejects_duplicate_id() {
    let dir = setup();
    run(&dir, &["keys", "generate", "--id", "dup"]).success();

    run(&dir, &["keys", "generate", "--id", "dup"])
        .failure()
        .stderr(predicate::str::contains("Error [ALREADY_EXISTS]"));
}

#[test]
fn generate_with_weak_passphrase_fails() {
    let dir = setup();

    keytrust()
        .current_dir(dir.path())
        .env("KT_TEST_PASS", "short")
        .args(["keys", "generate", "--id", "weak", "--passphrase-env", "KT_TEST_PASS"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error [WEAK_SECRET]"));
}

#[test]
fn import_with_trust_makes_key_verifiable() {
    let source = setup();
    run(&source, &["keys", "generate", "--id", "signer"]).success();
    run(&source, &["keys", "export", "signer", "-o", "signer.pem"]).success();
    let pem = std::fs::read_to_string(source.path().join("signer.pem")).unwrap();

    let dir = setup();
    dir.child("partner.pem").write_str(&pem).unwrap();

    run(&dir, &["keys", "import", "partner", "partner.pem", "--trust"])
        .success()
        .stdout(predicate::str::contains("added to the trust store"));

    run(&dir, &["trust", "verify", "partner.pem"])
        .success()
        .stdout(predicate::str::contains("fingerprint is trusted"));
}

// ─── trust ───────────────────────────────────────────────────────

#[test]
fn verify_exits_with_two_until_trusted() {
    let dir = setup();
    run(&dir, &["keys", "generate", "--id", "signer"]).success();
    run(&dir, &["keys", "export", "signer", "-o", "signer.pem"]).success();

    run(&dir, &["trust", "verify", "signer.pem"])
        .code(2)
        .stdout(predicate::str::contains("not in the trust store"));

    let pem = std::fs::read_to_string(dir.path().join("signer.pem")).unwrap();
    let fingerprint = Fingerprint::of_public_key_pem(&pem).unwrap();

    run(&dir, &["trust", "add", fingerprint.as_str(), "--note", "release signer"]).success();

    run(&dir, &["trust", "verify", "signer.pem"])
        .success()
        .stdout(predicate::str::contains(fingerprint.as_str()));
}

#[test]
fn revoke_restore_and_ban_lifecycle() {
    let dir = setup();
    run(&dir, &["trust", "add", FP_A]).success();

    run(&dir, &["trust", "revoke", FP_A, "--reason", "key leaked"]).success();
    run(&dir, &["trust", "list", "--revoked"])
        .success()
        .stdout(predicate::str::contains(FP_A));

    run(&dir, &["trust", "restore", FP_A, "--reason", "false alarm"]).success();
    run(&dir, &["trust", "ban", FP_A, "--reason", "confirmed compromise"])
        .success()
        .stdout(predicate::str::contains("cannot be undone"));

    run(&dir, &["trust", "restore", FP_A, "--reason", "please"])
        .failure()
        .stderr(predicate::str::contains("Error [INVALID_STATE_TRANSITION]"));

    run(&dir, &["trust", "show", FP_A])
        .success()
        .stdout(predicate::str::contains("trust_permanent_revoke"));
}

#[test]
fn add_rejects_malformed_fingerprint() {
    let dir = setup();

    run(&dir, &["trust", "add", "not-a-fingerprint"])
        .failure()
        .stderr(predicate::str::contains("Error [INVALID_ARGUMENT]"));
}

#[test]
fn add_rejects_duplicate_fingerprint() {
    let dir = setup();
    run(&dir, &["trust", "add", FP_A]).success();

    run(&dir, &["trust", "add", &FP_A.to_uppercase()])
        .failure()
        .stderr(predicate::str::contains("Error [ALREADY_EXISTS]"));
}

#[test]
fn search_finds_entries_by_note() {
    let dir = setup();
    run(&dir, &["trust", "add", FP_A, "--note", "ci runner"]).success();
    run(&dir, &["trust", "add", FP_B, "--note", "laptop"]).success();

    run(&dir, &["trust", "search", "runner"])
        .success()
        .stdout(predicate::str::contains(FP_A))
        .stdout(predicate::str::contains(FP_B).not());
}

#[test]
fn export_then_import_into_another_store() {
    let source = setup();
    run(&source, &["trust", "add", FP_A]).success();
    run(&source, &["trust", "add", FP_B]).success();
    run(&source, &["trust", "revoke", FP_B, "--reason", "retired"]).success();
    run(&source, &["trust", "export", "--format", "csv", "-o", "trust.csv"]).success();

    let csv = std::fs::read_to_string(source.path().join("trust.csv")).unwrap();
    let dir = setup();
    dir.child("trust.csv").write_str(&csv).unwrap();

    run(&dir, &["trust", "import", "trust.csv", "--format", "csv"])
        .success()
        .stdout(predicate::str::contains("2 added"));

    run(&dir, &["trust", "list", "--revoked"])
        .success()
        .stdout(predicate::str::contains(FP_B))
        .stdout(predicate::str::contains(FP_A).not());
}

#[test]
fn export_rejects_unknown_format() {
    let dir = setup();

    run(&dir, &["trust", "export", "--format", "xml"])
        .failure()
        .stderr(predicate::str::contains("Error [INVALID_ARGUMENT]"));
}

#[test]
fn backup_and_restore() {
    let dir = setup();
    run(&dir, &["trust", "add", FP_A]).success();
    run(&dir, &["trust", "backup"]).success();

    let backups: Vec<_> = std::fs::read_dir(dir.path().join(".keytrust/backups"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(backups.len(), 1);

    run(&dir, &["trust", "add", FP_B]).success();

    keytrust()
        .current_dir(dir.path())
        .args(["trust", "restore-backup"])
        .arg(&backups[0])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 1 entries"));

    run(&dir, &["trust", "list"])
        .success()
        .stdout(predicate::str::contains(FP_B).not());
}

// ─── policy ──────────────────────────────────────────────────────

#[test]
fn policy_eval_denies_matching_operation() {
    let dir = setup();
    dir.child("block.json")
        .write_str(
            r#"{
  "policyId": "block-deploy",
  "name": "Block deploys",
  "priority": 10,
  "rules": [{ "type": "operation", "value": "deploy", "action": "deny" }]
}"#,
        )
        .unwrap();

    run(&dir, &["policy", "add", "block.json"]).success();
    run(&dir, &["policy", "list"])
        .success()
        .stdout(predicate::str::contains("block-deploy"));

    run(&dir, &["policy", "eval", "--operation", "deploy"])
        .code(2)
        .stdout(predicate::str::contains("block-deploy"));

    run(&dir, &["policy", "eval", "--operation", "read"])
        .success()
        .stdout(predicate::str::contains("default policy allows"));

    run(&dir, &["policy", "disable", "block-deploy"]).success();
    run(&dir, &["policy", "eval", "--operation", "deploy"]).success();
}

#[test]
fn policy_add_twice_needs_replace() {
    let dir = setup();
    dir.child("p.json")
        .write_str(r#"{"policyId":"p1","name":"P","priority":1,"rules":[{"type":"keyName","value":"ci","action":"allow"}]}"#)
        .unwrap();

    run(&dir, &["policy", "add", "p.json"]).success();
    run(&dir, &["policy", "add", "p.json"])
        .failure()
        .stderr(predicate::str::contains("Error [ALREADY_EXISTS]"));
    run(&dir, &["policy", "add", "p.json", "--replace"]).success();
}

#[test]
fn policy_remove_unknown_is_not_found() {
    let dir = setup();

    run(&dir, &["policy", "remove", "ghost"])
        .failure()
        .stderr(predicate::str::contains("Error [NOT_FOUND]"));
}

// ─── log ─────────────────────────────────────────────────────────

#[test]
fn log_filters_by_target() {
    let dir = setup();
    run(&dir, &["trust", "add", FP_A]).success();
    run(&dir, &["trust", "add", FP_B]).success();

    run(&dir, &["log", "--target", FP_A])
        .success()
        .stdout(predicate::str::contains("trust_add"))
        .stdout(predicate::str::contains("1 entries"));
}

#[test]
fn log_rejects_bad_date() {
    let dir = setup();

    run(&dir, &["log", "--since", "yesterday"])
        .failure()
        .stderr(predicate::str::contains("Invalid date format"));
}
