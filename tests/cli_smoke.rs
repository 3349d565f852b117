//! CLI smoke tests for the `evsync` binary.

mod common;

use serde_json::Value;

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stdout.contains("simulate"));
    assert!(result.stdout.contains("config"));
}

#[test]
fn simulate_json_reports_consistent_views() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = dir.path().join("sync.jsonl");
    let journal_arg = journal.to_string_lossy().to_string();
    let result = common::run_cli_case(
        "simulate_json_reports_consistent_views",
        &[
            "--json",
            "simulate",
            "--nodes",
            "2",
            "--tests",
            "200",
            "--switch-after",
            "100",
            "--seed",
            "3",
            "--journal",
            &journal_arg,
        ],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).expect("json output");
    assert_eq!(payload["command"], "simulate");
    assert_eq!(payload["report"]["consistent"], true);
    assert_eq!(payload["report"]["seed"], 3);
    assert_eq!(payload["report"]["tabs"].as_array().map(Vec::len), Some(5));

    let lines = std::fs::read_to_string(&journal).expect("journal written");
    let first: Value = serde_json::from_str(lines.lines().next().expect("line")).expect("json");
    assert_eq!(first["event"], "session_start");
}

#[test]
fn config_validate_accepts_file_and_rejects_bad_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("good.toml");
    std::fs::write(&good, "[buffer]\nbatch_size = 50\n").expect("write");
    let good_arg = good.to_string_lossy().to_string();
    let ok = common::run_cli_case(
        "config_validate_good",
        &["--json", "--config", &good_arg, "config", "validate"],
    );
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    let payload: Value = serde_json::from_str(ok.stdout.trim()).expect("json output");
    assert_eq!(payload["valid"], true);

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[buffer]\nbatch_size = 0\n").expect("write");
    let bad_arg = bad.to_string_lossy().to_string();
    let err = common::run_cli_case(
        "config_validate_bad",
        &["--config", &bad_arg, "config", "validate"],
    );
    assert_eq!(err.status.code(), Some(1), "log: {}", err.log_path.display());
    assert!(err.stderr.contains("EVS-1001"));
}

#[test]
fn missing_explicit_config_is_a_user_error() {
    let result = common::run_cli_case(
        "missing_explicit_config_is_a_user_error",
        &["--config", "/nonexistent/evsync.toml", "simulate", "--no-journal"],
    );
    assert_eq!(result.status.code(), Some(1));
    assert!(result.stderr.contains("EVS-1002"));
}
