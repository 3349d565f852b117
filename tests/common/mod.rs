#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use exec_view_sync::results::node_cache::NodeCache;
use exec_view_sync::results::outcome::{Category, TestRef};
use exec_view_sync::ui::event_loop::UiLoop;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_evsync") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "evsync.exe" } else { "evsync" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve evsync binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("evsync-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("execute evsync command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fixtures ────────────────────

/// `n` distinct tests named `{prefix}/T###`.
pub fn make_tests(prefix: &str, n: usize) -> Vec<TestRef> {
    (0..n)
        .map(|i| TestRef::new(format!("{prefix}/T{i:03}"), "ok"))
        .collect()
}

/// Cache with `counts[i]` tests published in `Category::STATUS[i]`.
pub fn populated_cache(node: &str, counts: [usize; 4]) -> Arc<NodeCache> {
    let cache = Arc::new(NodeCache::new(node));
    for (category, count) in Category::STATUS.iter().zip(counts) {
        for test in make_tests(&format!("{node}/{}", category.label()), count) {
            cache.publish(test, *category);
        }
    }
    cache
}

/// Pump `ui` until `done` holds. Panics after five seconds.
pub fn pump_until(ui: &UiLoop, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for the UI loop to settle"
        );
        ui.run_for(Duration::from_millis(5));
    }
}
