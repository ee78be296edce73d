//! Integration tests for the process supervisor, driven against real
//! short-lived `/bin/sh` children in an isolated temp directory.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use asr_jobs::supervisor;

/// Harness owning an isolated temp directory for log artifacts.
struct TestHarness {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let root = tmp.path().to_path_buf();
        Self { _tmp: tmp, root }
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn sh(&self, script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", script]);
        cmd
    }
}

/// Poll a child until it exits or the deadline passes.
fn wait_exit(child: &mut std::process::Child, deadline: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn spawn_logged_captures_both_streams() {
    let h = TestHarness::new();
    let log = h.log_path("both.log");
    let mut child =
        supervisor::spawn_logged(h.sh("echo out; echo err >&2"), &log).expect("spawn");

    let status = wait_exit(&mut child, Duration::from_secs(5)).expect("child exited");
    assert!(status.success());

    let contents = std::fs::read_to_string(&log).expect("read log");
    assert!(contents.contains("out"), "stdout missing from log: {contents:?}");
    assert!(contents.contains("err"), "stderr missing from log: {contents:?}");
}

#[test]
fn poll_reports_running_then_exit_code() {
    let h = TestHarness::new();
    let log = h.log_path("exit.log");
    let mut child = supervisor::spawn_logged(h.sh("sleep 0.2; exit 3"), &log).expect("spawn");

    // Immediately after spawn the child is still running.
    assert!(child.try_wait().expect("poll").is_none());

    let status = wait_exit(&mut child, Duration::from_secs(5)).expect("child exited");
    assert_eq!(status.code(), Some(3));
}

#[test]
fn kill_terminates_a_running_child() {
    let h = TestHarness::new();
    let log = h.log_path("kill.log");
    let mut child = supervisor::spawn_logged(h.sh("sleep 30"), &log).expect("spawn");

    supervisor::kill(child.id());

    let status = wait_exit(&mut child, Duration::from_secs(5)).expect("child died");
    assert!(!status.success(), "SIGKILLed child must not exit cleanly");
}

#[test]
fn kill_of_reaped_pid_is_swallowed() {
    let h = TestHarness::new();
    let log = h.log_path("gone.log");
    let mut child = supervisor::spawn_logged(h.sh("true"), &log).expect("spawn");
    let pid = child.id();
    child.wait().expect("wait");

    // The pid is gone (or recycled); kill must not panic or error out.
    supervisor::kill(pid);
}

#[test]
fn spawn_failure_surfaces_as_error() {
    let h = TestHarness::new();
    let log = h.log_path("missing.log");
    let cmd = Command::new(h.root.join("no-such-binary"));
    assert!(supervisor::spawn_logged(cmd, &log).is_err());
}
