use std::cell::Cell;
use std::time::{Duration, Instant};
use tailguard_core::readiness::{wait_until_ready, ProbeOutcome, ReadinessCheck};
use tempfile::TempDir;

const FAST: Duration = Duration::from_millis(20);

/// Test the loop stops at the first ready attempt
#[tokio::test]
async fn test_ready_on_third_attempt() {
    let calls = Cell::new(0u32);
    let started = Instant::now();

    let attempts = wait_until_ready("counter", FAST, Duration::from_secs(5), || {
        calls.set(calls.get() + 1);
        let n = calls.get();
        async move {
            if n >= 3 {
                ProbeOutcome::ready("exit status: 0", "")
            } else {
                ProbeOutcome::not_ready("exit status: 1", "")
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(calls.get(), 3);
    assert!(started.elapsed() >= FAST * 2);
}

/// Test a first-try success does not sleep
#[tokio::test]
async fn test_immediately_ready() {
    let attempts = wait_until_ready("instant", Duration::from_secs(10), Duration::from_secs(10), || async {
        ProbeOutcome::ready("ok", "")
    })
    .await
    .unwrap();

    assert_eq!(attempts, 1);
}

/// Test the timeout is not reported before the deadline has passed
#[tokio::test]
async fn test_timeout_after_deadline_with_diagnostics() {
    let deadline = Duration::from_millis(150);
    let started = Instant::now();

    let err = wait_until_ready("never", FAST, deadline, || async {
        ProbeOutcome::not_ready("exit status: 1", "connection refused")
    })
    .await
    .unwrap_err();

    assert!(started.elapsed() >= deadline);
    assert_eq!(err.description, "never");
    assert_eq!(err.deadline, deadline);
    assert!(err.attempts >= 2);
    assert_eq!(err.last_status, "exit status: 1");
    assert_eq!(err.last_output, "connection refused");

    let message = err.to_string();
    assert!(message.contains("never not ready"));
    assert!(message.contains("connection refused"));
}

/// Test a command check succeeds once the command starts exiting zero
#[tokio::test]
async fn test_command_check_waits_for_success() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("count");
    let script = format!(
        "n=$(cat {0} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {0}; [ $n -ge 3 ]",
        marker.display()
    );

    let attempts = ReadinessCheck::command("/bin/sh", vec!["-c".to_string(), script], Duration::from_secs(10))
        .interval(FAST)
        .wait()
        .await
        .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "3");
}

/// Test an output predicate decides readiness regardless of exit status
#[tokio::test]
async fn test_command_check_with_output_predicate() {
    fn has_token(output: &str) -> bool {
        output.lines().any(|l| l == "token")
    }

    let attempts = ReadinessCheck::command(
        "/bin/sh",
        vec!["-c".to_string(), "echo noise; echo token >&2; exit 1".to_string()],
        Duration::from_secs(5),
    )
    .until_output(has_token)
    .interval(FAST)
    .wait()
    .await
    .unwrap();

    assert_eq!(attempts, 1);
}

/// Test empty output never satisfies an output predicate
#[tokio::test]
async fn test_empty_output_is_not_ready() {
    let err = ReadinessCheck::command("/bin/true", Vec::new(), Duration::from_millis(100))
        .until_output(|_| true)
        .described_as("silent probe")
        .interval(FAST)
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.description, "silent probe");
    assert_eq!(err.last_output, "");
}

/// Test a hanging probe is cut off by the per-attempt timeout
#[tokio::test]
async fn test_hanging_probe_is_bounded() {
    let started = Instant::now();

    let err = ReadinessCheck::command("/bin/sleep", vec!["5".to_string()], Duration::from_millis(300))
        .attempt_timeout(Duration::from_millis(100))
        .interval(FAST)
        .wait()
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(err.last_status.contains("timed out"));
}

/// Test a missing probe binary counts as not ready rather than aborting
#[tokio::test]
async fn test_missing_binary_is_not_ready() {
    let err = ReadinessCheck::command("/nonexistent/probe", Vec::new(), Duration::from_millis(100))
        .interval(FAST)
        .wait()
        .await
        .unwrap_err();

    assert!(err.last_status.contains("spawn failed"));
}
