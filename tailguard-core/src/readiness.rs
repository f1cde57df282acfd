//! Bounded readiness polling
//!
//! [`wait_until_ready`] is the generic retry loop. [`ReadinessCheck`]
//! wraps it around an external probe command whose exit status or output
//! decides readiness.

use crate::error::ReadinessTimeout;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, trace};

/// Pause between two attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);

/// Upper bound for a single probe invocation
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ready: bool,
    /// Human readable exit status, kept for the timeout diagnostics
    pub status: String,
    pub output: String,
}

impl ProbeOutcome {
    pub fn ready(status: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            ready: true,
            status: status.into(),
            output: output.into(),
        }
    }

    pub fn not_ready(status: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            ready: false,
            status: status.into(),
            output: output.into(),
        }
    }
}

/// Run `attempt` until it reports ready or `deadline` has elapsed
///
/// Sleeps `interval` between attempts. Returns the number of attempts made.
/// The timeout error is only produced once the deadline has really passed.
pub async fn wait_until_ready<F, Fut>(
    description: &str,
    interval: Duration,
    deadline: Duration,
    mut attempt: F,
) -> Result<u32, ReadinessTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = attempt().await;
        trace!(attempt = attempts, status = %outcome.status, "{} probe", description);

        if outcome.ready {
            debug!("{} ready after {} attempt(s)", description, attempts);
            return Ok(attempts);
        }

        if started.elapsed() >= deadline {
            return Err(ReadinessTimeout {
                description: description.to_string(),
                deadline,
                attempts,
                last_status: outcome.status,
                last_output: outcome.output,
            });
        }

        tokio::time::sleep(interval).await;
    }
}

/// What makes a probe count as ready
#[derive(Clone, Copy)]
pub enum Condition {
    /// The command exits zero
    Succeeds,
    /// The trimmed combined output satisfies the predicate
    OutputMatches(fn(&str) -> bool),
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Succeeds => write!(f, "Succeeds"),
            Condition::OutputMatches(_) => write!(f, "OutputMatches(..)"),
        }
    }
}

/// A poll of an external command
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    description: String,
    program: PathBuf,
    args: Vec<String>,
    condition: Condition,
    interval: Duration,
    attempt_timeout: Duration,
    deadline: Duration,
}

impl ReadinessCheck {
    /// Ready once `program args...` exits zero
    pub fn command(program: impl Into<PathBuf>, args: Vec<String>, deadline: Duration) -> Self {
        let program = program.into();
        Self {
            description: program.display().to_string(),
            program,
            args,
            condition: Condition::Succeeds,
            interval: DEFAULT_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline,
        }
    }

    /// Judge readiness by output instead of exit status
    pub fn until_output(mut self, predicate: fn(&str) -> bool) -> Self {
        self.condition = Condition::OutputMatches(predicate);
        self
    }

    pub fn described_as(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Poll until ready; see [`wait_until_ready`]
    pub async fn wait(&self) -> Result<u32, ReadinessTimeout> {
        wait_until_ready(&self.description, self.interval, self.deadline, move || self.probe()).await
    }

    /// Run the probe command once, bounded by the attempt timeout
    async fn probe(&self) -> ProbeOutcome {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.attempt_timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ProbeOutcome::not_ready(format!("spawn failed: {}", e), ""),
            Err(_) => {
                return ProbeOutcome::not_ready(
                    format!("timed out after {:?}", self.attempt_timeout),
                    "",
                )
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        let ready = match self.condition {
            Condition::Succeeds => output.status.success(),
            Condition::OutputMatches(predicate) => !combined.is_empty() && predicate(&combined),
        };

        ProbeOutcome {
            ready,
            status: output.status.to_string(),
            output: combined,
        }
    }
}
