//! Error types for the tailguard entrypoint
//!
//! Every failure the supervisor can hit is described here. Most of them are
//! contained where they happen and only surface as a log line; the umbrella
//! [`TailguardError`] is what reaches the binary and picks the exit code.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the tailguard binary
#[derive(Error, Debug)]
pub enum TailguardError {
    /// Startup aborted or a supervised child died
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),

    /// Generic I/O errors (runtime construction, signal registration)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolver file merge errors
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Failed to read {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write temporary file next to {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to replace {}: {source}", .path.display())]
    ReplaceFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from one bounded invocation of the control binary
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// A readiness wait ran past its deadline
#[derive(Error, Debug)]
#[error("{description} not ready after {deadline:?} ({attempts} attempts, last result: {last_status}, last output: {last_output:?})")]
pub struct ReadinessTimeout {
    pub description: String,
    pub deadline: Duration,
    pub attempts: u32,
    pub last_status: String,
    pub last_output: String,
}

/// Supervised child process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {name}: {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to capture {stream} of {name}")]
    MissingStream { name: String, stream: &'static str },

    #[error("Failed to signal {name}: {source}")]
    SignalFailed {
        name: String,
        source: nix::errno::Errno,
    },

    #[error("Failed to wait for {name}: {source}")]
    WaitFailed {
        name: String,
        source: std::io::Error,
    },
}

/// Errors that end a supervisor run
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Fatal startup failure at {stage}: {reason}")]
    FatalStartup { stage: String, reason: String },

    #[error("{name} exited unexpectedly ({status})")]
    UnexpectedChildExit { name: String, status: ExitStatus },

    #[error("Shutdown could not reap every child: {reason}")]
    ReapFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TailguardError>;
