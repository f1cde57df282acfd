//! Control channel client for the VPN daemon
//!
//! Every call goes through the `tailscale` CLI pointed at the daemon's
//! control socket and is bounded by an explicit timeout.

use crate::commands::{redacted, short_name};
use crate::error::{ProbeError, ReadinessTimeout};
use crate::process::relay_output;
use crate::readiness::ReadinessCheck;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Bound for `tailscale status`
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound for `tailscale up`, long enough to show an interactive login URL
pub const UP_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound for `tailscale set`
pub const SET_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for the de-registration on shutdown
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands the supervisor issues against the VPN daemon
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    /// Wait until the control channel answers a version probe
    async fn wait_ready(&self, deadline: Duration) -> Result<u32, ReadinessTimeout>;

    /// Whether the node is already logged in
    async fn is_logged_in(&self) -> bool;

    /// Run `tailscale up` with the given arguments
    async fn up(&self, args: &[String]) -> Result<(), ProbeError>;

    /// Run `tailscale set` with the given arguments
    async fn set(&self, args: &[String]) -> Result<(), ProbeError>;

    /// Wait until the daemon reports a tailnet address
    async fn wait_for_identity(&self, deadline: Duration) -> Result<u32, ReadinessTimeout>;

    /// Remove this node from the tailnet
    async fn logout(&self) -> Result<(), ProbeError>;
}

/// [`ControlPlane`] backed by the `tailscale` binary
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    program: PathBuf,
    socket: PathBuf,
}

impl TailscaleCli {
    pub fn new(program: impl Into<PathBuf>, socket: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            socket: socket.into(),
        }
    }

    fn with_socket<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut full = vec![format!("--socket={}", self.socket.display())];
        full.extend(args.iter().map(|a| a.as_ref().to_string()));
        full
    }

    /// Run a subcommand with its output relayed to the log
    async fn run_logged(&self, args: &[String], timeout: Duration) -> Result<(), ProbeError> {
        let name = short_name(&self.program);
        let args = self.with_socket(args);
        info!("Running: {} {}", name, redacted(&args));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::SpawnFailed {
                program: name.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_output(name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_output(name.clone(), stderr));
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                return Err(ProbeError::SpawnFailed {
                    program: name,
                    source,
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(ProbeError::TimedOut {
                    program: name,
                    timeout,
                });
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(ProbeError::Failed {
                program: name,
                status,
            })
        }
    }
}

impl ControlPlane for TailscaleCli {
    async fn wait_ready(&self, deadline: Duration) -> Result<u32, ReadinessTimeout> {
        ReadinessCheck::command(&self.program, self.with_socket(&["version"]), deadline)
            .described_as("tailscaled control socket")
            .wait()
            .await
    }

    async fn is_logged_in(&self) -> bool {
        let status = Command::new(&self.program)
            .args(self.with_socket(&["status", "--peers=false"]))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(STATUS_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("tailscale status could not run: {}", e);
                false
            }
            Err(_) => {
                debug!("tailscale status timed out after {:?}", STATUS_TIMEOUT);
                false
            }
        }
    }

    async fn up(&self, args: &[String]) -> Result<(), ProbeError> {
        self.run_logged(args, UP_TIMEOUT).await
    }

    async fn set(&self, args: &[String]) -> Result<(), ProbeError> {
        self.run_logged(args, SET_TIMEOUT).await
    }

    async fn wait_for_identity(&self, deadline: Duration) -> Result<u32, ReadinessTimeout> {
        ReadinessCheck::command(&self.program, self.with_socket(&["ip"]), deadline)
            .described_as("tailnet address")
            .until_output(has_tailnet_address)
            .wait()
            .await
    }

    async fn logout(&self) -> Result<(), ProbeError> {
        let args = vec!["logout".to_string(), "--force".to_string()];
        self.run_logged(&args, LOGOUT_TIMEOUT).await
    }
}

/// Whether `output` lists at least one tailnet address
///
/// Tailnet IPv4 addresses come from the CGNAT range `100.64.0.0/10` and
/// IPv6 addresses from `fd7a:115c:a1e0::/48`. One matching line suffices.
pub fn has_tailnet_address(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<IpAddr>().ok())
        .any(|addr| match addr {
            IpAddr::V4(v4) => {
                let [a, b, ..] = v4.octets();
                a == 100 && (b & 0xc0) == 64
            }
            IpAddr::V6(v6) => {
                let segments = v6.segments();
                segments[..3] == [0xfd7a, 0x115c, 0xa1e0]
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tailnet_ipv4_address() {
        assert!(has_tailnet_address("100.101.102.103"));
        assert!(has_tailnet_address("100.64.0.1\n"));
        assert!(has_tailnet_address("100.127.255.254"));
    }

    #[test]
    fn test_tailnet_ipv6_address() {
        assert!(has_tailnet_address("fd7a:115c:a1e0::1234:5678"));
    }

    #[test]
    fn test_any_matching_line_suffices() {
        assert!(has_tailnet_address("192.168.1.2\n100.88.1.1\nfd7a:115c:a1e0::1"));
    }

    #[test]
    fn test_rejects_non_tailnet_output() {
        assert!(!has_tailnet_address(""));
        assert!(!has_tailnet_address("   \n"));
        assert!(!has_tailnet_address("100.63.255.255"));
        assert!(!has_tailnet_address("100.128.0.1"));
        assert!(!has_tailnet_address("10.0.0.1\n::1"));
        assert!(!has_tailnet_address("failed to connect to local tailscaled; it doesn't appear to be running"));
    }

    #[test]
    fn test_socket_flag_comes_first() {
        let cli = TailscaleCli::new("/usr/bin/tailscale", "/tmp/ts.sock");
        assert_eq!(
            cli.with_socket(&["status", "--peers=false"]),
            vec!["--socket=/tmp/ts.sock", "status", "--peers=false"]
        );
    }
}
