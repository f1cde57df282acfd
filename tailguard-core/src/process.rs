//! Supervised child processes
//!
//! Launches the long-running daemons with captured output and relays every
//! output line to the log, prefixed with the binary's short name.

use crate::commands::short_name;
use crate::error::ProcessError;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a reaped child's relays may keep draining its pipes
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Operations the supervisor needs on a running child
#[allow(async_fn_in_trait)]
pub trait Supervisee {
    /// Short name used in log prefixes
    fn name(&self) -> &str;

    /// Exit status if the child has already terminated, without blocking
    fn try_exited(&mut self) -> Result<Option<ExitStatus>, ProcessError>;

    /// Deliver `signal`; a child that is already gone counts as success
    fn signal(&mut self, signal: Signal) -> Result<(), ProcessError>;

    /// Block until the child has terminated and been reaped
    ///
    /// Must be cancel safe: the supervisor races it against incoming signals.
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;
}

/// Starts supervised children
pub trait Launcher {
    type Child: Supervisee;

    fn launch(&self, program: &Path, args: &[String]) -> Result<Self::Child, ProcessError>;
}

/// Launches real operating system processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    type Child = SupervisedProcess;

    fn launch(&self, program: &Path, args: &[String]) -> Result<SupervisedProcess, ProcessError> {
        SupervisedProcess::spawn(program, args)
    }
}

/// A launched daemon and the tasks relaying its output
#[derive(Debug)]
pub struct SupervisedProcess {
    name: String,
    child: Child,
    exited: Option<ExitStatus>,
    relays: Vec<JoinHandle<()>>,
}

impl SupervisedProcess {
    /// Spawn `program` with `args`, relaying stdout and stderr to the log
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self, ProcessError> {
        let name = short_name(program);
        info!("Starting {} {}", name, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                name: name.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::MissingStream {
            name: name.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::MissingStream {
            name: name.clone(),
            stream: "stderr",
        })?;

        let relays = vec![
            tokio::spawn(relay_output(name.clone(), stdout)),
            tokio::spawn(relay_output(name.clone(), stderr)),
        ];

        debug!("{} spawned with PID {:?}", name, child.id());
        Ok(Self {
            name,
            child,
            exited: None,
            relays,
        })
    }

    /// PID while the child has not been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

impl Supervisee for SupervisedProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_exited(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        if self.exited.is_none() {
            self.exited = self
                .child
                .try_wait()
                .map_err(|source| ProcessError::WaitFailed {
                    name: self.name.clone(),
                    source,
                })?;
        }
        Ok(self.exited)
    }

    fn signal(&mut self, signal: Signal) -> Result<(), ProcessError> {
        let Some(pid) = self.child.id() else {
            debug!("{} already reaped, not sending {}", self.name, signal);
            return Ok(());
        };

        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::SignalFailed {
                name: self.name.clone(),
                source,
            }),
        }
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = match self.exited {
            Some(status) => status,
            None => {
                let status = self.child.wait().await.map_err(|source| ProcessError::WaitFailed {
                    name: self.name.clone(),
                    source,
                })?;
                self.exited = Some(status);
                status
            }
        };

        // Let the relays flush what the child wrote right before exiting.
        for relay in self.relays.drain(..) {
            if tokio::time::timeout(RELAY_DRAIN_TIMEOUT, relay).await.is_err() {
                warn!("{} output relay still open after exit", self.name);
            }
        }

        Ok(status)
    }
}

/// Log every non-blank line read from `reader` as `[name] line`
pub async fn relay_output<R>(name: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).split(b'\n');

    loop {
        match lines.next_segment().await {
            Ok(Some(line)) => {
                if let Some(record) = relay_line(&name, &line) {
                    info!("{}", record);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read output of {}: {}", name, e);
                break;
            }
        }
    }
}

/// Format one raw output line as `[name] line`, or `None` if it is blank
///
/// Trailing whitespace (including a `\r` before the newline) is dropped and
/// invalid UTF-8 is replaced rather than rejected.
fn relay_line(name: &str, raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    Some(format!("[{}] {}", name, line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_line_prefixes_short_name() {
        assert_eq!(relay_line("tailscaled", b"first"), Some("[tailscaled] first".to_string()));
    }

    #[test]
    fn test_relay_line_drops_blank_lines() {
        assert_eq!(relay_line("AdGuardHome", b""), None);
        assert_eq!(relay_line("AdGuardHome", b"   "), None);
        assert_eq!(relay_line("AdGuardHome", b"\t\r"), None);
    }

    #[test]
    fn test_relay_line_strips_carriage_return() {
        assert_eq!(relay_line("sh", b"second\r"), Some("[sh] second".to_string()));
    }

    #[test]
    fn test_relay_line_keeps_leading_indent() {
        assert_eq!(relay_line("sh", b"  indented"), Some("[sh]   indented".to_string()));
    }

    #[test]
    fn test_relay_line_replaces_invalid_utf8() {
        assert_eq!(
            relay_line("sh", &[0x66, 0x6f, 0xff, 0xfe]),
            Some("[sh] fo\u{fffd}\u{fffd}".to_string())
        );
    }
}
