//! Process supervisor
//!
//! Brings up tailscaled, gates on its control socket, authenticates,
//! waits for a tailnet address, starts AdGuard Home and then watches both
//! children until a signal arrives or one of them dies.
//!
//! The run is an explicit walk through [`State`]. Each step returns the
//! state it reached plus an optional failure; [`State::failure_policy`]
//! decides whether that failure is logged or ends the run.

pub mod signals;
pub mod state;

pub use state::{FailurePolicy, ShutdownCause, State};

use crate::commands::{self, Binaries};
use crate::config::ResolvedConfig;
use crate::control::ControlPlane;
use crate::dns::{self, MergeOutcome, LOCAL_NAMESERVERS};
use crate::error::SupervisorError;
use crate::process::{Launcher, Supervisee};
use nix::sys::signal::Signal;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Deadlines and intervals used by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long tailscaled gets to answer on its control socket
    pub daemon_ready: Duration,
    /// How long to wait for a tailnet address before starting AdGuard Home
    pub identity: Duration,
    /// Bound for the logout attempt on the first signal
    pub logout: Duration,
    /// How often the children's exit state is polled
    pub exit_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            daemon_ready: Duration::from_secs(30),
            identity: Duration::from_secs(10),
            logout: Duration::from_secs(5),
            exit_poll: Duration::from_millis(300),
        }
    }
}

/// Everything besides the resolved config that shapes a run
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub binaries: Binaries,
    pub resolv_conf: PathBuf,
    pub timings: Timings,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            binaries: Binaries::default(),
            resolv_conf: PathBuf::from(dns::RESOLV_CONF),
            timings: Timings::default(),
        }
    }
}

/// Outcome of one step: the state reached and why it may have failed
type Step = (State, Result<(), String>);

/// Owns both children for the whole run
pub struct Supervisor<C, L: Launcher> {
    config: ResolvedConfig,
    control: C,
    launcher: L,
    options: SupervisorOptions,
    tailscaled: Option<L::Child>,
    adguard: Option<L::Child>,
}

impl<C: ControlPlane, L: Launcher> Supervisor<C, L> {
    pub fn new(config: ResolvedConfig, control: C, launcher: L, options: SupervisorOptions) -> Self {
        Self {
            config,
            control,
            launcher,
            options,
            tailscaled: None,
            adguard: None,
        }
    }

    /// Drive the state machine to completion
    ///
    /// Returns `Ok` after a signal-initiated shutdown in which both children
    /// were reaped. Returns an error when startup failed fatally, a child
    /// exited on its own, or a child could not be waited for.
    pub async fn run(mut self, mut signals: mpsc::Receiver<Signal>) -> Result<(), SupervisorError> {
        let mut state = State::Init;

        loop {
            let (next, result) = self.advance(state, &mut signals).await;

            if let State::Exited(cause) = next {
                return finish(cause, result);
            }

            if let Err(reason) = result {
                match next.failure_policy() {
                    FailurePolicy::BestEffort => {
                        warn!("Step to {} failed, continuing: {}", next, reason);
                    }
                    FailurePolicy::Fatal => {
                        error!("Step to {} failed: {}", next, reason);
                        self.abort().await;
                        return Err(SupervisorError::FatalStartup {
                            stage: next.to_string(),
                            reason,
                        });
                    }
                }
            }

            debug!("State: {}", next);
            state = next;
        }
    }

    async fn advance(&mut self, state: State, signals: &mut mpsc::Receiver<Signal>) -> Step {
        match state {
            State::Supervising => (State::ShuttingDown(self.supervise(signals).await), Ok(())),
            State::ShuttingDown(cause) => {
                let reaped = self.shut_down(&cause, signals).await;
                (State::Exited(cause), reaped)
            }
            startup => tokio::select! {
                step = self.start_up(startup) => step,
                Some(signal) = signals.recv() => {
                    info!("Received {} during startup", signal);
                    (State::ShuttingDown(ShutdownCause::Signal(signal)), Ok(()))
                }
            },
        }
    }

    async fn start_up(&mut self, state: State) -> Step {
        match state {
            State::Init => (State::DirsReady, self.ensure_dirs()),
            State::DirsReady => (State::DnsApplied, self.apply_dns()),
            State::DnsApplied => (State::DaemonAStarted, self.start_tailscaled()),
            State::DaemonAStarted => (State::DaemonAReady, self.await_tailscaled().await),
            State::DaemonAReady => self.authenticate().await,
            State::AuthApplied | State::AuthSkipped => {
                (State::SettingsApplied, self.apply_settings().await)
            }
            State::SettingsApplied => (State::IdentityAwaited, self.await_identity().await),
            State::IdentityAwaited => (State::DaemonBStarted, self.start_adguard()),
            State::DaemonBStarted => (State::Supervising, Ok(())),
            // Supervision and shutdown are driven by `advance`.
            other => (other, Ok(())),
        }
    }

    fn ensure_dirs(&self) -> Result<(), String> {
        let failures: Vec<String> = self
            .config
            .required_dirs()
            .into_iter()
            .filter_map(|(dir, mode)| {
                ensure_dir(&dir, mode)
                    .err()
                    .map(|e| format!("{}: {}", dir.display(), e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("could not prepare directories: {}", failures.join("; ")))
        }
    }

    fn apply_dns(&self) -> Result<(), String> {
        let path = &self.options.resolv_conf;
        let merged = dns::ensure_nameservers(path, &LOCAL_NAMESERVERS);

        for warning in self.config.legacy.warnings() {
            warn!("{}", warning);
        }

        match merged {
            Ok(MergeOutcome::Created) => info!("Created {} with local nameservers", path.display()),
            Ok(MergeOutcome::Prepended(n)) => {
                info!("Prepended {} nameserver line(s) to {}", n, path.display())
            }
            Ok(MergeOutcome::Unchanged) => {}
            Err(e) => return Err(format!("failed to set up local DNS: {}", e)),
        }
        Ok(())
    }

    fn start_tailscaled(&mut self) -> Result<(), String> {
        let args = commands::tailscaled_args(&self.config);
        let child = self
            .launcher
            .launch(&self.options.binaries.tailscaled, &args)
            .map_err(|e| e.to_string())?;
        self.tailscaled = Some(child);
        Ok(())
    }

    async fn await_tailscaled(&self) -> Result<(), String> {
        let attempts = self
            .control
            .wait_ready(self.options.timings.daemon_ready)
            .await
            .map_err(|e| e.to_string())?;
        info!("tailscaled control socket is ready after {} probe(s)", attempts);
        Ok(())
    }

    async fn authenticate(&self) -> Step {
        if self.config.auth_once && self.control.is_logged_in().await {
            info!("TS_AUTH_ONCE is set and tailscale is already up; skipping 'tailscale up'");
            return (State::AuthSkipped, Ok(()));
        }

        let result = self
            .control
            .up(&commands::up_args(&self.config))
            .await
            .map_err(|e| format!("tailscale up failed, interactive login may be required: {}", e));
        (State::AuthApplied, result)
    }

    async fn apply_settings(&self) -> Result<(), String> {
        let Some(args) = commands::set_args(&self.config) else {
            return Ok(());
        };
        self.control
            .set(&args)
            .await
            .map_err(|e| format!("tailscale set failed: {}", e))
    }

    async fn await_identity(&self) -> Result<(), String> {
        match self.control.wait_for_identity(self.options.timings.identity).await {
            Ok(_) => {
                info!("Tailnet address detected; starting AdGuard Home");
                Ok(())
            }
            Err(e) => Err(format!("{}; DNS routing over the tailnet may fail", e)),
        }
    }

    fn start_adguard(&mut self) -> Result<(), String> {
        let args = commands::adguard_args(&self.config);
        let child = self
            .launcher
            .launch(&self.options.binaries.adguard, &args)
            .map_err(|e| e.to_string())?;
        self.adguard = Some(child);
        Ok(())
    }

    /// Wait for the first signal or child exit
    async fn supervise(&mut self, signals: &mut mpsc::Receiver<Signal>) -> ShutdownCause {
        info!("Supervising tailscaled and AdGuard Home");
        let mut ticker = tokio::time::interval(self.options.timings.exit_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => return ShutdownCause::Signal(signal),
                _ = ticker.tick() => {
                    if let Some(cause) = self.exited_child() {
                        return cause;
                    }
                }
            }
        }
    }

    fn exited_child(&mut self) -> Option<ShutdownCause> {
        for child in [self.tailscaled.as_mut(), self.adguard.as_mut()]
            .into_iter()
            .flatten()
        {
            match child.try_exited() {
                Ok(Some(status)) => {
                    return Some(ShutdownCause::ChildExited {
                        name: child.name().to_string(),
                        status,
                    })
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }
        None
    }

    /// Log out on a signal, stop the children, then reap both
    ///
    /// Fails when a child could not be waited for.
    async fn shut_down(
        &mut self,
        cause: &ShutdownCause,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Result<(), String> {
        let logged_out = matches!(cause, ShutdownCause::Signal(_));
        let signal = match cause {
            ShutdownCause::Signal(signal) => {
                info!("Received {}, logging out before stopping children", signal);
                self.logout().await;
                *signal
            }
            ShutdownCause::ChildExited { name, status } => {
                error!("{} exited unexpectedly ({}), stopping the remaining child", name, status);
                Signal::SIGTERM
            }
        };

        for child in [self.tailscaled.as_mut(), self.adguard.as_mut()]
            .into_iter()
            .flatten()
        {
            deliver(child, signal);
        }

        self.reap(signals, logged_out).await
    }

    async fn logout(&self) {
        match tokio::time::timeout(self.options.timings.logout, self.control.logout()).await {
            Ok(Ok(())) => info!("Logged out of the tailnet"),
            Ok(Err(e)) => warn!("Logout failed, continuing shutdown: {}", e),
            Err(_) => warn!(
                "Logout did not finish within {:?}, continuing shutdown",
                self.options.timings.logout
            ),
        }
    }

    /// Wait for every child, forwarding later signals
    ///
    /// The first signal seen here logs out before it is forwarded unless a
    /// logout already happened. Every child is waited for even after one
    /// wait fails; the first failure is returned.
    async fn reap(
        &mut self,
        signals: &mut mpsc::Receiver<Signal>,
        mut logged_out: bool,
    ) -> Result<(), String> {
        let mut pending: Vec<L::Child> = self
            .tailscaled
            .take()
            .into_iter()
            .chain(self.adguard.take())
            .collect();
        let mut failure = None;

        while let Some(child) = pending.first_mut() {
            let event = tokio::select! {
                Some(signal) = signals.recv() => Err(signal),
                status = child.wait() => Ok(status),
            };

            match event {
                Err(signal) => {
                    if !logged_out {
                        info!("Received {} while stopping, logging out first", signal);
                        self.logout().await;
                        logged_out = true;
                    }
                    info!("Received {} during shutdown, forwarding", signal);
                    for child in pending.iter_mut() {
                        deliver(child, signal);
                    }
                }
                Ok(status) => {
                    let child = pending.remove(0);
                    match status {
                        Ok(status) => info!("{} exited ({})", child.name(), status),
                        Err(e) => {
                            error!("{}", e);
                            if failure.is_none() {
                                failure = Some(e.to_string());
                            }
                        }
                    }
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Kill and reap whatever was started; used on fatal startup failures
    async fn abort(&mut self) {
        for mut child in [self.tailscaled.take(), self.adguard.take()]
            .into_iter()
            .flatten()
        {
            deliver(&mut child, Signal::SIGKILL);
            if let Err(e) = child.wait().await {
                warn!("{}", e);
            }
        }
    }
}

/// Map the end of a shutdown to the run's outcome
///
/// An unexpected child exit always fails the run. A signal shutdown only
/// succeeds when every child was reaped.
fn finish(cause: ShutdownCause, reaped: Result<(), String>) -> Result<(), SupervisorError> {
    match (cause, reaped) {
        (ShutdownCause::ChildExited { name, status }, _) => {
            Err(SupervisorError::UnexpectedChildExit { name, status })
        }
        (ShutdownCause::Signal(_), Err(reason)) => Err(SupervisorError::ReapFailed { reason }),
        (ShutdownCause::Signal(signal), Ok(())) => {
            info!("Shut down cleanly after {}", signal);
            Ok(())
        }
    }
}

/// Send `signal` to a child that has not exited yet
fn deliver<S: Supervisee>(child: &mut S, signal: Signal) {
    if let Ok(Some(_)) = child.try_exited() {
        return;
    }
    info!("Forwarding {} to {}", signal, child.name());
    if let Err(e) = child.signal(signal) {
        warn!("{}", e);
    }
}

/// Create `path` if needed and force its mode, even on pre-existing mounts
///
/// Both operations are attempted; a failed create does not skip the chmod.
fn ensure_dir(path: &Path, mode: u32) -> Result<(), String> {
    let created = fs::create_dir_all(path).err().map(|e| format!("create: {}", e));
    let chmod = fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .err()
        .map(|e| format!("chmod: {}", e));

    let errors: Vec<String> = [created, chmod].into_iter().flatten().collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join(", "))
    }
}
