//! Supervisor command
//!
//! Resolves the environment once, wires the real launcher and control
//! client into the supervisor, and blocks until it finishes.

use std::path::PathBuf;
use tailguard_core::commands::Binaries;
use tailguard_core::config::ResolvedConfig;
use tailguard_core::control::TailscaleCli;
use tailguard_core::error::TailguardError;
use tailguard_core::process::SystemLauncher;
use tailguard_core::supervisor::{signals, Supervisor, SupervisorOptions};
use tracing::info;

/// Run the supervisor until a signal or an unexpected child exit
pub fn run_supervisor(binaries: Binaries, resolv_conf: PathBuf) -> Result<(), TailguardError> {
    let config = ResolvedConfig::from_env();
    info!(
        "Starting tailguard: state dir {}, socket {}, userspace networking {}",
        config.state_dir.display(),
        config.socket.display(),
        config.userspace
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        // Handlers go in before any child exists.
        let signals = signals::listen()?;

        let control = TailscaleCli::new(&binaries.tailscale, &config.socket);
        let options = SupervisorOptions {
            binaries,
            resolv_conf,
            ..SupervisorOptions::default()
        };

        Supervisor::new(config, control, SystemLauncher, options)
            .run(signals)
            .await?;
        Ok::<_, TailguardError>(())
    })
}
