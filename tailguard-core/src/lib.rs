//! Core library for the tailguard container entrypoint
//!
//! This crate resolves run parameters from the environment, prepares the
//! local resolver file, and supervises `tailscaled` and AdGuard Home for the
//! life of the container.

pub mod error;

pub mod commands;
pub mod config;
pub mod control;
pub mod dns;
pub mod process;
pub mod readiness;
pub mod supervisor;

/// Environment variable holding the log filter directive
pub const LOG_FILTER_ENV: &str = "TAILGUARD_LOG";

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running under systemd.
/// Otherwise logs to stderr without timestamps, since container runtimes
/// stamp every line themselves.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(filter)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init()?;

    Ok(())
}
