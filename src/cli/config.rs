//! Configuration inspection command

use tailguard_core::config::ResolvedConfig;
use tailguard_core::error::TailguardError;

/// Print the resolved configuration as JSON, auth key redacted
pub fn print_config() -> Result<(), TailguardError> {
    let config = ResolvedConfig::from_env();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
