//! Command lines for the wrapped binaries
//!
//! Flag names here must match what `tailscaled`, `tailscale` and
//! `AdGuardHome` expect.

use crate::config::ResolvedConfig;
use std::path::{Path, PathBuf};

/// Locations of the wrapped binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binaries {
    pub tailscaled: PathBuf,
    pub tailscale: PathBuf,
    pub adguard: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            tailscaled: PathBuf::from("/usr/bin/tailscaled"),
            tailscale: PathBuf::from("/usr/bin/tailscale"),
            adguard: PathBuf::from("/usr/local/bin/AdGuardHome"),
        }
    }
}

/// Arguments for the tailscaled daemon
///
/// User supplied extra arguments go last so they win wherever tailscaled's
/// own flag parser lets a later flag override an earlier one.
pub fn tailscaled_args(config: &ResolvedConfig) -> Vec<String> {
    let mut args = vec![
        format!("--state={}", config.state_file().display()),
        format!("--socket={}", config.socket.display()),
    ];
    if config.userspace {
        args.push("--tun=userspace-networking".to_string());
    }
    args.extend(config.daemon_extra_args.iter().cloned());
    args
}

/// Arguments for `tailscale up`, without the socket flag
///
/// `--tun` is a daemon flag and is never passed here.
pub fn up_args(config: &ResolvedConfig) -> Vec<String> {
    let mut args = vec!["up".to_string(), format!("--accept-dns={}", config.accept_dns)];

    if let Some(key) = config.auth_key() {
        args.push(format!("--auth-key={}", key));
    }
    if let Some(hostname) = &config.hostname {
        args.push(format!("--hostname={}", hostname));
    }
    if let Some(routes) = &config.routes {
        args.push(format!("--advertise-routes={}", routes));
    }
    if let Some(socks5) = &config.socks5_server {
        args.push(format!("--socks5-server={}", socks5));
    }
    if let Some(proxy) = &config.http_proxy_listen {
        args.push(format!("--outbound-http-proxy-listen={}", proxy));
    }
    args
}

/// Arguments for `tailscale set`, or `None` when there is nothing to set
pub fn set_args(config: &ResolvedConfig) -> Option<Vec<String>> {
    if config.set_extra_args.is_empty() {
        return None;
    }
    let mut args = vec!["set".to_string()];
    args.extend(config.set_extra_args.iter().cloned());
    Some(args)
}

/// Arguments for AdGuard Home
pub fn adguard_args(config: &ResolvedConfig) -> Vec<String> {
    vec![
        "--no-check-update".to_string(),
        "--work-dir".to_string(),
        config.filter_work_dir.display().to_string(),
        "--config".to_string(),
        config.filter_config_file().display().to_string(),
    ]
}

/// Join arguments for logging, masking the auth key
pub fn redacted(args: &[String]) -> String {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some(("--auth-key", _)) => "--auth-key=[redacted]",
            _ => arg.as_str(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Basename of a program path, used as its log prefix
pub fn short_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}
