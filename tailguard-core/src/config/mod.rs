//! Configuration module
//!
//! Resolves every run parameter from the process environment exactly once.
//! Later stages only ever see the resulting [`ResolvedConfig`].

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

pub mod env;

use env::{non_empty, parse_bool, split_args, unquote};

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";
const DEFAULT_USERSPACE: bool = true;
const DEFAULT_AUTH_ONCE: bool = false;
const DEFAULT_ACCEPT_DNS: bool = false;

/// Name of the state file kept inside the state directory
pub const STATE_FILE_NAME: &str = "tailscaled.state";

/// Name of the AdGuard Home config file kept inside the config directory
pub const FILTER_CONFIG_FILE_NAME: &str = "AdGuardHome.yaml";

/// Immutable snapshot of everything the supervisor needs
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Base directory for all persistent data (`DATA_DIR`)
    pub data_dir: PathBuf,

    /// tailscaled state directory (`TS_STATE_DIR`)
    pub state_dir: PathBuf,

    /// tailscaled control socket (`TS_SOCKET`)
    pub socket: PathBuf,

    /// Run tailscaled with userspace networking (`TS_USERSPACE`)
    pub userspace: bool,

    /// Skip `tailscale up` when already logged in (`TS_AUTH_ONCE`)
    pub auth_once: bool,

    /// Value for `--accept-dns` (`TS_ACCEPT_DNS`)
    pub accept_dns: bool,

    /// Pre-authorized key (`TS_AUTHKEY`), never serialized in clear
    #[serde(serialize_with = "serialize_redacted")]
    pub auth_key: Option<SecretString>,

    /// `TS_HOSTNAME`
    pub hostname: Option<String>,

    /// Comma-separated routes to advertise (`TS_ROUTES`)
    pub routes: Option<String>,

    /// `TS_SOCKS5_SERVER`
    pub socks5_server: Option<String>,

    /// `TS_OUTBOUND_HTTP_PROXY_LISTEN`
    pub http_proxy_listen: Option<String>,

    /// AdGuard Home work directory (`ADGUARDHOME_WORK_DIR`)
    pub filter_work_dir: PathBuf,

    /// AdGuard Home config directory (`ADGUARDHOME_CONF_DIR`)
    pub filter_conf_dir: PathBuf,

    /// Extra arguments appended to the tailscaled command line
    pub daemon_extra_args: Vec<String>,

    /// Arguments for `tailscale set`
    pub set_extra_args: Vec<String>,

    /// Recognized variables this image does not support
    pub legacy: LegacySettings,
}

/// Values that are accepted but deliberately ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacySettings {
    /// `TS_DEST_IP`: needs iptables, which the image does not ship
    pub dest_ip: Option<String>,

    /// `TS_KUBE_SECRET`: Kubernetes secret state storage
    pub kube_secret: Option<String>,
}

impl LegacySettings {
    /// Warning messages for every legacy value that was set
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(dest_ip) = &self.dest_ip {
            warnings.push(format!(
                "TS_DEST_IP is not supported in this image (no iptables). Ignoring value: {:?}",
                dest_ip
            ));
        }
        if let Some(secret) = &self.kube_secret {
            warnings.push(format!(
                "TS_KUBE_SECRET is not implemented in this image. Mount a Kubernetes Secret to TS_STATE_DIR instead. Ignoring value: {:?}",
                secret
            ));
        }
        warnings
    }
}

impl ResolvedConfig {
    /// Resolve configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup
    ///
    /// Never fails: absent or malformed values degrade to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: PathBuf| -> PathBuf {
            non_empty(lookup(key)).map(PathBuf::from).unwrap_or(default)
        };
        let flag = |key: &str, default: bool| parse_bool(lookup(key).as_deref(), default);
        let unquoted = |key: &str| non_empty(lookup(key).map(|v| unquote(&v).to_string()));
        let arg_list = |key: &str| lookup(key).map(|v| split_args(&v)).unwrap_or_default();

        let data_dir = string_or("DATA_DIR", PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            state_dir: string_or("TS_STATE_DIR", data_dir.join("tailscale")),
            socket: string_or("TS_SOCKET", PathBuf::from(DEFAULT_SOCKET)),
            userspace: flag("TS_USERSPACE", DEFAULT_USERSPACE),
            auth_once: flag("TS_AUTH_ONCE", DEFAULT_AUTH_ONCE),
            accept_dns: flag("TS_ACCEPT_DNS", DEFAULT_ACCEPT_DNS),
            auth_key: unquoted("TS_AUTHKEY").map(SecretString::new),
            hostname: unquoted("TS_HOSTNAME"),
            routes: unquoted("TS_ROUTES"),
            socks5_server: unquoted("TS_SOCKS5_SERVER"),
            http_proxy_listen: unquoted("TS_OUTBOUND_HTTP_PROXY_LISTEN"),
            filter_work_dir: string_or("ADGUARDHOME_WORK_DIR", data_dir.join("adguard").join("work")),
            filter_conf_dir: string_or("ADGUARDHOME_CONF_DIR", data_dir.join("adguard").join("conf")),
            daemon_extra_args: arg_list("TS_TAILSCALED_EXTRA_ARGS"),
            set_extra_args: arg_list("TS_EXTRA_ARGS"),
            legacy: LegacySettings {
                dest_ip: unquoted("TS_DEST_IP"),
                kube_secret: unquoted("TS_KUBE_SECRET"),
            },
            data_dir,
        }
    }

    /// Path of the tailscaled state file
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    /// Path of the AdGuard Home config file
    pub fn filter_config_file(&self) -> PathBuf {
        self.filter_conf_dir.join(FILTER_CONFIG_FILE_NAME)
    }

    /// Directory holding the control socket
    pub fn socket_dir(&self) -> &Path {
        self.socket
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/var/run/tailscale"))
    }

    /// Directories to create before anything starts, with their modes
    pub fn required_dirs(&self) -> Vec<(PathBuf, u32)> {
        vec![
            (self.state_dir.clone(), 0o700),
            (self.socket_dir().to_path_buf(), 0o755),
            (self.filter_work_dir.clone(), 0o700),
            (self.filter_conf_dir.clone(), 0o700),
        ]
    }

    /// The auth key in clear, for the one place that must pass it on
    pub fn auth_key(&self) -> Option<&str> {
        self.auth_key.as_ref().map(|k| k.expose_secret().as_str())
    }
}

fn serialize_redacted<S: Serializer>(
    value: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some("[redacted]"),
        None => serializer.serialize_none(),
    }
}
