//! Process configuration.
//!
//! Options are accepted on the command line or environment (teacher
//! precedent: `work/runtime/main.rs`'s `clap::Parser` `Args`), except
//! `LXDRemoteConfig`'s fallback chain, which `clap` cannot express as a
//! single default and is resolved explicitly in [`Config::resolve`].

use std::env;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::network::NetworkPluginKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "lxed", about = "CRI server core for an LXD-style container backend")]
pub struct Args {
    /// Unix-domain socket on which to serve the CRI `RuntimeService`.
    #[arg(long, env = "LXE_SOCKET", default_value = "/var/run/lxe.sock")]
    pub socket: PathBuf,

    /// Path to the LXD client's config file. Empty means "resolve it".
    #[arg(long = "lxd-remote-config", env = "LXDRemoteConfig", default_value = "")]
    pub lxd_remote_config: String,

    /// Profiles attached to every container this runtime creates.
    #[arg(long = "lxd-profiles", env = "LXDProfiles", value_delimiter = ',')]
    pub lxd_profiles: Vec<String>,

    /// Address the streaming server listens on.
    #[arg(
        long = "streaming-server-endpoint",
        env = "LXEStreamingServerEndpoint",
        default_value = "0.0.0.0"
    )]
    pub streaming_server_endpoint: String,

    /// Port the streaming server listens on.
    #[arg(long = "streaming-port", env = "LXEStreamingPort", default_value_t = 10250)]
    pub streaming_port: u16,

    /// Raw-lxc include file used when a sandbox's network mode is `host`.
    #[arg(
        long = "hostnetwork-file",
        env = "LXEHostnetworkFile",
        default_value = "/etc/lxe/hostnetwork.conf"
    )]
    pub hostnetwork_file: String,

    /// `default` (bridged) or `cni`.
    #[arg(long = "network-plugin", env = "LXENetworkPlugin", default_value = "default")]
    pub network_plugin: String,
}

impl Args {
    pub fn network_plugin_kind(&self) -> crate::error::Result<NetworkPluginKind> {
        match self.network_plugin.as_str() {
            "default" => Ok(NetworkPluginKind::Bridged),
            "cni" => Ok(NetworkPluginKind::Cni),
            other => Err(crate::error::Error::UnknownNetworkPlugin(other.to_string())),
        }
    }
}

/// The subset of an `lxc`/`lxd` client `config.yml` this core needs: the
/// address of the default remote.
#[derive(Debug, Deserialize, Default)]
struct LxcClientConfig {
    #[serde(rename = "default-remote")]
    default_remote: Option<String>,
    #[serde(default)]
    remotes: std::collections::HashMap<String, LxcRemote>,
}

#[derive(Debug, Deserialize, Default)]
struct LxcRemote {
    addr: Option<String>,
}

/// Resolved location of the LXD daemon this core talks to: either a local
/// Unix socket path or an `https://` remote address, per spec §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LxdRemote {
    UnixSocket(PathBuf),
    Https(String),
}

impl Default for LxdRemote {
    fn default() -> Self {
        LxdRemote::UnixSocket(default_lxd_socket_path())
    }
}

/// Resolve `LXDRemoteConfig`'s path per spec §6:
/// explicit value, else `$LXD_CONF`, else `$HOME/.config/lxc/config.yml`,
/// else the current user's home directory joined with the same suffix.
pub fn resolve_lxd_remote_config_path(explicit: &str) -> Option<PathBuf> {
    if !explicit.is_empty() {
        return Some(PathBuf::from(explicit));
    }
    if let Ok(from_env) = env::var("LXD_CONF") {
        if !from_env.is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }
    home_dir().map(|home| home.join(".config/lxc/config.yml"))
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

fn default_lxd_socket_path() -> PathBuf {
    PathBuf::from("/var/lib/lxd/unix.socket")
}

/// Read and parse the resolved config file (if any), falling back to the
/// default local Unix socket when the file is absent or lists no default
/// remote.
pub fn resolve_lxd_remote(explicit_config_path: &str) -> LxdRemote {
    let Some(path) = resolve_lxd_remote_config_path(explicit_config_path) else {
        return LxdRemote::default();
    };
    load_lxd_remote(&path).unwrap_or_default()
}

fn load_lxd_remote(path: &Path) -> Option<LxdRemote> {
    let contents = std::fs::read_to_string(path).ok()?;
    let parsed: LxcClientConfig = serde_yaml::from_str(&contents).ok()?;
    let remote_name = parsed.default_remote?;
    let remote = parsed.remotes.get(&remote_name)?;
    let addr = remote.addr.as_ref()?;
    Some(if let Some(stripped) = addr.strip_prefix("unix:") {
        LxdRemote::UnixSocket(PathBuf::from(stripped))
    } else {
        LxdRemote::Https(addr.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            resolve_lxd_remote_config_path("/explicit/config.yml"),
            Some(PathBuf::from("/explicit/config.yml"))
        );
    }

    #[test]
    fn parses_unix_socket_remote() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            "default-remote: local\nremotes:\n  local:\n    addr: unix:/custom/lxd.socket\n",
        )
        .unwrap();

        let remote = load_lxd_remote(&config_path).unwrap();
        assert_eq!(remote, LxdRemote::UnixSocket(PathBuf::from("/custom/lxd.socket")));
    }

    #[test]
    fn parses_https_remote() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            "default-remote: cluster\nremotes:\n  cluster:\n    addr: https://10.0.0.1:8443\n",
        )
        .unwrap();

        let remote = load_lxd_remote(&config_path).unwrap();
        assert_eq!(remote, LxdRemote::Https(String::from("https://10.0.0.1:8443")));
    }
}
