// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VcrError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Listen address, e.g. 0.0.0.0:8000. A `tcp://` prefix is accepted.
    pub listen: String,

    /// Directory holding one cassette file per cassette name.
    pub cassette_path: PathBuf,

    /// Redirect hooks to enable while intercepting, by registry identifier.
    pub hooks: Vec<String>,

    /// Bounded wait for the proxy worker's readiness handshake.
    pub startup_timeout_ms: u64,

    /// Bounded wait for the proxy worker to terminate.
    pub shutdown_timeout_ms: u64,

    /// Idle timeout while reading a request from an intercepted connection.
    pub read_timeout_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cassette_path() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_hooks() -> Vec<String> {
    vec![crate::hooks::ENV_PROXY_HOOK.to_string()]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cassette_path: default_cassette_path(),
            hooks: default_hooks(),
            startup_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub forwarder: ForwarderConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing keys take their defaults:
    ///
    /// [general]
    /// listen = "0.0.0.0:8000"
    /// cassette_path = "fixtures"
    /// hooks = ["env_proxy"]
    ///
    /// [forwarder]
    /// connect_timeout_ms = 5000
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Resolve the listen address, stripping an optional `tcp://` scheme.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let raw = self.general.listen.trim();
        let raw = raw.strip_prefix("tcp://").unwrap_or(raw);
        if let Ok(addr) = raw.parse::<SocketAddr>() {
            return Ok(addr);
        }
        raw.to_socket_addrs()
            .map_err(|e| VcrError::Config(format!("invalid listen address {raw:?}: {e}")))?
            .next()
            .ok_or_else(|| VcrError::Config(format!("listen address {raw:?} did not resolve")))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.general.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.general.shutdown_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.general.read_timeout_ms)
    }
}

impl ForwarderConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::fs;
    use uuid::Uuid;

    #[test]
    fn defaults_listen_on_port_8000_with_fixtures() {
        let cfg = Config::default();
        assert_eq!(cfg.general.listen, "0.0.0.0:8000");
        assert_eq!(cfg.general.cassette_path, PathBuf::from("fixtures"));
        assert_eq!(cfg.general.hooks, vec!["env_proxy".to_string()]);
    }

    #[rstest]
    #[case("0.0.0.0:8000", "0.0.0.0:8000")]
    #[case("tcp://0.0.0.0:8000", "0.0.0.0:8000")]
    #[case(" 127.0.0.1:0 ", "127.0.0.1:0")]
    #[case("[::1]:9000", "[::1]:9000")]
    fn listen_addr_cases(#[case] listen: &str, #[case] expected: &str) {
        let mut cfg = Config::default();
        cfg.general.listen = listen.to_string();
        let expected: SocketAddr = expected.parse().expect("valid expectation");
        assert_eq!(cfg.listen_addr().expect("resolve"), expected);
    }

    #[test]
    fn listen_addr_rejects_garbage() {
        let mut cfg = Config::default();
        cfg.general.listen = "not an address".into();
        assert!(matches!(cfg.listen_addr(), Err(VcrError::Config(_))));
    }

    #[tokio::test]
    async fn load_toml_file() -> anyhow::Result<()> {
        let tmp = std::env::temp_dir().join(format!("vcr_cfg_test_{}.toml", Uuid::new_v4()));
        let toml = r#"[general]
listen = "tcp://127.0.0.1:8123"
cassette_path = "my-fixtures"
hooks = []
startup_timeout_ms = 250

[forwarder]
read_timeout_ms = 1500
"#;
        fs::write(&tmp, toml).await?;
        let cfg = Config::load_from_path(&tmp).await?;
        assert_eq!(cfg.listen_addr()?, "127.0.0.1:8123".parse()?);
        assert_eq!(cfg.general.cassette_path, PathBuf::from("my-fixtures"));
        assert!(cfg.general.hooks.is_empty());
        assert_eq!(cfg.startup_timeout(), Duration::from_millis(250));
        // untouched keys keep their defaults
        assert_eq!(cfg.general.shutdown_timeout_ms, 5_000);
        assert_eq!(cfg.forwarder.connect_timeout_ms, 5_000);
        assert_eq!(cfg.forwarder.read_timeout(), Duration::from_millis(1500));
        fs::remove_file(&tmp).await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_empty_file_uses_defaults() -> anyhow::Result<()> {
        let tmp = std::env::temp_dir().join(format!("vcr_cfg_empty_{}.toml", Uuid::new_v4()));
        fs::write(&tmp, "").await?;
        let cfg = Config::load_from_path(&tmp).await?;
        assert_eq!(cfg.general.listen, "0.0.0.0:8000");
        fs::remove_file(&tmp).await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_missing_file_errors() {
        let tmp = std::env::temp_dir().join(format!("vcr_cfg_missing_{}.toml", Uuid::new_v4()));
        assert!(Config::load_from_path(&tmp).await.is_err());
    }
}
