// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Redirect hooks: whatever makes the program under test send its traffic
//! to the proxy. Hooks are looked up by identifier in a [`HookRegistry`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, VcrError};

/// Identifier of the built-in [`EnvProxyHook`].
pub const ENV_PROXY_HOOK: &str = "env_proxy";

const PROXY_VARS: [&str; 4] = ["HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy"];

/// What a hook needs to know about the running proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub proxy_addr: SocketAddr,
    pub proxy_url: String,
}

impl HookContext {
    pub fn new(proxy_addr: SocketAddr) -> Self {
        Self {
            proxy_addr,
            proxy_url: advertised_url(proxy_addr),
        }
    }
}

/// `http://host:port` for a bound address; unspecified addresses are
/// advertised as loopback.
pub fn advertised_url(addr: SocketAddr) -> String {
    let mut addr = addr;
    if addr.ip().is_unspecified() {
        let loopback = match addr {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        addr.set_ip(loopback);
    }
    format!("http://{addr}")
}

pub trait RedirectHook: Send {
    fn name(&self) -> &str;
    fn enable(&mut self) -> Result<()>;
    fn disable(&mut self) -> Result<()>;
}

pub type HookFactory = Arc<dyn Fn(&HookContext) -> Result<Box<dyn RedirectHook>> + Send + Sync>;

/// Maps hook identifiers to factories.
#[derive(Clone, Default)]
pub struct HookRegistry {
    factories: BTreeMap<String, HookFactory>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in hooks registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ENV_PROXY_HOOK, |ctx: &HookContext| {
            Ok(Box::new(EnvProxyHook::new(&ctx.proxy_url)) as Box<dyn RedirectHook>)
        });
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&HookContext) -> Result<Box<dyn RedirectHook>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolve identifiers to factories; unknown identifiers are an error.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<(String, HookFactory)>> {
        ids.iter()
            .map(|id| {
                self.factories
                    .get(id)
                    .map(|f| (id.clone(), f.clone()))
                    .ok_or_else(|| {
                        let known: Vec<&str> = self.ids().collect();
                        VcrError::Config(format!(
                            "unknown hook {id:?} (known: {})",
                            known.join(", ")
                        ))
                    })
            })
            .collect()
    }
}

/// Points the standard proxy environment variables at the proxy and
/// restores their previous values on disable.
pub struct EnvProxyHook {
    url: String,
    saved: Option<Vec<(&'static str, Option<String>)>>,
}

impl EnvProxyHook {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            saved: None,
        }
    }
}

impl RedirectHook for EnvProxyHook {
    fn name(&self) -> &str {
        ENV_PROXY_HOOK
    }

    fn enable(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        let saved = PROXY_VARS
            .iter()
            .map(|var| (*var, std::env::var(var).ok()))
            .collect();
        for var in PROXY_VARS {
            std::env::set_var(var, &self.url);
        }
        self.saved = Some(saved);
        debug!(url = %self.url, "proxy environment set");
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        for (var, previous) in saved {
            match previous {
                Some(value) => std::env::set_var(var, value),
                None => std::env::remove_var(var),
            }
        }
        debug!("proxy environment restored");
        Ok(())
    }
}
