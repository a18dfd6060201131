// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Interception controller: cassette selection, proxy lifecycle and
//! redirect hooks behind one owner.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connection::CassetteHandler;
use crate::engine::{ActiveCassette, CassetteEngine};
use crate::error::Result;
use crate::forwarder::{Forwarder, TcpForwarder};
use crate::hooks::{HookContext, HookFactory, HookRegistry, RedirectHook};
use crate::proxy::{ProxyService, ProxyState};
use crate::store::{validate_name, FileStore, InteractionStore};

/// Process-wide "interception active" flag. Only the controller that
/// created it can change it.
#[derive(Debug, Default)]
pub struct InterceptionState {
    on: Arc<AtomicBool>,
}

impl InterceptionState {
    fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// A read-only handle for collaborators.
    pub fn status(&self) -> InterceptionStatus {
        InterceptionStatus {
            on: self.on.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterceptionStatus {
    on: Arc<AtomicBool>,
}

impl InterceptionStatus {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

pub struct Controller {
    state: InterceptionState,
    selection: watch::Sender<Option<ActiveCassette>>,
    sessions: u64,
    proxy: ProxyService,
    store: Arc<dyn InteractionStore>,
    hook_factories: Vec<(String, HookFactory)>,
    hooks: Vec<Box<dyn RedirectHook>>,
}

impl Controller {
    /// Controller with the file store, TCP forwarder and built-in hooks.
    pub fn new(config: &Config) -> Result<Self> {
        let store = Arc::new(FileStore::new(&config.general.cassette_path));
        let forwarder = Arc::new(TcpForwarder::from_config(&config.forwarder));
        Self::with_parts(config, store, forwarder, &HookRegistry::with_defaults())
    }

    /// Controller with explicit collaborators. Hook identifiers from the
    /// configuration are resolved against `registry` here.
    pub fn with_parts(
        config: &Config,
        store: Arc<dyn InteractionStore>,
        forwarder: Arc<dyn Forwarder>,
        registry: &HookRegistry,
    ) -> Result<Self> {
        let listen = config.listen_addr()?;
        let hook_factories = registry.resolve(&config.general.hooks)?;

        let engine = Arc::new(CassetteEngine::new(store.clone(), forwarder));
        let (selection, selected) = watch::channel(None);
        let handler = Arc::new(CassetteHandler::new(engine, selected, config.read_timeout()));
        let proxy = ProxyService::new(listen, handler)
            .with_startup_timeout(config.startup_timeout())
            .with_shutdown_timeout(config.shutdown_timeout());

        Ok(Self {
            state: InterceptionState::default(),
            selection,
            sessions: 0,
            proxy,
            store,
            hook_factories,
            hooks: Vec::new(),
        })
    }

    /// Select the cassette for subsequent connections. Inserting a cassette
    /// again, even the same one, restarts its replay order.
    pub fn insert_cassette(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.sessions += 1;
        self.selection
            .send_replace(Some(ActiveCassette::new(name, self.sessions)));
        info!(cassette = %name, "cassette inserted");
        Ok(())
    }

    pub fn eject_cassette(&mut self) {
        if let Some(previous) = self.selection.send_replace(None) {
            info!(cassette = %previous.name(), "cassette ejected");
        }
    }

    pub fn active_cassette(&self) -> Option<String> {
        self.selection.borrow().as_ref().map(|a| a.name().to_string())
    }

    /// Start the proxy, then enable every configured hook.
    ///
    /// If a hook fails, hooks enabled so far are disabled again and the
    /// proxy is stopped before the error is returned.
    pub fn turn_on(&mut self) -> Result<SocketAddr> {
        if self.state.is_on() {
            if let Some(addr) = self.proxy.local_addr() {
                return Ok(addr);
            }
            warn!("proxy worker gone while interception was on, restarting");
            self.turn_off();
        }

        let addr = self.proxy.start()?;
        let ctx = HookContext::new(addr);
        for (id, factory) in self.hook_factories.clone() {
            let enabled = factory(&ctx).and_then(|mut hook| {
                hook.enable()?;
                Ok(hook)
            });
            match enabled {
                Ok(hook) => self.hooks.push(hook),
                Err(e) => {
                    error!(hook = %id, error = %e, "failed to enable hook");
                    self.disable_hooks();
                    self.proxy.stop();
                    return Err(e);
                }
            }
        }

        self.state.set(true);
        info!(%addr, url = %ctx.proxy_url, hooks = self.hooks.len(), "interception on");
        Ok(addr)
    }

    /// Disable hooks, stop the proxy and eject the cassette. Safe to call
    /// any number of times.
    pub fn turn_off(&mut self) {
        self.disable_hooks();
        self.proxy.stop();
        self.eject_cassette();
        if self.state.is_on() {
            self.state.set(false);
            info!("interception off");
        }
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on()
    }

    pub fn status(&self) -> InterceptionStatus {
        self.state.status()
    }

    pub fn proxy_state(&self) -> ProxyState {
        self.proxy.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.proxy.local_addr()
    }

    pub fn store(&self) -> &Arc<dyn InteractionStore> {
        &self.store
    }

    fn disable_hooks(&mut self) {
        while let Some(mut hook) = self.hooks.pop() {
            if let Err(e) = hook.disable() {
                warn!(hook = %hook.name(), error = %e, "failed to disable hook");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.turn_off();
    }
}
