// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vcr_proxy::config::Config;
use vcr_proxy::controller::Controller;
use vcr_proxy::store::FileStore;

#[derive(Parser, Debug)]
#[command(name = "vcr-proxy", version, about = "Record/playback HTTP proxy for tests")]
struct Args {
    /// Optional config TOML path
    #[arg(long)]
    config: Option<String>,

    /// Listen address, e.g. 127.0.0.1:8000 (overrides the config file)
    #[arg(long)]
    listen: Option<String>,

    /// Directory holding cassette files (overrides the config file)
    #[arg(long)]
    cassettes: Option<PathBuf>,

    /// Cassette to insert at startup
    #[arg(long)]
    cassette: Option<String>,

    /// Print the cassettes found in the cassette directory and exit
    #[arg(long)]
    list: bool,
}

async fn load_config(args: &Args) -> Config {
    let mut cfg = if let Some(ref p) = args.config {
        Config::load_from_path(p).await.unwrap_or_else(|e| {
            warn!(%p, %e, "failed to load config, using defaults");
            Config::default()
        })
    } else {
        Config::default()
    };
    if let Some(ref listen) = args.listen {
        cfg.general.listen = listen.clone();
    }
    if let Some(ref dir) = args.cassettes {
        cfg.general.cassette_path = dir.clone();
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let cfg = load_config(&args).await;

    if args.list {
        let store = FileStore::new(&cfg.general.cassette_path);
        for name in store.list().await? {
            println!("{name}");
        }
        return Ok(());
    }

    // start() blocks until the worker is listening
    let cassette = args.cassette.clone();
    let controller = tokio::task::spawn_blocking(move || -> vcr_proxy::error::Result<Controller> {
        let mut controller = Controller::new(&cfg)?;
        if let Some(name) = cassette {
            controller.insert_cassette(&name)?;
        }
        controller.turn_on()?;
        Ok(controller)
    })
    .await??;

    if let Some(addr) = controller.local_addr() {
        info!(%addr, cassette = ?controller.active_cassette(), "ready, press Ctrl-C to stop");
    }

    signal::ctrl_c().await?;
    info!("shutting down");
    tokio::task::spawn_blocking(move || {
        let mut controller = controller;
        controller.turn_off();
    })
    .await?;

    Ok(())
}
