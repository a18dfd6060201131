// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use vcr_proxy::config::Config;
use vcr_proxy::controller::Controller;

/// Toy origin server. Every response body is `hello <n>` where `n` counts
/// the requests it has served.
pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Upstream {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let body = format!("hello {n}");
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nX-Hit: {n}\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(reply.as_bytes()).await;
                });
            }
        });
        Ok(Self { addr, hits, task })
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Stop accepting; the port is closed once this returns.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Write `raw` to `addr` and read the reply until the server closes.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(raw).await?;
    let mut reply = Vec::new();
    timeout(Duration::from_secs(10), stream.read_to_end(&mut reply)).await??;
    Ok(reply)
}

pub fn get(target: &str, host: SocketAddr) -> Vec<u8> {
    format!("GET {target} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: vcr-test\r\n\r\n").into_bytes()
}

pub fn temp_cassette_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vcr_integ_{prefix}_{}", uuid::Uuid::new_v4()))
}

/// Controller on an ephemeral loopback port with no redirect hooks.
pub fn controller(cassettes: &Path) -> anyhow::Result<Controller> {
    let mut cfg = Config::default();
    cfg.general.listen = "127.0.0.1:0".into();
    cfg.general.cassette_path = cassettes.to_path_buf();
    cfg.general.hooks.clear();
    cfg.forwarder.connect_timeout_ms = 1_000;
    cfg.forwarder.read_timeout_ms = 2_000;
    Ok(Controller::new(&cfg)?)
}

pub fn body(reply: &[u8]) -> &[u8] {
    reply
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| &reply[i + 4..])
        .unwrap_or_default()
}
