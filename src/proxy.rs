// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Proxy service: a listener owned by an isolated worker thread.
//!
//! The worker runs its own single-threaded tokio runtime. The controller
//! side talks to it only through three channels: a readiness handshake
//! carrying the bound address (or the bind error), a shutdown signal, and a
//! completion notice used to bound the wait in [`ProxyService::stop`].

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{ConnectionHandler, ConnectionMetadata};
use crate::error::{Result, VcrError};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Worker {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    done: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

pub struct ProxyService {
    listen: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    state: ProxyState,
    worker: Option<Worker>,
}

impl ProxyService {
    pub fn new(listen: SocketAddr, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            listen,
            handler,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: ProxyState::Stopped,
            worker: None,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Current state. A worker that died on its own reports `Stopped`.
    pub fn state(&self) -> ProxyState {
        match (&self.worker, self.state) {
            (Some(worker), ProxyState::Running) if worker.is_finished() => ProxyState::Stopped,
            (_, state) => state,
        }
    }

    /// Address the worker is actually listening on, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state() {
            ProxyState::Running => self.worker.as_ref().map(|w| w.addr),
            _ => None,
        }
    }

    /// Spawn the worker and block until it is listening.
    ///
    /// Returns the bound address. Calling `start` while running returns the
    /// current address without spawning anything.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.state() == ProxyState::Running {
            if let Some(worker) = &self.worker {
                return Ok(worker.addr);
            }
        }
        // reap a worker that died on its own
        self.stop();

        self.state = ProxyState::Starting;
        let (ready_tx, ready_rx) = mpsc::sync_channel::<io::Result<SocketAddr>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let listen = self.listen;
        let handler = self.handler.clone();
        let thread = std::thread::Builder::new()
            .name("vcr-proxy".into())
            .spawn(move || run_worker(listen, handler, ready_tx, shutdown_rx, done_tx))
            .map_err(|e| {
                self.state = ProxyState::Stopped;
                VcrError::Startup(format!("cannot spawn proxy worker: {e}"))
            })?;

        let mut worker = Worker {
            addr: listen,
            shutdown: Some(shutdown_tx),
            done: done_rx,
            thread: Some(thread),
        };

        match ready_rx.recv_timeout(self.startup_timeout) {
            Ok(Ok(addr)) => {
                worker.addr = addr;
                self.worker = Some(worker);
                self.state = ProxyState::Running;
                info!(%addr, "proxy running");
                Ok(addr)
            }
            Ok(Err(e)) => {
                self.worker = Some(worker);
                self.stop();
                Err(VcrError::Startup(format!("cannot listen on {listen}: {e}")))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.worker = Some(worker);
                self.stop();
                Err(VcrError::Startup(format!(
                    "proxy worker not ready after {}ms",
                    self.startup_timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = worker.thread.take() {
                    let _ = thread.join();
                }
                self.state = ProxyState::Stopped;
                Err(VcrError::Startup(
                    "proxy worker exited before signalling readiness".into(),
                ))
            }
        }
    }

    /// Signal the worker to stop and wait (bounded) for it to finish.
    ///
    /// A no-op when nothing is running; never fails.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            self.state = ProxyState::Stopped;
            return;
        };
        self.state = ProxyState::Stopping;
        if let Some(shutdown) = worker.shutdown.take() {
            let _ = shutdown.send(());
        }

        match worker.done.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = worker.thread.take() {
                    if thread.join().is_err() {
                        warn!("proxy worker panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "proxy worker did not stop in time, detaching"
                );
            }
        }
        self.state = ProxyState::Stopped;
        debug!(addr = %worker.addr, "proxy stopped");
    }
}

impl Drop for ProxyService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    listen: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    ready: mpsc::SyncSender<io::Result<SocketAddr>>,
    shutdown: oneshot::Receiver<()>,
    done: mpsc::Sender<()>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::bind(listen).await {
            Ok(l) => l,
            Err(e) => {
                error!(%listen, error = %e, "bind failed");
                let _ = ready.send(Err(e));
                return;
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(addr)).is_err() {
            // the controller stopped waiting
            return;
        }
        info!(%addr, "listening");
        accept_loop(listener, handler, shutdown).await;
    });

    // in-flight connections are dropped with the runtime
    drop(runtime);
    let _ = done.send(());
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn = ConnectionMetadata::new(peer);
                    trace!(conn = %conn.id, %peer, "accepted connection");
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(stream, conn).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::HandlerFuture;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Replies `hello <n>`; panics when the client sends `panic`.
    #[derive(Default)]
    struct Greeter {
        seen: AtomicUsize,
    }

    impl ConnectionHandler for Greeter {
        fn handle<'a>(&'a self, mut stream: TcpStream, _conn: ConnectionMetadata) -> HandlerFuture<'a> {
            Box::pin(async move {
                let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
                let mut buf = [0u8; 64];
                let read = stream.read(&mut buf).await.unwrap_or(0);
                if buf[..read].starts_with(b"panic") {
                    panic!("handler blew up");
                }
                let _ = stream.write_all(format!("hello {n}").as_bytes()).await;
                let _ = stream.shutdown().await;
            })
        }
    }

    fn service() -> ProxyService {
        let listen = "127.0.0.1:0".parse().expect("valid addr");
        ProxyService::new(listen, Arc::new(Greeter::default()))
            .with_startup_timeout(Duration::from_secs(2))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    fn talk(addr: SocketAddr, payload: &[u8]) -> io::Result<String> {
        let mut s = std::net::TcpStream::connect(addr)?;
        s.set_read_timeout(Some(Duration::from_secs(2)))?;
        s.write_all(payload)?;
        let mut out = String::new();
        s.read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut proxy = service();
        proxy.stop();
        proxy.stop();
        assert_eq!(proxy.state(), ProxyState::Stopped);
        assert!(proxy.local_addr().is_none());
    }

    #[test]
    fn start_serves_until_stopped() -> anyhow::Result<()> {
        let mut proxy = service();
        let addr = proxy.start()?;
        assert_ne!(addr.port(), 0);
        assert_eq!(proxy.state(), ProxyState::Running);
        assert_eq!(proxy.local_addr(), Some(addr));
        assert_eq!(talk(addr, b"hi")?, "hello 1");

        // starting again keeps the same worker
        assert_eq!(proxy.start()?, addr);

        proxy.stop();
        assert_eq!(proxy.state(), ProxyState::Stopped);
        assert!(std::net::TcpStream::connect(addr).is_err());
        proxy.stop();
        assert_eq!(proxy.state(), ProxyState::Stopped);
        Ok(())
    }

    #[test]
    fn bind_conflict_is_startup_failure() -> anyhow::Result<()> {
        let taken = std::net::TcpListener::bind("127.0.0.1:0")?;
        let mut proxy = ProxyService::new(taken.local_addr()?, Arc::new(Greeter::default()));
        let err = proxy.start().unwrap_err();
        assert!(matches!(err, VcrError::Startup(_)));
        assert_eq!(proxy.state(), ProxyState::Stopped);
        proxy.stop();
        Ok(())
    }

    #[test]
    fn readiness_deadline_is_startup_failure() {
        // a zero deadline is almost always missed; retry so an occasional
        // fast worker does not make the case flaky
        let mut timed_out = false;
        for _ in 0..20 {
            let mut proxy = service().with_startup_timeout(Duration::ZERO);
            match proxy.start() {
                Err(VcrError::Startup(msg)) => {
                    assert!(msg.contains("not ready"), "{msg}");
                    assert_eq!(proxy.state(), ProxyState::Stopped);
                    assert!(proxy.local_addr().is_none());
                    timed_out = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => proxy.stop(),
            }
        }
        assert!(timed_out);
    }

    #[test]
    fn failing_connection_does_not_stop_the_loop() -> anyhow::Result<()> {
        let mut proxy = service();
        let addr = proxy.start()?;
        // the handler panics; the client just sees the connection close
        let _ = talk(addr, b"panic");
        assert_eq!(talk(addr, b"hi")?, "hello 2");
        assert_eq!(proxy.state(), ProxyState::Running);
        proxy.stop();
        Ok(())
    }

    #[test]
    fn restart_after_stop() -> anyhow::Result<()> {
        let mut proxy = service();
        proxy.start()?;
        proxy.stop();
        let addr = proxy.start()?;
        assert!(talk(addr, b"again")?.starts_with("hello"));
        Ok(())
    }
}
