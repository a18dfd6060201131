// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Per-connection handling: metadata and the pluggable handler the proxy
//! hands each accepted stream to.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::engine::{ActiveCassette, CassetteEngine};
use crate::error::{Result, VcrError};
use crate::request::read_request;
use crate::response::Response;

/// Metadata associated with an underlying TCP connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    pub established: Instant,
}

impl ConnectionMetadata {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            established: Instant::now(),
        }
    }
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Serves one accepted connection to completion. Failures are contained:
/// the future resolves to `()` whatever happens on the connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, stream: TcpStream, conn: ConnectionMetadata) -> HandlerFuture<'a>;
}

/// Reads one request, asks the engine for a response, writes it back and
/// closes the connection.
pub struct CassetteHandler {
    engine: Arc<CassetteEngine>,
    selection: watch::Receiver<Option<ActiveCassette>>,
    read_timeout: Duration,
}

impl CassetteHandler {
    pub fn new(
        engine: Arc<CassetteEngine>,
        selection: watch::Receiver<Option<ActiveCassette>>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            selection,
            read_timeout,
        }
    }

    async fn serve(&self, stream: &mut TcpStream, conn: &ConnectionMetadata) -> Result<Response> {
        let request = read_request(stream, self.read_timeout).await?;
        debug!(
            conn = %conn.id,
            method = %request.method(),
            target = %request.target(),
            host = %request.authority(),
            "request extracted"
        );
        let active = self.selection.borrow().clone();
        self.engine.handle(active.as_ref(), &request).await
    }
}

impl ConnectionHandler for CassetteHandler {
    fn handle<'a>(&'a self, mut stream: TcpStream, conn: ConnectionMetadata) -> HandlerFuture<'a> {
        Box::pin(async move {
            let reply = match self.serve(&mut stream, &conn).await {
                Ok(response) => response.into_bytes(),
                Err(e) => {
                    match &e {
                        VcrError::Parse(_) | VcrError::Network { .. } => {
                            warn!(conn = %conn.id, peer = %conn.remote_addr, error = %e, "connection failed")
                        }
                        _ => {
                            error!(conn = %conn.id, peer = %conn.remote_addr, error = %e, "connection failed")
                        }
                    }
                    Bytes::from(error_response(&e))
                }
            };

            if let Err(e) = stream.write_all(&reply).await {
                debug!(conn = %conn.id, error = %e, "failed to write reply");
            }
            let _ = stream.shutdown().await;
            debug!(
                conn = %conn.id,
                elapsed_ms = conn.established.elapsed().as_millis() as u64,
                "connection closed"
            );
        })
    }
}

/// Minimal response describing a contained failure to the intercepted client.
pub fn error_response(err: &VcrError) -> Vec<u8> {
    let (status, reason) = match err {
        VcrError::Parse(_) => (400, "Bad Request"),
        VcrError::Network { .. } => (502, "Bad Gateway"),
        _ => (500, "Internal Server Error"),
    };
    let body = format!("{err}\n");
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         X-Vcr-Error: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
        err.kind()
    )
    .into_bytes()
}
