// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Real-network leg of the record path.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::ForwarderConfig;
use crate::error::{Result, VcrError};
use crate::request::Request;
use crate::response::{complete_len, Response};

pub type ForwardFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;

/// Sends a request to its real destination and returns the reply.
///
/// Implementations do not retry; a failure is reported once as
/// [`VcrError::Network`].
pub trait Forwarder: Send + Sync {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a>;
}

/// Plain TCP forwarder: writes the request bytes verbatim and reads until the
/// response is complete according to its framing, or the server closes.
#[derive(Debug, Clone)]
pub struct TcpForwarder {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for TcpForwarder {
    fn default() -> Self {
        Self::from_config(&ForwarderConfig::default())
    }
}

impl TcpForwarder {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    pub fn from_config(cfg: &ForwarderConfig) -> Self {
        Self::new(cfg.connect_timeout(), cfg.read_timeout())
    }

    async fn exchange(&self, request: &Request) -> io::Result<Response> {
        let mut stream = timeout(
            self.connect_timeout,
            TcpStream::connect((request.host(), request.port())),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        trace!(target = %request.authority(), "connected upstream");

        stream.write_all(request.raw()).await?;
        stream.flush().await?;

        let head_request = request.method().eq_ignore_ascii_case("HEAD");
        let mut buf = BytesMut::with_capacity(16 * 1024);
        loop {
            let n = timeout(self.read_timeout, stream.read_buf(&mut buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
            if n == 0 {
                break;
            }
            match complete_len(&buf, head_request) {
                Ok(Some(len)) => {
                    buf.truncate(len);
                    break;
                }
                Ok(None) => continue,
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }

        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed without responding",
            ));
        }
        debug!(target = %request.authority(), bytes = buf.len(), "upstream response received");
        Response::parse(buf.freeze()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Forwarder for TcpForwarder {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a> {
        Box::pin(async move {
            self.exchange(request)
                .await
                .map_err(|source| VcrError::Network {
                    host: request.host().to_string(),
                    port: request.port(),
                    source,
                })
        })
    }
}
