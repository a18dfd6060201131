// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::VcrError;
use crate::forwarder::{ForwardFuture, Forwarder};
use crate::request::{extract, Request};
use crate::response::Response;

/// A unique, not yet created directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vcr_{prefix}_{}", uuid::Uuid::new_v4()))
}

/// Build a request for `url` (absolute-form, no body).
pub fn make_request(method: &str, url: &str) -> Request {
    extract(format!("{method} {url} HTTP/1.1\r\nAccept: */*\r\n\r\n").as_bytes())
        .expect("valid test request")
}

pub fn make_response(status: u16, body: &str) -> Response {
    Response::parse(format!(
        "HTTP/1.1 {status} Test\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    ))
    .expect("valid test response")
}

/// Create a test connection metadata with standard test address
pub fn make_test_conn() -> crate::connection::ConnectionMetadata {
    crate::connection::ConnectionMetadata::new(
        "127.0.0.1:12345".parse().expect("valid test address"),
    )
}

/// Forwarder double: answers from a queue of bodies (the last one repeats)
/// or fails every call when the queue is empty.
pub struct StubForwarder {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StubForwarder {
    pub fn replying(bodies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(bodies.iter().map(|b| b.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::replying(&[])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Forwarder for StubForwarder {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = {
            let mut replies = self.replies.lock().expect("stub lock");
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };
        Box::pin(async move {
            match body {
                Some(body) => Ok(make_response(200, &body)),
                None => Err(VcrError::Network {
                    host: request.host().to_string(),
                    port: request.port(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "stub refuses",
                    ),
                }),
            }
        })
    }
}
