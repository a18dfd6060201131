// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Request extraction from the raw bytes of an intercepted connection.
//!
//! The request line and header grammar is validated by `httparse`; the
//! target host comes from the CONNECT authority, an absolute-form target, or
//! the `Host` header, in that order. The exact bytes received are kept so the
//! record path can forward them untouched.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::ParseError;
use crate::http::{
    chunked_body_len, framing, BodyFraming, Headers, MAX_BODY_SIZE, MAX_HEADERS, MAX_HEAD_SIZE,
};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// A request as intercepted, immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredRequest", into = "StoredRequest")]
pub struct Request {
    method: String,
    target: String,
    host: String,
    port: u16,
    headers: Headers,
    body: Bytes,
    raw: Bytes,
}

/// What is still missing from a partially received request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    RequestLine,
    Head,
    Body { expected: usize, received: usize },
    ChunkedBody,
}

impl From<Missing> for ParseError {
    fn from(missing: Missing) -> Self {
        match missing {
            Missing::RequestLine => ParseError::NoRequestLine,
            Missing::Head => ParseError::TruncatedHead,
            Missing::Body { expected, received } => {
                ParseError::TruncatedBody { expected, received }
            }
            Missing::ChunkedBody => ParseError::TruncatedChunked,
        }
    }
}

#[derive(Debug)]
pub enum Parsed {
    Complete(Request),
    Partial(Missing),
}

impl Request {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request-target exactly as sent (origin, absolute or authority form).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Lower-cased host name or IP literal (IPv6 without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Message body as transmitted (chunked bodies are not decoded).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The complete request bytes as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Origin-form path and query, without fragment. CONNECT requests have none.
    pub fn path_and_query(&self) -> Option<&str> {
        if self.is_connect() {
            return None;
        }
        let target = strip_fragment(&self.target);
        let Some(rest) = strip_scheme(target) else {
            return Some(if target.is_empty() { "/" } else { target });
        };
        let path = rest
            .find(['/', '?'])
            .map(|i| &rest[i..])
            .unwrap_or_default();
        Some(if path.is_empty() { "/" } else { path })
    }

    /// Like [`Request::path_and_query`], but always starting with `/`.
    pub fn origin_form(&self) -> Option<String> {
        self.path_and_query().map(|p| {
            if p.starts_with('/') {
                p.to_string()
            } else {
                format!("/{p}")
            }
        })
    }
}

fn strip_fragment(target: &str) -> &str {
    target.split('#').next().unwrap_or_default()
}

/// The remainder after `http://` or `https://`, matched case-insensitively.
fn strip_scheme(target: &str) -> Option<&str> {
    ["http://", "https://"].iter().find_map(|scheme| {
        target
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &target[scheme.len()..])
    })
}

/// Try to parse a complete request from the start of `buf`.
pub fn parse(buf: &[u8]) -> Result<Parsed, ParseError> {
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(Parsed::Partial(Missing::RequestLine));
    }

    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_buf);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(ParseError::HeadTooLarge(MAX_HEAD_SIZE));
            }
            return Ok(Parsed::Partial(Missing::Head));
        }
        Err(httparse::Error::Token | httparse::Error::Version) => {
            return Err(ParseError::NoRequestLine)
        }
        Err(e) => return Err(ParseError::Malformed(e.to_string())),
    };
    if head_len > MAX_HEAD_SIZE {
        return Err(ParseError::HeadTooLarge(MAX_HEAD_SIZE));
    }

    let method = req.method.ok_or(ParseError::NoRequestLine)?.to_string();
    let target = req.path.ok_or(ParseError::NoRequestLine)?.to_string();
    let headers = Headers::from_httparse(req.headers);
    let (host, port) = resolve_target(&method, &target, &headers)?;

    let received = buf.len() - head_len;
    let body_len = if method.eq_ignore_ascii_case("CONNECT") {
        0
    } else {
        match framing(&headers, BodyFraming::Empty)? {
            BodyFraming::Empty | BodyFraming::UntilClose => 0,
            BodyFraming::Length(expected) if expected > MAX_BODY_SIZE => {
                return Err(ParseError::BodyTooLarge(MAX_BODY_SIZE))
            }
            BodyFraming::Length(expected) => {
                if received < expected {
                    return Ok(Parsed::Partial(Missing::Body { expected, received }));
                }
                expected
            }
            BodyFraming::Chunked => match chunked_body_len(&buf[head_len..])? {
                Some(n) => n,
                None if received > MAX_BODY_SIZE => {
                    return Err(ParseError::BodyTooLarge(MAX_BODY_SIZE))
                }
                None => return Ok(Parsed::Partial(Missing::ChunkedBody)),
            },
        }
    };

    let end = head_len + body_len;
    Ok(Parsed::Complete(Request {
        method,
        target,
        host,
        port,
        headers,
        body: Bytes::copy_from_slice(&buf[head_len..end]),
        raw: Bytes::copy_from_slice(&buf[..end]),
    }))
}

/// Extract a request from a complete byte sequence. Incomplete input fails.
pub fn extract(raw: &[u8]) -> Result<Request, ParseError> {
    match parse(raw)? {
        Parsed::Complete(request) => Ok(request),
        Parsed::Partial(missing) => Err(missing.into()),
    }
}

/// Read from `stream` until one full request is buffered.
///
/// Each read waits at most `idle_timeout`; a timeout or EOF before the
/// request is complete fails with the matching truncation error.
pub async fn read_request<S>(stream: &mut S, idle_timeout: Duration) -> Result<Request, ParseError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut missing = Missing::RequestLine;
    loop {
        let n = match timeout(idle_timeout, stream.read_buf(&mut buf)).await {
            Ok(res) => res?,
            Err(_) => {
                tracing::debug!(buffered = buf.len(), "read timed out");
                0
            }
        };
        if n == 0 {
            return Err(missing.into());
        }
        match parse(&buf)? {
            Parsed::Complete(request) => return Ok(request),
            Parsed::Partial(m) => missing = m,
        }
    }
}

fn resolve_target(
    method: &str,
    target: &str,
    headers: &Headers,
) -> Result<(String, u16), ParseError> {
    if method.eq_ignore_ascii_case("CONNECT") {
        return split_authority(target, HTTPS_PORT);
    }

    let without_fragment = strip_fragment(target);
    if let Some(rest) = strip_scheme(without_fragment) {
        let default_port = if without_fragment.len() - rest.len() == "https://".len() {
            HTTPS_PORT
        } else {
            HTTP_PORT
        };
        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        return split_authority(authority, default_port);
    }

    match headers.get("host") {
        Some(host) if !host.trim().is_empty() => split_authority(host.trim(), HTTP_PORT),
        _ => Err(ParseError::MissingHost),
    }
}

/// Split `host[:port]` (or `[v6]:port`), dropping any userinfo.
fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16), ParseError> {
    let authority = authority.rsplit('@').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ParseError::MissingHost);
    }

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ParseError::InvalidHost(authority.to_string()))?;
        if !is_ipv6_literal(host) {
            return Err(ParseError::InvalidHost(authority.to_string()));
        }
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| ParseError::BadPort(authority.to_string()))?,
            ),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(ParseError::MissingHost);
    }
    if !authority.starts_with('[') && !is_reg_name(host) {
        return Err(ParseError::InvalidHost(host.to_string()));
    }

    let port = match port {
        None | Some("") => default_port,
        Some(p) => p
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ParseError::BadPort(authority.to_string()))?,
    };

    Ok((host.to_ascii_lowercase(), port))
}

fn is_reg_name(host: &str) -> bool {
    host.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'%'))
}

fn is_ipv6_literal(host: &str) -> bool {
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_hexdigit() || matches!(b, b':' | b'.' | b'%'))
}

/// Persisted form: descriptive fields in clear, the exact bytes in base64.
#[derive(Serialize, Deserialize)]
struct StoredRequest {
    method: String,
    host: String,
    port: u16,
    target: String,
    headers: Headers,
    #[serde(
        serialize_with = "crate::serde_helpers::serialize_bytes",
        deserialize_with = "crate::serde_helpers::deserialize_bytes"
    )]
    raw: Bytes,
}

impl From<Request> for StoredRequest {
    fn from(r: Request) -> Self {
        Self {
            method: r.method,
            host: r.host,
            port: r.port,
            target: r.target,
            headers: r.headers,
            raw: r.raw,
        }
    }
}

impl TryFrom<StoredRequest> for Request {
    type Error = ParseError;

    fn try_from(stored: StoredRequest) -> Result<Self, Self::Error> {
        extract(&stored.raw)
    }
}
