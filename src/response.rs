// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Upstream responses, kept as the exact bytes received.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::http::{
    chunked_body_len, framing, BodyFraming, Headers, MAX_BODY_SIZE, MAX_HEADERS, MAX_HEAD_SIZE,
};

/// A response as returned by the real server. Replay writes `as_bytes()`
/// back verbatim; the parsed fields are for logging and inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredResponse", into = "StoredResponse")]
pub struct Response {
    status: u16,
    reason: String,
    headers: Headers,
    body_offset: usize,
    raw: Bytes,
}

struct Head {
    status: u16,
    reason: String,
    headers: Headers,
    len: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>, ParseError> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut header_buf);
    match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => Ok(Some(Head {
            status: res.code.unwrap_or_default(),
            reason: res.reason.unwrap_or_default().to_string(),
            headers: Headers::from_httparse(res.headers),
            len,
        })),
        Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD_SIZE => {
            Err(ParseError::HeadTooLarge(MAX_HEAD_SIZE))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(ParseError::Malformed(e.to_string())),
    }
}

fn is_interim(status: u16) -> bool {
    (100..200).contains(&status) && status != 101
}

/// Offset and head of the final (non-interim) response in `buf`.
fn final_head(buf: &[u8]) -> Result<Option<(usize, Head)>, ParseError> {
    let mut offset = 0;
    loop {
        let Some(head) = parse_head(&buf[offset..])? else {
            return Ok(None);
        };
        if !is_interim(head.status) {
            return Ok(Some((offset, head)));
        }
        offset += head.len;
    }
}

/// Total length of the complete response at the start of `buf`, or
/// `Ok(None)` when more bytes (or EOF, for close-delimited bodies) are needed.
pub(crate) fn complete_len(buf: &[u8], head_request: bool) -> Result<Option<usize>, ParseError> {
    let Some((offset, head)) = final_head(buf)? else {
        return Ok(None);
    };
    let body_start = offset + head.len;

    if head_request || matches!(head.status, 101 | 204 | 304) {
        return Ok(Some(body_start));
    }

    let buffered = buf.len() - body_start;
    match framing(&head.headers, BodyFraming::UntilClose)? {
        BodyFraming::Empty => Ok(Some(body_start)),
        BodyFraming::Length(n) if n > MAX_BODY_SIZE => {
            Err(ParseError::BodyTooLarge(MAX_BODY_SIZE))
        }
        BodyFraming::Length(n) => {
            let end = body_start
                .checked_add(n)
                .ok_or_else(|| ParseError::InvalidBody(format!("content-length {n} overflows")))?;
            Ok((buf.len() >= end).then_some(end))
        }
        BodyFraming::Chunked => match chunked_body_len(&buf[body_start..])? {
            Some(n) => Ok(Some(body_start + n)),
            None if buffered > MAX_BODY_SIZE => Err(ParseError::BodyTooLarge(MAX_BODY_SIZE)),
            None => Ok(None),
        },
        BodyFraming::UntilClose if buffered > MAX_BODY_SIZE => {
            Err(ParseError::BodyTooLarge(MAX_BODY_SIZE))
        }
        BodyFraming::UntilClose => Ok(None),
    }
}

impl Response {
    /// Parse raw response bytes. Everything after the head is the body.
    pub fn parse(raw: impl Into<Bytes>) -> Result<Self, ParseError> {
        let raw = raw.into();
        let (offset, head) = final_head(&raw)?.ok_or(ParseError::TruncatedHead)?;
        Ok(Self {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body_offset: offset + head.len,
            raw,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body bytes as transmitted (not de-chunked).
    pub fn body(&self) -> &[u8] {
        &self.raw[self.body_offset..]
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    reason: String,
    headers: Headers,
    #[serde(
        serialize_with = "crate::serde_helpers::serialize_bytes",
        deserialize_with = "crate::serde_helpers::deserialize_bytes"
    )]
    raw: Bytes,
}

impl From<Response> for StoredResponse {
    fn from(r: Response) -> Self {
        Self {
            status: r.status,
            reason: r.reason,
            headers: r.headers,
            raw: r.raw,
        }
    }
}

impl TryFrom<StoredResponse> for Response {
    type Error = ParseError;

    fn try_from(stored: StoredResponse) -> Result<Self, Self::Error> {
        Response::parse(stored.raw)
    }
}
