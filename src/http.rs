// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Wire-level helpers shared by the request extractor and the forwarder.
//!
//! Only the framing needed to know where a message ends is implemented here:
//! head termination (via `httparse`), `Content-Length` and chunked bodies.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Upper bound on the size of a request or response head.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on the size of a buffered request or response body.
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Upper bound on the number of header fields parsed from one message.
pub const MAX_HEADERS: usize = 128;

/// Header fields in wire order. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn from_httparse(raw: &[httparse::Header<'_>]) -> Self {
        Self(
            raw.iter()
                .filter(|h| !h.name.is_empty())
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).trim().to_string(),
                    )
                })
                .collect(),
        )
    }
}

/// How the body following a message head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

/// Determine body framing from the headers; `absent` applies when neither
/// `Transfer-Encoding` nor `Content-Length` is present.
pub fn framing(headers: &Headers, absent: BodyFraming) -> Result<BodyFraming, ParseError> {
    let chunked = headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .last()
        .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    let mut length: Option<usize> = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let part = part.trim();
            let n = part
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidBody(format!("bad content-length {part:?}")))?;
            match length {
                Some(prev) if prev != n => {
                    return Err(ParseError::InvalidBody(
                        "conflicting content-length values".into(),
                    ))
                }
                _ => length = Some(n),
            }
        }
    }

    Ok(match length {
        Some(0) => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
        None => absent,
    })
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Length of a complete chunked body at the start of `buf`, including the
/// last-chunk and trailer section. `Ok(None)` means more bytes are needed.
pub fn chunked_body_len(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    let mut pos = 0;
    loop {
        let Some(line_end) = find_crlf(&buf[pos..]) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidBody("non-ascii chunk size line".into()))?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ParseError::InvalidBody(format!("bad chunk size {size_str:?}")))?;
        pos += line_end + 2;

        if size == 0 {
            // trailer fields, terminated by an empty line
            loop {
                let Some(end) = find_crlf(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += end + 2;
                if end == 0 {
                    return Ok(Some(pos));
                }
            }
        }

        let data_end = pos
            .checked_add(size)
            .and_then(|p| p.checked_add(2))
            .ok_or_else(|| ParseError::InvalidBody("chunk size overflow".into()))?;
        if buf.len() < data_end {
            return Ok(None);
        }
        if &buf[data_end - 2..data_end] != b"\r\n" {
            return Err(ParseError::InvalidBody("missing CRLF after chunk data".into()));
        }
        pos = data_end;
    }
}
