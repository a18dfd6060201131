// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Error types for the interception pipeline.

use std::fmt::Display;

use thiserror::Error;

/// Reasons an intercepted request could not be turned into a [`crate::request::Request`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no request line found")]
    NoRequestLine,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("could not determine the target host")]
    MissingHost,

    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("invalid port in {0:?}")]
    BadPort(String),

    #[error("connection closed before the request head was complete")]
    TruncatedHead,

    #[error("connection closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },

    #[error("connection closed before the end of the chunked body")]
    TruncatedChunked,

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("message body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("invalid message body: {0}")]
    InvalidBody(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy shared by the store, forwarder, engine, proxy and controller.
#[derive(Debug, Error)]
pub enum VcrError {
    /// A connection arrived while no cassette was inserted.
    #[error("invalid http request: no cassette inserted")]
    NoCassetteSelected,

    #[error("failed to parse request: {0}")]
    Parse(#[from] ParseError),

    /// The real-network leg failed; nothing was recorded.
    #[error("forwarding to {host}:{port} failed: {source}")]
    Network {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("cassette {cassette:?}: {message}")]
    Store { cassette: String, message: String },

    #[error("proxy failed to start: {0}")]
    Startup(String),

    #[error("invalid cassette name {0:?}: {1}")]
    InvalidCassetteName(String, &'static str),

    #[error("redirect hook {hook:?} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl VcrError {
    pub fn store(cassette: &str, err: impl Display) -> Self {
        Self::Store {
            cassette: cassette.to_string(),
            message: err.to_string(),
        }
    }

    pub fn hook(hook: &str, err: impl Display) -> Self {
        Self::Hook {
            hook: hook.to_string(),
            message: err.to_string(),
        }
    }

    /// Short machine-readable label, sent back to clients in `X-Vcr-Error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCassetteSelected => "no-cassette",
            Self::Parse(_) => "parse",
            Self::Network { .. } => "network",
            Self::Store { .. } => "store",
            Self::Startup(_) => "startup",
            Self::InvalidCassetteName(..) => "cassette-name",
            Self::Hook { .. } => "hook",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, VcrError>;
