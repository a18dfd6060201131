// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Record/playback HTTP interception proxy for tests.
//!
//! A [`controller::Controller`] owns a proxy worker that accepts redirected
//! connections. Each request is fingerprinted and either replayed from the
//! active cassette or forwarded to the real server and recorded.

pub mod cassette;
pub mod config;
pub mod connection;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod forwarder;
pub mod hooks;
pub mod http;
pub mod proxy;
pub mod request;
pub mod response;
mod serde_helpers;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
