// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Request identity used for matching recorded interactions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::request::Request;

/// Hex-encoded SHA-1 of method, authority and origin-form target.
///
/// Absolute-form (`GET http://host/x`) and origin-form (`GET /x` with a
/// `Host` header) requests for the same resource share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &Request) -> Self {
        let target = request
            .origin_form()
            .unwrap_or_else(|| request.authority());
        Self::from_parts(request.method(), &request.authority(), &target)
    }

    pub fn from_parts(method: &str, authority: &str, target: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(method.to_ascii_uppercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(authority.to_ascii_lowercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(target.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::extract;
    use rstest::rstest;

    fn fp(raw: &str) -> Fingerprint {
        Fingerprint::of(&extract(raw.as_bytes()).unwrap())
    }

    #[test]
    fn is_forty_hex_chars() {
        let f = fp("GET / HTTP/1.1\r\nHost: example.test\r\n\r\n");
        assert_eq!(f.as_str().len(), 40);
        assert!(f.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[rstest]
    #[case("GET http://example.test/a?b=1 HTTP/1.1\r\n\r\n")]
    #[case("GET /a?b=1 HTTP/1.1\r\nHost: EXAMPLE.test\r\n\r\n")]
    #[case("GET /a?b=1 HTTP/1.1\r\nHost: example.test:80\r\n\r\n")]
    #[case("get /a?b=1 HTTP/1.1\r\nHost: example.test\r\n\r\n")]
    #[case("GET /a?b=1#top HTTP/1.1\r\nHost: example.test\r\nX-Other: 1\r\n\r\n")]
    fn equivalent_requests_share_a_fingerprint(#[case] raw: &str) {
        let reference = fp("GET /a?b=1 HTTP/1.1\r\nHost: example.test\r\n\r\n");
        assert_eq!(fp(raw), reference);
    }

    #[rstest]
    #[case("POST /a?b=1 HTTP/1.1\r\nHost: example.test\r\n\r\n")]
    #[case("GET /a?b=2 HTTP/1.1\r\nHost: example.test\r\n\r\n")]
    #[case("GET /a?b=1 HTTP/1.1\r\nHost: example.test:8080\r\n\r\n")]
    #[case("GET /a?b=1 HTTP/1.1\r\nHost: other.test\r\n\r\n")]
    #[case("GET https://example.test/a?b=1 HTTP/1.1\r\n\r\n")]
    fn different_requests_differ(#[case] raw: &str) {
        let reference = fp("GET /a?b=1 HTTP/1.1\r\nHost: example.test\r\n\r\n");
        assert_ne!(fp(raw), reference);
    }

    #[test]
    fn connect_uses_authority() {
        let a = fp("CONNECT example.test:443 HTTP/1.1\r\n\r\n");
        let b = fp("CONNECT example.test HTTP/1.1\r\nHost: example.test\r\n\r\n");
        assert_eq!(a, b);
        assert_eq!(
            a,
            Fingerprint::from_parts("CONNECT", "example.test:443", "example.test:443")
        );
    }
}
