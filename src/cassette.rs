// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Cassettes and the interactions recorded on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::request::Request;
use crate::response::Response;

/// One recorded exchange. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    fingerprint: Fingerprint,
    recorded_at: DateTime<Utc>,
    request: Request,
    response: Response,
}

impl Interaction {
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            fingerprint: Fingerprint::of(&request),
            recorded_at: Utc::now(),
            request,
            response,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

/// A named, ordered list of interactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cassette {
    name: String,
    interactions: Vec<Interaction>,
}

impl Cassette {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interactions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interactions in recording order.
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// How many times `fingerprint` was recorded.
    pub fn occurrences(&self, fingerprint: &Fingerprint) -> usize {
        self.interactions
            .iter()
            .filter(|i| i.fingerprint() == fingerprint)
            .count()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.interactions
            .iter()
            .any(|i| i.fingerprint() == fingerprint)
    }

    /// The `occurrence`-th (zero-based) recording of `fingerprint`, or the
    /// last one once the recorded occurrences are exhausted.
    pub fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
        occurrence: usize,
    ) -> Option<&Interaction> {
        let mut last = None;
        let matching = self
            .interactions
            .iter()
            .filter(|i| i.fingerprint() == fingerprint);
        for (i, interaction) in matching.enumerate() {
            if i == occurrence {
                return Some(interaction);
            }
            last = Some(interaction);
        }
        last
    }

    pub(crate) fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_request, make_response};

    #[test]
    fn repeated_fingerprints_replay_in_order_then_repeat_last() {
        let mut cassette = Cassette::new("demo");
        cassette.push(Interaction::new(
            make_request("GET", "http://a.test/"),
            make_response(200, "bodyA"),
        ));
        cassette.push(Interaction::new(
            make_request("GET", "http://b.test/"),
            make_response(200, "other"),
        ));
        cassette.push(Interaction::new(
            make_request("GET", "http://a.test/"),
            make_response(200, "bodyB"),
        ));

        let fp = Fingerprint::of(&make_request("GET", "http://a.test/"));
        assert_eq!(cassette.occurrences(&fp), 2);
        let body = |n| cassette.find_by_fingerprint(&fp, n).map(|i| i.response().body());
        assert_eq!(body(0), Some(b"bodyA".as_slice()));
        assert_eq!(body(1), Some(b"bodyB".as_slice()));
        assert_eq!(body(2), Some(b"bodyB".as_slice()));
        assert_eq!(body(7), Some(b"bodyB".as_slice()));
    }

    #[test]
    fn found_interaction_outlives_the_fingerprint() {
        let mut cassette = Cassette::new("demo");
        cassette.push(Interaction::new(
            make_request("GET", "http://a.test/"),
            make_response(200, "bodyA"),
        ));
        let found = {
            let fp = Fingerprint::of(&make_request("GET", "http://a.test/"));
            cassette.find_by_fingerprint(&fp, 0)
        };
        assert_eq!(found.map(|i| i.response().body()), Some(b"bodyA".as_slice()));
    }

    #[test]
    fn unknown_fingerprint_is_absent() {
        let cassette = Cassette::new("empty");
        let fp = Fingerprint::of(&make_request("GET", "http://a.test/"));
        assert!(!cassette.contains(&fp));
        assert!(cassette.find_by_fingerprint(&fp, 0).is_none());
        assert!(cassette.is_empty());
    }

    #[test]
    fn interaction_json_carries_fingerprint_and_timestamp() -> anyhow::Result<()> {
        let interaction = Interaction::new(
            make_request("POST", "http://a.test/submit"),
            make_response(201, "created"),
        );
        let json = serde_json::to_value(&interaction)?;
        assert_eq!(json["fingerprint"], interaction.fingerprint().as_str());
        assert!(json["recorded_at"].is_string());
        assert_eq!(json["request"]["method"], "POST");
        assert_eq!(json["response"]["status"], 201);

        let back: Interaction = serde_json::from_value(json)?;
        assert_eq!(back, interaction);
        Ok(())
    }
}
