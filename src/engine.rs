// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Record/playback decision for a single intercepted request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::cassette::Interaction;
use crate::error::{Result, VcrError};
use crate::fingerprint::Fingerprint;
use crate::forwarder::Forwarder;
use crate::request::Request;
use crate::response::Response;
use crate::store::InteractionStore;

/// The cassette currently selected, tagged with the insertion it came from.
///
/// `session` changes on every insert, even of the same name, so replay
/// starts over from the first recorded occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCassette {
    name: String,
    session: u64,
}

impl ActiveCassette {
    pub fn new(name: impl Into<String>, session: u64) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> u64 {
        self.session
    }
}

#[derive(Default)]
struct Cursors {
    session: Option<u64>,
    served: HashMap<(String, Fingerprint), usize>,
}

pub struct CassetteEngine {
    store: Arc<dyn InteractionStore>,
    forwarder: Arc<dyn Forwarder>,
    cursors: Mutex<Cursors>,
}

impl CassetteEngine {
    pub fn new(store: Arc<dyn InteractionStore>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            store,
            forwarder,
            cursors: Mutex::new(Cursors::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn InteractionStore> {
        &self.store
    }

    /// Serve `request` from the active cassette, recording it first if no
    /// matching interaction exists.
    pub async fn handle(
        &self,
        active: Option<&ActiveCassette>,
        request: &Request,
    ) -> Result<Response> {
        let active = active.ok_or(VcrError::NoCassetteSelected)?;
        let cassette = active.name();
        let fingerprint = Fingerprint::of(request);
        let occurrence = self.next_occurrence(active, &fingerprint);

        if let Some(found) = self
            .store
            .find_by_fingerprint(cassette, &fingerprint, occurrence)
            .await?
        {
            info!(
                cassette = %cassette,
                fingerprint = %fingerprint,
                method = %request.method(),
                target = %request.target(),
                occurrence,
                "playback"
            );
            return Ok(found.response().clone());
        }

        info!(
            cassette = %cassette,
            fingerprint = %fingerprint,
            method = %request.method(),
            target = %request.target(),
            "record"
        );
        let response = self.forwarder.forward(request).await?;
        let interaction = Interaction::new(request.clone(), response.clone());
        self.store.append(cassette, &interaction).await?;
        Ok(response)
    }

    /// Zero-based index of the recorded occurrence to serve for this request.
    fn next_occurrence(&self, active: &ActiveCassette, fingerprint: &Fingerprint) -> usize {
        let mut cursors = self.lock_cursors();
        if cursors.session != Some(active.session()) {
            cursors.session = Some(active.session());
            cursors.served.clear();
        }
        let served = cursors
            .served
            .entry((active.name().to_string(), fingerprint.clone()))
            .or_insert(0);
        let occurrence = *served;
        *served += 1;
        occurrence
    }

    fn lock_cursors(&self) -> MutexGuard<'_, Cursors> {
        match self.cursors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("replay cursor lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
