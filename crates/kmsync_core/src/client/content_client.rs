//! Fetch/save façade over the content store.

use crate::model::payload::ContentPayload;
use crate::store::{ContentLocation, ContentStore, StoreResult};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Instant;

/// Content client used for hydration and for phase one of autosave commits.
#[derive(Clone)]
pub struct ContentClient {
    store: Arc<dyn ContentStore>,
}

impl ContentClient {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Loads a payload. Missing objects and failures both read as `None`.
    pub fn fetch(&self, content_ref: &str, location_hint: Option<&str>) -> Option<ContentPayload> {
        let started_at = Instant::now();
        match self.store.fetch(content_ref, location_hint) {
            Ok(payload) => {
                debug!(
                    "event=content_fetch module=client status=ok content_ref={} found={} duration_ms={}",
                    content_ref,
                    payload.is_some(),
                    started_at.elapsed().as_millis()
                );
                payload
            }
            Err(err) => {
                warn!(
                    "event=content_fetch module=client status=error content_ref={} duration_ms={} error={}",
                    content_ref,
                    started_at.elapsed().as_millis(),
                    err
                );
                None
            }
        }
    }

    /// Saves a payload, creating a new object when `content_ref` is `None`.
    ///
    /// # Errors
    /// - Returns the store error unchanged; nothing was written that the
    ///   caller may reference.
    pub fn save(
        &self,
        content_ref: Option<&str>,
        payload: &ContentPayload,
        location_hint: Option<&str>,
    ) -> StoreResult<ContentLocation> {
        let started_at = Instant::now();
        let result = self.store.save(content_ref, payload, location_hint);
        match &result {
            Ok(location) => debug!(
                "event=content_save module=client status=ok mode={} content_ref={} duration_ms={}",
                if content_ref.is_some() { "overwrite" } else { "create" },
                location.content_ref,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=content_save module=client status=error mode={} duration_ms={} error={}",
                if content_ref.is_some() { "overwrite" } else { "create" },
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}
