//! Paginated, cached observation feed for the launched patient.
//!
//! The feed keeps every entry fetched so far (`all_loaded`), sorted
//! descending by effective time after every mutation, and exposes a window
//! of the first `window_size` entries. `load_more` widens the window and
//! follows the server's next link when the local entries cannot fill it.
//! Creating a reading prepends an optimistic entry immediately and
//! schedules a delayed reconciliation fetch whose result replaces all local
//! state; a new create aborts any reconciliation still pending so two
//! reconciliations never race.

use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::error::SmartError;
use crate::fhir::{
    self, ObservationEntry, ObservationValue, LOINC_ORAL_TEMPERATURE,
};
use crate::http::{clean_base_url, handle_response, map_error};
use crate::session::LaunchSession;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the presentation layer renders
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub displayed: Vec<ObservationEntry>,
    pub has_more: bool,
}

/// Client-side view over the server's observation data
#[derive(Debug, Default)]
struct FeedState {
    all_loaded: Vec<ObservationEntry>,
    window_size: usize,
    /// Server's next-link; `None` means no more server pages
    server_cursor: Option<String>,
}

impl FeedState {
    fn snapshot(&self) -> FeedSnapshot {
        let end = self.window_size.min(self.all_loaded.len());
        FeedSnapshot {
            displayed: self.all_loaded[..end].to_vec(),
            has_more: self.has_more(),
        }
    }

    fn has_more(&self) -> bool {
        self.all_loaded.len() > self.window_size || self.server_cursor.is_some()
    }

    /// Replace everything with a fresh server page.
    fn replace(
        &mut self,
        mut entries: Vec<ObservationEntry>,
        cursor: Option<String>,
        window_size: usize,
    ) {
        fhir::sort_entries_desc(&mut entries);
        self.all_loaded = entries;
        self.window_size = window_size;
        self.server_cursor = cursor;
    }

    /// Merge a continuation page. The new page is not assumed pre-sorted
    /// relative to what we hold, so the whole collection is re-sorted.
    fn merge(&mut self, entries: Vec<ObservationEntry>, cursor: Option<String>) {
        self.all_loaded.extend(entries);
        fhir::sort_entries_desc(&mut self.all_loaded);
        self.server_cursor = cursor;
    }

    fn prepend(&mut self, entry: ObservationEntry) {
        self.all_loaded.insert(0, entry);
        fhir::sort_entries_desc(&mut self.all_loaded);
    }
}

struct FeedInner {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    patient_id: String,
    page_size: usize,
    reconcile_delay: Duration,
    state: Mutex<FeedState>,
    cache: Mutex<TtlCache<Value>>,
    load_in_flight: AtomicBool,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedInner {
    fn query_url(&self) -> String {
        format!(
            "{}/Observation?patient={}&category=vital-signs&_sort=-date&_count={}",
            self.base_url,
            urlencoding::encode(&self.patient_id),
            self.page_size
        )
    }

    async fn fetch_bundle(&self, url: &str) -> Result<Value, SmartError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        handle_response(response).await
    }

    /// Fetch through the cache; `force` bypasses it unconditionally.
    async fn fetch_bundle_cached(&self, url: &str, force: bool) -> Result<Value, SmartError> {
        if !force {
            if let Some((bundle, true)) = self.cache_lock().get(url) {
                debug!("Serving observation bundle from cache");
                return Ok(bundle);
            }
        }
        let bundle = self.fetch_bundle(url).await?;
        self.cache_lock().put(url, bundle.clone());
        Ok(bundle)
    }

    /// Authoritative re-fetch after a create: replaces the whole local
    /// collection and resets the window to the first page.
    async fn refetch_authoritative(&self) -> Result<(), SmartError> {
        let url = self.query_url();
        let bundle = self.fetch_bundle(&url).await?;
        self.cache_lock().put(&url, bundle.clone());

        let entries = fhir::bundle_entries(&bundle);
        let cursor = fhir::bundle_next_link(&bundle);
        let mut state = self.state_lock();
        state.replace(entries, cursor, self.page_size);
        debug!("Reconciled feed against server truth");
        Ok(())
    }

    fn state_lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().expect("feed state lock poisoned")
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, TtlCache<Value>> {
        self.cache.lock().expect("feed cache lock poisoned")
    }
}

impl Drop for FeedInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reconcile_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Fetching, caching, paginating and optimistically mutating the launched
/// patient's vital-sign observations
pub struct ObservationFeed {
    inner: Arc<FeedInner>,
}

impl ObservationFeed {
    /// Build a feed for the launched session, reusing the controller's HTTP
    /// client.
    pub fn new(
        http: reqwest::Client,
        session: &LaunchSession,
        config: &ClientConfig,
    ) -> Result<Self, SmartError> {
        let base_url = clean_base_url(&session.issuer)?;
        Ok(Self {
            inner: Arc::new(FeedInner {
                http,
                base_url,
                access_token: session.access_token.clone(),
                patient_id: session.patient_id.clone(),
                page_size: config.page_size,
                reconcile_delay: config.reconcile_delay,
                state: Mutex::new(FeedState::default()),
                cache: Mutex::new(TtlCache::new(config.cache_ttl)),
                load_in_flight: AtomicBool::new(false),
                reconcile_task: Mutex::new(None),
            }),
        })
    }

    /// Fetch the first page. A repeat fetch within the cache's freshness
    /// window is served locally; `force` always goes to the server.
    pub async fn fetch_initial(&self, force: bool) -> Result<FeedSnapshot, SmartError> {
        let url = self.inner.query_url();
        let bundle = self.inner.fetch_bundle_cached(&url, force).await?;

        let entries = fhir::bundle_entries(&bundle);
        let cursor = fhir::bundle_next_link(&bundle);
        info!(
            count = entries.len(),
            more = cursor.is_some(),
            "Loaded observation page"
        );

        let mut state = self.inner.state_lock();
        state.replace(entries, cursor, self.inner.page_size);
        Ok(state.snapshot())
    }

    /// Widen the window by one page, following the server's next link when
    /// the local entries cannot fill it.
    ///
    /// A call while another is pending returns the current snapshot
    /// unchanged. Once `has_more` is false this saturates and is a no-op.
    pub async fn load_more(&self) -> Result<FeedSnapshot, SmartError> {
        if self.inner.load_in_flight.swap(true, Ordering::SeqCst) {
            debug!("load_more already in flight; returning current view");
            return Ok(self.snapshot());
        }
        let result = self.load_more_inner().await;
        self.inner.load_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn load_more_inner(&self) -> Result<FeedSnapshot, SmartError> {
        let (cursor, previous_window) = {
            let mut state = self.inner.state_lock();
            let previous_window = state.window_size;
            state.window_size += self.inner.page_size;
            let needs_server_page =
                state.all_loaded.len() < state.window_size && state.server_cursor.is_some();
            let cursor = if needs_server_page {
                state.server_cursor.clone()
            } else {
                None
            };
            (cursor, previous_window)
        };

        if let Some(url) = cursor {
            match self.inner.fetch_bundle(&url).await {
                Ok(bundle) => {
                    let entries = fhir::bundle_entries(&bundle);
                    let next = fhir::bundle_next_link(&bundle);
                    let mut state = self.inner.state_lock();
                    state.merge(entries, next);
                }
                Err(e) => {
                    // Leave prior state untouched; the user can retry
                    warn!("Failed to fetch next observation page: {}", e);
                    self.inner.state_lock().window_size = previous_window;
                    return Err(e);
                }
            }
        }

        Ok(self.snapshot())
    }

    /// Create a vital-sign reading and show it immediately.
    ///
    /// The input must parse as a number; a parse failure is a local
    /// validation error and makes no network call. On a successful POST the
    /// entry is prepended optimistically (server id when echoed, otherwise a
    /// temporary one) and a delayed reconciliation fetch is scheduled,
    /// replacing any reconciliation already pending.
    pub async fn create_observation(
        &self,
        raw_value: &str,
        unit: &str,
    ) -> Result<FeedSnapshot, SmartError> {
        let value: f64 = raw_value
            .trim()
            .parse()
            .map_err(|_| SmartError::Validation(format!("'{}' is not a number", raw_value)))?;

        let effective = Utc::now();
        let effective_raw = effective.to_rfc3339();
        let resource = fhir::build_observation(
            &self.inner.patient_id,
            LOINC_ORAL_TEMPERATURE,
            "Temperature Oral",
            value,
            unit,
            &effective_raw,
        );

        let response = self
            .inner
            .http
            .post(format!("{}/Observation", self.inner.base_url))
            .bearer_auth(&self.inner.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
            .body(serde_json::to_vec(&resource)?)
            .send()
            .await?;

        if !response.status().is_success() {
            // No optimistic entry on failure; the form stays open for retry
            return Err(map_error(response).await);
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body: Option<Value> = response
            .bytes()
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        let id = body
            .as_ref()
            .and_then(|b| b["id"].as_str())
            .map(|s| s.to_string())
            .or_else(|| location.as_deref().and_then(created_id_from_location))
            .unwrap_or_else(|| format!("urn:uuid:{}", uuid::Uuid::new_v4()));
        info!(id = %id, "Created observation");

        let entry = ObservationEntry {
            id,
            display: "Temperature Oral".to_string(),
            effective: Some(effective),
            effective_raw: Some(effective_raw),
            value: ObservationValue::Quantity {
                value,
                unit: unit.to_string(),
            },
        };

        let snapshot = {
            let mut state = self.inner.state_lock();
            state.prepend(entry);
            state.snapshot()
        };

        self.schedule_reconcile();
        Ok(snapshot)
    }

    /// Schedule the authoritative re-fetch, aborting one already pending.
    fn schedule_reconcile(&self) {
        let inner = Arc::clone(&self.inner);
        let mut slot = self
            .inner
            .reconcile_task
            .lock()
            .expect("reconcile slot lock poisoned");

        if let Some(handle) = slot.take() {
            debug!("Replacing pending reconciliation");
            handle.abort();
        }

        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.reconcile_delay).await;
            if let Err(e) = inner.refetch_authoritative().await {
                warn!("Reconciliation fetch failed: {}", e);
            }
        }));
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.state_lock().snapshot()
    }

    pub fn has_more(&self) -> bool {
        self.inner.state_lock().has_more()
    }
}

/// Pull the created resource id out of a `Location` header
/// (`.../Observation/{id}[/_history/{n}]`).
fn created_id_from_location(location: &str) -> Option<String> {
    location
        .split('/')
        .skip_while(|segment| *segment != "Observation")
        .nth(1)
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn entry(id: &str, hour: i64) -> ObservationEntry {
        let ts = DateTime::<Utc>::from_timestamp(hour * 3600, 0).unwrap();
        ObservationEntry {
            id: id.to_string(),
            display: "Temp".to_string(),
            effective: Some(ts),
            effective_raw: Some(ts.to_rfc3339()),
            value: ObservationValue::Unknown,
        }
    }

    #[test]
    fn test_window_never_exceeds_loaded() {
        let mut state = FeedState::default();
        state.replace(vec![entry("a", 3), entry("b", 2)], None, 5);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.displayed.len(), 2);
        assert!(!snapshot.has_more);
    }

    #[test]
    fn test_has_more_from_local_surplus_or_cursor() {
        let mut state = FeedState::default();
        state.replace(
            (0..7).map(|i| entry(&format!("e{}", i), i)).collect(),
            None,
            5,
        );
        assert!(state.has_more());
        assert_eq!(state.snapshot().displayed.len(), 5);

        let mut cursored = FeedState::default();
        cursored.replace(
            vec![entry("a", 1)],
            Some("https://fhir.example.org/next".to_string()),
            5,
        );
        assert!(cursored.has_more());
    }

    #[test]
    fn test_merge_resorts_full_collection() {
        let mut state = FeedState::default();
        state.replace(vec![entry("new", 10), entry("mid", 5)], None, 5);
        // Continuation page holds an entry newer than some we already have
        state.merge(vec![entry("newest", 12), entry("old", 1)], None);

        let ids: Vec<&str> = state.all_loaded.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "new", "mid", "old"]);
        assert!(state.server_cursor.is_none());
    }

    #[test]
    fn test_prepend_keeps_descending_order() {
        let mut state = FeedState::default();
        state.replace(vec![entry("a", 10)], None, 5);
        state.prepend(entry("b", 20));
        state.prepend(entry("c", 5));

        let ids: Vec<&str> = state.all_loaded.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_created_id_from_location() {
        assert_eq!(
            created_id_from_location("http://fhir.example.org/Observation/obs-9/_history/1")
                .as_deref(),
            Some("obs-9")
        );
        assert_eq!(
            created_id_from_location("Observation/obs-9").as_deref(),
            Some("obs-9")
        );
        assert!(created_id_from_location("http://fhir.example.org/Patient/p1").is_none());
    }
}
