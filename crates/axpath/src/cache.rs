//! Application root lookup with a time-bounded cache.
//!
//! Two strategies locate the application a path starts from:
//! - fast path: the provider's running-application lookup keyed by bundle
//!   identifier, cached per identifier;
//! - slow path: one enumeration of every application (with title and bundle
//!   identifier read up front), cached as a list and scanned in memory.
//!
//! The cache never owns the nodes it points at. Entries expire after the TTL
//! and are dropped on demand when a resolution finds their root stale.

use crate::errors::{CallError, ProviderError};
use crate::matcher::{attributes, MatchTable};
use crate::provider::{ElementHandle, ProviderLane};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + *elapsed
    }
}

/// How the root of a path was located; also the key to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AppLookup {
    BundleId(String),
    Title(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationCacheEntry {
    pub key: String,
    pub roots: Vec<ElementHandle>,
    #[serde(skip)]
    pub inserted_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedApplication {
    pub handle: ElementHandle,
    pub title: Option<String>,
    pub bundle_id: Option<String>,
}

#[derive(Debug)]
struct ApplicationList {
    applications: Vec<CachedApplication>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    by_bundle_id: HashMap<String, ApplicationCacheEntry>,
    applications: Option<ApplicationList>,
}

/// Counters describing cache behavior since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
}

/// Explicitly constructed, shareable application cache.
///
/// All reads and writes go through one async mutex, held across the provider
/// calls that populate an entry, so concurrent lookups for the same key
/// populate it once.
pub struct ApplicationCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    state: tokio::sync::Mutex<CacheState>,
    stats: Mutex<CacheStats>,
}

impl Default for ApplicationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ApplicationCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            state: tokio::sync::Mutex::new(CacheState::default()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    fn is_fresh(&self, inserted_at: Instant) -> bool {
        self.clock.now().saturating_duration_since(inserted_at) < self.ttl
    }

    /// Fast path: application roots for a bundle identifier.
    pub async fn by_bundle_id(
        &self,
        lane: &ProviderLane,
        bundle_id: &str,
    ) -> Result<Vec<ElementHandle>, CallError> {
        let mut state = self.state.lock().await;

        if let Some(entry) = state.by_bundle_id.get(bundle_id) {
            if self.is_fresh(entry.inserted_at) {
                debug!(bundle_id, "application cache hit");
                self.record(|s| s.hits += 1);
                return Ok(entry.roots.clone());
            }
            debug!(bundle_id, "application cache entry expired");
            state.by_bundle_id.remove(bundle_id);
        }

        self.record(|s| s.misses += 1);
        let roots = lane.applications_by_bundle_id(bundle_id).await?;
        if roots.is_empty() {
            debug!(bundle_id, "no running application for bundle identifier");
        } else {
            state.by_bundle_id.insert(
                bundle_id.to_string(),
                ApplicationCacheEntry {
                    key: bundle_id.to_string(),
                    roots: roots.clone(),
                    inserted_at: self.clock.now(),
                },
            );
        }
        Ok(roots)
    }

    /// Slow path: every application, from the cached list while it is fresh.
    pub async fn applications(
        &self,
        lane: &ProviderLane,
    ) -> Result<Vec<CachedApplication>, CallError> {
        let mut state = self.state.lock().await;

        if let Some(list) = &state.applications {
            if self.is_fresh(list.fetched_at) {
                self.record(|s| s.hits += 1);
                return Ok(list.applications.clone());
            }
            debug!("application list expired");
        }

        self.record(|s| s.misses += 1);
        let handles = lane.top_level_applications().await?;
        let names = vec![
            attributes::TITLE.to_string(),
            attributes::BUNDLE_IDENTIFIER.to_string(),
        ];
        let mut applications = Vec::with_capacity(handles.len());
        for handle in handles {
            let values = match lane.attributes(handle, names.clone()).await {
                Ok(values) => values,
                Err(CallError::Provider(ProviderError::StaleHandle(reason))) => {
                    debug!(%handle, %reason, "application exited during enumeration");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mut values = values.into_iter();
            applications.push(CachedApplication {
                handle,
                title: values.next().flatten(),
                bundle_id: values.next().flatten(),
            });
        }
        info!(count = applications.len(), "enumerated running applications");

        state.applications = Some(ApplicationList {
            applications: applications.clone(),
            fetched_at: self.clock.now(),
        });
        Ok(applications)
    }

    /// Slow path: applications whose cached title satisfies the title rule
    /// of `matcher`.
    pub async fn by_title(
        &self,
        lane: &ProviderLane,
        title: &str,
        matcher: &MatchTable,
    ) -> Result<Vec<ElementHandle>, CallError> {
        let applications = self.applications(lane).await?;
        Ok(applications
            .into_iter()
            .filter(|app| {
                app.title
                    .as_deref()
                    .is_some_and(|actual| matcher.matches(attributes::TITLE, title, actual))
            })
            .map(|app| app.handle)
            .collect())
    }

    pub async fn lookup(
        &self,
        lane: &ProviderLane,
        key: &AppLookup,
        matcher: &MatchTable,
    ) -> Result<Vec<ElementHandle>, CallError> {
        match key {
            AppLookup::BundleId(id) => self.by_bundle_id(lane, id).await,
            AppLookup::Title(title) => self.by_title(lane, title, matcher).await,
            AppLookup::All => Ok(self
                .applications(lane)
                .await?
                .into_iter()
                .map(|app| app.handle)
                .collect()),
        }
    }

    /// Drop whatever `key` was served from, forcing a fresh lookup next time.
    pub async fn invalidate(&self, key: &AppLookup) {
        let mut state = self.state.lock().await;
        let removed = match key {
            AppLookup::BundleId(id) => state.by_bundle_id.remove(id).is_some(),
            AppLookup::Title(_) | AppLookup::All => state.applications.take().is_some(),
        };
        if removed {
            info!(?key, "invalidated application cache entry");
            self.record(|s| s.invalidations += 1);
        }
    }

    /// Drop every entry that refers to `handle`.
    pub async fn invalidate_handle(&self, handle: ElementHandle) {
        let mut state = self.state.lock().await;
        let before = state.by_bundle_id.len();
        state
            .by_bundle_id
            .retain(|_, entry| !entry.roots.contains(&handle));
        let mut removed = before - state.by_bundle_id.len();

        if state
            .applications
            .as_ref()
            .is_some_and(|list| list.applications.iter().any(|a| a.handle == handle))
        {
            state.applications = None;
            removed += 1;
        }

        if removed > 0 {
            info!(%handle, removed, "invalidated application cache entries for handle");
            self.record(|s| s.invalidations += removed);
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = CacheState::default();
    }

    /// Bundle-identifier entries currently held, expired or not.
    pub async fn entries(&self) -> Vec<ApplicationCacheEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state.by_bundle_id.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AccessibilityProvider;
    use crate::snapshot::{SnapshotNode, SnapshotProvider};

    /// Detaches `exiting` right after the application list is returned.
    struct ExitingProvider {
        inner: Arc<SnapshotProvider>,
        exiting: ElementHandle,
    }

    impl AccessibilityProvider for ExitingProvider {
        fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
            let applications = self.inner.top_level_applications()?;
            self.inner.detach(self.exiting);
            Ok(applications)
        }

        fn applications_by_bundle_id(
            &self,
            bundle_id: &str,
        ) -> Result<Vec<ElementHandle>, ProviderError> {
            self.inner.applications_by_bundle_id(bundle_id)
        }

        fn children(&self, element: ElementHandle) -> Result<Vec<ElementHandle>, ProviderError> {
            self.inner.children(element)
        }

        fn attribute(
            &self,
            element: ElementHandle,
            name: &str,
        ) -> Result<Option<String>, ProviderError> {
            self.inner.attribute(element, name)
        }
    }

    fn desktop() -> Arc<SnapshotProvider> {
        Arc::new(SnapshotProvider::new(vec![
            SnapshotNode::new("AXApplication")
                .with_attribute("AXTitle", "Calculator")
                .with_attribute("bundleIdentifier", "com.acme.calc"),
            SnapshotNode::new("AXApplication")
                .with_attribute("AXTitle", "Notes")
                .with_attribute("bundleIdentifier", "com.acme.notes"),
        ]))
    }

    fn fixture() -> (Arc<SnapshotProvider>, ProviderLane, Arc<ManualClock>, ApplicationCache) {
        let provider = desktop();
        let lane = ProviderLane::new(provider.clone(), Duration::from_secs(5));
        let clock = Arc::new(ManualClock::new());
        let cache = ApplicationCache::with_clock(Duration::from_secs(30), clock.clone());
        (provider, lane, clock, cache)
    }

    #[tokio::test]
    async fn test_bundle_id_entries_expire_after_ttl() {
        let (provider, lane, clock, cache) = fixture();

        let first = cache.by_bundle_id(&lane, "com.acme.calc").await.unwrap();
        assert_eq!(first.len(), 1);
        clock.advance(Duration::from_secs(29));
        let second = cache.by_bundle_id(&lane, "com.acme.calc").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls().applications_by_bundle_id, 1);

        clock.advance(Duration::from_secs(1));
        cache.by_bundle_id(&lane, "com.acme.calc").await.unwrap();
        assert_eq!(provider.calls().applications_by_bundle_id, 2);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_empty_bundle_lookup_is_not_cached() {
        let (provider, lane, _clock, cache) = fixture();
        assert!(cache.by_bundle_id(&lane, "com.acme.missing").await.unwrap().is_empty());
        assert!(cache.by_bundle_id(&lane, "com.acme.missing").await.unwrap().is_empty());
        assert_eq!(provider.calls().applications_by_bundle_id, 2);
        assert!(cache.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_title_scan_reuses_application_list() {
        let (provider, lane, clock, cache) = fixture();
        let matcher = MatchTable::default();

        for _ in 0..10 {
            let found = cache.by_title(&lane, "Calc", &matcher).await.unwrap();
            assert_eq!(found.len(), 1);
        }
        assert_eq!(provider.calls().top_level_applications, 1);

        clock.advance(Duration::from_secs(31));
        cache.by_title(&lane, "Notes", &matcher).await.unwrap();
        assert_eq!(provider.calls().top_level_applications, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_lookup() {
        let (provider, lane, _clock, cache) = fixture();
        let matcher = MatchTable::default();

        cache.lookup(&lane, &AppLookup::BundleId("com.acme.calc".into()), &matcher).await.unwrap();
        cache.invalidate(&AppLookup::BundleId("com.acme.calc".into())).await;
        cache.lookup(&lane, &AppLookup::BundleId("com.acme.calc".into()), &matcher).await.unwrap();
        assert_eq!(provider.calls().applications_by_bundle_id, 2);

        cache.lookup(&lane, &AppLookup::All, &matcher).await.unwrap();
        cache.invalidate(&AppLookup::Title("Calculator".into())).await;
        cache.lookup(&lane, &AppLookup::All, &matcher).await.unwrap();
        assert_eq!(provider.calls().top_level_applications, 2);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_handle_drops_every_entry_using_it() {
        let (provider, lane, _clock, cache) = fixture();
        let roots = cache.by_bundle_id(&lane, "com.acme.calc").await.unwrap();
        cache.applications(&lane).await.unwrap();

        cache.invalidate_handle(roots[0]).await;
        assert!(cache.entries().await.is_empty());
        cache.applications(&lane).await.unwrap();
        assert_eq!(provider.calls().top_level_applications, 2);
    }

    #[tokio::test]
    async fn test_application_exiting_mid_enumeration_is_skipped() {
        let inner = desktop();
        let notes = inner.roots()[1];
        let provider = Arc::new(ExitingProvider {
            inner: inner.clone(),
            exiting: notes,
        });
        let lane = ProviderLane::new(provider, Duration::from_secs(5));
        let cache = ApplicationCache::new(Duration::from_secs(30));

        let applications = cache.applications(&lane).await.unwrap();
        assert_eq!(applications.len(), 1);
        assert_eq!(applications[0].title.as_deref(), Some("Calculator"));

        let found = cache
            .by_title(&lane, "Calculator", &MatchTable::default())
            .await
            .unwrap();
        assert_eq!(found, vec![inner.roots()[0]]);
        assert_eq!(inner.calls().top_level_applications, 1);
    }
}
