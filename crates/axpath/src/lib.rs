//! Element paths for the desktop accessibility tree
//!
//! An element path is an XPath-like string that names one node in the live,
//! externally-owned accessibility tree:
//!
//! ```text
//! macos://ui/AXApplication[@bundleIdentifier="com.apple.calculator"]/AXWindow/AXButton[@AXDescription="7"]
//! ```
//!
//! The crate parses such strings, resolves them against the tree through an
//! [`AccessibilityProvider`], explains failed resolutions with a
//! [`ResolutionTrace`], and generates paths for live elements.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod matcher;
pub mod parser;
pub mod provider;
pub mod resolver;
pub mod segment;
pub mod serializer;
pub mod snapshot;
pub mod validate;

pub use cache::{
    AppLookup, ApplicationCache, ApplicationCacheEntry, CacheStats, CachedApplication, Clock,
    ManualClock, SystemClock,
};
pub use config::{AmbiguityPolicy, EngineConfig};
pub use diagnostics::{AmbiguityNotice, CandidateSummary, FailureReason, ResolutionTrace, SegmentTrace};
pub use errors::{
    ConfigError, PathError, ProviderError, ProviderErrorKind, ResolutionError, SerializeError,
    SyntaxError,
};
pub use matcher::{MatchStrategy, MatchTable};
pub use parser::{parse, PathParser};
pub use provider::{AccessibilityProvider, ElementHandle, ProviderLane};
pub use resolver::Scope;
pub use segment::{is_valid_role, ElementPath, Predicate, Segment, DEFAULT_PREFIX};
pub use serializer::escape_value;
pub use snapshot::{Snapshot, SnapshotNode, SnapshotProvider};
pub use validate::{validate, PathValidation};

use resolver::Resolver;
use serializer::PathSerializer;

/// One element found by [`PathEngine::discover`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredElement {
    pub handle: ElementHandle,
    /// Levels below the discovery root.
    pub depth: usize,
    pub path: String,
}

/// The main entry point: parsing, resolution, serialization and validation
/// over one provider.
///
/// The application cache is the only state shared between calls. It is
/// injected, so several engines (or tests) can share one or use their own.
pub struct PathEngine {
    provider: Arc<dyn AccessibilityProvider>,
    cache: Arc<ApplicationCache>,
    matcher: MatchTable,
    parser: PathParser,
    config: EngineConfig,
}

impl PathEngine {
    #[instrument(skip(provider, config))]
    pub fn new(
        provider: Arc<dyn AccessibilityProvider>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        let cache = Arc::new(ApplicationCache::new(config.cache_ttl()));
        Self::with_cache(provider, config, cache)
    }

    /// Build an engine around an existing cache.
    ///
    /// ```
    /// use axpath::{ApplicationCache, EngineConfig, ManualClock, PathEngine, SnapshotProvider};
    /// use std::sync::Arc;
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let cache = Arc::new(ApplicationCache::with_clock(
    ///     std::time::Duration::from_secs(30),
    ///     clock.clone(),
    /// ));
    /// let provider = Arc::new(SnapshotProvider::new(Vec::new()));
    /// let _engine = PathEngine::with_cache(provider, EngineConfig::default(), cache)?;
    /// # Ok::<(), axpath::ConfigError>(())
    /// ```
    pub fn with_cache(
        provider: Arc<dyn AccessibilityProvider>,
        config: EngineConfig,
        cache: Arc<ApplicationCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            prefix = %config.prefix,
            ambiguity = ?config.ambiguity,
            call_timeout_ms = config.call_timeout_ms,
            "path engine ready"
        );
        Ok(Self {
            provider,
            cache,
            matcher: config.match_table(),
            parser: PathParser::new(config.prefix.clone()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn matcher(&self) -> &MatchTable {
        &self.matcher
    }

    pub fn cache(&self) -> &Arc<ApplicationCache> {
        &self.cache
    }

    fn lane(&self, cancel: Option<CancellationToken>) -> ProviderLane {
        let lane = ProviderLane::new(self.provider.clone(), self.config.call_timeout());
        match cancel {
            Some(token) => lane.with_cancellation(token),
            None => lane,
        }
    }

    pub fn parse(&self, text: &str) -> Result<ElementPath, SyntaxError> {
        self.parser.parse(text)
    }

    #[instrument(skip(self, path), fields(path = %path))]
    pub async fn resolve(
        &self,
        path: &ElementPath,
        scope: Scope,
    ) -> Result<ElementHandle, ResolutionError> {
        self.run(path, scope, None, None).await
    }

    /// Like [`resolve`](Self::resolve), but stops issuing provider calls once
    /// `cancel` fires and fails with [`ResolutionError::Cancelled`].
    #[instrument(skip(self, path, cancel), fields(path = %path))]
    pub async fn resolve_with_cancel(
        &self,
        path: &ElementPath,
        scope: Scope,
        cancel: CancellationToken,
    ) -> Result<ElementHandle, ResolutionError> {
        self.run(path, scope, Some(cancel), None).await
    }

    /// Resolve and return the per-segment trace alongside the outcome.
    #[instrument(skip(self, path), fields(path = %path))]
    pub async fn resolve_with_trace(
        &self,
        path: &ElementPath,
        scope: Scope,
    ) -> (Result<ElementHandle, ResolutionError>, ResolutionTrace) {
        let mut trace = ResolutionTrace::new(path.to_string());
        let outcome = self.run(path, scope, None, Some(&mut trace)).await;
        (outcome, trace)
    }

    /// Parse `text` and resolve it from the desktop.
    pub async fn resolve_str(&self, text: &str) -> Result<ElementHandle, PathError> {
        let path = self.parse(text)?;
        Ok(self.resolve(&path, Scope::Desktop).await?)
    }

    async fn run(
        &self,
        path: &ElementPath,
        scope: Scope,
        cancel: Option<CancellationToken>,
        trace: Option<&mut ResolutionTrace>,
    ) -> Result<ElementHandle, ResolutionError> {
        let lane = self.lane(cancel);
        let resolver = Resolver {
            lane: &lane,
            cache: &self.cache,
            matcher: &self.matcher,
            config: &self.config,
        };
        let handle = resolver.resolve(path, scope, trace).await?;
        debug!(%handle, "path resolved");
        Ok(handle)
    }

    fn serializer<'a>(&'a self, lane: &'a ProviderLane) -> PathSerializer<'a> {
        PathSerializer {
            lane,
            matcher: &self.matcher,
            config: &self.config,
        }
    }

    /// Generate a path for `element`. `ancestors` runs from the top-level
    /// application down to the element's parent.
    #[instrument(skip(self, ancestors), fields(depth = ancestors.len()))]
    pub async fn serialize_path(
        &self,
        element: ElementHandle,
        ancestors: &[ElementHandle],
    ) -> Result<ElementPath, SerializeError> {
        let lane = self.lane(None);
        self.serializer(&lane).serialize(element, ancestors).await
    }

    pub async fn serialize(
        &self,
        element: ElementHandle,
        ancestors: &[ElementHandle],
    ) -> Result<String, SerializeError> {
        Ok(self.serialize_path(element, ancestors).await?.to_string())
    }

    /// Walk the subtree under `root` depth-first, generating a path for every
    /// element up to `max_depth` levels below it. Elements that go stale
    /// during the walk are skipped along with their subtrees.
    #[instrument(skip(self, ancestors))]
    pub async fn discover(
        &self,
        root: ElementHandle,
        ancestors: &[ElementHandle],
        max_depth: usize,
    ) -> Result<Vec<DiscoveredElement>, SerializeError> {
        let lane = self.lane(None);
        let serializer = self.serializer(&lane);

        let root_path = serializer.serialize(root, ancestors).await?;
        let mut found = Vec::new();
        let mut stack = vec![(root, root_path, 0usize)];

        while let Some((handle, path, depth)) = stack.pop() {
            found.push(DiscoveredElement {
                handle,
                depth,
                path: path.to_string(),
            });
            if depth >= max_depth {
                continue;
            }

            let children = match lane.children(handle).await {
                Ok(children) => children,
                Err(errors::CallError::Provider(ProviderError::StaleHandle(reason))) => {
                    debug!(%handle, %reason, "element vanished during discovery");
                    continue;
                }
                Err(e) => return Err(SerializeError::from_call(e, path.len())),
            };

            let mut generated = Vec::with_capacity(children.len());
            for child in children {
                match serializer.extend(&path, handle, child).await {
                    Ok(child_path) => generated.push((child, child_path, depth + 1)),
                    Err(SerializeError::Provider {
                        source: ProviderError::StaleHandle(_),
                        ..
                    })
                    | Err(SerializeError::NotAChild { .. }) => {
                        debug!(%child, "element vanished during discovery");
                    }
                    Err(SerializeError::InvalidRole { role, .. }) => {
                        warn!(%child, role = %role, "element role cannot be addressed, skipping subtree");
                    }
                    Err(e) => return Err(e),
                }
            }
            // reversed so children pop in enumeration order
            stack.extend(generated.into_iter().rev());
        }

        info!(count = found.len(), "discovered element paths");
        Ok(found)
    }

    /// Static check of `text` against this engine's prefix, aliases and
    /// depth limit.
    pub fn validate(&self, text: &str, strict: bool) -> PathValidation {
        validate::validate_with(&self.parser, &self.matcher, &self.config, text, strict)
    }
}
