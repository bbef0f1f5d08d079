#![allow(dead_code)]

use axpath::{
    AccessibilityProvider, ApplicationCache, ElementHandle, EngineConfig, ManualClock, PathEngine,
    ProviderError, SnapshotNode, SnapshotProvider,
};
use std::sync::Arc;
use std::time::Duration;

pub const CALC: &str = "macos://ui/AXApplication[@bundleIdentifier=\"com.acme.calc\"]";
pub const NOTES: &str = "macos://ui/AXApplication[@bundleIdentifier=\"com.acme.notes\"]";

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

fn button(description: &str) -> SnapshotNode {
    SnapshotNode::new("AXButton").with_attribute("AXDescription", description)
}

pub fn calculator() -> SnapshotNode {
    SnapshotNode::new("AXApplication")
        .with_attribute("AXTitle", "Calculator")
        .with_attribute("bundleIdentifier", "com.acme.calc")
        .with_child(
            SnapshotNode::new("AXWindow")
                .with_attribute("AXTitle", "Calculator")
                .with_children([
                    button("7").with_attribute("AXIdentifier", "seven"),
                    button("8"),
                    button("Add").with_attribute("AXValue", "first"),
                    button("Add").with_attribute("AXValue", "second"),
                    button("Add").with_attribute("AXValue", "third"),
                    SnapshotNode::new("AXGroup").with_child(
                        SnapshotNode::new("AXStaticText").with_attribute("AXValue", "0"),
                    ),
                ]),
        )
}

/// Two windows, each with a "7" button told apart by value.
pub fn notes() -> SnapshotNode {
    SnapshotNode::new("AXApplication")
        .with_attribute("AXTitle", "Notes")
        .with_attribute("bundleIdentifier", "com.acme.notes")
        .with_children([
            SnapshotNode::new("AXWindow")
                .with_attribute("AXTitle", "Untitled")
                .with_child(button("7").with_attribute("AXValue", "a")),
            SnapshotNode::new("AXWindow")
                .with_attribute("AXTitle", "Untitled 2")
                .with_child(button("7").with_attribute("AXValue", "b")),
        ])
}

pub fn desktop() -> Arc<SnapshotProvider> {
    Arc::new(SnapshotProvider::new(vec![calculator(), notes()]))
}

pub fn engine_with(
    provider: Arc<dyn AccessibilityProvider>,
    config: EngineConfig,
) -> (PathEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(ApplicationCache::with_clock(config.cache_ttl(), clock.clone()));
    let engine = PathEngine::with_cache(provider, config, cache).expect("valid config");
    (engine, clock)
}

pub fn engine(provider: Arc<SnapshotProvider>) -> PathEngine {
    engine_with(provider, EngineConfig::default()).0
}

/// Value of `name` on `handle`, read straight from the snapshot.
pub fn attr(provider: &SnapshotProvider, handle: ElementHandle, name: &str) -> Option<String> {
    provider.attribute(handle, name).expect("attached handle")
}

/// Wraps a snapshot and blocks for `delay` before answering application
/// lookups.
pub struct SlowProvider {
    pub inner: Arc<SnapshotProvider>,
    pub delay: Duration,
}

impl AccessibilityProvider for SlowProvider {
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
        std::thread::sleep(self.delay);
        self.inner.top_level_applications()
    }

    fn applications_by_bundle_id(
        &self,
        bundle_id: &str,
    ) -> Result<Vec<ElementHandle>, ProviderError> {
        std::thread::sleep(self.delay);
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

/// Detaches `victim` right after its parent's children were listed, so the
/// handle goes stale between enumeration and filtering.
pub struct VanishingProvider {
    pub inner: Arc<SnapshotProvider>,
    pub victim: ElementHandle,
}

impl AccessibilityProvider for VanishingProvider {
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
        self.inner.top_level_applications()
    }

    fn applications_by_bundle_id(
        &self,
        bundle_id: &str,
    ) -> Result<Vec<ElementHandle>, ProviderError> {
        self.inner.applications_by_bundle_id(bundle_id)
    }

    fn children(&self, element: ElementHandle) -> Result<Vec<ElementHandle>, ProviderError> {
        let children = self.inner.children(element)?;
        if children.contains(&self.victim) {
            self.inner.detach(self.victim);
        }
        Ok(children)
    }

    fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.inner.attribute(element, name)
    }
}

/// Detaches `exiting` right after the application list is returned, as if
/// the application quit mid-enumeration.
pub struct ExitingProvider {
    pub inner: Arc<SnapshotProvider>,
    pub exiting: ElementHandle,
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

/// Answers every batched attribute read with the role alone.
pub struct ShortBatchProvider {
    pub inner: Arc<SnapshotProvider>,
}

impl AccessibilityProvider for ShortBatchProvider {
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
        self.inner.top_level_applications()
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

    fn attributes(
        &self,
        element: ElementHandle,
        names: &[String],
    ) -> Result<Vec<Option<String>>, ProviderError> {
        self.inner.attributes(element, &names[..1])
    }
}

/// Every call fails with the accessibility permission missing.
pub struct DeniedProvider;

impl AccessibilityProvider for DeniedProvider {
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
        Err(denied())
    }

    fn applications_by_bundle_id(&self, _: &str) -> Result<Vec<ElementHandle>, ProviderError> {
        Err(denied())
    }

    fn children(&self, _: ElementHandle) -> Result<Vec<ElementHandle>, ProviderError> {
        Err(denied())
    }

    fn attribute(&self, _: ElementHandle, _: &str) -> Result<Option<String>, ProviderError> {
        Err(denied())
    }
}

fn denied() -> ProviderError {
    ProviderError::PermissionDenied("accessibility access not granted".into())
}
