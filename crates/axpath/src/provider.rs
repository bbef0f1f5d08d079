//! Boundary to the externally-owned accessibility tree.
//!
//! The tree belongs to another process. Every call into it may block for an
//! unbounded time, so callers go through a [`ProviderLane`], which moves each
//! call onto tokio's blocking pool, bounds it with a timeout and stops issuing
//! calls once its cancellation token fires.

use crate::errors::{CallError, ProviderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Opaque, non-owning reference to a node in the external tree.
///
/// The provider mints handles and may stop honoring them at any time; using a
/// handle the provider no longer knows yields [`ProviderError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Read-only capability over the accessibility tree.
///
/// Implementations are synchronous and may block. Children are returned in
/// the tree's native enumeration order.
pub trait AccessibilityProvider: Send + Sync {
    /// Every application the system exposes. Expensive.
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError>;

    /// Running applications with the given bundle identifier.
    fn applications_by_bundle_id(&self, bundle_id: &str)
        -> Result<Vec<ElementHandle>, ProviderError>;

    fn children(&self, element: ElementHandle) -> Result<Vec<ElementHandle>, ProviderError>;

    /// `Ok(None)` when the element does not carry the attribute.
    fn attribute(&self, element: ElementHandle, name: &str)
        -> Result<Option<String>, ProviderError>;

    /// Read several attributes at once. Providers with a batched native API
    /// should override this.
    fn attributes(
        &self,
        element: ElementHandle,
        names: &[String],
    ) -> Result<Vec<Option<String>>, ProviderError> {
        names
            .iter()
            .map(|name| self.attribute(element, name))
            .collect()
    }
}

/// Worker lane for provider calls.
///
/// Cloning is cheap and clones share the cancellation token.
#[derive(Clone)]
pub struct ProviderLane {
    provider: Arc<dyn AccessibilityProvider>,
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl ProviderLane {
    pub fn new(provider: Arc<dyn AccessibilityProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, CallError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AccessibilityProvider) -> Result<T, ProviderError> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let provider = self.provider.clone();
        let handle = task::spawn_blocking(move || f(provider.as_ref()));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(operation, "provider call abandoned after cancellation");
                Err(CallError::Cancelled)
            }
            joined = tokio::time::timeout(self.call_timeout, handle) => match joined {
                Err(_) => {
                    warn!(
                        operation,
                        timeout_ms = self.call_timeout.as_millis() as u64,
                        "provider call timed out"
                    );
                    Err(CallError::Provider(ProviderError::Timeout(format!(
                        "{operation} did not complete within {:?}",
                        self.call_timeout
                    ))))
                }
                Ok(Err(join_error)) => Err(CallError::Provider(ProviderError::Unknown(format!(
                    "{operation} task failed: {join_error}"
                )))),
                Ok(Ok(result)) => result.map_err(CallError::Provider),
            },
        }
    }

    pub async fn top_level_applications(&self) -> Result<Vec<ElementHandle>, CallError> {
        self.call("top_level_applications", |p| p.top_level_applications())
            .await
    }

    pub async fn applications_by_bundle_id(
        &self,
        bundle_id: &str,
    ) -> Result<Vec<ElementHandle>, CallError> {
        let bundle_id = bundle_id.to_string();
        self.call("applications_by_bundle_id", move |p| {
            p.applications_by_bundle_id(&bundle_id)
        })
        .await
    }

    pub async fn children(&self, element: ElementHandle) -> Result<Vec<ElementHandle>, CallError> {
        self.call("children", move |p| p.children(element)).await
    }

    pub async fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, CallError> {
        let name = name.to_string();
        self.call("attribute", move |p| p.attribute(element, &name))
            .await
    }

    pub async fn attributes(
        &self,
        element: ElementHandle,
        names: Vec<String>,
    ) -> Result<Vec<Option<String>>, CallError> {
        self.call("attributes", move |p| {
            let values = p.attributes(element, &names)?;
            if values.len() != names.len() {
                return Err(ProviderError::Unknown(format!(
                    "{element} answered {} of {} requested attributes",
                    values.len(),
                    names.len()
                )));
            }
            Ok(values)
        })
        .await
    }
}
