//! In-memory provider over a captured accessibility tree.
//!
//! A snapshot is a JSON document of nested nodes, each carrying its attribute
//! map and children:
//!
//! ```json
//! { "applications": [
//!     { "attributes": { "AXRole": "AXApplication", "bundleIdentifier": "com.acme.calc" },
//!       "children": [ { "attributes": { "AXRole": "AXWindow" } } ] } ] }
//! ```
//!
//! [`SnapshotProvider`] serves it through [`AccessibilityProvider`], counts
//! every call and can detach subtrees to mimic the tree owner invalidating
//! nodes.

use crate::errors::{ConfigError, ProviderError};
use crate::matcher::attributes;
use crate::provider::{AccessibilityProvider, ElementHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            attributes: BTreeMap::from([(attributes::ROLE.to_string(), role.into())]),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = SnapshotNode>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub applications: Vec<SnapshotNode>,
}

/// Number of provider calls served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallCounts {
    pub top_level_applications: usize,
    pub applications_by_bundle_id: usize,
    pub children: usize,
    pub attribute_reads: usize,
}

#[derive(Debug, Default)]
struct Counters {
    top_level_applications: AtomicUsize,
    applications_by_bundle_id: AtomicUsize,
    children: AtomicUsize,
    attribute_reads: AtomicUsize,
}

#[derive(Debug)]
struct StoredNode {
    attributes: BTreeMap<String, String>,
    parent: Option<ElementHandle>,
    children: Vec<ElementHandle>,
    attached: bool,
}

#[derive(Debug)]
pub struct SnapshotProvider {
    nodes: RwLock<Vec<StoredNode>>,
    roots: Vec<ElementHandle>,
    counters: Counters,
}

impl SnapshotProvider {
    pub fn new(applications: Vec<SnapshotNode>) -> Self {
        let mut nodes = Vec::new();
        let roots = applications
            .into_iter()
            .map(|app| Self::store(&mut nodes, app, None))
            .collect();
        Self {
            nodes: RwLock::new(nodes),
            roots,
            counters: Counters::default(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self::new(snapshot.applications)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn store(
        nodes: &mut Vec<StoredNode>,
        node: SnapshotNode,
        parent: Option<ElementHandle>,
    ) -> ElementHandle {
        let handle = ElementHandle::new(nodes.len() as u64);
        nodes.push(StoredNode {
            attributes: node.attributes,
            parent,
            children: Vec::new(),
            attached: true,
        });
        let children: Vec<ElementHandle> = node
            .children
            .into_iter()
            .map(|child| Self::store(nodes, child, Some(handle)))
            .collect();
        nodes[handle.raw() as usize].children = children;
        handle
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            top_level_applications: self.counters.top_level_applications.load(Ordering::SeqCst),
            applications_by_bundle_id: self
                .counters
                .applications_by_bundle_id
                .load(Ordering::SeqCst),
            children: self.counters.children.load(Ordering::SeqCst),
            attribute_reads: self.counters.attribute_reads.load(Ordering::SeqCst),
        }
    }

    pub fn reset_calls(&self) {
        self.counters.top_level_applications.store(0, Ordering::SeqCst);
        self.counters.applications_by_bundle_id.store(0, Ordering::SeqCst);
        self.counters.children.store(0, Ordering::SeqCst);
        self.counters.attribute_reads.store(0, Ordering::SeqCst);
    }

    pub fn roots(&self) -> &[ElementHandle] {
        &self.roots
    }

    /// Attached handles whose `name` attribute equals `value`, in tree order.
    pub fn find_all(&self, name: &str, value: &str) -> Vec<ElementHandle> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut found = Vec::new();
        let mut stack: Vec<ElementHandle> = self.roots.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            let node = &nodes[handle.raw() as usize];
            if !node.attached {
                continue;
            }
            if node.attributes.get(name).map(String::as_str) == Some(value) {
                found.push(handle);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        found
    }

    pub fn find(&self, name: &str, value: &str) -> Option<ElementHandle> {
        self.find_all(name, value).into_iter().next()
    }

    /// Ancestors of `handle`, outermost first, not including `handle`.
    pub fn ancestors(&self, handle: ElementHandle) -> Vec<ElementHandle> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        let mut chain = Vec::new();
        let mut current = nodes.get(handle.raw() as usize).and_then(|n| n.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = nodes[parent.raw() as usize].parent;
        }
        chain.reverse();
        chain
    }

    /// Mark `handle` and its subtree stale. Its parent stops listing it.
    pub fn detach(&self, handle: ElementHandle) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let Some(parent) = nodes.get(handle.raw() as usize).map(|n| n.parent) else {
            return;
        };
        if let Some(parent) = parent {
            nodes[parent.raw() as usize].children.retain(|c| *c != handle);
        }
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let node = &mut nodes[current.raw() as usize];
            node.attached = false;
            stack.extend(node.children.iter().copied());
        }
        debug!(%handle, "detached snapshot subtree");
    }

    fn with_node<T>(
        &self,
        handle: ElementHandle,
        f: impl FnOnce(&StoredNode) -> T,
    ) -> Result<T, ProviderError> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        match nodes.get(handle.raw() as usize) {
            Some(node) if node.attached => Ok(f(node)),
            Some(_) => Err(ProviderError::StaleHandle(format!("{handle} was detached"))),
            None => Err(ProviderError::StaleHandle(format!("{handle} is unknown"))),
        }
    }

    fn attached_roots(&self) -> Vec<ElementHandle> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        self.roots
            .iter()
            .copied()
            .filter(|h| nodes[h.raw() as usize].attached)
            .collect()
    }
}

impl AccessibilityProvider for SnapshotProvider {
    fn top_level_applications(&self) -> Result<Vec<ElementHandle>, ProviderError> {
        self.counters
            .top_level_applications
            .fetch_add(1, Ordering::SeqCst);
        Ok(self.attached_roots())
    }

    fn applications_by_bundle_id(
        &self,
        bundle_id: &str,
    ) -> Result<Vec<ElementHandle>, ProviderError> {
        self.counters
            .applications_by_bundle_id
            .fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        Ok(self
            .roots
            .iter()
            .copied()
            .filter(|h| {
                let node = &nodes[h.raw() as usize];
                node.attached
                    && node
                        .attributes
                        .get(attributes::BUNDLE_IDENTIFIER)
                        .is_some_and(|id| id == bundle_id)
            })
            .collect())
    }

    fn children(&self, element: ElementHandle) -> Result<Vec<ElementHandle>, ProviderError> {
        self.counters.children.fetch_add(1, Ordering::SeqCst);
        self.with_node(element, |node| node.children.clone())
    }

    fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.counters.attribute_reads.fetch_add(1, Ordering::SeqCst);
        self.with_node(element, |node| node.attributes.get(name).cloned())
    }

    fn attributes(
        &self,
        element: ElementHandle,
        names: &[String],
    ) -> Result<Vec<Option<String>>, ProviderError> {
        self.counters.attribute_reads.fetch_add(1, Ordering::SeqCst);
        self.with_node(element, |node| {
            names
                .iter()
                .map(|name| node.attributes.get(name).cloned())
                .collect()
        })
    }
}
