//! Where plugin descriptors come from.
//!
//! - [`LinkedPlugins`]: descriptors linked into the binary with
//!   [`export_plugin!`](crate::export_plugin), collected at link time.
//! - [`StaticPlugins`]: an explicit list.
//! - [`PluginCatalog`]: several sources merged; the first descriptor of an
//!   id wins.

use std::collections::HashSet;
use std::sync::Arc;

use linkme::distributed_slice;
use parking_lot::RwLock;
use tracing::warn;

use super::descriptor::PluginDescriptor;

/// Every descriptor exported with [`export_plugin!`](crate::export_plugin).
#[distributed_slice]
pub static PLUGINS: [PluginDescriptor];

/// A set of plugin descriptors.
///
/// Enumerated by `load_all` and `refresh`; a descriptor that disappears
/// from the set is unloaded on the next refresh.
pub trait PluginSource: Send + Sync {
    fn descriptors(&self) -> Vec<PluginDescriptor>;

    /// Looks up one descriptor by id.
    fn find(&self, id: &str) -> Option<PluginDescriptor> {
        self.descriptors().into_iter().find(|d| d.id == id)
    }
}

/// Descriptors linked into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedPlugins;

impl PluginSource for LinkedPlugins {
    fn descriptors(&self) -> Vec<PluginDescriptor> {
        PLUGINS.iter().copied().collect()
    }
}

/// An explicit, mutable list of descriptors.
#[derive(Debug, Default)]
pub struct StaticPlugins {
    descriptors: RwLock<Vec<PluginDescriptor>>,
}

impl StaticPlugins {
    pub fn new(descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        Self {
            descriptors: RwLock::new(descriptors.into_iter().collect()),
        }
    }

    /// Adds a descriptor, replacing one with the same id.
    pub fn add(&self, descriptor: PluginDescriptor) {
        let mut list = self.descriptors.write();
        list.retain(|d| d.id != descriptor.id);
        list.push(descriptor);
    }

    /// Removes a descriptor. Returns `false` if it was not listed.
    pub fn remove(&self, id: &str) -> bool {
        let mut list = self.descriptors.write();
        let before = list.len();
        list.retain(|d| d.id != id);
        list.len() != before
    }
}

impl PluginSource for StaticPlugins {
    fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.descriptors.read().clone()
    }
}

/// Several sources merged in order.
#[derive(Default, Clone)]
pub struct PluginCatalog {
    sources: Vec<Arc<dyn PluginSource>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn PluginSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl PluginSource for PluginCatalog {
    fn descriptors(&self) -> Vec<PluginDescriptor> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for descriptor in self.sources.iter().flat_map(|s| s.descriptors()) {
            if seen.insert(descriptor.id) {
                merged.push(descriptor);
            } else {
                warn!(plugin = descriptor.id, "Duplicate plugin id in catalog, ignored");
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;

    #[derive(Default)]
    struct Linked;
    impl Plugin for Linked {}

    crate::export_plugin! {
        static LINKED: PluginDescriptor = crate::define_plugin!(Linked {
            id: "catalog_linked",
            version: "2.0.0",
        });
    }

    fn create() -> Box<dyn Plugin> {
        Box::new(Linked)
    }

    #[test]
    fn test_linked_plugins_are_collected() {
        let found = LinkedPlugins.find("catalog_linked").expect("linked descriptor");
        assert_eq!(found.version, "2.0.0");
        assert_eq!(LINKED.id, "catalog_linked");
    }

    #[test]
    fn test_catalog_first_wins() {
        let first = Arc::new(StaticPlugins::new([
            PluginDescriptor::new("a", create).version("1.0.0"),
        ]));
        let second = Arc::new(StaticPlugins::new([
            PluginDescriptor::new("a", create).version("9.0.0"),
            PluginDescriptor::new("b", create),
        ]));
        let catalog = PluginCatalog::new()
            .with_source(first.clone())
            .with_source(second);

        let ids: Vec<_> = catalog.descriptors().iter().map(|d| (d.id, d.version)).collect();
        assert_eq!(ids, vec![("a", "1.0.0"), ("b", "0.0.0")]);

        assert!(first.remove("a"));
        assert_eq!(catalog.find("a").map(|d| d.version), Some("9.0.0"));
    }
}
