//! Plugin descriptor: the static, `Copy` handle to a plugin.

use super::core::Plugin;
use super::metadata::PluginMetadata;

// ─── API versioning ─────────────────────────────────────────────────────────────────────────────

/// Current Hearth plugin API version (1.0).
pub const HEARTH_PLUGIN_API_VERSION: u32 = 0x0001_0000;

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// A static, `Copy` descriptor that identifies and instantiates a plugin.
///
/// # Creating descriptors
///
/// Use the [`define_plugin!`](crate::define_plugin) macro, or the `const`
/// builder methods directly:
///
/// ```rust,ignore
/// pub static BACKUP: PluginDescriptor = PluginDescriptor::new("backup", Backup::create)
///     .version("1.2.0")
///     .depends_on(&[("hearth", ">=0.1")]);
/// ```
///
/// # Memory layout
///
/// `PluginDescriptor` is `#[repr(C)]`.  Fields **must not be reordered**.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,

    /// Unique plugin id, `[a-z0-9_]{1,64}`.
    pub id: &'static str,

    /// Semver version string.
    pub version: &'static str,

    /// Display name; the id is used when empty.
    pub name: &'static str,

    pub description: &'static str,

    pub authors: &'static [&'static str],

    pub link: Option<&'static str>,

    /// Hard dependencies as `(plugin id, semver requirement)` pairs.
    pub dependencies: &'static [(&'static str, &'static str)],

    /// Factory function that creates the live [`Plugin`] instance.
    pub create: fn() -> Box<dyn Plugin>,
}

impl PluginDescriptor {
    pub const fn new(id: &'static str, create: fn() -> Box<dyn Plugin>) -> Self {
        Self {
            api_version: HEARTH_PLUGIN_API_VERSION,
            id,
            version: "0.0.0",
            name: "",
            description: "",
            authors: &[],
            link: None,
            dependencies: &[],
            create,
        }
    }

    pub const fn version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    pub const fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub const fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn authors(mut self, authors: &'static [&'static str]) -> Self {
        self.authors = authors;
        self
    }

    pub const fn link(mut self, link: &'static str) -> Self {
        self.link = Some(link);
        self
    }

    pub const fn depends_on(mut self, dependencies: &'static [(&'static str, &'static str)]) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Returns `true` if this descriptor's API version is compatible with the
    /// running framework.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = HEARTH_PLUGIN_API_VERSION >> 16;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        let host_minor = HEARTH_PLUGIN_API_VERSION & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    /// Creates the live plugin from the factory function.
    #[inline]
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        (self.create)()
    }

    /// Parses this descriptor's metadata.
    pub fn metadata(&self) -> PluginMetadata {
        PluginMetadata::from_descriptor(self)
    }

    /// `"major.minor"` of the descriptor's API version.
    pub fn api_version_string(&self) -> String {
        format!("{}.{}", self.api_version >> 16, self.api_version & 0xFFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;
    impl Plugin for Empty {}

    fn create() -> Box<dyn Plugin> {
        Box::new(Empty)
    }

    static DESC: PluginDescriptor = PluginDescriptor::new("empty", create)
        .version("1.0.0")
        .name("Empty")
        .authors(&["someone"])
        .depends_on(&[("hearth", ">=0.1")]);

    #[test]
    fn test_api_compatibility() {
        assert!(DESC.is_compatible());

        let newer_minor = PluginDescriptor {
            api_version: HEARTH_PLUGIN_API_VERSION + 1,
            ..DESC
        };
        assert!(!newer_minor.is_compatible());

        let other_major = PluginDescriptor {
            api_version: 0x0002_0000,
            ..DESC
        };
        assert!(!other_major.is_compatible());
        assert_eq!(other_major.api_version_string(), "2.0");
    }

    #[test]
    fn test_const_builder() {
        let meta = DESC.metadata();
        assert_eq!(meta.name, "Empty");
        assert_eq!(meta.authors, vec!["someone"]);
        assert!(meta.depends_on("hearth"));
        assert!(DESC.instantiate().downcast_ref::<Empty>().is_some());
    }
}
