//! Parsed plugin metadata.

use std::fmt;

use semver::{Version, VersionReq};
use tracing::warn;

use super::descriptor::PluginDescriptor;

/// Id under which the host itself can be depended on.
pub const HOST_ID: &str = "hearth";

/// Version of the host, as seen by dependency requirements on [`HOST_ID`].
pub fn host_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Returns `true` for a valid plugin id: 1 to 64 characters from `[a-z0-9_]`.
pub fn is_valid_plugin_id(id: &str) -> bool {
    (1..=64).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// A hard dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDependency {
    pub id: String,
    pub requirement: VersionReq,
}

impl PluginDependency {
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.requirement.matches(version)
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.requirement)
    }
}

/// Metadata of one plugin, parsed from its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub id: String,
    pub version: Version,
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub link: Option<String>,
    pub dependencies: Vec<PluginDependency>,
}

impl PluginMetadata {
    /// Parses the descriptor's strings.
    ///
    /// An invalid version becomes `0.0.0` and an invalid requirement is
    /// dropped; both are logged.
    pub fn from_descriptor(desc: &PluginDescriptor) -> Self {
        let version = Version::parse(desc.version).unwrap_or_else(|err| {
            warn!(
                plugin = desc.id,
                version = desc.version,
                error = %err,
                "Invalid plugin version, using 0.0.0"
            );
            Version::new(0, 0, 0)
        });

        let dependencies = desc
            .dependencies
            .iter()
            .filter_map(|(id, requirement)| match VersionReq::parse(requirement) {
                Ok(requirement) => Some(PluginDependency {
                    id: (*id).to_string(),
                    requirement,
                }),
                Err(err) => {
                    warn!(
                        plugin = desc.id,
                        dependency = id,
                        requirement,
                        error = %err,
                        "Invalid dependency requirement, ignored"
                    );
                    None
                }
            })
            .collect();

        let name = if desc.name.is_empty() {
            desc.id
        } else {
            desc.name
        };

        Self {
            id: desc.id.to_string(),
            version,
            name: name.to_string(),
            description: desc.description.to_string(),
            authors: desc.authors.iter().map(|a| a.to_string()).collect(),
            link: desc.link.map(str::to_string),
            dependencies,
        }
    }

    /// Returns `true` if this plugin declares a dependency on `id`.
    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d.id == id)
    }
}

impl fmt::Display for PluginMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginDescriptor};

    struct Empty;
    impl Plugin for Empty {}

    fn create() -> Box<dyn Plugin> {
        Box::new(Empty)
    }

    #[test]
    fn test_plugin_ids() {
        assert!(is_valid_plugin_id("my_plugin2"));
        assert!(!is_valid_plugin_id(""));
        assert!(!is_valid_plugin_id("MyPlugin"));
        assert!(!is_valid_plugin_id("my-plugin"));
        assert!(!is_valid_plugin_id(&"a".repeat(65)));
    }

    #[test]
    fn test_metadata_fallbacks() {
        let desc = PluginDescriptor::new("demo", create)
            .version("not a version")
            .depends_on(&[("base", ">=1.0, <2.0"), ("broken", "~~1")]);
        let meta = PluginMetadata::from_descriptor(&desc);

        assert_eq!(meta.version, Version::new(0, 0, 0));
        assert_eq!(meta.name, "demo");
        assert_eq!(meta.dependencies.len(), 1);
        assert!(meta.depends_on("base"));
        assert!(!meta.depends_on("broken"));
        assert!(meta.dependencies[0].is_satisfied_by(&Version::new(1, 5, 0)));
        assert!(!meta.dependencies[0].is_satisfied_by(&Version::new(2, 0, 0)));
        assert_eq!(meta.to_string(), "demo@0.0.0");
    }
}
