//! Module manifest parsing.
//!
//! Each provider module is a directory with a `manifest.toml` that names the
//! factory producing its plugin objects and, optionally, a declared version.

use parcelforge_core::{ProviderError, ProviderResult, ProviderVersion};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked for in every module directory.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Module manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module metadata.
    pub module: ModuleMetadata,

    /// Factory-specific configuration, passed through untouched.
    #[serde(default)]
    pub config: toml::Table,
}

/// Module metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// Unique identifier for the module.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Version applied to providers that do not report their own.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    /// Name of the module factory that instantiates this module's objects.
    pub factory: String,
}

impl ModuleManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(content: &str) -> ProviderResult<Self> {
        let manifest: ModuleManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ProviderResult<()> {
        if self.module.id.trim().is_empty() {
            return Err(ProviderError::InvalidManifest(
                "Module ID cannot be empty".to_string(),
            ));
        }

        if self.module.factory.trim().is_empty() {
            return Err(ProviderError::InvalidManifest(format!(
                "Module '{}' does not name a factory",
                self.module.id
            )));
        }

        Ok(())
    }

    /// Display name, falling back to the ID.
    pub fn name(&self) -> &str {
        self.module.name.as_deref().unwrap_or(&self.module.id)
    }

    /// Declared version, or unset.
    pub fn declared_version(&self) -> ProviderVersion {
        self.module
            .version
            .as_deref()
            .map(ProviderVersion::parse_lenient)
            .unwrap_or(ProviderVersion::UNSET)
    }

    /// Factory configuration as JSON.
    pub fn config_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let toml = r#"
[module]
id = "gallery"
name = "Gallery providers"
version = "2.8.5.201"
factory = "gallery"
authors = ["packaging team"]

[config]
feed = "https://example.invalid/feed"
retries = 3
"#;

        let manifest = ModuleManifest::parse(toml).unwrap();
        assert_eq!(manifest.module.id, "gallery");
        assert_eq!(manifest.name(), "Gallery providers");
        assert_eq!(manifest.declared_version(), ProviderVersion::new(2, 8, 5, 201));

        let config = manifest.config_json();
        assert_eq!(config["feed"], "https://example.invalid/feed");
        assert_eq!(config["retries"], 3);
    }

    #[test]
    fn test_version_is_optional() {
        let manifest = ModuleManifest::parse(
            r#"
[module]
id = "bare"
factory = "bare"
"#,
        )
        .unwrap();
        assert!(manifest.declared_version().is_unset());
        assert_eq!(manifest.name(), "bare");
    }

    #[test]
    fn test_invalid_manifest() {
        let missing_id = r#"
[module]
id = ""
factory = "x"
"#;
        assert!(ModuleManifest::parse(missing_id).is_err());

        let missing_factory = r#"
[module]
id = "x"
factory = " "
"#;
        let err = ModuleManifest::parse(missing_factory).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidManifest(_)));

        assert!(matches!(
            ModuleManifest::parse("not toml ["),
            Err(ProviderError::Toml(_))
        ));
    }
}
