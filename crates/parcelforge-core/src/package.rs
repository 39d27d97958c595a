//! Records yielded by package providers.

use crate::value::Value;
use crate::version::ProviderVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link relationship pointing at the artifact to install.
pub const INSTALLATION_MEDIA: &str = "installationmedia";

/// Metadata key naming what kind of artifact a bootstrappable provider is.
pub const PROVIDER_TYPE: &str = "providerType";

/// A link attached to a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub relationship: String,
}

/// A package as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareIdentity {
    /// Provider-specific token that identifies the package for later
    /// `download_package` / `install_package` calls.
    pub fast_path: String,
    pub name: String,
    pub version: String,
    pub source: Option<String>,
    pub summary: Option<String>,
    pub provider_name: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub links: Vec<Link>,
}

impl SoftwareIdentity {
    pub fn new(
        fast_path: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            fast_path: fast_path.into(),
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, relationship: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.push(Link {
            href: href.into(),
            relationship: relationship.into(),
        });
        self
    }

    /// Metadata value, looked up case-insensitively.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First link with the given relationship.
    pub fn link(&self, relationship: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.relationship.eq_ignore_ascii_case(relationship))
            .map(|l| l.href.as_str())
    }

    pub fn parsed_version(&self) -> ProviderVersion {
        ProviderVersion::parse_lenient(&self.version)
    }

    /// Decode a yielded value. Values that are not package records yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(_) => value.decode::<Self>().ok().filter(|p| !p.name.is_empty()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::encode(self).unwrap_or_default()
    }
}

/// A package source as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSource {
    pub name: String,
    pub location: String,
    pub trusted: bool,
    pub registered: bool,
    pub provider_name: Option<String>,
}

impl PackageSource {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(_) => value.decode::<Self>().ok().filter(|s| !s.name.is_empty()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::encode(self).unwrap_or_default()
    }
}
