//! Module sources and factories.
//!
//! A [`ModuleSource`] turns a discovery location into [`ModuleDescriptor`]s
//! and instantiates a descriptor into candidate plugin objects. Objects are
//! produced by [`ModuleFactory`] implementations registered in a
//! [`FactoryCatalog`] under the name a module's manifest refers to.

use crate::discovery::{scan_location, ModulePath};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcelforge_core::{PluginRef, ProviderError, ProviderResult, ProviderVersion};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the loader needs to know about one module before loading it.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Stable identity (module path or inline key).
    pub identity: String,

    /// Human-readable name.
    pub name: String,

    /// Version applied to providers that report none. May be unset.
    pub declared_version: ProviderVersion,

    /// Artifact timestamp, the next fallback after the declared version.
    pub timestamp: Option<DateTime<Utc>>,

    /// Content fingerprint; an unchanged fingerprint means the module is
    /// skipped on re-discovery.
    pub fingerprint: String,

    /// Factory that instantiates the module.
    pub factory: String,

    /// Factory configuration.
    pub config: serde_json::Value,
}

impl ModuleDescriptor {
    /// Version for a provider that reported `reported`, falling back to the
    /// declared version, then the timestamp, then [`ProviderVersion::MINIMUM`].
    pub fn effective_version(&self, reported: ProviderVersion) -> ProviderVersion {
        let stamped = self
            .timestamp
            .map(|ts| ProviderVersion::from_timestamp(&ts))
            .unwrap_or(ProviderVersion::UNSET);
        reported
            .or(self.declared_version)
            .or(stamped)
            .or(ProviderVersion::MINIMUM)
    }
}

/// SHA-256 over the given parts, hex encoded.
pub fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Produces plugin objects for a module.
pub trait ModuleFactory: Send + Sync {
    /// Name manifests use to refer to this factory.
    fn name(&self) -> &str;

    /// Instantiate every candidate object the module exports.
    fn create(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>>;
}

/// Named module factories.
#[derive(Default)]
pub struct FactoryCatalog {
    factories: RwLock<HashMap<String, Arc<dyn ModuleFactory>>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A factory with the same name is replaced.
    pub fn register(&self, factory: Arc<dyn ModuleFactory>) {
        let name = factory.name().to_lowercase();
        tracing::debug!(factory = %name, "registered module factory");
        self.factories.write().insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleFactory>> {
        self.factories.read().get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// A kind of place modules come from.
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// List the modules available at `location`. A location this source does
    /// not understand yields an empty list.
    async fn scan(&self, location: &str) -> ProviderResult<Vec<ModuleDescriptor>>;

    /// Instantiate a module's candidate objects. May be slow; the loader runs
    /// it on the blocking pool.
    fn instantiate(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>>;
}

/// Modules laid out as directories with a `manifest.toml`.
pub struct ManifestModuleSource {
    catalog: Arc<FactoryCatalog>,
}

impl ManifestModuleSource {
    pub fn new(catalog: Arc<FactoryCatalog>) -> Self {
        Self { catalog }
    }

    fn describe(module: ModulePath) -> ModuleDescriptor {
        let identity = module.path.display().to_string();
        let fingerprint = fingerprint([
            identity.as_bytes(),
            module.manifest_bytes.as_slice(),
        ]);
        ModuleDescriptor {
            identity,
            name: module.manifest.name().to_string(),
            declared_version: module.manifest.declared_version(),
            timestamp: module.modified,
            fingerprint,
            factory: module.manifest.module.factory.clone(),
            config: module.manifest.config_json(),
        }
    }
}

#[async_trait]
impl ModuleSource for ManifestModuleSource {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn scan(&self, location: &str) -> ProviderResult<Vec<ModuleDescriptor>> {
        let path = PathBuf::from(location);
        let modules = tokio::task::spawn_blocking(move || scan_location(&path))
            .await
            .map_err(|e| ProviderError::ModuleLoad {
                source_id: location.to_string(),
                message: e.to_string(),
            })??;
        Ok(modules.into_iter().map(Self::describe).collect())
    }

    fn instantiate(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>> {
        let factory = self
            .catalog
            .get(&descriptor.factory)
            .ok_or_else(|| ProviderError::ModuleLoad {
                source_id: descriptor.identity.clone(),
                message: format!("unknown module factory '{}'", descriptor.factory),
            })?;
        factory.create(descriptor)
    }
}

type ObjectsFn = Arc<dyn Fn() -> ProviderResult<Vec<PluginRef>> + Send + Sync>;

struct InlineModule {
    descriptor: ModuleDescriptor,
    objects: ObjectsFn,
}

/// Modules registered in memory under a location key.
///
/// Useful for providers linked into the host binary and for tests.
#[derive(Default)]
pub struct InlineModuleSource {
    modules: Mutex<HashMap<String, Vec<InlineModule>>>,
    revision: Mutex<u64>,
}

impl InlineModuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a module under `location`. Replacing a module changes
    /// its fingerprint so the next discovery reloads it.
    pub fn add<F>(&self, location: &str, name: &str, version: Option<&str>, objects: F)
    where
        F: Fn() -> ProviderResult<Vec<PluginRef>> + Send + Sync + 'static,
    {
        let revision = {
            let mut revision = self.revision.lock();
            *revision += 1;
            *revision
        };
        let identity = format!("{location}/{name}");
        let descriptor = ModuleDescriptor {
            fingerprint: fingerprint([
                identity.as_bytes(),
                version.unwrap_or_default().as_bytes(),
                revision.to_le_bytes().as_slice(),
            ]),
            identity,
            name: name.to_string(),
            declared_version: version
                .map(ProviderVersion::parse_lenient)
                .unwrap_or(ProviderVersion::UNSET),
            timestamp: None,
            factory: String::new(),
            config: serde_json::Value::Null,
        };

        let mut modules = self.modules.lock();
        let entries = modules.entry(location.to_string()).or_default();
        entries.retain(|m| m.descriptor.name != name);
        entries.push(InlineModule {
            descriptor,
            objects: Arc::new(objects),
        });
    }

    /// Add a module from a factory.
    pub fn add_factory(
        &self,
        location: &str,
        version: Option<&str>,
        factory: Arc<dyn ModuleFactory>,
    ) {
        let name = factory.name().to_string();
        let descriptor = ModuleDescriptor {
            identity: format!("{location}/{name}"),
            name: name.clone(),
            declared_version: version
                .map(ProviderVersion::parse_lenient)
                .unwrap_or(ProviderVersion::UNSET),
            timestamp: None,
            fingerprint: String::new(),
            factory: name.clone(),
            config: serde_json::Value::Null,
        };
        self.add(location, &name, version, move || factory.create(&descriptor));
    }
}

#[async_trait]
impl ModuleSource for InlineModuleSource {
    fn name(&self) -> &str {
        "inline"
    }

    async fn scan(&self, location: &str) -> ProviderResult<Vec<ModuleDescriptor>> {
        Ok(self
            .modules
            .lock()
            .get(location)
            .map(|entries| entries.iter().map(|m| m.descriptor.clone()).collect())
            .unwrap_or_default())
    }

    fn instantiate(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>> {
        let objects = self
            .modules
            .lock()
            .values()
            .flatten()
            .find(|m| m.descriptor.identity == descriptor.identity)
            .map(|m| Arc::clone(&m.objects))
            .ok_or_else(|| ProviderError::ModuleLoad {
                source_id: descriptor.identity.clone(),
                message: "module no longer registered".to_string(),
            })?;
        objects()
    }
}
