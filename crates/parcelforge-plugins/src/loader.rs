//! Provider discovery.
//!
//! [`PluginLoader::discover`] scans locations concurrently. Every module found
//! is instantiated on the blocking pool, and each exported object is tested
//! against the four capability categories as independent tasks. Meta-providers
//! are initialized and asked to construct the providers they know about, which
//! are then tested and registered like any other candidate.
//!
//! Nothing that goes wrong with a single module or candidate stops the scan:
//! the failure is reported as a debug diagnostic and the candidate is skipped.

use crate::module::{ModuleDescriptor, ModuleSource};
use crate::registry::{ProviderRecord, ProviderRegistry};
use parcelforge_core::{
    CapabilityAdapter, CapabilityKind, Diagnostic, DiagnosticKind, HostRequest, PluginRef,
    ProviderError, ProviderHandle, ProviderResult, ProviderVersion, SharedHost, Value,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Loader settings.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Run each provider's one-time setup as soon as it is registered instead
    /// of on first use.
    pub eager_initialize: bool,
}

struct LoaderInner {
    adapter: Arc<CapabilityAdapter>,
    registry: Arc<ProviderRegistry>,
    sources: Vec<Arc<dyn ModuleSource>>,
    options: LoaderOptions,
    /// Module identity to the fingerprint of its last successful load.
    fingerprints: Mutex<HashMap<String, String>>,
    known_locations: Mutex<Vec<String>>,
}

/// Discovers modules and registers the providers they export.
#[derive(Clone)]
pub struct PluginLoader {
    inner: Arc<LoaderInner>,
}

impl PluginLoader {
    pub fn new(
        adapter: Arc<CapabilityAdapter>,
        registry: Arc<ProviderRegistry>,
        sources: Vec<Arc<dyn ModuleSource>>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                adapter,
                registry,
                sources,
                options,
                fingerprints: Mutex::new(HashMap::new()),
                known_locations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    pub fn adapter(&self) -> &Arc<CapabilityAdapter> {
        &self.inner.adapter
    }

    /// Every location passed to [`PluginLoader::discover`] so far, in first-seen
    /// order.
    pub fn known_locations(&self) -> Vec<String> {
        self.inner.known_locations.lock().clone()
    }

    /// Scan `locations` and register every provider found. Returns the number
    /// of providers that became active.
    ///
    /// Modules whose fingerprint has not changed since they were last loaded
    /// are skipped, so discovery can be re-run cheaply.
    pub async fn discover(&self, locations: &[String], host: SharedHost) -> usize {
        {
            let mut known = self.inner.known_locations.lock();
            for location in locations {
                if !known.contains(location) {
                    known.push(location.clone());
                }
            }
        }

        let mut tasks = JoinSet::new();
        for location in locations {
            let loader = self.clone();
            let location = location.clone();
            let host = host.clone();
            tasks.spawn(async move { loader.discover_location(location, host).await });
        }

        let mut registered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(count) => registered += count,
                Err(e) => skip(&host, DiagnosticKind::ModuleLoad, "discovery", e.to_string()),
            }
        }

        info!(locations = locations.len(), registered, "discovery finished");
        registered
    }

    async fn discover_location(&self, location: String, host: SharedHost) -> usize {
        let mut registered = 0;
        for source in &self.inner.sources {
            let descriptors = match source.scan(&location).await {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    skip(&host, DiagnosticKind::ModuleLoad, &location, e.to_string());
                    continue;
                }
            };
            debug!(location = %location, source = source.name(), modules = descriptors.len(), "scanned location");

            for descriptor in descriptors {
                if !self.reserve(&descriptor) {
                    debug!(module = %descriptor.identity, "module unchanged; skipping");
                    continue;
                }
                registered += self
                    .load_module(Arc::clone(source), Arc::new(descriptor), host.clone())
                    .await;
            }
        }
        registered
    }

    /// Claim a module for loading. Returns false if the same content was
    /// already loaded (or is being loaded).
    fn reserve(&self, descriptor: &ModuleDescriptor) -> bool {
        let mut fingerprints = self.inner.fingerprints.lock();
        if fingerprints.get(&descriptor.identity) == Some(&descriptor.fingerprint) {
            return false;
        }
        fingerprints.insert(descriptor.identity.clone(), descriptor.fingerprint.clone());
        true
    }

    fn release(&self, descriptor: &ModuleDescriptor) {
        let mut fingerprints = self.inner.fingerprints.lock();
        if fingerprints.get(&descriptor.identity) == Some(&descriptor.fingerprint) {
            fingerprints.remove(&descriptor.identity);
        }
    }

    async fn load_module(
        &self,
        source: Arc<dyn ModuleSource>,
        descriptor: Arc<ModuleDescriptor>,
        host: SharedHost,
    ) -> usize {
        let module = Arc::clone(&descriptor);
        let objects = tokio::task::spawn_blocking(move || source.instantiate(&module))
            .await
            .unwrap_or_else(|e| Err(ProviderError::plugin(format!("module panicked: {e}"))));

        let objects = match objects {
            Ok(objects) => objects,
            Err(e) => {
                self.release(&descriptor);
                skip(&host, DiagnosticKind::ModuleLoad, &descriptor.identity, e.to_string());
                return 0;
            }
        };
        debug!(module = %descriptor.identity, objects = objects.len(), "instantiated module");

        let mut tasks = JoinSet::new();
        for object in objects {
            for kind in CapabilityKind::ALL {
                let loader = self.clone();
                let object = Arc::clone(&object);
                let descriptor = Arc::clone(&descriptor);
                let host = host.clone();
                tasks.spawn(async move {
                    loader.load_candidate(object, kind, descriptor, host).await
                });
            }
        }

        let mut registered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(count) => registered += count,
                Err(e) => skip(&host, DiagnosticKind::Registration, &descriptor.identity, e.to_string()),
            }
        }
        registered
    }

    /// Test one object against one category and register it if it fits.
    async fn load_candidate(
        &self,
        object: PluginRef,
        kind: CapabilityKind,
        descriptor: Arc<ModuleDescriptor>,
        host: SharedHost,
    ) -> usize {
        if !self.inner.adapter.is_satisfied_by(object.as_ref(), kind) {
            return 0;
        }
        let handle = match self.inner.adapter.adapt(&object, kind) {
            Ok(handle) => handle,
            Err(mismatch) => {
                skip(&host, DiagnosticKind::Registration, &descriptor.identity, mismatch.to_string());
                return 0;
            }
        };

        let Some(record) = self.register_candidate(handle, &descriptor, host.clone()).await else {
            return 0;
        };
        if kind == CapabilityKind::MetaProvider {
            1 + self.expand_meta(record, host).await
        } else {
            1
        }
    }

    /// Read a candidate's name and version and hand it to the registry.
    /// Returns the record if it became active.
    async fn register_candidate(
        &self,
        handle: ProviderHandle,
        descriptor: &ModuleDescriptor,
        host: SharedHost,
    ) -> Option<Arc<ProviderRecord>> {
        let kind = handle.kind();
        let probe = handle.clone();
        let request_host = host.clone();
        let identity = probe_identity(probe, request_host).await;

        let (name, reported) = match identity {
            Ok(identity) => identity,
            Err(e) => {
                skip(&host, DiagnosticKind::Registration, &descriptor.identity, e.to_string());
                return None;
            }
        };

        let version = descriptor.effective_version(reported);
        let outcome = self
            .inner
            .registry
            .register(&name, version, handle, &descriptor.identity);
        if !outcome.is_active() {
            return None;
        }

        let record = self.inner.registry.lookup(&name, kind)?;
        if self.inner.options.eager_initialize && kind != CapabilityKind::MetaProvider {
            // Failures are reported by the registry and exclude the record.
            let _ = self.inner.registry.ensure_initialized(&record, host).await;
        }
        Some(record)
    }

    /// Initialize a meta-provider and register every provider it can construct.
    async fn expand_meta(&self, meta: Arc<ProviderRecord>, host: SharedHost) -> usize {
        if self
            .inner
            .registry
            .ensure_initialized(&meta, host.clone())
            .await
            .is_err()
        {
            return 0;
        }

        let handle = meta.handle().clone();
        let request_host = host.clone();
        let names = tokio::task::spawn_blocking(move || {
            let request = HostRequest::new(request_host, handle.label());
            handle.call("get_provider_names", &[], &request)
        })
        .await
        .unwrap_or_else(|e| Err(ProviderError::plugin(format!("meta-provider panicked: {e}"))));

        let names = match names {
            Ok(names) => names.to_string_list(),
            Err(e) => {
                skip(&host, DiagnosticKind::Registration, meta.name(), e.to_string());
                return 0;
            }
        };
        debug!(meta_provider = meta.name(), providers = ?names, "expanding meta-provider");

        let mut tasks = JoinSet::new();
        for name in names {
            let loader = self.clone();
            let meta = Arc::clone(&meta);
            let host = host.clone();
            tasks.spawn(async move { loader.construct(meta, name, host).await });
        }

        let mut registered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(count) => registered += count,
                Err(e) => skip(&host, DiagnosticKind::Registration, meta.name(), e.to_string()),
            }
        }
        registered
    }

    /// Ask `meta` to construct `provider_name` and register what it returns.
    async fn construct(&self, meta: Arc<ProviderRecord>, provider_name: String, host: SharedHost) -> usize {
        let handle = meta.handle().clone();
        let request_host = host.clone();
        let requested = provider_name.clone();
        let created = tokio::task::spawn_blocking(move || {
            let request = HostRequest::new(request_host, handle.label());
            handle.call("create_provider", &[Value::from(requested)], &request)
        })
        .await
        .unwrap_or_else(|e| Err(ProviderError::plugin(format!("meta-provider panicked: {e}"))));

        let source = format!("{}/{}", meta.name(), provider_name);
        let object = match created {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                skip(&host, DiagnosticKind::Registration, &source, "meta-provider returned no object");
                return 0;
            }
            Err(e) => {
                skip(&host, DiagnosticKind::Registration, &source, e.to_string());
                return 0;
            }
        };

        let descriptor = ModuleDescriptor {
            identity: format!("{}#{}", meta.origin(), meta.name()),
            name: meta.name().to_string(),
            declared_version: meta.version(),
            timestamp: None,
            fingerprint: String::new(),
            factory: String::new(),
            config: serde_json::Value::Null,
        };

        let mut registered = 0;
        let mut satisfied = false;
        for kind in CapabilityKind::CONSTRUCTIBLE {
            let Ok(handle) = self.inner.adapter.adapt(&object, kind) else {
                continue;
            };
            satisfied = true;
            if self.register_candidate(handle, &descriptor, host.clone()).await.is_some() {
                registered += 1;
            }
        }
        if !satisfied {
            skip(&host, DiagnosticKind::Registration, &source, "constructed object satisfies no capability");
        }
        registered
    }

    /// Construct and register a single provider through an already registered
    /// meta-provider. Returns the number of providers that became active.
    pub async fn load_via_meta_provider(
        &self,
        meta_name: &str,
        provider_name: &str,
        host: SharedHost,
    ) -> ProviderResult<usize> {
        let meta = self
            .inner
            .registry
            .lookup(meta_name, CapabilityKind::MetaProvider)
            .ok_or_else(|| ProviderError::NotFound(format!("meta-provider '{meta_name}'")))?;
        self.inner
            .registry
            .ensure_initialized(&meta, host.clone())
            .await?;
        Ok(self.construct(meta, provider_name.to_string(), host).await)
    }
}

/// Read a candidate's registered name and self-reported version.
async fn probe_identity(
    handle: ProviderHandle,
    host: SharedHost,
) -> ProviderResult<(String, ProviderVersion)> {
    tokio::task::spawn_blocking(move || {
        let request = HostRequest::new(host, handle.type_name());
        let name = handle
            .call(handle.kind().name_member(), &[], &request)?
            .as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::plugin(format!("{} reported no name", handle.type_name())))?;
        let version = handle
            .call("get_provider_version", &[], &request)?
            .as_str()
            .map(ProviderVersion::parse_lenient)
            .unwrap_or(ProviderVersion::UNSET);
        Ok((name, version))
    })
    .await
    .unwrap_or_else(|e| Err(ProviderError::plugin(format!("candidate panicked: {e}"))))
}

fn skip(host: &SharedHost, kind: DiagnosticKind, source: &str, message: impl Into<String>) {
    let message = message.into();
    debug!(source, kind = ?kind, "skipping: {}", message);
    host.emit(Diagnostic::debug(kind, source, message));
}
