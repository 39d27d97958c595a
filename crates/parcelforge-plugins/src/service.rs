//! The provider service: everything a host needs, wired together.

use crate::bootstrap::{BootstrapOptions, BootstrapResolver};
use crate::discovery::default_locations;
use crate::facade::{Archiver, Downloader, PackageProvider};
use crate::loader::{LoaderOptions, PluginLoader};
use crate::module::ModuleSource;
use crate::registry::{ProviderRecord, ProviderRegistry};
use parcelforge_core::{
    CapabilityAdapter, CapabilityKind, Diagnostic, DiagnosticKind, ProviderVersion, SharedHost,
};
use parcelforge_runtime::{DispatchOptions, Dispatcher};
use std::sync::Arc;
use tracing::{debug, info};

/// Settings for [`ProviderService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Locations scanned by [`ProviderService::discover`].
    pub locations: Vec<String>,

    /// Also scan the user and system provider directories.
    pub include_default_locations: bool,

    pub loader: LoaderOptions,
    pub dispatch: DispatchOptions,
    pub bootstrap: BootstrapOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            include_default_locations: true,
            loader: LoaderOptions::default(),
            dispatch: DispatchOptions::default(),
            bootstrap: BootstrapOptions::default(),
        }
    }
}

/// Owns the adapter, registry, loader, dispatcher and bootstrap resolver.
///
/// The registry lives as long as the service; [`ProviderService::shutdown`]
/// cancels every outstanding request.
pub struct ProviderService {
    adapter: Arc<CapabilityAdapter>,
    registry: Arc<ProviderRegistry>,
    loader: PluginLoader,
    dispatcher: Arc<Dispatcher>,
    bootstrap: Arc<BootstrapResolver>,
    locations: Vec<String>,
}

impl ProviderService {
    pub fn new(sources: Vec<Arc<dyn ModuleSource>>, options: ServiceOptions) -> Self {
        let adapter = Arc::new(CapabilityAdapter::new());
        let registry = Arc::new(ProviderRegistry::new());
        let loader = PluginLoader::new(
            Arc::clone(&adapter),
            Arc::clone(&registry),
            sources,
            options.loader,
        );
        let dispatcher = Arc::new(Dispatcher::new(options.dispatch));
        let bootstrap = Arc::new(BootstrapResolver::new(
            loader.clone(),
            Arc::clone(&dispatcher),
            options.bootstrap,
        ));

        let mut locations = options.locations;
        if options.include_default_locations {
            for dir in default_locations() {
                let dir = dir.display().to_string();
                if !locations.contains(&dir) {
                    locations.push(dir);
                }
            }
        }

        Self {
            adapter,
            registry,
            loader,
            dispatcher,
            bootstrap,
            locations,
        }
    }

    pub fn adapter(&self) -> &Arc<CapabilityAdapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn bootstrap(&self) -> &Arc<BootstrapResolver> {
        &self.bootstrap
    }

    /// Locations scanned by [`ProviderService::discover`].
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Scan the configured locations.
    pub async fn discover(&self, host: SharedHost) -> usize {
        self.loader.discover(&self.locations, host).await
    }

    /// Package providers matching `pattern`, initialized and ready.
    ///
    /// A pattern with wildcards selects every matching provider. A plain name
    /// that is not registered is bootstrapped if possible; otherwise an
    /// "unknown provider" warning is emitted.
    pub async fn select_providers(&self, pattern: &str, host: SharedHost) -> Vec<PackageProvider> {
        let records = if has_wildcards(pattern) {
            self.registry.lookup_all(pattern, CapabilityKind::PackageProvider)
        } else {
            self.registry
                .lookup_or_bootstrap(
                    pattern,
                    CapabilityKind::PackageProvider,
                    None,
                    host.clone(),
                    self.bootstrap.as_ref(),
                )
                .await
                .into_iter()
                .collect()
        };

        if records.is_empty() && !has_wildcards(pattern) {
            host.emit(Diagnostic::warn(
                DiagnosticKind::Registration,
                pattern,
                format!("unknown provider '{pattern}'"),
            ));
        }

        let mut selected = Vec::new();
        for record in self.initialized(records, host.clone()).await {
            if let Some(provider) = PackageProvider::new(record, Arc::clone(&self.dispatcher)) {
                selected.push(provider);
            }
        }
        debug!(pattern, selected = selected.len(), "selected providers");
        selected
    }

    /// A single package provider at `min_version` or later, bootstrapping it
    /// if needed.
    pub async fn package_provider(
        &self,
        name: &str,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
    ) -> Option<PackageProvider> {
        let record = self
            .registry
            .lookup_or_bootstrap(
                name,
                CapabilityKind::PackageProvider,
                min_version,
                host.clone(),
                self.bootstrap.as_ref(),
            )
            .await?;
        self.registry.ensure_initialized(&record, host).await.ok()?;
        PackageProvider::new(record, Arc::clone(&self.dispatcher))
    }

    /// Initialized package providers reporting `feature`.
    pub async fn providers_with_feature(
        &self,
        feature: &str,
        value: Option<&str>,
        host: SharedHost,
    ) -> Vec<PackageProvider> {
        let all = self.registry.all(CapabilityKind::PackageProvider);
        self.initialized(all, host).await;
        self.registry
            .select_with_feature(feature, value)
            .into_iter()
            .filter_map(|record| PackageProvider::new(record, Arc::clone(&self.dispatcher)))
            .collect()
    }

    pub async fn archivers(&self, host: SharedHost) -> Vec<Archiver> {
        let all = self.registry.all(CapabilityKind::Archiver);
        self.initialized(all, host)
            .await
            .into_iter()
            .filter_map(|record| Archiver::new(record, Arc::clone(&self.dispatcher)))
            .collect()
    }

    /// First archiver (by name) that supports `path`.
    pub async fn archiver_for(&self, path: &str, host: SharedHost) -> Option<Archiver> {
        for archiver in self.archivers(host.clone()).await {
            if archiver.is_supported_file(path, host.clone()).await.unwrap_or(false) {
                return Some(archiver);
            }
        }
        None
    }

    pub async fn downloaders(&self, host: SharedHost) -> Vec<Downloader> {
        let all = self.registry.all(CapabilityKind::Downloader);
        self.initialized(all, host)
            .await
            .into_iter()
            .filter_map(|record| Downloader::new(record, Arc::clone(&self.dispatcher)))
            .collect()
    }

    /// First downloader (by name) that handles URI `scheme`.
    pub async fn downloader_for(&self, scheme: &str, host: SharedHost) -> Option<Downloader> {
        for downloader in self.downloaders(host.clone()).await {
            let schemes = downloader.supported_schemes(host.clone()).await.unwrap_or_default();
            if schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
                return Some(downloader);
            }
        }
        None
    }

    /// Registered package provider names plus the names the bootstrap
    /// provider can install, sorted, without duplicates.
    pub async fn all_provider_names(&self, host: SharedHost) -> Vec<String> {
        let mut names = self.registry.names(CapabilityKind::PackageProvider);
        names.extend(self.bootstrap.bootstrappable_names(host).await);
        names.sort_by_key(|name| name.to_lowercase());
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        names
    }

    /// Cancel every outstanding request. Later requests start out cancelled.
    pub fn shutdown(&self) {
        info!("shutting down provider service");
        self.dispatcher.shutdown();
    }

    /// Initialize each record, dropping those whose setup fails.
    async fn initialized(
        &self,
        records: Vec<Arc<ProviderRecord>>,
        host: SharedHost,
    ) -> Vec<Arc<ProviderRecord>> {
        let mut ready = Vec::with_capacity(records.len());
        for record in records {
            if self
                .registry
                .ensure_initialized(&record, host.clone())
                .await
                .is_ok()
            {
                ready.push(record);
            }
        }
        ready
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_wildcards() {
        assert!(has_wildcards("Nu*"));
        assert!(has_wildcards("M?i"));
        assert!(has_wildcards("[ab]c"));
        assert!(!has_wildcards("Gallery"));
    }

    #[test]
    fn test_explicit_locations_come_first() {
        let service = ProviderService::new(
            Vec::new(),
            ServiceOptions {
                locations: vec!["/opt/providers".to_string()],
                ..ServiceOptions::default()
            },
        );
        assert_eq!(service.locations()[0], "/opt/providers");

        let only = ProviderService::new(
            Vec::new(),
            ServiceOptions {
                locations: vec!["a".to_string()],
                include_default_locations: false,
                ..ServiceOptions::default()
            },
        );
        assert_eq!(only.locations(), ["a".to_string()]);
    }
}
