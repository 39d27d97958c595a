//! Typed access to registered providers.
//!
//! The registry stores capability-agnostic [`ProviderHandle`]s. These wrappers
//! give each category its operations with real argument types, dispatching
//! every call through the [`Dispatcher`].

use crate::registry::ProviderRecord;
use parcelforge_core::{
    CapabilityKind, PackageSource, ProviderHandle, ProviderResult, ProviderVersion, SharedHost,
    SoftwareIdentity, Value,
};
use parcelforge_runtime::{Dispatcher, StreamingRequest};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Packages yielded by a streaming call, in order. Non-package items are
/// skipped.
pub async fn collect_packages(call: &StreamingRequest) -> Vec<SoftwareIdentity> {
    call.collect()
        .await
        .iter()
        .filter_map(SoftwareIdentity::from_value)
        .collect()
}

/// Package sources yielded by a streaming call, in order.
pub async fn collect_sources(call: &StreamingRequest) -> Vec<PackageSource> {
    call.collect()
        .await
        .iter()
        .filter_map(PackageSource::from_value)
        .collect()
}

/// Operations are only dispatched to initialized records of the right category.
fn usable(record: &ProviderRecord, kind: CapabilityKind) -> bool {
    record.kind() == kind && record.is_initialized()
}

fn opt(value: Option<&str>) -> Value {
    Value::from(value)
}

macro_rules! provider_accessors {
    () => {
        pub fn name(&self) -> &str {
            self.record.name()
        }

        pub fn version(&self) -> ProviderVersion {
            self.record.version()
        }

        pub fn record(&self) -> &Arc<ProviderRecord> {
            &self.record
        }

        fn handle(&self) -> &ProviderHandle {
            self.record.handle()
        }
    };
}

/// A package provider.
#[derive(Clone)]
pub struct PackageProvider {
    record: Arc<ProviderRecord>,
    dispatcher: Arc<Dispatcher>,
}

impl PackageProvider {
    /// Wrap an initialized record. Returns `None` for records of another
    /// category or whose setup has not succeeded.
    pub(crate) fn new(record: Arc<ProviderRecord>, dispatcher: Arc<Dispatcher>) -> Option<Self> {
        usable(&record, CapabilityKind::PackageProvider).then_some(Self { record, dispatcher })
    }

    provider_accessors!();

    pub fn features(&self) -> BTreeMap<String, Vec<String>> {
        self.record.features()
    }

    /// Whether the provider implements `operation`. Unimplemented operations
    /// complete without yielding anything.
    pub fn supports(&self, operation: &str) -> bool {
        self.handle().is_implemented(operation)
    }

    fn stream(&self, operation: &str, args: Vec<Value>, host: SharedHost) -> StreamingRequest {
        self.dispatcher
            .invoke_streaming(self.handle(), operation, args, host)
    }

    /// Search for packages. Version bounds are passed through to the
    /// provider unchanged.
    pub fn find_package(
        &self,
        name: &str,
        required_version: Option<&str>,
        minimum_version: Option<&str>,
        maximum_version: Option<&str>,
        host: SharedHost,
    ) -> StreamingRequest {
        self.stream(
            "find_package",
            vec![
                Value::from(name),
                opt(required_version),
                opt(minimum_version),
                opt(maximum_version),
            ],
            host,
        )
    }

    pub fn find_package_by_file(&self, path: &str, host: SharedHost) -> StreamingRequest {
        self.stream("find_package_by_file", vec![Value::from(path)], host)
    }

    pub fn find_package_by_uri(&self, uri: &str, host: SharedHost) -> StreamingRequest {
        self.stream("find_package_by_uri", vec![Value::from(uri)], host)
    }

    pub fn get_installed_packages(&self, name: Option<&str>, host: SharedHost) -> StreamingRequest {
        self.stream("get_installed_packages", vec![opt(name)], host)
    }

    pub fn install_package(&self, package: &SoftwareIdentity, host: SharedHost) -> StreamingRequest {
        self.stream(
            "install_package",
            vec![Value::from(package.fast_path.as_str())],
            host,
        )
    }

    pub fn uninstall_package(&self, package: &SoftwareIdentity, host: SharedHost) -> StreamingRequest {
        self.stream(
            "uninstall_package",
            vec![Value::from(package.fast_path.as_str())],
            host,
        )
    }

    pub fn download_package(
        &self,
        package: &SoftwareIdentity,
        destination: &str,
        host: SharedHost,
    ) -> StreamingRequest {
        self.stream(
            "download_package",
            vec![Value::from(package.fast_path.as_str()), Value::from(destination)],
            host,
        )
    }

    pub fn get_package_dependencies(
        &self,
        package: &SoftwareIdentity,
        host: SharedHost,
    ) -> StreamingRequest {
        self.stream(
            "get_package_dependencies",
            vec![Value::from(package.fast_path.as_str())],
            host,
        )
    }

    pub fn get_package_details(&self, package: &SoftwareIdentity, host: SharedHost) -> StreamingRequest {
        self.stream(
            "get_package_details",
            vec![Value::from(package.fast_path.as_str())],
            host,
        )
    }

    pub fn add_package_source(
        &self,
        name: &str,
        location: &str,
        trusted: bool,
        host: SharedHost,
    ) -> StreamingRequest {
        self.stream(
            "add_package_source",
            vec![Value::from(name), Value::from(location), Value::from(trusted)],
            host,
        )
    }

    pub fn remove_package_source(&self, name: &str, host: SharedHost) -> StreamingRequest {
        self.stream("remove_package_source", vec![Value::from(name)], host)
    }

    pub fn resolve_package_sources(&self, host: SharedHost) -> StreamingRequest {
        self.stream("resolve_package_sources", Vec::new(), host)
    }

    /// Options the provider accepts for `category` (e.g. "install").
    pub fn get_dynamic_options(&self, category: &str, host: SharedHost) -> StreamingRequest {
        self.stream("get_dynamic_options", vec![Value::from(category)], host)
    }
}

/// An archive extractor.
#[derive(Clone)]
pub struct Archiver {
    record: Arc<ProviderRecord>,
    dispatcher: Arc<Dispatcher>,
}

impl Archiver {
    pub(crate) fn new(record: Arc<ProviderRecord>, dispatcher: Arc<Dispatcher>) -> Option<Self> {
        usable(&record, CapabilityKind::Archiver).then_some(Self { record, dispatcher })
    }

    provider_accessors!();

    pub async fn is_supported_file(&self, path: &str, host: SharedHost) -> ProviderResult<bool> {
        let request = self.dispatcher.invoke(
            self.handle(),
            "is_supported_file",
            vec![Value::from(path)],
            host,
        );
        Ok(request.outcome().await?.as_bool().unwrap_or(false))
    }

    /// Extract `archive` into `destination`. Returns the extracted files.
    pub async fn unpack_archive(
        &self,
        archive: &str,
        destination: &str,
        host: SharedHost,
    ) -> ProviderResult<Vec<String>> {
        let request = self.dispatcher.invoke(
            self.handle(),
            "unpack_archive",
            vec![Value::from(archive), Value::from(destination)],
            host,
        );
        Ok(request.outcome().await?.to_string_list())
    }
}

/// A file downloader.
#[derive(Clone)]
pub struct Downloader {
    record: Arc<ProviderRecord>,
    dispatcher: Arc<Dispatcher>,
}

impl Downloader {
    pub(crate) fn new(record: Arc<ProviderRecord>, dispatcher: Arc<Dispatcher>) -> Option<Self> {
        usable(&record, CapabilityKind::Downloader).then_some(Self { record, dispatcher })
    }

    provider_accessors!();

    pub async fn supported_schemes(&self, host: SharedHost) -> ProviderResult<Vec<String>> {
        let request = self
            .dispatcher
            .invoke(self.handle(), "supported_schemes", Vec::new(), host);
        Ok(request.outcome().await?.to_string_list())
    }

    /// Download `uri` to `destination`. Returns the path written.
    pub async fn download_file(
        &self,
        uri: &str,
        destination: &str,
        host: SharedHost,
    ) -> ProviderResult<String> {
        let request = self.dispatcher.invoke(
            self.handle(),
            "download_file",
            vec![Value::from(uri), Value::from(destination)],
            host,
        );
        let written = request.outcome().await?;
        Ok(written.as_str().unwrap_or(destination).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderRegistry;
    use parcelforge_core::{CapabilityAdapter, DefaultHost, DynamicObject, ValueKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_only_initialized_records_are_wrapped() {
        let finds = Arc::new(AtomicUsize::new(0));
        let counter = finds.clone();
        let object = DynamicObject::new("Lazy")
            .constant("get_package_provider_name", "Lazy")
            .member("find_package", &[ValueKind::String; 4], ValueKind::Unit, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .build();
        let handle = CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap();

        let registry = ProviderRegistry::new();
        registry.register("Lazy", ProviderVersion::new(1, 0, 0, 0), handle, "test");
        let record = registry.lookup("Lazy", CapabilityKind::PackageProvider).unwrap();
        let dispatcher = Arc::new(Dispatcher::default());

        assert!(PackageProvider::new(Arc::clone(&record), Arc::clone(&dispatcher)).is_none());
        assert!(Archiver::new(Arc::clone(&record), Arc::clone(&dispatcher)).is_none());
        assert_eq!(finds.load(Ordering::SeqCst), 0);

        let host: SharedHost = DefaultHost::new().into_shared();
        registry.ensure_initialized(&record, host.clone()).await.unwrap();
        let provider = PackageProvider::new(Arc::clone(&record), Arc::clone(&dispatcher)).unwrap();
        provider.find_package("x", None, None, None, host).collect().await;
        assert_eq!(finds.load(Ordering::SeqCst), 1);

        // Wrong category even once initialized.
        assert!(Downloader::new(record, dispatcher).is_none());
    }
}
