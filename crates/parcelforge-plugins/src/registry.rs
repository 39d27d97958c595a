//! Provider registry.
//!
//! Providers are partitioned by [`CapabilityKind`] and keyed by lower-cased
//! name. Each category map sits behind its own short lock; slow work
//! (initialization, bootstrap) always happens outside it.
//!
//! Invariants:
//! - at most one record is active per (category, name);
//! - a package provider, archiver or downloader is only replaced by a strictly
//!   higher version; the first meta-provider of a name wins;
//! - a record's setup runs at most once, and a record whose setup failed is
//!   never returned by a lookup again.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use parcelforge_core::{
    CapabilityKind, Diagnostic, DiagnosticKind, HostRequest, ProviderError, ProviderHandle,
    ProviderResult, ProviderVersion, SharedHost, Value,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`ProviderRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No provider of that name existed.
    Accepted,

    /// An older version was replaced and discarded.
    SupersededOlder,

    /// An equal or higher version is already registered; nothing changed.
    RejectedLowerVersion,

    /// A meta-provider of that name is already registered; nothing changed.
    RejectedDuplicate,
}

impl RegisterOutcome {
    /// Whether the new record is now active.
    pub fn is_active(&self) -> bool {
        matches!(self, RegisterOutcome::Accepted | RegisterOutcome::SupersededOlder)
    }
}

/// Initialization state of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Initialized,
    Failed(String),
}

/// A registered provider.
pub struct ProviderRecord {
    name: String,
    kind: CapabilityKind,
    version: ProviderVersion,
    handle: ProviderHandle,
    origin: String,
    state: Mutex<InitState>,
    features: Mutex<BTreeMap<String, Vec<String>>>,
    init_gate: Arc<tokio::sync::Mutex<()>>,
}

impl ProviderRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn version(&self) -> ProviderVersion {
        self.version
    }

    pub fn handle(&self) -> &ProviderHandle {
        &self.handle
    }

    /// Module the provider came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn init_state(&self) -> InitState {
        self.state.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        *self.state.lock() == InitState::Initialized
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.lock(), InitState::Failed(_))
    }

    /// Features reported by the provider after initialization.
    pub fn features(&self) -> BTreeMap<String, Vec<String>> {
        self.features.lock().clone()
    }

    /// Whether the provider reports `feature`, optionally with `value` among
    /// its values. Names and values compare case-insensitively.
    pub fn has_feature(&self, feature: &str, value: Option<&str>) -> bool {
        self.features.lock().iter().any(|(name, values)| {
            name.eq_ignore_ascii_case(feature)
                && value.map_or(true, |v| values.iter().any(|x| x.eq_ignore_ascii_case(v)))
        })
    }
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("version", &self.version.to_string())
            .field("origin", &self.origin)
            .field("state", &self.init_state())
            .finish()
    }
}

/// Resolves providers that are requested but not registered.
#[async_trait]
pub trait MissingProviderResolver: Send + Sync {
    /// Try to make `provider_name` available. Returns whether it may now be
    /// registered.
    async fn resolve(
        &self,
        requestor: &str,
        provider_name: &str,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
    ) -> bool;
}

type Category = Mutex<HashMap<String, Arc<ProviderRecord>>>;

/// Thread-safe store of active providers.
pub struct ProviderRegistry {
    categories: BTreeMap<CapabilityKind, Category>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            categories: CapabilityKind::ALL
                .iter()
                .map(|kind| (*kind, Mutex::new(HashMap::new())))
                .collect(),
        }
    }

    fn category(&self, kind: CapabilityKind) -> &Category {
        // Every kind is inserted in `new`.
        &self.categories[&kind]
    }

    /// Register a provider under `name` in the handle's category.
    pub fn register(
        &self,
        name: &str,
        version: ProviderVersion,
        handle: ProviderHandle,
        origin: &str,
    ) -> RegisterOutcome {
        let kind = handle.kind();
        let key = name.to_lowercase();
        let record = Arc::new(ProviderRecord {
            name: name.to_string(),
            kind,
            version,
            handle: handle.with_name(name),
            origin: origin.to_string(),
            state: Mutex::new(InitState::Pending),
            features: Mutex::new(BTreeMap::new()),
            init_gate: Arc::new(tokio::sync::Mutex::new(())),
        });

        let outcome = {
            let mut providers = self.category(kind).lock();
            match providers.get(&key) {
                None => {
                    providers.insert(key, record);
                    RegisterOutcome::Accepted
                }
                Some(_) if kind == CapabilityKind::MetaProvider => {
                    RegisterOutcome::RejectedDuplicate
                }
                Some(existing) if existing.version < version => {
                    providers.insert(key, record);
                    RegisterOutcome::SupersededOlder
                }
                Some(_) => RegisterOutcome::RejectedLowerVersion,
            }
        };

        match outcome {
            RegisterOutcome::Accepted | RegisterOutcome::SupersededOlder => info!(
                provider = name,
                category = %kind,
                version = %version,
                origin,
                ?outcome,
                "registered provider"
            ),
            _ => debug!(
                provider = name,
                category = %kind,
                version = %version,
                origin,
                ?outcome,
                "provider not registered"
            ),
        }
        outcome
    }

    /// Run the provider's one-time setup if it has not run yet.
    ///
    /// Concurrent callers for the same record wait for the first one; setup
    /// runs once. Callers for different records do not block each other.
    /// Setup runs in its own task holding the record's gate, so a caller that
    /// is dropped mid-setup neither aborts it nor lets it run again.
    pub async fn ensure_initialized(
        &self,
        record: &Arc<ProviderRecord>,
        host: SharedHost,
    ) -> ProviderResult<()> {
        if let Some(result) = Self::settled(record) {
            return result;
        }

        let gate = Arc::clone(&record.init_gate).lock_owned().await;
        if let Some(result) = Self::settled(record) {
            return result;
        }

        let setup = tokio::spawn(Self::run_setup(Arc::clone(record), host, gate));
        match setup.await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::InitializationFailed {
                provider: record.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn run_setup(
        record: Arc<ProviderRecord>,
        host: SharedHost,
        _gate: tokio::sync::OwnedMutexGuard<()>,
    ) -> ProviderResult<()> {
        let handle = record.handle.clone();
        let request_host = host.clone();
        let setup = tokio::task::spawn_blocking(move || {
            let request = HostRequest::new(request_host, handle.label());
            handle.call("initialize_provider", &[], &request)?;
            handle.call("get_features", &[], &request)
        })
        .await
        .unwrap_or_else(|e| Err(ProviderError::plugin(format!("setup panicked: {e}"))));

        match setup {
            Ok(features) => {
                *record.features.lock() = parse_features(&features);
                *record.state.lock() = InitState::Initialized;
                debug!(provider = %record.name, category = %record.kind, "provider initialized");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                *record.state.lock() = InitState::Failed(reason.clone());
                warn!(provider = %record.name, error = %reason, "provider failed to initialize");
                host.emit(Diagnostic::warn(
                    DiagnosticKind::Initialization,
                    record.name.clone(),
                    reason.clone(),
                ));
                Err(ProviderError::InitializationFailed {
                    provider: record.name.clone(),
                    reason,
                })
            }
        }
    }

    fn settled(record: &ProviderRecord) -> Option<ProviderResult<()>> {
        match &*record.state.lock() {
            InitState::Initialized => Some(Ok(())),
            InitState::Failed(reason) => Some(Err(ProviderError::InitializationFailed {
                provider: record.name.clone(),
                reason: reason.clone(),
            })),
            InitState::Pending => None,
        }
    }

    /// Exact, case-insensitive lookup. Records whose setup failed are excluded.
    pub fn lookup(&self, name: &str, kind: CapabilityKind) -> Option<Arc<ProviderRecord>> {
        self.category(kind)
            .lock()
            .get(&name.to_lowercase())
            .filter(|record| !record.is_failed())
            .cloned()
    }

    /// Wildcard lookup (`*`, `?`, `[...]`), case-insensitive, sorted by name.
    /// A pattern without wildcards behaves like [`ProviderRegistry::lookup`].
    pub fn lookup_all(&self, pattern: &str, kind: CapabilityKind) -> Vec<Arc<ProviderRecord>> {
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        let matcher = Pattern::new(pattern).ok();

        let mut matches: Vec<_> = self
            .category(kind)
            .lock()
            .values()
            .filter(|record| !record.is_failed())
            .filter(|record| match &matcher {
                Some(p) => p.matches_with(&record.name, options),
                None => record.name.eq_ignore_ascii_case(pattern),
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        matches
    }

    /// Every usable record in a category, sorted by name.
    pub fn all(&self, kind: CapabilityKind) -> Vec<Arc<ProviderRecord>> {
        self.lookup_all("*", kind)
    }

    pub fn names(&self, kind: CapabilityKind) -> Vec<String> {
        self.all(kind).iter().map(|r| r.name.clone()).collect()
    }

    /// Look up a provider and make sure it is initialized. Returns `None` if it
    /// is missing or its setup fails.
    pub async fn lookup_initialized(
        &self,
        name: &str,
        kind: CapabilityKind,
        host: SharedHost,
    ) -> Option<Arc<ProviderRecord>> {
        let record = self.lookup(name, kind)?;
        self.ensure_initialized(&record, host).await.ok()?;
        Some(record)
    }

    /// Look up a provider, asking `resolver` to fetch it if it is missing or
    /// older than `min_version`. The resolver is only consulted for
    /// interactive hosts.
    pub async fn lookup_or_bootstrap(
        &self,
        name: &str,
        kind: CapabilityKind,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
        resolver: &dyn MissingProviderResolver,
    ) -> Option<Arc<ProviderRecord>> {
        let acceptable =
            |record: &Arc<ProviderRecord>| min_version.map_or(true, |min| record.version >= min);

        if let Some(record) = self.lookup(name, kind).filter(|r| acceptable(r)) {
            return Some(record);
        }
        if !host.is_interactive() {
            debug!(provider = name, "provider missing and host is not interactive");
            return None;
        }
        if !resolver.resolve("lookup", name, min_version, host.clone()).await {
            return None;
        }
        self.lookup(name, kind).filter(|r| acceptable(r))
    }

    /// Initialized package providers reporting `feature` (optionally with
    /// `value`).
    pub fn select_with_feature(&self, feature: &str, value: Option<&str>) -> Vec<Arc<ProviderRecord>> {
        self.all(CapabilityKind::PackageProvider)
            .into_iter()
            .filter(|r| r.is_initialized() && r.has_feature(feature, value))
            .collect()
    }

}

/// Features arrive as a map of name to a string or list of strings.
fn parse_features(value: &Value) -> BTreeMap<String, Vec<String>> {
    value
        .as_map()
        .map(|map| {
            map.iter()
                .map(|(name, values)| (name.clone(), values.to_string_list()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcelforge_core::{CapabilityAdapter, DefaultHost, DynamicObject, ValueKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn package_handle(name: &str) -> ProviderHandle {
        let object = DynamicObject::new(name)
            .constant("get_package_provider_name", name)
            .build();
        CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap()
    }

    fn meta_handle(name: &str) -> ProviderHandle {
        let object = DynamicObject::new(name)
            .constant("get_meta_provider_name", name)
            .constant("get_provider_names", Value::List(Vec::new()))
            .member("create_provider", &[ValueKind::String], ValueKind::Object, |_, _| {
                Ok(Value::Null)
            })
            .build();
        CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::MetaProvider)
            .unwrap()
    }

    fn v(s: &str) -> ProviderVersion {
        ProviderVersion::parse_lenient(s)
    }

    #[test]
    fn test_version_arbitration_ascending() {
        let registry = ProviderRegistry::new();
        assert_eq!(
            registry.register("Alpha", v("1.0"), package_handle("Alpha"), "a"),
            RegisterOutcome::Accepted
        );
        assert_eq!(
            registry.register("Alpha", v("2.0"), package_handle("Alpha"), "b"),
            RegisterOutcome::SupersededOlder
        );

        let record = registry.lookup("alpha", CapabilityKind::PackageProvider).unwrap();
        assert_eq!(record.version(), v("2.0"));
        assert_eq!(record.origin(), "b");
    }

    #[test]
    fn test_version_arbitration_descending() {
        let registry = ProviderRegistry::new();
        registry.register("Alpha", v("2.0"), package_handle("Alpha"), "b");
        assert_eq!(
            registry.register("ALPHA", v("1.0"), package_handle("Alpha"), "a"),
            RegisterOutcome::RejectedLowerVersion
        );
        assert_eq!(
            registry.register("Alpha", v("2.0"), package_handle("Alpha"), "c"),
            RegisterOutcome::RejectedLowerVersion
        );

        let record = registry.lookup("Alpha", CapabilityKind::PackageProvider).unwrap();
        assert_eq!(record.version(), v("2.0"));
        assert_eq!(record.origin(), "b");
        assert_eq!(registry.all(CapabilityKind::PackageProvider).len(), 1);
    }

    #[test]
    fn test_first_meta_provider_wins() {
        let registry = ProviderRegistry::new();
        assert_eq!(
            registry.register("Scripts", v("1.0"), meta_handle("Scripts"), "a"),
            RegisterOutcome::Accepted
        );
        assert_eq!(
            registry.register("Scripts", v("9.0"), meta_handle("Scripts"), "b"),
            RegisterOutcome::RejectedDuplicate
        );
        let record = registry.lookup("scripts", CapabilityKind::MetaProvider).unwrap();
        assert_eq!(record.origin(), "a");
    }

    #[test]
    fn test_categories_are_independent() {
        let registry = ProviderRegistry::new();
        registry.register("Same", v("1.0"), package_handle("Same"), "a");
        registry.register("Same", v("1.0"), meta_handle("Same"), "b");
        assert!(registry.lookup("Same", CapabilityKind::PackageProvider).is_some());
        assert!(registry.lookup("Same", CapabilityKind::MetaProvider).is_some());
        assert!(registry.lookup("Same", CapabilityKind::Archiver).is_none());
    }

    #[test]
    fn test_wildcard_lookup() {
        let registry = ProviderRegistry::new();
        for name in ["NuGallery", "NuLocal", "Msi"] {
            registry.register(name, v("1.0"), package_handle(name), name);
        }

        let names: Vec<_> = registry
            .lookup_all("nu*", CapabilityKind::PackageProvider)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["NuGallery", "NuLocal"]);
        assert_eq!(registry.lookup_all("MSI", CapabilityKind::PackageProvider).len(), 1);
        assert!(registry.lookup_all("zip*", CapabilityKind::PackageProvider).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = DynamicObject::new("Slow")
            .constant("get_package_provider_name", "Slow")
            .member("initialize_provider", &[], ValueKind::Unit, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(30));
                Ok(Value::Null)
            })
            .build();
        let handle = CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap();

        let registry = Arc::new(ProviderRegistry::new());
        registry.register("Slow", v("1.0"), handle, "test");
        let record = registry.lookup("Slow", CapabilityKind::PackageProvider).unwrap();
        let host: SharedHost = DefaultHost::new().into_shared();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let record = record.clone();
            let host = host.clone();
            tasks.push(tokio::spawn(async move {
                registry.ensure_initialized(&record, host).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(record.is_initialized());
    }

    #[tokio::test]
    async fn test_abandoned_initialize_still_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = DynamicObject::new("Slow")
            .constant("get_package_provider_name", "Slow")
            .member("initialize_provider", &[], ValueKind::Unit, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(100));
                Ok(Value::Null)
            })
            .build();
        let handle = CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap();

        let registry = ProviderRegistry::new();
        registry.register("Slow", v("1.0"), handle, "test");
        let record = registry.lookup("Slow", CapabilityKind::PackageProvider).unwrap();
        let host: SharedHost = DefaultHost::new().into_shared();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            registry.ensure_initialized(&record, host.clone()),
        )
        .await;
        assert!(abandoned.is_err());

        registry.ensure_initialized(&record, host).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(record.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_initialization_is_excluded() {
        let object = DynamicObject::new("Broken")
            .constant("get_package_provider_name", "Broken")
            .member("initialize_provider", &[], ValueKind::Unit, |_, _| {
                Err(ProviderError::plugin("missing runtime"))
            })
            .build();
        let handle = CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap();

        let registry = ProviderRegistry::new();
        registry.register("Broken", v("1.0"), handle, "test");
        let record = registry.lookup("Broken", CapabilityKind::PackageProvider).unwrap();
        let host: SharedHost = DefaultHost::new().into_shared();

        let err = registry.ensure_initialized(&record, host.clone()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InitializationFailed { .. }));
        assert!(registry.lookup("Broken", CapabilityKind::PackageProvider).is_none());
        assert!(registry.all(CapabilityKind::PackageProvider).is_empty());

        // Not retried.
        assert!(registry.ensure_initialized(&record, host).await.is_err());
    }

    #[tokio::test]
    async fn test_features_recorded_after_initialize() {
        let object = DynamicObject::new("Gallery")
            .constant("get_package_provider_name", "Gallery")
            .constant(
                "get_features",
                Value::from(serde_json::json!({
                    "supports-powershell-modules": [],
                    "file-extensions": [".nupkg", ".zip"]
                })),
            )
            .build();
        let handle = CapabilityAdapter::new()
            .adapt(&object, CapabilityKind::PackageProvider)
            .unwrap();

        let registry = ProviderRegistry::new();
        registry.register("Gallery", v("1.0"), handle, "test");
        registry.register("Plain", v("1.0"), package_handle("Plain"), "test");

        let host: SharedHost = DefaultHost::new().into_shared();
        for record in registry.all(CapabilityKind::PackageProvider) {
            registry.ensure_initialized(&record, host.clone()).await.unwrap();
        }

        let selected = registry.select_with_feature("file-extensions", Some(".ZIP"));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "Gallery");
        assert_eq!(registry.select_with_feature("supports-powershell-modules", None).len(), 1);
        assert!(registry.select_with_feature("file-extensions", Some(".msi")).is_empty());
    }

    struct CountingResolver {
        calls: AtomicUsize,
        registry: Arc<ProviderRegistry>,
    }

    #[async_trait]
    impl MissingProviderResolver for CountingResolver {
        async fn resolve(
            &self,
            _requestor: &str,
            provider_name: &str,
            _min_version: Option<ProviderVersion>,
            _host: SharedHost,
        ) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.registry
                .register(provider_name, v("5.0"), package_handle(provider_name), "bootstrap");
            true
        }
    }

    #[tokio::test]
    async fn test_lookup_or_bootstrap() {
        let registry = Arc::new(ProviderRegistry::new());
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            registry: registry.clone(),
        };
        registry.register("Old", v("1.0"), package_handle("Old"), "disk");

        let quiet: SharedHost = DefaultHost::new().into_shared();
        let found = registry
            .lookup_or_bootstrap("Old", CapabilityKind::PackageProvider, Some(v("2.0")), quiet, &resolver)
            .await;
        assert!(found.is_none());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);

        let interactive: SharedHost = DefaultHost::new().interactive(true).into_shared();
        let found = registry
            .lookup_or_bootstrap(
                "Old",
                CapabilityKind::PackageProvider,
                Some(v("2.0")),
                interactive.clone(),
                &resolver,
            )
            .await
            .unwrap();
        assert_eq!(found.version(), v("5.0"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let again = registry
            .lookup_or_bootstrap("Old", CapabilityKind::PackageProvider, None, interactive, &resolver)
            .await;
        assert!(again.is_some());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
