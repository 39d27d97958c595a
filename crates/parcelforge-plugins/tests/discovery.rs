//! Discovery, registration and meta-provider expansion.

use parcelforge_core::{
    CapabilityAdapter, CapabilityKind, Diagnostic, DiagnosticKind, DynamicObject, HostApi,
    LogLevel, PluginRef, ProviderError, ProviderResult, ProviderVersion, SharedHost, Value,
    ValueKind,
};
use parcelforge_plugins::{
    FactoryCatalog, InlineModuleSource, LoaderOptions, ManifestModuleSource, ModuleDescriptor,
    ModuleFactory, ModuleSource, PluginLoader, ProviderRegistry,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingHost {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingHost {
    fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.lock().iter().filter(|d| d.kind == kind).count()
    }
}

impl HostApi for RecordingHost {
    fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn ask_yes_no(&self, _prompt: &str) -> bool {
        false
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn call_session(&self) -> u64 {
        1
    }
}

fn package(name: &str) -> PluginRef {
    DynamicObject::new(name)
        .constant("get_package_provider_name", name)
        .build()
}

/// Builds one package provider named by the module's `provider_name` config.
struct FixtureFactory;

impl ModuleFactory for FixtureFactory {
    fn name(&self) -> &str {
        "fixture"
    }

    fn create(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>> {
        let name = descriptor.config["provider_name"]
            .as_str()
            .ok_or_else(|| ProviderError::plugin("provider_name not configured"))?;
        Ok(vec![package(name)])
    }
}

struct BrokenFactory;

impl ModuleFactory for BrokenFactory {
    fn name(&self) -> &str {
        "broken"
    }

    fn create(&self, _descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>> {
        Err(ProviderError::plugin("native library missing"))
    }
}

fn write_module(dir: &Path, id: &str, factory: &str, version: &str, provider: &str) {
    let module_dir = dir.join(id);
    std::fs::create_dir_all(&module_dir).unwrap();
    std::fs::write(
        module_dir.join("manifest.toml"),
        format!(
            "[module]\nid = \"{id}\"\nversion = \"{version}\"\nfactory = \"{factory}\"\n\n[config]\nprovider_name = \"{provider}\"\n"
        ),
    )
    .unwrap();
}

fn manifest_loader() -> PluginLoader {
    let catalog = Arc::new(FactoryCatalog::new());
    catalog.register(Arc::new(FixtureFactory));
    catalog.register(Arc::new(BrokenFactory));
    let source: Arc<dyn ModuleSource> = Arc::new(ManifestModuleSource::new(catalog));
    PluginLoader::new(
        Arc::new(CapabilityAdapter::new()),
        Arc::new(ProviderRegistry::new()),
        vec![source],
        LoaderOptions::default(),
    )
}

fn inline_loader(source: Arc<InlineModuleSource>, options: LoaderOptions) -> PluginLoader {
    let source: Arc<dyn ModuleSource> = source;
    PluginLoader::new(
        Arc::new(CapabilityAdapter::new()),
        Arc::new(ProviderRegistry::new()),
        vec![source],
        options,
    )
}

fn location(dir: &Path) -> Vec<String> {
    vec![dir.display().to_string()]
}

#[tokio::test]
async fn test_higher_version_wins_in_either_order() {
    for (first, second) in [("1.0", "2.0"), ("2.0", "1.0")] {
        let temp_dir = TempDir::new().unwrap();
        write_module(temp_dir.path(), "a-module", "fixture", first, "Alpha");
        write_module(temp_dir.path(), "b-module", "fixture", second, "Alpha");

        let loader = manifest_loader();
        let host: SharedHost = Arc::new(RecordingHost::default());
        loader.discover(&location(temp_dir.path()), host).await;

        let record = loader
            .registry()
            .lookup("Alpha", CapabilityKind::PackageProvider)
            .unwrap();
        assert_eq!(record.version(), ProviderVersion::new(2, 0, 0, 0));
        assert_eq!(loader.registry().all(CapabilityKind::PackageProvider).len(), 1);
    }
}

#[tokio::test]
async fn test_locations_are_scanned_concurrently_and_merged() {
    let user = TempDir::new().unwrap();
    let system = TempDir::new().unwrap();
    write_module(user.path(), "alpha", "fixture", "1.0", "Alpha");
    write_module(system.path(), "beta", "fixture", "1.0", "Beta");

    let loader = manifest_loader();
    let host: SharedHost = Arc::new(RecordingHost::default());
    let mut locations = location(user.path());
    locations.extend(location(system.path()));

    assert_eq!(loader.discover(&locations, host).await, 2);
    assert_eq!(
        loader.registry().names(CapabilityKind::PackageProvider),
        vec!["Alpha", "Beta"]
    );
}

#[tokio::test]
async fn test_bad_module_does_not_abort_discovery() {
    let temp_dir = TempDir::new().unwrap();
    write_module(temp_dir.path(), "broken", "broken", "1.0", "Broken");
    write_module(temp_dir.path(), "good", "fixture", "1.0", "Good");
    write_module(temp_dir.path(), "unknown", "no-such-factory", "1.0", "Unknown");

    let loader = manifest_loader();
    let recorder = Arc::new(RecordingHost::default());
    let count = loader.discover(&location(temp_dir.path()), recorder.clone()).await;

    assert_eq!(count, 1);
    assert!(loader.registry().lookup("Good", CapabilityKind::PackageProvider).is_some());
    assert_eq!(recorder.count(DiagnosticKind::ModuleLoad), 2);
    assert!(recorder
        .diagnostics
        .lock()
        .iter()
        .all(|d| d.level == LogLevel::Debug));
}

#[tokio::test]
async fn test_panicking_candidate_is_skipped() {
    let source = Arc::new(InlineModuleSource::new());
    source.add("mem", "mixed", None, || {
        Ok(vec![
            DynamicObject::new("Panics")
                .member("get_package_provider_name", &[], ValueKind::String, |_, _| {
                    panic!("provider bug")
                })
                .build(),
            package("Healthy"),
        ])
    });
    let loader = inline_loader(source, LoaderOptions::default());
    let recorder = Arc::new(RecordingHost::default());

    assert_eq!(loader.discover(&["mem".to_string()], recorder.clone()).await, 1);
    assert!(loader.registry().lookup("Healthy", CapabilityKind::PackageProvider).is_some());
    assert_eq!(recorder.count(DiagnosticKind::Registration), 1);
}

#[tokio::test]
async fn test_eager_initialization_excludes_failing_providers() {
    let source = Arc::new(InlineModuleSource::new());
    source.add("mem", "eager", None, || {
        Ok(vec![
            DynamicObject::new("Fragile")
                .constant("get_package_provider_name", "Fragile")
                .member("initialize_provider", &[], ValueKind::Unit, |_, _| {
                    Err(ProviderError::plugin("missing runtime"))
                })
                .build(),
            package("Sturdy"),
        ])
    });
    let loader = inline_loader(source, LoaderOptions { eager_initialize: true });
    let recorder = Arc::new(RecordingHost::default());
    loader.discover(&["mem".to_string()], recorder.clone()).await;

    let registry = loader.registry();
    assert!(registry.lookup("Fragile", CapabilityKind::PackageProvider).is_none());
    assert!(registry
        .lookup("Sturdy", CapabilityKind::PackageProvider)
        .unwrap()
        .is_initialized());
    assert_eq!(recorder.count(DiagnosticKind::Initialization), 1);
}

fn meta_provider() -> PluginRef {
    DynamicObject::new("ScriptHost")
        .constant("get_meta_provider_name", "Scripts")
        .constant(
            "get_provider_names",
            Value::from(vec!["ScriptA", "ScriptB", "Inert"]),
        )
        .member("create_provider", &[ValueKind::String], ValueKind::Object, |args, _| {
            match args[0].as_str() {
                Some("Inert") => Ok(Value::Object(DynamicObject::new("Inert").build())),
                Some(name) => Ok(Value::Object(
                    DynamicObject::new(name)
                        .constant("get_package_provider_name", name)
                        .build(),
                )),
                None => Ok(Value::Null),
            }
        })
        .build()
}

#[tokio::test]
async fn test_meta_provider_expansion() {
    let source = Arc::new(InlineModuleSource::new());
    source.add("mem", "scripts", Some("3.0"), || Ok(vec![meta_provider()]));
    let loader = inline_loader(source, LoaderOptions::default());
    let recorder = Arc::new(RecordingHost::default());

    let count = loader.discover(&["mem".to_string()], recorder.clone()).await;
    assert_eq!(count, 3);

    let registry = loader.registry();
    let meta = registry.lookup("scripts", CapabilityKind::MetaProvider).unwrap();
    assert!(meta.is_initialized());

    let script = registry.lookup("ScriptA", CapabilityKind::PackageProvider).unwrap();
    assert_eq!(script.version(), ProviderVersion::new(3, 0, 0, 0));
    assert!(registry.lookup("ScriptB", CapabilityKind::PackageProvider).is_some());
    assert!(registry.lookup("Inert", CapabilityKind::PackageProvider).is_none());
    assert_eq!(recorder.count(DiagnosticKind::Registration), 1);

    let host: SharedHost = recorder;
    let loaded = loader
        .load_via_meta_provider("Scripts", "ScriptC", host.clone())
        .await
        .unwrap();
    assert_eq!(loaded, 1);
    assert!(registry.lookup("ScriptC", CapabilityKind::PackageProvider).is_some());

    let missing = loader.load_via_meta_provider("Nope", "ScriptD", host).await;
    assert!(matches!(missing, Err(ProviderError::NotFound(_))));
}

#[tokio::test]
async fn test_duplicate_meta_provider_keeps_first() {
    let source = Arc::new(InlineModuleSource::new());
    source.add("first", "scripts", Some("1.0"), || Ok(vec![meta_provider()]));
    source.add("second", "scripts", Some("9.0"), || Ok(vec![meta_provider()]));
    let loader = inline_loader(source, LoaderOptions::default());
    let host: SharedHost = Arc::new(RecordingHost::default());

    loader.discover(&["first".to_string()], host.clone()).await;
    loader.discover(&["second".to_string()], host).await;

    let meta = loader
        .registry()
        .lookup("Scripts", CapabilityKind::MetaProvider)
        .unwrap();
    assert_eq!(meta.version(), ProviderVersion::new(1, 0, 0, 0));
    assert_eq!(loader.known_locations(), vec!["first", "second"]);
}
