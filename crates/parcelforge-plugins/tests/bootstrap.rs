//! Bootstrapping missing providers through the service.

use parcelforge_core::{
    BootstrapPrompt, DefaultHost, Diagnostic, DiagnosticKind, DynamicObject, HostApi, PluginRef,
    ProviderError, ProviderRequest, ProviderVersion, SharedHost, SoftwareIdentity, Value,
    ValueKind, INSTALLATION_MEDIA, PROVIDER_TYPE,
};
use parcelforge_plugins::{
    BootstrapOptions, InlineModuleSource, ModuleSource, ProviderService, ServiceOptions,
    DESTINATION_PATH_OPTION,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const FIND_PARAMS: [ValueKind; 4] = [ValueKind::String; 4];

fn package(name: &str) -> PluginRef {
    DynamicObject::new(name)
        .constant("get_package_provider_name", name)
        .build()
}

#[derive(Default)]
struct Calls {
    finds: AtomicUsize,
    installs: AtomicUsize,
    destination: Mutex<Option<String>>,
}

struct Fixture {
    service: ProviderService,
    calls: Arc<Calls>,
    _install_dir: TempDir,
}

/// A service whose `Bootstrap` provider advertises `advertised` and, when
/// asked to install one, adds a module exporting it under the `mem` location.
fn fixture(advertised: Vec<SoftwareIdentity>, install_fails: bool) -> Fixture {
    let source = Arc::new(InlineModuleSource::new());
    let calls = Arc::new(Calls::default());
    let advertised = Arc::new(advertised);
    let install_dir = TempDir::new().unwrap();

    let installed_into = Arc::clone(&source);
    let counters = Arc::clone(&calls);
    source.add("mem", "bootstrap", Some("1.0"), move || {
        let advertised = Arc::clone(&advertised);
        let finds = Arc::clone(&counters);
        let installs = Arc::clone(&counters);
        let target = Arc::clone(&installed_into);

        Ok(vec![DynamicObject::new("BootstrapProvider")
            .constant("get_package_provider_name", "Bootstrap")
            .member("find_package", &FIND_PARAMS, ValueKind::Unit, move |args, request| {
                finds.finds.fetch_add(1, Ordering::SeqCst);
                let wanted = args[0].as_str().map(str::to_lowercase);
                for identity in advertised.iter() {
                    if wanted.as_deref().map_or(true, |w| identity.name.to_lowercase() == w) {
                        request.yield_value(identity.to_value());
                    }
                }
                Ok(Value::Null)
            })
            .member(
                "install_package",
                &[ValueKind::String],
                ValueKind::Unit,
                move |args, request| {
                    installs.installs.fetch_add(1, Ordering::SeqCst);
                    *installs.destination.lock() = request.option(DESTINATION_PATH_OPTION);
                    if install_fails {
                        return Err(ProviderError::plugin("checksum mismatch"));
                    }

                    let fast_path = args[0].as_str().unwrap_or_default().to_string();
                    let name = fast_path.split('|').next().unwrap_or_default().to_string();
                    let version = fast_path.split('|').nth(1).unwrap_or("1.0").to_string();
                    let provider = name.clone();
                    target.add("mem", &name, Some(version.as_str()), move || {
                        Ok(vec![package(&provider)])
                    });

                    request.yield_value(SoftwareIdentity::new(fast_path, name, version).to_value());
                    Ok(Value::Null)
                },
            )
            .build()])
    });

    let source: Arc<dyn ModuleSource> = source;
    let service = ProviderService::new(
        vec![source],
        ServiceOptions {
            locations: vec!["mem".to_string()],
            include_default_locations: false,
            bootstrap: BootstrapOptions {
                destination: Some(install_dir.path().to_path_buf()),
                ..BootstrapOptions::default()
            },
            ..ServiceOptions::default()
        },
    );

    Fixture {
        service,
        calls,
        _install_dir: install_dir,
    }
}

fn gallery(version: &str) -> SoftwareIdentity {
    SoftwareIdentity::new(format!("Gallery|{version}"), "Gallery", version)
        .with_meta(PROVIDER_TYPE, "module")
        .with_link(INSTALLATION_MEDIA, "https://example.invalid/gallery.zip")
}

#[tokio::test]
async fn test_missing_provider_is_installed_and_discovered() {
    let f = fixture(vec![gallery("1.0"), gallery("2.5")], false);
    let host: SharedHost = DefaultHost::new().interactive(true).into_shared();
    f.service.discover(host.clone()).await;

    let provider = f
        .service
        .package_provider("Gallery", None, host.clone())
        .await
        .expect("bootstrapped");

    assert_eq!(provider.name(), "Gallery");
    assert_eq!(provider.version(), ProviderVersion::new(2, 5, 0, 0));
    assert_eq!(f.calls.installs.load(Ordering::SeqCst), 1);

    let destination = f.calls.destination.lock().clone().map(PathBuf::from);
    assert_eq!(destination.as_deref(), f.service.bootstrap().options().destination.as_deref());
    assert!(f
        .service
        .loader()
        .known_locations()
        .contains(&f._install_dir.path().display().to_string()));

    // Already registered: no further bootstrap.
    assert!(f.service.package_provider("gallery", None, host).await.is_some());
    assert_eq!(f.calls.finds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bootstrap_attempted_once_per_session() {
    let f = fixture(Vec::new(), false);
    let default_host = DefaultHost::new().interactive(true).into_shared();
    let host: SharedHost = default_host.clone();
    f.service.discover(host.clone()).await;

    assert!(f.service.package_provider("Missing", None, host.clone()).await.is_none());
    assert!(f.service.package_provider("Missing", None, host.clone()).await.is_none());
    assert_eq!(f.calls.finds.load(Ordering::SeqCst), 1);

    default_host.next_session();
    assert!(f.service.package_provider("Missing", None, host).await.is_none());
    assert_eq!(f.calls.finds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_interactive_host_never_contacts_bootstrap() {
    let f = fixture(vec![gallery("1.0")], false);
    let host: SharedHost = DefaultHost::new().into_shared();
    f.service.discover(host.clone()).await;

    assert!(f.service.package_provider("Gallery", None, host).await.is_none());
    assert_eq!(f.calls.finds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_declined_prompt_installs_nothing() {
    let f = fixture(vec![gallery("1.0")], false);
    let host: SharedHost = DefaultHost::new().interactive(false).into_shared();
    f.service.discover(host.clone()).await;

    assert!(f.service.package_provider("Gallery", None, host).await.is_none());
    assert_eq!(f.calls.finds.load(Ordering::SeqCst), 1);
    assert_eq!(f.calls.installs.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct RecordingHost {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl HostApi for RecordingHost {
    fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn ask_yes_no(&self, _prompt: &str) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn call_session(&self) -> u64 {
        7
    }
}

#[tokio::test]
async fn test_failed_install_is_reported() {
    let f = fixture(vec![gallery("1.0")], true);
    let recorder = Arc::new(RecordingHost::default());
    f.service.discover(recorder.clone()).await;

    let resolved = f
        .service
        .bootstrap()
        .resolve("test", "Gallery", None, recorder.clone())
        .await;
    assert!(!resolved);
    assert_eq!(f.calls.installs.load(Ordering::SeqCst), 1);

    let diagnostics = recorder.diagnostics.lock();
    let bootstrap_errors = diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::Bootstrap)
        .count();
    assert_eq!(bootstrap_errors, 1);
    assert!(diagnostics
        .iter()
        .any(|d| d.message.contains("Bootstrap failed for 'Gallery'") && d.message.contains("checksum mismatch")));
}

#[tokio::test]
async fn test_no_bootstrap_provider_fails_fast() {
    let service = ProviderService::new(
        Vec::new(),
        ServiceOptions {
            include_default_locations: false,
            ..ServiceOptions::default()
        },
    );
    let recorder = Arc::new(RecordingHost::default());

    let resolved = service
        .bootstrap()
        .resolve("test", "Gallery", None, recorder.clone())
        .await;
    assert!(!resolved);
    assert!(recorder
        .diagnostics
        .lock()
        .iter()
        .any(|d| d.kind == DiagnosticKind::Bootstrap && d.message.contains("no bootstrap provider")));
}

#[tokio::test]
async fn test_select_providers_and_names() {
    let f = fixture(vec![gallery("1.0")], false);
    let recorder = Arc::new(RecordingHost::default());
    f.service.discover(recorder.clone()).await;

    let all = f.service.select_providers("*", recorder.clone()).await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name(), "Bootstrap");

    assert!(f.service.select_providers("Zip*", recorder.clone()).await.is_empty());

    let names = f.service.all_provider_names(recorder.clone()).await;
    assert_eq!(names, vec!["Bootstrap", "Gallery"]);

    // A plain unknown name is bootstrapped; one nobody advertises is reported.
    let selected = f.service.select_providers("Gallery", recorder.clone()).await;
    assert_eq!(selected.len(), 1);
    assert!(f.service.select_providers("Unheard", recorder.clone()).await.is_empty());
    assert!(recorder
        .diagnostics
        .lock()
        .iter()
        .any(|d| d.message.contains("unknown provider 'Unheard'")));
}

/// Answers the bootstrap prompt only once a task spawned on the runtime has
/// run, so it says yes only if the prompt leaves the runtime free to make
/// progress.
struct HandshakeHost;

impl HostApi for HandshakeHost {
    fn emit(&self, _diagnostic: Diagnostic) {}

    fn ask_yes_no(&self, _prompt: &str) -> bool {
        false
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn call_session(&self) -> u64 {
        1
    }

    fn should_bootstrap_provider(&self, _prompt: &BootstrapPrompt) -> bool {
        let answered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&answered);
        tokio::runtime::Handle::current().spawn(async move { flag.store(true, Ordering::SeqCst) });

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if answered.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

#[tokio::test]
async fn test_prompt_does_not_block_the_runtime() {
    let f = fixture(vec![gallery("1.0")], false);
    let host: SharedHost = Arc::new(HandshakeHost);
    f.service.discover(host.clone()).await;

    assert!(f.service.package_provider("Gallery", None, host).await.is_some());
    assert_eq!(f.calls.installs.load(Ordering::SeqCst), 1);
}
