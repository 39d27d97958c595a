//! On-demand installation of missing providers.
//!
//! A distinguished package provider (named `Bootstrap` by default) knows how
//! to find and install other providers. When a lookup misses, the resolver
//! asks it for the provider, confirms with the user, installs it and re-runs
//! discovery so the new provider gets registered.
//!
//! Each provider name is attempted at most once per host call session, so a
//! single command never prompts for the same provider twice.

use crate::discovery::user_providers_dir;
use crate::loader::PluginLoader;
use crate::registry::{MissingProviderResolver, ProviderRecord, ProviderRegistry};
use async_trait::async_trait;
use parcelforge_core::{
    BootstrapPrompt, CapabilityKind, Diagnostic, DiagnosticKind, OptionOverlay, ProviderError,
    ProviderResult, ProviderVersion, SharedHost, SoftwareIdentity, Value, INSTALLATION_MEDIA,
    PROVIDER_TYPE,
};
use parcelforge_runtime::{Dispatcher, RequestState};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Option carrying the install destination to the bootstrap provider.
pub const DESTINATION_PATH_OPTION: &str = "DestinationPath";

/// Provider types that are installed into a provider directory.
const DIRECTORY_PROVIDER_TYPES: [&str; 3] = ["assembly", "module", "binary"];

/// Bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub enabled: bool,

    /// Name of the package provider that installs other providers.
    pub provider_name: String,

    /// Install directory for downloaded providers. Defaults to the user
    /// providers directory.
    pub destination: Option<PathBuf>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_name: "Bootstrap".to_string(),
            destination: None,
        }
    }
}

#[derive(Debug, Default)]
struct SessionMemory {
    session: Option<u64>,
    attempted: HashSet<String>,
}

impl SessionMemory {
    /// Record an attempt. Returns false if `name` was already attempted in
    /// this session. A newer session forgets earlier attempts.
    fn first_attempt(&mut self, name: &str, session: u64) -> bool {
        match self.session {
            Some(current) if session <= current => {}
            _ => {
                self.session = Some(session);
                self.attempted.clear();
            }
        }
        self.attempted.insert(name.to_lowercase())
    }
}

/// Finds and installs missing providers through the bootstrap provider.
pub struct BootstrapResolver {
    registry: Arc<ProviderRegistry>,
    loader: PluginLoader,
    dispatcher: Arc<Dispatcher>,
    options: BootstrapOptions,
    memory: Mutex<SessionMemory>,
}

impl BootstrapResolver {
    pub fn new(loader: PluginLoader, dispatcher: Arc<Dispatcher>, options: BootstrapOptions) -> Self {
        Self {
            registry: Arc::clone(loader.registry()),
            loader,
            dispatcher,
            options,
            memory: Mutex::new(SessionMemory::default()),
        }
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Make `provider_name` (at `min_version` or later) available. Returns
    /// whether it was installed and discovered, or was already present.
    ///
    /// Fails fast when bootstrapping is disabled, the host cannot prompt, the
    /// name was already attempted in this call session, or there is no
    /// bootstrap provider.
    pub async fn resolve(
        &self,
        requestor: &str,
        provider_name: &str,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
    ) -> bool {
        if !self.options.enabled {
            return false;
        }
        if self.is_registered(provider_name, min_version) {
            return true;
        }
        if !host.is_interactive() {
            debug!(provider = provider_name, "not bootstrapping: host is not interactive");
            return false;
        }
        if !self
            .memory
            .lock()
            .first_attempt(provider_name, host.call_session())
        {
            debug!(provider = provider_name, "bootstrap already attempted in this session");
            return false;
        }

        let Some(bootstrap) = self.bootstrap_provider(host.clone()).await else {
            self.report(&host, provider_name, "no bootstrap provider is available");
            return false;
        };

        let Some(candidate) = self
            .find_candidate(&bootstrap, provider_name, min_version, host.clone())
            .await
        else {
            return false;
        };

        let destination = self.destination_for(&candidate);
        let prompt = BootstrapPrompt {
            requestor: requestor.to_string(),
            provider_name: candidate.name.clone(),
            version: candidate.version.clone(),
            location: candidate.link(INSTALLATION_MEDIA).map(str::to_string),
            destination: destination.as_ref().map(|d| d.display().to_string()),
        };
        // Console hosts block on stdin while the user decides.
        let asked = host.clone();
        let accepted = tokio::task::spawn_blocking(move || asked.should_bootstrap_provider(&prompt))
            .await
            .unwrap_or(false);
        if !accepted {
            debug!(provider = provider_name, "user declined bootstrap");
            return false;
        }

        if let Err(e) = self
            .install(&bootstrap, &candidate, destination.as_ref(), host.clone())
            .await
        {
            warn!(provider = %candidate.name, error = %e, "bootstrap install failed");
            host.emit(Diagnostic::error(
                DiagnosticKind::Bootstrap,
                candidate.name.clone(),
                e.to_string(),
            ));
            return false;
        }

        let mut locations = self.loader.known_locations();
        if let Some(destination) = destination {
            let destination = destination.display().to_string();
            if !locations.contains(&destination) {
                locations.push(destination);
            }
        }
        let registered = self.loader.discover(&locations, host).await;
        info!(provider = provider_name, registered, "bootstrapped provider");
        true
    }

    /// Names the bootstrap provider can install.
    pub async fn bootstrappable_names(&self, host: SharedHost) -> Vec<String> {
        if !self.options.enabled {
            return Vec::new();
        }
        let Some(bootstrap) = self.bootstrap_provider(host.clone()).await else {
            return Vec::new();
        };

        let call = self.dispatcher.invoke_streaming(
            bootstrap.handle(),
            "find_package",
            vec![Value::Null, Value::Null, Value::Null, Value::Null],
            host,
        );
        let mut names: Vec<String> = call
            .collect()
            .await
            .iter()
            .filter_map(SoftwareIdentity::from_value)
            .map(|identity| identity.name)
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        names
    }

    fn is_registered(&self, name: &str, min_version: Option<ProviderVersion>) -> bool {
        CapabilityKind::CONSTRUCTIBLE.iter().any(|kind| {
            self.registry
                .lookup(name, *kind)
                .is_some_and(|record| min_version.map_or(true, |min| record.version() >= min))
        })
    }

    async fn bootstrap_provider(&self, host: SharedHost) -> Option<Arc<ProviderRecord>> {
        self.registry
            .lookup_initialized(&self.options.provider_name, CapabilityKind::PackageProvider, host)
            .await
    }

    /// Ask the bootstrap provider for `name` and pick the single best match.
    async fn find_candidate(
        &self,
        bootstrap: &ProviderRecord,
        name: &str,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
    ) -> Option<SoftwareIdentity> {
        let call = self.dispatcher.invoke_streaming(
            bootstrap.handle(),
            "find_package",
            vec![
                Value::from(name),
                Value::Null,
                min_version.map(|v| Value::from(v.to_string())).unwrap_or_default(),
                Value::Null,
            ],
            host.clone(),
        );
        let found = call.collect().await;

        // Highest version per distinct name.
        let mut best: BTreeMap<String, SoftwareIdentity> = BTreeMap::new();
        for identity in found.iter().filter_map(SoftwareIdentity::from_value) {
            let key = identity.name.to_lowercase();
            let newer = best
                .get(&key)
                .map_or(true, |current| identity.parsed_version() > current.parsed_version());
            if newer {
                best.insert(key, identity);
            }
        }

        match best.len() {
            0 => {
                self.report(&host, name, "the bootstrap provider does not know this provider");
                None
            }
            1 => best.into_values().next(),
            n => {
                self.report(&host, name, &format!("{n} different providers match this name"));
                None
            }
        }
    }

    fn destination_for(&self, candidate: &SoftwareIdentity) -> Option<PathBuf> {
        let provider_type = candidate.meta(PROVIDER_TYPE)?;
        if !DIRECTORY_PROVIDER_TYPES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(provider_type))
        {
            return None;
        }
        self.options.destination.clone().or_else(user_providers_dir)
    }

    async fn install(
        &self,
        bootstrap: &ProviderRecord,
        candidate: &SoftwareIdentity,
        destination: Option<&PathBuf>,
        host: SharedHost,
    ) -> ProviderResult<()> {
        let install_host = match destination {
            Some(path) => OptionOverlay::new(host.clone())
                .with_option(DESTINATION_PATH_OPTION, vec![path.display().to_string()])
                .into_shared(),
            None => host,
        };

        let call = self.dispatcher.invoke_streaming(
            bootstrap.handle(),
            "install_package",
            vec![Value::from(candidate.fast_path.as_str())],
            install_host,
        );
        let installed = call.collect().await;
        let state = call.state();

        if installed.is_empty() || state != RequestState::Completed {
            return Err(ProviderError::BootstrapFailed {
                provider: candidate.name.clone(),
                reason: format!(
                    "installing {} {} ended {}{}",
                    candidate.name,
                    candidate.version,
                    state,
                    call.fault().map(|f| format!(": {f}")).unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    fn report(&self, host: &SharedHost, provider_name: &str, message: &str) {
        warn!(provider = provider_name, "bootstrap failed: {}", message);
        host.emit(Diagnostic::warn(DiagnosticKind::Bootstrap, provider_name, message));
    }
}

#[async_trait]
impl MissingProviderResolver for BootstrapResolver {
    async fn resolve(
        &self,
        requestor: &str,
        provider_name: &str,
        min_version: Option<ProviderVersion>,
        host: SharedHost,
    ) -> bool {
        BootstrapResolver::resolve(self, requestor, provider_name, min_version, host).await
    }
}
