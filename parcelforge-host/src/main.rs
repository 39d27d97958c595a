//! # parcelforge-host
//!
//! Reference host for the parcelforge provider core.
//!
//! The host:
//! - Loads its configuration and sets up logging
//! - Discovers provider modules (built-in, configured and default locations)
//! - Runs one package operation per invocation against the selected providers
//!
//! ## Running
//!
//! ```bash
//! # List registered providers
//! cargo run --bin parcelforge-host
//!
//! # Search every provider
//! cargo run --bin parcelforge-host -- find utils
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin parcelforge-host -- providers
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parcelforge_core::{CapabilityKind, SharedHost, SoftwareIdentity};
use parcelforge_host::config::Config;
use parcelforge_host::console::ConsoleHost;
use parcelforge_plugins::{
    collect_packages, collect_sources, FactoryCatalog, InlineModuleSource, ManifestModuleSource,
    ModuleSource, PackageProvider, ProviderService,
};
use parcelforge_runtime::{RequestState, StreamingRequest};
use provider_dummy::DummyModuleFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Location key of the providers linked into this binary.
const BUILTIN_LOCATION: &str = "builtin";

#[derive(Debug, Parser)]
#[command(name = "parcelforge-host", version, about = "Drive package providers")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/parcelforge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Extra provider location to scan
    #[arg(long = "location", global = true)]
    locations: Vec<PathBuf>,
    /// Restrict operations to this package source (repeatable)
    #[arg(long = "source", global = true)]
    sources: Vec<String>,
    /// Never prompt, even if the configuration allows it
    #[arg(long, global = true)]
    non_interactive: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered providers
    Providers,
    /// Search for packages
    Find {
        name: String,
        /// Provider name or wildcard pattern
        #[arg(long, default_value = "*")]
        provider: String,
        #[arg(long)]
        required_version: Option<String>,
        #[arg(long)]
        minimum_version: Option<String>,
        #[arg(long)]
        maximum_version: Option<String>,
    },
    /// Install the newest matching package
    Install {
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        required_version: Option<String>,
    },
    /// List installed packages
    Installed {
        name: Option<String>,
        #[arg(long, default_value = "*")]
        provider: String,
    },
    /// List registered package sources
    Sources {
        #[arg(long, default_value = "*")]
        provider: String,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

fn build_service(config: &Config) -> ProviderService {
    let catalog = Arc::new(FactoryCatalog::new());
    catalog.register(Arc::new(DummyModuleFactory::new()));

    let builtin = Arc::new(InlineModuleSource::new());
    builtin.add_factory(BUILTIN_LOCATION, None, Arc::new(DummyModuleFactory::new()));

    let builtin: Arc<dyn ModuleSource> = builtin;
    let manifests: Arc<dyn ModuleSource> = Arc::new(ManifestModuleSource::new(catalog));

    let mut options = config.service_options();
    options.locations.insert(0, BUILTIN_LOCATION.to_string());
    ProviderService::new(vec![builtin, manifests], options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    config.discovery.locations.extend(cli.locations.iter().cloned());
    if cli.non_interactive {
        config.host.interactive = false;
    }

    init_tracing(&config.host.log_level);
    info!("Starting parcelforge-host v{}", env!("CARGO_PKG_VERSION"));

    let service = build_service(&config);
    let console = Arc::new(
        ConsoleHost::new(config.host.interactive, &config.options).with_sources(cli.sources.clone()),
    );
    let host: SharedHost = console.clone();

    let count = service.discover(host.clone()).await;
    info!(
        "Registered {} provider(s) from {} location(s)",
        count,
        service.locations().len()
    );

    console.begin_session();
    let command = cli.command.unwrap_or(Command::Providers);

    tokio::select! {
        result = run(&service, command, host) => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }

    service.shutdown();
    Ok(())
}

async fn run(service: &ProviderService, command: Command, host: SharedHost) -> Result<()> {
    match command {
        Command::Providers => list_providers(service, host).await,
        Command::Find {
            name,
            provider,
            required_version,
            minimum_version,
            maximum_version,
        } => {
            for provider in service.select_providers(&provider, host.clone()).await {
                let call = provider.find_package(
                    &name,
                    required_version.as_deref(),
                    minimum_version.as_deref(),
                    maximum_version.as_deref(),
                    host.clone(),
                );
                print_packages(&provider, &call).await;
            }
        }
        Command::Install {
            name,
            provider,
            required_version,
        } => {
            let provider = service
                .package_provider(&provider, None, host.clone())
                .await
                .with_context(|| format!("Provider '{provider}' is not available"))?;
            install(&provider, &name, required_version.as_deref(), host).await?;
        }
        Command::Installed { name, provider } => {
            for provider in service.select_providers(&provider, host.clone()).await {
                let call = provider.get_installed_packages(name.as_deref(), host.clone());
                print_packages(&provider, &call).await;
            }
        }
        Command::Sources { provider } => {
            for provider in service.select_providers(&provider, host.clone()).await {
                let call = provider.resolve_package_sources(host.clone());
                for source in collect_sources(&call).await {
                    let trust = if source.trusted { "trusted" } else { "untrusted" };
                    println!("{}\t{}\t{}\t{}", provider.name(), source.name, source.location, trust);
                }
                report_state(&provider, &call);
            }
        }
    }
    Ok(())
}

async fn list_providers(service: &ProviderService, host: SharedHost) {
    for kind in CapabilityKind::ALL {
        for record in service.registry().all(kind) {
            println!("{}\t{}\t{}\t{}", kind, record.name(), record.version(), record.origin());
        }
    }

    let registered = service.registry().names(CapabilityKind::PackageProvider);
    for name in service.all_provider_names(host).await {
        if !registered.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            println!("available\t{name}");
        }
    }
}

async fn print_packages(provider: &PackageProvider, call: &StreamingRequest) {
    for package in collect_packages(call).await {
        println!("{}\t{}\t{}", provider.name(), package.name, package.version);
    }
    report_state(provider, call);
}

fn report_state(provider: &PackageProvider, call: &StreamingRequest) {
    match call.state() {
        RequestState::Completed => {}
        RequestState::Faulted => warn!(
            provider = provider.name(),
            "Request failed: {}",
            call.fault().unwrap_or_default()
        ),
        state => warn!(provider = provider.name(), "Request {}", state),
    }
}

async fn install(
    provider: &PackageProvider,
    name: &str,
    required_version: Option<&str>,
    host: SharedHost,
) -> Result<()> {
    let found = provider.find_package(name, required_version, None, None, host.clone());
    let candidate = collect_packages(&found)
        .await
        .into_iter()
        .filter(|p| p.name.eq_ignore_ascii_case(name))
        .max_by_key(SoftwareIdentity::parsed_version)
        .with_context(|| format!("No package '{}' found in '{}'", name, provider.name()))?;

    let call = provider.install_package(&candidate, host);
    let installed = collect_packages(&call).await;
    if call.state() != RequestState::Completed {
        anyhow::bail!(
            "Installing {} {} failed: {}",
            candidate.name,
            candidate.version,
            call.fault().unwrap_or_else(|| call.state().to_string())
        );
    }

    for package in installed {
        println!("installed\t{}\t{}", package.name, package.version);
    }
    Ok(())
}
