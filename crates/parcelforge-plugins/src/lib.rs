//! # parcelforge-plugins
//!
//! Provider discovery, registration and bootstrap.
//!
//! This crate provides:
//! - Module discovery from provider directories (`manifest.toml` per module)
//! - [`ModuleSource`] implementations for on-disk and in-memory modules
//! - [`ProviderRegistry`], the versioned, per-category provider store
//! - [`PluginLoader`], which tests module exports against the capability
//!   contracts and registers what fits
//! - [`BootstrapResolver`], which installs missing providers on demand
//! - [`ProviderService`], the composition root used by hosts
//!
//! ## Module layout
//!
//! ```text
//! ~/.local/share/parcelforge/providers/
//! └── gallery/
//!     └── manifest.toml
//! ```
//!
//! ```toml
//! [module]
//! id = "gallery"
//! version = "2.8.5"
//! factory = "gallery"
//!
//! [config]
//! feed = "https://example.invalid/feed"
//! ```
//!
//! The `factory` names a [`ModuleFactory`] registered in a [`FactoryCatalog`];
//! it turns the module into plugin objects.

pub mod bootstrap;
pub mod discovery;
pub mod facade;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod registry;
pub mod service;

pub use bootstrap::{BootstrapOptions, BootstrapResolver, DESTINATION_PATH_OPTION};
pub use discovery::{default_locations, user_providers_dir};
pub use facade::{collect_packages, collect_sources, Archiver, Downloader, PackageProvider};
pub use loader::{LoaderOptions, PluginLoader};
pub use manifest::{ModuleManifest, MANIFEST_FILE};
pub use module::{
    FactoryCatalog, InlineModuleSource, ManifestModuleSource, ModuleDescriptor, ModuleFactory,
    ModuleSource,
};
pub use registry::{InitState, MissingProviderResolver, ProviderRecord, ProviderRegistry, RegisterOutcome};
pub use service::{ProviderService, ServiceOptions};
