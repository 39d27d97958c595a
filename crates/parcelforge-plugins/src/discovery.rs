//! Module discovery from provider directories.
//!
//! Modules are discovered from the following locations (in order):
//!
//! 1. `$XDG_DATA_HOME/parcelforge/providers/` (user providers)
//! 2. `$XDG_DATA_DIRS/parcelforge/providers/` (system providers)
//! 3. `/usr/local/share/parcelforge/providers`, `/usr/share/parcelforge/providers`
//!
//! Each module is a directory containing a `manifest.toml` file. A location
//! may also point directly at a module directory.

use crate::manifest::{ModuleManifest, MANIFEST_FILE};
use chrono::{DateTime, Utc};
use parcelforge_core::ProviderResult;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A module directory with a parsed manifest.
#[derive(Debug, Clone)]
pub struct ModulePath {
    /// Path to the module directory.
    pub path: PathBuf,

    pub manifest: ModuleManifest,

    /// Raw manifest bytes, used for fingerprinting.
    pub manifest_bytes: Vec<u8>,

    /// Last modification time of the manifest.
    pub modified: Option<DateTime<Utc>>,
}

impl ModulePath {
    pub fn id(&self) -> &str {
        &self.manifest.module.id
    }
}

/// Get the user providers directory.
pub fn user_providers_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "raibid-labs", "parcelforge")
        .map(|dirs| dirs.data_dir().join("providers"))
}

/// Get the system providers directories that exist.
pub fn system_providers_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(data_dirs) = std::env::var("XDG_DATA_DIRS") {
        for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
            let provider_dir = PathBuf::from(dir).join("parcelforge/providers");
            if provider_dir.exists() {
                dirs.push(provider_dir);
            }
        }
    }

    let default_dirs = [
        "/usr/local/share/parcelforge/providers",
        "/usr/share/parcelforge/providers",
    ];

    for dir in default_dirs {
        let path = PathBuf::from(dir);
        if path.exists() && !dirs.contains(&path) {
            dirs.push(path);
        }
    }

    dirs
}

/// User directory first, then system directories.
pub fn default_locations() -> Vec<PathBuf> {
    user_providers_dir()
        .into_iter()
        .chain(system_providers_dirs())
        .collect()
}

/// Find every module under `location`.
///
/// If `location` is itself a module directory, that module alone is returned.
/// A missing location yields nothing. Unreadable manifests are logged and
/// skipped.
pub fn scan_location(location: &Path) -> ProviderResult<Vec<ModulePath>> {
    if location.join(MANIFEST_FILE).is_file() {
        return Ok(vec![discover_module(location)?]);
    }

    let mut modules = Vec::new();
    let mut seen_ids = HashSet::new();
    discover_in_directory(location, &mut modules, &mut seen_ids);
    Ok(modules)
}

/// Discover modules in the immediate subdirectories of `dir`.
pub fn discover_in_directory(
    dir: &Path,
    modules: &mut Vec<ModulePath>,
    seen_ids: &mut HashSet<String>,
) {
    if !dir.exists() {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to read providers directory {:?}: {}", dir, e);
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if !path.is_dir() {
            continue;
        }

        if !path.join(MANIFEST_FILE).exists() {
            debug!("Skipping {:?}: no {}", path, MANIFEST_FILE);
            continue;
        }

        match discover_module(&path) {
            Ok(module) => {
                if !seen_ids.insert(module.id().to_string()) {
                    debug!("Skipping duplicate module: {}", module.id());
                    continue;
                }
                debug!(
                    "Discovered module: {} at {:?}",
                    module.manifest.name(),
                    path
                );
                modules.push(module);
            }
            Err(e) => {
                warn!("Failed to load manifest from {:?}: {}", path, e);
            }
        }
    }
}

/// Read a single module directory.
pub fn discover_module(path: &Path) -> ProviderResult<ModulePath> {
    let manifest_path = path.join(MANIFEST_FILE);
    let manifest_bytes = std::fs::read(&manifest_path)?;
    let manifest = ModuleManifest::parse(&String::from_utf8_lossy(&manifest_bytes))?;
    let modified = std::fs::metadata(&manifest_path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    Ok(ModulePath {
        path: path.to_path_buf(),
        manifest,
        manifest_bytes,
        modified,
    })
}
