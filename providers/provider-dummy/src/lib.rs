//! # provider-dummy
//!
//! Dummy providers for testing and development.
//!
//! These providers return static fixture data and never touch the network or
//! the filesystem. The [`DummyModuleFactory`] exports one provider of each
//! category so hosts and tests can exercise discovery, dispatch and
//! meta-provider expansion end to end.

use chrono::Utc;
use parcelforge_core::{
    DynamicObject, MemberSignature, PackageSource, PluginObject, PluginRef, ProviderError,
    ProviderRequest, ProviderResult, ProviderVersion, SoftwareIdentity, Value, ValueKind,
};
use parcelforge_plugins::{ModuleDescriptor, ModuleFactory};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name manifests use for this factory.
pub const FACTORY_NAME: &str = "dummy";

/// Version reported when the module does not configure one.
pub const DEFAULT_VERSION: &str = "1.2.0";

/// A package provider serving a fixed catalogue.
pub struct DummyPackageProvider {
    name: String,
    version: String,
    installed: Mutex<BTreeMap<String, SoftwareIdentity>>,
    sources: Mutex<Vec<PackageSource>>,
}

impl DummyPackageProvider {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            sources: Mutex::new(vec![PackageSource {
                name: "dummy-feed".to_string(),
                location: "dummy://feed".to_string(),
                trusted: true,
                registered: true,
                provider_name: Some(name.clone()),
            }]),
            installed: Mutex::new(BTreeMap::new()),
            name,
            version: DEFAULT_VERSION.to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The static catalogue.
    fn catalogue(&self) -> Vec<SoftwareIdentity> {
        [
            ("dummy-utils", "1.0.0", "Small command line helpers"),
            ("dummy-utils", "1.2.0", "Small command line helpers"),
            ("dummy-lib", "0.9.1", "A library with no dependencies"),
            ("dummy-app", "2.0.0", "An application depending on dummy-lib"),
        ]
        .into_iter()
        .map(|(name, version, summary)| {
            let mut identity =
                SoftwareIdentity::new(format!("{name}|{version}"), name, version);
            identity.summary = Some(summary.to_string());
            identity.source = Some("dummy-feed".to_string());
            identity.provider_name = Some(self.name.clone());
            identity
        })
        .collect()
    }

    fn lookup(&self, fast_path: &str) -> Option<SoftwareIdentity> {
        self.catalogue().into_iter().find(|p| p.fast_path == fast_path)
    }

    fn find(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let name = args[0].as_str().unwrap_or_default().to_lowercase();
        let required = args[1].as_str().map(ProviderVersion::parse_lenient);
        let minimum = args[2].as_str().map(ProviderVersion::parse_lenient);
        let maximum = args[3].as_str().map(ProviderVersion::parse_lenient);

        request.debug(&format!("searching for '{name}'"));
        for package in self.catalogue() {
            if request.is_cancelled() {
                break;
            }
            let version = package.parsed_version();
            let matches = package.name.contains(&name)
                && required.map_or(true, |v| version == v)
                && minimum.map_or(true, |v| version >= v)
                && maximum.map_or(true, |v| version <= v);
            if matches && !request.yield_value(package.to_value()) {
                break;
            }
        }
        Ok(Value::Null)
    }

    fn install(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let fast_path = args[0].as_str().unwrap_or_default();
        let package = self
            .lookup(fast_path)
            .ok_or_else(|| ProviderError::plugin(format!("unknown package '{fast_path}'")))?;

        for percent in [0, 50, 100] {
            request.progress(1, percent, &format!("installing {}", package.name));
        }
        let package = package.with_meta("installedAt", Utc::now().to_rfc3339());
        self.installed
            .lock()
            .insert(package.name.clone(), package.clone());
        request.yield_value(package.to_value());
        Ok(Value::Null)
    }

    fn uninstall(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let fast_path = args[0].as_str().unwrap_or_default();
        let mut installed = self.installed.lock();
        let key = installed
            .iter()
            .find(|(_, p)| p.fast_path == fast_path)
            .map(|(k, _)| k.clone());
        if let Some(package) = key.and_then(|k| installed.remove(&k)) {
            request.yield_value(package.to_value());
        }
        Ok(Value::Null)
    }

    fn installed(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let filter = args[0].as_str().unwrap_or_default().to_lowercase();
        let installed: Vec<_> = self.installed.lock().values().cloned().collect();
        for package in installed.into_iter().filter(|p| p.name.contains(&filter)) {
            if !request.yield_value(package.to_value()) {
                break;
            }
        }
        Ok(Value::Null)
    }

    fn dependencies(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        if args[0].as_str() == Some("dummy-app|2.0.0") {
            if let Some(lib) = self.lookup("dummy-lib|0.9.1") {
                request.yield_value(lib.to_value());
            }
        }
        Ok(Value::Null)
    }

    fn add_source(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let source = PackageSource {
            name: args[0].as_str().unwrap_or_default().to_string(),
            location: args[1].as_str().unwrap_or_default().to_string(),
            trusted: args[2].as_bool().unwrap_or(false),
            registered: true,
            provider_name: Some(self.name.clone()),
        };
        if source.name.is_empty() {
            return Err(ProviderError::plugin("source name is required"));
        }
        let mut sources = self.sources.lock();
        sources.retain(|s| !s.name.eq_ignore_ascii_case(&source.name));
        sources.push(source.clone());
        request.yield_value(source.to_value());
        Ok(Value::Null)
    }

    fn remove_source(&self, args: &[Value], request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let name = args[0].as_str().unwrap_or_default();
        let mut sources = self.sources.lock();
        if let Some(index) = sources.iter().position(|s| s.name.eq_ignore_ascii_case(name)) {
            request.yield_value(sources.remove(index).to_value());
        }
        Ok(Value::Null)
    }

    fn resolve_sources(&self, request: &dyn ProviderRequest) -> ProviderResult<Value> {
        let sources = self.sources.lock().clone();
        for source in sources {
            request.yield_value(source.to_value());
        }
        Ok(Value::Null)
    }

    fn features() -> Value {
        let mut features = BTreeMap::new();
        features.insert("file-extensions".to_string(), Value::from(vec![".dpkg"]));
        features.insert("uri-schemes".to_string(), Value::from(vec!["dummy"]));
        Value::Map(features)
    }
}

impl PluginObject for DummyPackageProvider {
    fn type_name(&self) -> &str {
        "DummyPackageProvider"
    }

    fn members(&self) -> Vec<MemberSignature> {
        use ValueKind::{Bool, Map, String as Str, Unit};
        vec![
            MemberSignature::new("get_package_provider_name", &[], Str),
            MemberSignature::new("get_provider_version", &[], Str),
            MemberSignature::new("initialize_provider", &[], Unit),
            MemberSignature::new("get_features", &[], Map),
            MemberSignature::new("get_dynamic_options", &[Str], Unit),
            MemberSignature::new("find_package", &[Str, Str, Str, Str], Unit),
            MemberSignature::new("get_installed_packages", &[Str], Unit),
            MemberSignature::new("install_package", &[Str], Unit),
            MemberSignature::new("uninstall_package", &[Str], Unit),
            MemberSignature::new("get_package_dependencies", &[Str], Unit),
            MemberSignature::new("add_package_source", &[Str, Str, Bool], Unit),
            MemberSignature::new("remove_package_source", &[Str], Unit),
            MemberSignature::new("resolve_package_sources", &[], Unit),
        ]
    }

    fn invoke(
        &self,
        member: &str,
        args: &[Value],
        request: &dyn ProviderRequest,
    ) -> ProviderResult<Value> {
        match member {
            "get_package_provider_name" => Ok(Value::from(self.name.as_str())),
            "get_provider_version" => Ok(Value::from(self.version.as_str())),
            "initialize_provider" => {
                request.debug("dummy provider ready");
                Ok(Value::Null)
            }
            "get_features" => Ok(Self::features()),
            "get_dynamic_options" => {
                if args[0].as_str() == Some("install") {
                    request.yield_value(Value::from("Scope"));
                }
                Ok(Value::Null)
            }
            "find_package" => self.find(args, request),
            "get_installed_packages" => self.installed(args, request),
            "install_package" => self.install(args, request),
            "uninstall_package" => self.uninstall(args, request),
            "get_package_dependencies" => self.dependencies(args, request),
            "add_package_source" => self.add_source(args, request),
            "remove_package_source" => self.remove_source(args, request),
            "resolve_package_sources" => self.resolve_sources(request),
            other => Err(ProviderError::UnknownMember {
                capability: self.type_name().to_string(),
                member: other.to_string(),
            }),
        }
    }
}

/// An archiver that recognises `.dummy-archive` files.
pub fn dummy_archiver() -> PluginRef {
    DynamicObject::new("DummyArchiver")
        .constant("get_archiver_name", "dummy-archiver")
        .member("is_supported_file", &[ValueKind::String], ValueKind::Bool, |args, _| {
            Ok(Value::Bool(
                args[0].as_str().is_some_and(|f| f.ends_with(".dummy-archive")),
            ))
        })
        .member(
            "unpack_archive",
            &[ValueKind::String, ValueKind::String],
            ValueKind::StringList,
            |args, _| {
                let destination = args[1].as_str().unwrap_or(".");
                Ok(Value::from(vec![
                    format!("{destination}/README"),
                    format!("{destination}/payload.bin"),
                ]))
            },
        )
        .build()
}

/// A downloader for `dummy://` URIs.
pub fn dummy_downloader() -> PluginRef {
    DynamicObject::new("DummyDownloader")
        .constant("get_downloader_name", "dummy-downloader")
        .constant("supported_schemes", Value::from(vec!["dummy"]))
        .member(
            "download_file",
            &[ValueKind::String, ValueKind::String],
            ValueKind::String,
            |args, request| {
                let uri = args[0].as_str().unwrap_or_default();
                if !uri.starts_with("dummy://") {
                    return Err(ProviderError::plugin(format!("cannot download '{uri}'")));
                }
                request.progress(2, 100, uri);
                Ok(args[1].clone())
            },
        )
        .build()
}

/// A meta-provider that constructs small scripted package providers.
pub fn dummy_meta_provider() -> PluginRef {
    DynamicObject::new("DummyScriptHost")
        .constant("get_meta_provider_name", "DummyScripts")
        .constant("get_provider_names", Value::from(vec!["ScriptGreeter"]))
        .member("create_provider", &[ValueKind::String], ValueKind::Object, |args, _| {
            let name = args[0]
                .as_str()
                .ok_or_else(|| ProviderError::plugin("provider name required"))?
                .to_string();
            let greeting = SoftwareIdentity::new("greeting|1.0", "greeting", "1.0").to_value();
            Ok(Value::Object(
                DynamicObject::new(name.clone())
                    .constant("get_package_provider_name", name)
                    .constant("get_provider_version", "0.1")
                    .member(
                        "find_package",
                        &[ValueKind::String; 4],
                        ValueKind::Unit,
                        move |_, request| {
                            request.yield_value(greeting.clone());
                            Ok(Value::Null)
                        },
                    )
                    .build(),
            ))
        })
        .build()
}

/// Exports one provider of each category. The package provider's name and
/// reported version can be set with `provider_name` and `provider_version` in
/// the module's `[config]`.
#[derive(Debug, Default)]
pub struct DummyModuleFactory;

impl DummyModuleFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleFactory for DummyModuleFactory {
    fn name(&self) -> &str {
        FACTORY_NAME
    }

    fn create(&self, descriptor: &ModuleDescriptor) -> ProviderResult<Vec<PluginRef>> {
        let name = descriptor.config["provider_name"]
            .as_str()
            .unwrap_or("Dummy");
        let version = descriptor.config["provider_version"]
            .as_str()
            .unwrap_or(DEFAULT_VERSION);
        tracing::debug!(module = %descriptor.identity, provider = name, version, "creating dummy providers");
        Ok(vec![
            Arc::new(DummyPackageProvider::new(name).with_version(version)),
            dummy_archiver(),
            dummy_downloader(),
            dummy_meta_provider(),
        ])
    }
}
