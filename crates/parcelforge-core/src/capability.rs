//! Capability contracts.
//!
//! A capability is a host-owned list of member signatures. Plugin objects never
//! declare which capability they implement; they satisfy one by exposing members
//! that match it (see [`crate::adapter`]).

use crate::value::ValueKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the contract definitions below. Bumped whenever a member is
/// added, removed or changes shape.
pub const CONTRACT_VERSION: &str = "1.0.0.0";

/// The categories a provider can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Enumerates and constructs other providers.
    MetaProvider,

    /// Finds, installs and uninstalls packages.
    PackageProvider,

    /// Extracts archive files.
    Archiver,

    /// Fetches remote files.
    Downloader,
}

impl CapabilityKind {
    /// All categories, in the order the loader scans them.
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::MetaProvider,
        CapabilityKind::PackageProvider,
        CapabilityKind::Archiver,
        CapabilityKind::Downloader,
    ];

    /// Categories a meta-provider's constructed instances are tested against.
    pub const CONSTRUCTIBLE: [CapabilityKind; 3] = [
        CapabilityKind::PackageProvider,
        CapabilityKind::Archiver,
        CapabilityKind::Downloader,
    ];

    /// Parse a category from a string. Case and separators are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match normalize_member_name(s).as_str() {
            "metaprovider" => Some(CapabilityKind::MetaProvider),
            "packageprovider" => Some(CapabilityKind::PackageProvider),
            "archiver" => Some(CapabilityKind::Archiver),
            "downloader" => Some(CapabilityKind::Downloader),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::MetaProvider => "MetaProvider",
            CapabilityKind::PackageProvider => "PackageProvider",
            CapabilityKind::Archiver => "Archiver",
            CapabilityKind::Downloader => "Downloader",
        }
    }

    /// The member that reports a provider's name in this category.
    pub fn name_member(&self) -> &'static str {
        match self {
            CapabilityKind::MetaProvider => "get_meta_provider_name",
            CapabilityKind::PackageProvider => "get_package_provider_name",
            CapabilityKind::Archiver => "get_archiver_name",
            CapabilityKind::Downloader => "get_downloader_name",
        }
    }

    /// The contract for this category.
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityKind::MetaProvider => meta_provider_contract(),
            CapabilityKind::PackageProvider => package_provider_contract(),
            CapabilityKind::Archiver => archiver_contract(),
            CapabilityKind::Downloader => downloader_contract(),
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of a capability contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    pub name: &'static str,
    pub params: Vec<ValueKind>,
    pub returns: ValueKind,

    /// Whether a candidate must expose this member to satisfy the contract.
    pub required: bool,

    /// Whether the member yields results through the request rather than
    /// returning them.
    pub streaming: bool,
}

impl MemberSpec {
    fn required(name: &'static str, params: &[ValueKind], returns: ValueKind) -> Self {
        Self {
            name,
            params: params.to_vec(),
            returns,
            required: true,
            streaming: false,
        }
    }

    fn optional(name: &'static str, params: &[ValueKind], returns: ValueKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, params, returns)
        }
    }

    fn streaming(name: &'static str, params: &[ValueKind]) -> Self {
        Self {
            streaming: true,
            ..Self::optional(name, params, ValueKind::Unit)
        }
    }

    /// Normalized name used for matching.
    pub fn key(&self) -> String {
        normalize_member_name(self.name)
    }
}

/// A named set of member signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub members: Vec<MemberSpec>,
}

impl Capability {
    /// Find a member by name (case-insensitive, underscores ignored).
    pub fn member(&self, name: &str) -> Option<&MemberSpec> {
        let key = normalize_member_name(name);
        self.members.iter().find(|m| m.key() == key)
    }

    pub fn required_members(&self) -> impl Iterator<Item = &MemberSpec> {
        self.members.iter().filter(|m| m.required)
    }
}

/// Normalize a member name: lower-case with `_` and `-` removed, so that
/// `GetPackageProviderName` and `get_package_provider_name` compare equal.
pub fn normalize_member_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

use ValueKind::{Bool, Map, Object, String as Str, StringList, Unit};

fn common_members() -> Vec<MemberSpec> {
    vec![
        MemberSpec::optional("initialize_provider", &[], Unit),
        MemberSpec::optional("get_provider_version", &[], Str),
        MemberSpec::optional("get_features", &[], Map),
        MemberSpec::streaming("get_dynamic_options", &[Str]),
    ]
}

fn package_provider_contract() -> Capability {
    let mut members = vec![MemberSpec::required("get_package_provider_name", &[], Str)];
    members.extend(common_members());
    members.extend([
        MemberSpec::streaming("add_package_source", &[Str, Str, Bool]),
        MemberSpec::streaming("resolve_package_sources", &[]),
        MemberSpec::streaming("remove_package_source", &[Str]),
        MemberSpec::streaming("find_package", &[Str, Str, Str, Str]),
        MemberSpec::streaming("find_package_by_file", &[Str]),
        MemberSpec::streaming("find_package_by_uri", &[Str]),
        MemberSpec::streaming("get_installed_packages", &[Str]),
        MemberSpec::streaming("download_package", &[Str, Str]),
        MemberSpec::streaming("get_package_dependencies", &[Str]),
        MemberSpec::streaming("get_package_details", &[Str]),
        MemberSpec::streaming("install_package", &[Str]),
        MemberSpec::streaming("uninstall_package", &[Str]),
    ]);
    Capability {
        kind: CapabilityKind::PackageProvider,
        members,
    }
}

fn archiver_contract() -> Capability {
    let mut members = vec![
        MemberSpec::required("get_archiver_name", &[], Str),
        MemberSpec::required("is_supported_file", &[Str], Bool),
        MemberSpec::required("unpack_archive", &[Str, Str], StringList),
    ];
    members.extend(common_members());
    Capability {
        kind: CapabilityKind::Archiver,
        members,
    }
}

fn downloader_contract() -> Capability {
    let mut members = vec![
        MemberSpec::required("get_downloader_name", &[], Str),
        MemberSpec::required("supported_schemes", &[], StringList),
        MemberSpec::required("download_file", &[Str, Str], Str),
    ];
    members.extend(common_members());
    Capability {
        kind: CapabilityKind::Downloader,
        members,
    }
}

fn meta_provider_contract() -> Capability {
    let mut members = vec![
        MemberSpec::required("get_meta_provider_name", &[], Str),
        MemberSpec::required("get_provider_names", &[], StringList),
        MemberSpec::required("create_provider", &[Str], Object),
        MemberSpec::optional("get_provider_path", &[Str], Str),
    ];
    members.extend(common_members());
    Capability {
        kind: CapabilityKind::MetaProvider,
        members,
    }
}
