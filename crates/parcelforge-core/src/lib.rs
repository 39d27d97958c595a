//! # parcelforge-core
//!
//! Shared types for the parcelforge provider dispatch core.
//!
//! This crate provides:
//! - Dynamic [`Value`]s exchanged with plugin objects
//! - Four-part [`ProviderVersion`]s
//! - Host-owned capability contracts (package provider, archiver, downloader,
//!   meta-provider)
//! - The [`PluginObject`] trait and the [`DynamicObject`] builder
//! - [`CapabilityAdapter`], which binds plugin objects to contracts structurally
//! - The [`HostApi`] and [`ProviderRequest`] callback surfaces
//!
//! ## Structural adaptation
//!
//! A plugin object never declares which capability it implements. It exposes
//! named members with parameter and return kinds; the adapter checks those
//! against a contract and, on success, produces a [`ProviderHandle`] that
//! dispatches contract members to the object.

pub mod adapter;
pub mod capability;
pub mod error;
pub mod host;
pub mod object;
pub mod package;
pub mod value;
pub mod version;

pub use adapter::{CapabilityAdapter, Mismatch, ProviderHandle};
pub use capability::{Capability, CapabilityKind, MemberSpec, CONTRACT_VERSION};
pub use error::{ProviderError, ProviderResult};
pub use host::{
    BootstrapPrompt, DefaultHost, Diagnostic, DiagnosticKind, HostApi, HostRequest, LogLevel,
    OptionOverlay, ProviderRequest, SharedHost,
};
pub use object::{DynamicObject, MemberSignature, PluginObject, PluginRef};
pub use package::{Link, PackageSource, SoftwareIdentity, INSTALLATION_MEDIA, PROVIDER_TYPE};
pub use value::{Value, ValueKind};
pub use version::ProviderVersion;
