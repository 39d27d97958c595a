//! Structural capability adaptation.
//!
//! [`CapabilityAdapter`] decides whether a [`PluginObject`] satisfies a
//! capability contract purely from the members it exposes, and builds a
//! [`ProviderHandle`] that dispatches the contract's members to the
//! candidate's matching members.
//!
//! Matching rules:
//! - names compare case-insensitively with `_` and `-` ignored;
//! - arity must match exactly;
//! - each parameter and the return kind must be compatible
//!   (see [`ValueKind::is_compatible_with`]).
//!
//! A missing optional member is fine; a missing or mismatched required member
//! is a [`Mismatch`], which is routine during discovery and not an error.

use crate::capability::{normalize_member_name, Capability, CapabilityKind, MemberSpec};
use crate::error::{ProviderError, ProviderResult};
use crate::host::ProviderRequest;
use crate::object::{MemberSignature, PluginObject, PluginRef};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Why a candidate does not satisfy a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub capability: CapabilityKind,
    /// Required members the candidate does not expose.
    pub missing: Vec<&'static str>,
    /// Required members exposed with an incompatible signature.
    pub incompatible: Vec<&'static str>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a {}", self.capability)?;
        if !self.missing.is_empty() {
            write!(f, "; missing {}", self.missing.join(", "))?;
        }
        if !self.incompatible.is_empty() {
            write!(f, "; incompatible {}", self.incompatible.join(", "))?;
        }
        Ok(())
    }
}

/// Tests candidates against the host's capability contracts.
///
/// Constructed once at startup and passed to the components that need it.
#[derive(Debug, Clone)]
pub struct CapabilityAdapter {
    contracts: BTreeMap<CapabilityKind, Arc<Capability>>,
}

impl Default for CapabilityAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityAdapter {
    /// An adapter over the built-in contracts.
    pub fn new() -> Self {
        Self::with_contracts(CapabilityKind::ALL.iter().map(|kind| kind.capability()))
    }

    /// An adapter over custom contracts. Later contracts replace earlier ones
    /// of the same kind.
    pub fn with_contracts(contracts: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            contracts: contracts
                .into_iter()
                .map(|c| (c.kind, Arc::new(c)))
                .collect(),
        }
    }

    pub fn contract(&self, kind: CapabilityKind) -> Option<&Arc<Capability>> {
        self.contracts.get(&kind)
    }

    /// Cheap query form of [`CapabilityAdapter::adapt`].
    pub fn is_satisfied_by(&self, candidate: &dyn PluginObject, kind: CapabilityKind) -> bool {
        match self.contracts.get(&kind) {
            Some(capability) => bind(candidate, capability).is_ok(),
            None => false,
        }
    }

    /// Every category the candidate satisfies, in [`CapabilityKind::ALL`] order.
    pub fn satisfied_kinds(&self, candidate: &dyn PluginObject) -> Vec<CapabilityKind> {
        self.contracts
            .keys()
            .copied()
            .filter(|kind| self.is_satisfied_by(candidate, *kind))
            .collect()
    }

    /// Bind a candidate to a capability.
    pub fn adapt(
        &self,
        candidate: &PluginRef,
        kind: CapabilityKind,
    ) -> Result<ProviderHandle, Mismatch> {
        let Some(capability) = self.contracts.get(&kind) else {
            return Err(Mismatch {
                capability: kind,
                missing: Vec::new(),
                incompatible: Vec::new(),
            });
        };
        let bindings = bind(candidate.as_ref(), capability)?;
        Ok(ProviderHandle {
            capability: Arc::clone(capability),
            object: Arc::clone(candidate),
            bindings,
            name: None,
        })
    }
}

fn signature_fits(spec: &MemberSpec, sig: &MemberSignature) -> bool {
    sig.params.len() == spec.params.len()
        && spec
            .params
            .iter()
            .zip(&sig.params)
            .all(|(expected, actual)| expected.is_compatible_with(*actual))
        && spec.returns.is_compatible_with(sig.returns)
}

/// Map each contract member to the candidate member that implements it.
fn bind(
    candidate: &dyn PluginObject,
    capability: &Capability,
) -> Result<BTreeMap<&'static str, String>, Mismatch> {
    let mut exposed = candidate.members();
    // Deterministic regardless of the order the candidate reports members in.
    exposed.sort_by(|a, b| a.name.cmp(&b.name));

    let mut by_key: BTreeMap<String, Vec<&MemberSignature>> = BTreeMap::new();
    for sig in &exposed {
        by_key.entry(normalize_member_name(&sig.name)).or_default().push(sig);
    }

    let mut bindings = BTreeMap::new();
    let mut missing = Vec::new();
    let mut incompatible = Vec::new();

    for spec in &capability.members {
        let found = by_key.get(&spec.key());
        match found.and_then(|sigs| sigs.iter().find(|sig| signature_fits(spec, sig))) {
            Some(sig) => {
                bindings.insert(spec.name, sig.name.clone());
            }
            None if spec.required && found.is_some() => incompatible.push(spec.name),
            None if spec.required => missing.push(spec.name),
            None => {}
        }
    }

    if missing.is_empty() && incompatible.is_empty() {
        Ok(bindings)
    } else {
        Err(Mismatch {
            capability: capability.kind,
            missing,
            incompatible,
        })
    }
}

/// A candidate bound to one capability.
#[derive(Clone)]
pub struct ProviderHandle {
    capability: Arc<Capability>,
    object: PluginRef,
    bindings: BTreeMap<&'static str, String>,
    name: Option<String>,
}

impl ProviderHandle {
    /// Attach the name the provider was registered under.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Registered name if known, otherwise the object's type name.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.object.type_name())
    }

    pub fn kind(&self) -> CapabilityKind {
        self.capability.kind
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn object(&self) -> &PluginRef {
        &self.object
    }

    pub fn type_name(&self) -> &str {
        self.object.type_name()
    }

    /// Contract members the candidate implements, sorted.
    pub fn bound_members(&self) -> Vec<&'static str> {
        self.bindings.keys().copied().collect()
    }

    /// Whether the candidate implements `member`.
    pub fn is_implemented(&self, member: &str) -> bool {
        self.capability
            .member(member)
            .is_some_and(|spec| self.bindings.contains_key(spec.name))
    }

    /// Whether `member` yields its results through the request.
    pub fn is_streaming(&self, member: &str) -> bool {
        self.capability.member(member).is_some_and(|spec| spec.streaming)
    }

    /// Invoke a contract member.
    ///
    /// Arguments are checked against the contract. An optional member the
    /// candidate does not implement returns the default value of its declared
    /// return kind without reaching the candidate.
    pub fn call(
        &self,
        member: &str,
        args: &[Value],
        request: &dyn ProviderRequest,
    ) -> ProviderResult<Value> {
        let spec = self
            .capability
            .member(member)
            .ok_or_else(|| ProviderError::UnknownMember {
                capability: self.capability.kind.to_string(),
                member: member.to_string(),
            })?;

        if args.len() != spec.params.len() {
            return Err(ProviderError::InvalidArguments {
                member: spec.name.to_string(),
                reason: format!("expected {} arguments, got {}", spec.params.len(), args.len()),
            });
        }
        for (index, (kind, arg)) in spec.params.iter().zip(args).enumerate() {
            if !kind.accepts(arg) {
                return Err(ProviderError::InvalidArguments {
                    member: spec.name.to_string(),
                    reason: format!("argument {index} is not a {kind}"),
                });
            }
        }

        match self.bindings.get(spec.name) {
            Some(bound) => {
                let value = self.object.invoke(bound, args, request)?;
                if spec.returns.accepts(&value) {
                    Ok(value)
                } else {
                    Err(ProviderError::plugin(format!(
                        "{} returned {:?}, expected {}",
                        spec.name, value, spec.returns
                    )))
                }
            }
            None => Ok(spec.returns.default_value()),
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("capability", &self.capability.kind)
            .field("name", &self.label())
            .field("bindings", &self.bindings)
            .finish()
    }
}
