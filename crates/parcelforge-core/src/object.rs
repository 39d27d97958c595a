//! Plugin objects.
//!
//! A [`PluginObject`] is what a module hands to the loader: an opaque object
//! that describes its own members and can invoke them by name. It carries no
//! static relationship to any capability.

use crate::capability::normalize_member_name;
use crate::error::{ProviderError, ProviderResult};
use crate::host::ProviderRequest;
use crate::value::{Value, ValueKind};
use std::fmt;
use std::sync::Arc;

/// A member exposed by a plugin object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSignature {
    pub name: String,
    pub params: Vec<ValueKind>,
    pub returns: ValueKind,
}

impl MemberSignature {
    pub fn new(name: impl Into<String>, params: &[ValueKind], returns: ValueKind) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            returns,
        }
    }
}

/// An object produced by a module that may or may not be a provider.
pub trait PluginObject: Send + Sync {
    /// Human-readable type name, used in diagnostics.
    fn type_name(&self) -> &str;

    /// The members this object exposes.
    fn members(&self) -> Vec<MemberSignature>;

    /// Invoke a member by the name it reported in [`PluginObject::members`].
    ///
    /// Streaming members push their results through `request.yield_value`
    /// and should poll `request.is_cancelled()` between items.
    fn invoke(
        &self,
        member: &str,
        args: &[Value],
        request: &dyn ProviderRequest,
    ) -> ProviderResult<Value>;
}

/// Shared handle to a plugin object.
pub type PluginRef = Arc<dyn PluginObject>;

type MemberFn =
    Arc<dyn Fn(&[Value], &dyn ProviderRequest) -> ProviderResult<Value> + Send + Sync>;

/// A plugin object assembled from closures.
///
/// ```ignore
/// let provider = DynamicObject::new("Alpha")
///     .constant("get_package_provider_name", "Alpha")
///     .member("find_package", &[ValueKind::String; 4], ValueKind::Unit, |args, request| {
///         request.yield_value(args[0].clone());
///         Ok(Value::Null)
///     })
///     .build();
/// ```
#[derive(Clone)]
pub struct DynamicObject {
    type_name: String,
    members: Vec<(MemberSignature, MemberFn)>,
}

impl DynamicObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: Vec::new(),
        }
    }

    /// Add a member. A later member with the same name replaces an earlier one.
    pub fn member<F>(
        mut self,
        name: impl Into<String>,
        params: &[ValueKind],
        returns: ValueKind,
        f: F,
    ) -> Self
    where
        F: Fn(&[Value], &dyn ProviderRequest) -> ProviderResult<Value> + Send + Sync + 'static,
    {
        let signature = MemberSignature::new(name, params, returns);
        self.members.retain(|(existing, _)| existing.name != signature.name);
        self.members.push((signature, Arc::new(f)));
        self
    }

    /// Add a zero-argument member that always returns `value`.
    pub fn constant(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let returns = match &value {
            Value::Null => ValueKind::Any,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Object(_) => ValueKind::Object,
        };
        self.member(name, &[], returns, move |_, _| Ok(value.clone()))
    }

    pub fn build(self) -> PluginRef {
        Arc::new(self)
    }

    fn find(&self, member: &str) -> Option<&MemberFn> {
        self.members
            .iter()
            .find(|(sig, _)| sig.name == member)
            .or_else(|| {
                let key = normalize_member_name(member);
                self.members
                    .iter()
                    .find(|(sig, _)| normalize_member_name(&sig.name) == key)
            })
            .map(|(_, f)| f)
    }
}

impl PluginObject for DynamicObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn members(&self) -> Vec<MemberSignature> {
        self.members.iter().map(|(sig, _)| sig.clone()).collect()
    }

    fn invoke(
        &self,
        member: &str,
        args: &[Value],
        request: &dyn ProviderRequest,
    ) -> ProviderResult<Value> {
        match self.find(member) {
            Some(f) => f(args, request),
            None => Err(ProviderError::UnknownMember {
                capability: self.type_name.clone(),
                member: member.to_string(),
            }),
        }
    }
}

impl fmt::Debug for DynamicObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicObject")
            .field("type_name", &self.type_name)
            .field(
                "members",
                &self.members.iter().map(|(sig, _)| &sig.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
