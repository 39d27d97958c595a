//! Callback surfaces between the host, the core and providers.
//!
//! [`HostApi`] is what the embedding application supplies to the core.
//! [`ProviderRequest`] is what the core hands to a provider for the duration of
//! one call: the same diagnostic and prompt operations, plus `yield_value` and
//! cooperative cancellation.

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Severity of a diagnostic or provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Verbose,
    Info,
    Warn,
    Error,
}

/// What produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A module could not be scanned or instantiated.
    ModuleLoad,

    /// A candidate was rejected while being adapted or registered.
    Registration,

    /// A provider's one-time setup failed.
    Initialization,

    /// A provider operation faulted.
    Operation,

    /// A missing provider could not be bootstrapped.
    Bootstrap,

    /// A message written by provider code.
    Provider,
}

/// A structured diagnostic delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: LogLevel,
    pub kind: DiagnosticKind,
    /// Module path, provider name or other identifier of the origin.
    pub source: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        level: LogLevel,
        kind: DiagnosticKind,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            source: source.into(),
            message: message.into(),
        }
    }

    pub fn debug(kind: DiagnosticKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, kind, source, message)
    }

    pub fn warn(kind: DiagnosticKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, kind, source, message)
    }

    pub fn error(kind: DiagnosticKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, kind, source, message)
    }

    /// Forward this diagnostic to `tracing`.
    pub fn trace(&self) {
        let kind = format!("{:?}", self.kind);
        match self.level {
            LogLevel::Debug | LogLevel::Verbose => {
                tracing::debug!(kind = %kind, source = %self.source, "{}", self.message)
            }
            LogLevel::Info => tracing::info!(kind = %kind, source = %self.source, "{}", self.message),
            LogLevel::Warn => tracing::warn!(kind = %kind, source = %self.source, "{}", self.message),
            LogLevel::Error => {
                tracing::error!(kind = %kind, source = %self.source, "{}", self.message)
            }
        }
    }
}

/// Details shown to the user before a missing provider is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPrompt {
    /// Who asked for the provider.
    pub requestor: String,
    pub provider_name: String,
    pub version: String,
    /// Where the provider will be fetched from, if known.
    pub location: Option<String>,
    /// Where the provider will be installed, if known.
    pub destination: Option<String>,
}

impl fmt::Display for BootstrapPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requires provider '{}' version {}",
            self.requestor, self.provider_name, self.version
        )?;
        if let Some(location) = &self.location {
            write!(f, " from {location}")?;
        }
        if let Some(destination) = &self.destination {
            write!(f, " (installing to {destination})")?;
        }
        f.write_str(". Install it now?")
    }
}

/// Operations the host supplies to the core.
pub trait HostApi: Send + Sync {
    /// Receive a structured diagnostic.
    fn emit(&self, diagnostic: Diagnostic);

    /// Ask the user a yes/no question.
    fn ask_yes_no(&self, prompt: &str) -> bool;

    /// Whether the host can prompt the user at all.
    fn is_interactive(&self) -> bool;

    /// Identifier of the current logical call session. Equal values mean the
    /// same session.
    fn call_session(&self) -> u64;

    /// Option names passed through to providers.
    fn option_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Values for one option. Missing options yield an empty list.
    fn option_values(&self, _key: &str) -> Vec<String> {
        Vec::new()
    }

    /// Package sources the caller restricted the operation to.
    fn sources(&self) -> Vec<String> {
        Vec::new()
    }

    /// Report progress of a long-running activity.
    fn progress(&self, _activity_id: u32, _percent: u8, _message: &str) {}

    /// Confirm installation of a missing provider.
    fn should_bootstrap_provider(&self, prompt: &BootstrapPrompt) -> bool {
        self.ask_yes_no(&prompt.to_string())
    }
}

/// Shared handle to a host.
pub type SharedHost = Arc<dyn HostApi>;

/// Operations the core supplies to a provider for one call.
///
/// Cancellation is cooperative: providers must poll [`is_cancelled`] (or check
/// the return value of [`yield_value`]) and stop producing when it reports
/// cancellation. Once the call has been cancelled or completed, every
/// callback is a silent no-op.
///
/// [`is_cancelled`]: ProviderRequest::is_cancelled
/// [`yield_value`]: ProviderRequest::yield_value
pub trait ProviderRequest: Send + Sync {
    /// Yield one result. Returns `false` if the consumer is gone or the call
    /// has been cancelled.
    fn yield_value(&self, value: Value) -> bool;

    fn is_cancelled(&self) -> bool;

    fn log(&self, level: LogLevel, message: &str);

    fn ask_yes_no(&self, prompt: &str) -> bool;

    fn progress(&self, activity_id: u32, percent: u8, message: &str);

    fn option_keys(&self) -> Vec<String>;

    fn option_values(&self, key: &str) -> Vec<String>;

    fn sources(&self) -> Vec<String>;

    fn is_interactive(&self) -> bool;

    fn call_session(&self) -> u64;

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn verbose(&self, message: &str) {
        self.log(LogLevel::Verbose, message);
    }

    fn message(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// First value of an option, if set.
    fn option(&self, key: &str) -> Option<String> {
        self.option_values(key).into_iter().next()
    }
}

/// A [`ProviderRequest`] backed directly by the host.
///
/// Used for calls that are not dispatched as a request: one-time
/// initialization and meta-provider enumeration. Yielded values are dropped.
pub struct HostRequest {
    host: SharedHost,
    source: String,
}

impl HostRequest {
    pub fn new(host: SharedHost, source: impl Into<String>) -> Self {
        Self {
            host,
            source: source.into(),
        }
    }
}

impl ProviderRequest for HostRequest {
    fn yield_value(&self, _value: Value) -> bool {
        tracing::debug!(source = %self.source, "dropping value yielded outside a request");
        true
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.host.emit(Diagnostic::new(
            level,
            DiagnosticKind::Provider,
            self.source.clone(),
            message,
        ));
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        self.host.ask_yes_no(prompt)
    }

    fn progress(&self, activity_id: u32, percent: u8, message: &str) {
        self.host.progress(activity_id, percent, message);
    }

    fn option_keys(&self) -> Vec<String> {
        self.host.option_keys()
    }

    fn option_values(&self, key: &str) -> Vec<String> {
        self.host.option_values(key)
    }

    fn sources(&self) -> Vec<String> {
        self.host.sources()
    }

    fn is_interactive(&self) -> bool {
        self.host.is_interactive()
    }

    fn call_session(&self) -> u64 {
        self.host.call_session()
    }
}

/// Wraps a host and overrides some of its options.
pub struct OptionOverlay {
    inner: SharedHost,
    overrides: HashMap<String, Vec<String>>,
}

impl OptionOverlay {
    pub fn new(inner: SharedHost) -> Self {
        Self {
            inner,
            overrides: HashMap::new(),
        }
    }

    /// Set an option. Keys compare case-insensitively.
    pub fn with_option(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.overrides.insert(key.into().to_lowercase(), values);
        self
    }

    pub fn into_shared(self) -> SharedHost {
        Arc::new(self)
    }
}

impl HostApi for OptionOverlay {
    fn emit(&self, diagnostic: Diagnostic) {
        self.inner.emit(diagnostic);
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        self.inner.ask_yes_no(prompt)
    }

    fn is_interactive(&self) -> bool {
        self.inner.is_interactive()
    }

    fn call_session(&self) -> u64 {
        self.inner.call_session()
    }

    fn option_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .option_keys()
            .into_iter()
            .filter(|k| !self.overrides.contains_key(&k.to_lowercase()))
            .collect();
        keys.extend(self.overrides.keys().cloned());
        keys.sort();
        keys
    }

    fn option_values(&self, key: &str) -> Vec<String> {
        match self.overrides.get(&key.to_lowercase()) {
            Some(values) => values.clone(),
            None => self.inner.option_values(key),
        }
    }

    fn sources(&self) -> Vec<String> {
        self.inner.sources()
    }

    fn progress(&self, activity_id: u32, percent: u8, message: &str) {
        self.inner.progress(activity_id, percent, message);
    }

    fn should_bootstrap_provider(&self, prompt: &BootstrapPrompt) -> bool {
        self.inner.should_bootstrap_provider(prompt)
    }
}

/// A host that logs diagnostics through `tracing` and answers prompts with a
/// fixed reply.
#[derive(Debug)]
pub struct DefaultHost {
    interactive: bool,
    answer: bool,
    session: AtomicU64,
    options: HashMap<String, Vec<String>>,
    sources: Vec<String>,
}

impl Default for DefaultHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultHost {
    /// A non-interactive host in session 1.
    pub fn new() -> Self {
        Self {
            interactive: false,
            answer: false,
            session: AtomicU64::new(1),
            options: HashMap::new(),
            sources: Vec::new(),
        }
    }

    /// Make the host interactive, answering every prompt with `answer`.
    pub fn interactive(mut self, answer: bool) -> Self {
        self.interactive = true;
        self.answer = answer;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.options.insert(key.into().to_lowercase(), values);
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Start a new call session and return its id.
    pub fn next_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl HostApi for DefaultHost {
    fn emit(&self, diagnostic: Diagnostic) {
        diagnostic.trace();
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        tracing::debug!(prompt, answer = self.answer, "answering prompt");
        self.interactive && self.answer
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn call_session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn option_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.options.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn option_values(&self, key: &str) -> Vec<String> {
        self.options
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn sources(&self) -> Vec<String> {
        self.sources.clone()
    }
}
