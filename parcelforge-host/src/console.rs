//! A [`HostApi`] for terminal use.
//!
//! Diagnostics go to `tracing`; questions are written to stderr and answered
//! with a line of input.

use parcelforge_core::{BootstrapPrompt, Diagnostic, HostApi};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct ConsoleHost {
    interactive: bool,
    input: Mutex<Box<dyn BufRead + Send>>,
    session: AtomicU64,
    /// Keys are lowercased; lookups are case-insensitive.
    options: BTreeMap<String, Vec<String>>,
    sources: Vec<String>,
}

impl ConsoleHost {
    /// A host reading answers from stdin.
    pub fn new(interactive: bool, options: &BTreeMap<String, Vec<String>>) -> Self {
        Self::with_input(interactive, options, BufReader::new(io::stdin()))
    }

    pub fn with_input(
        interactive: bool,
        options: &BTreeMap<String, Vec<String>>,
        input: impl BufRead + Send + 'static,
    ) -> Self {
        Self {
            interactive,
            input: Mutex::new(Box::new(input)),
            session: AtomicU64::new(1),
            options: options
                .iter()
                .map(|(key, values)| (key.to_lowercase(), values.clone()))
                .collect(),
            sources: Vec::new(),
        }
    }

    /// Restrict operations to the named package sources.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Start a new call session; one per command the user runs.
    pub fn begin_session(&self) -> u64 {
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(session, "new call session");
        session
    }
}

fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

impl HostApi for ConsoleHost {
    fn emit(&self, diagnostic: Diagnostic) {
        diagnostic.trace();
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        if !self.interactive {
            return false;
        }

        let mut stderr = io::stderr();
        if write!(stderr, "{prompt} [y/N] ").and_then(|_| stderr.flush()).is_err() {
            return false;
        }

        let mut line = String::new();
        match self.input.lock().read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => parse_answer(&line),
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn call_session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn option_keys(&self) -> Vec<String> {
        self.options.keys().cloned().collect()
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

    fn progress(&self, activity_id: u32, percent: u8, message: &str) {
        info!(activity = activity_id, percent, "{}", message);
    }

    fn should_bootstrap_provider(&self, prompt: &BootstrapPrompt) -> bool {
        info!(
            provider = %prompt.provider_name,
            version = %prompt.version,
            "provider is not installed"
        );
        self.ask_yes_no(&prompt.to_string())
    }
}
