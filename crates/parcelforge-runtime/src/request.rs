//! Request objects.
//!
//! A [`Request`] tracks one provider call from dispatch to a terminal state.
//! It owns the call's [`ResultStream`] and cancellation token, and hands the
//! provider a [`RequestContext`] whose callbacks go quiet as soon as the
//! request is cancelled or finished.

use crate::stream::ResultStream;
use parcelforge_core::{
    Diagnostic, DiagnosticKind, LogLevel, ProviderError, ProviderRequest, ProviderResult,
    SharedHost, Value,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Request`]. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Running,
    Completed,
    Cancelled,
    Faulted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Faulted
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Created => "created",
            RequestState::Running => "running",
            RequestState::Completed => "completed",
            RequestState::Cancelled => "cancelled",
            RequestState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Outcome {
    value: Option<Value>,
    fault: Option<String>,
}

struct Inner {
    id: u64,
    provider: String,
    operation: String,
    token: CancellationToken,
    state: watch::Sender<RequestState>,
    results: ResultStream<Value>,
    outcome: Mutex<Outcome>,
    host: SharedHost,
}

/// One provider call.
///
/// Cloning yields another handle to the same request.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

impl Request {
    pub(crate) fn new(
        id: u64,
        provider: impl Into<String>,
        operation: impl Into<String>,
        token: CancellationToken,
        host: SharedHost,
    ) -> Self {
        let (state, _) = watch::channel(RequestState::Created);
        Self {
            inner: Arc::new(Inner {
                id,
                provider: provider.into(),
                operation: operation.into(),
                token,
                state,
                results: ResultStream::new(),
                outcome: Mutex::new(Outcome::default()),
                host,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name of the provider the call was dispatched to.
    pub fn provider(&self) -> &str {
        &self.inner.provider
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn state(&self) -> RequestState {
        *self.inner.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether cancellation has been requested, directly, by timeout or by
    /// dispatcher shutdown.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Items yielded by the provider.
    pub fn results(&self) -> &ResultStream<Value> {
        &self.inner.results
    }

    /// Request cancellation.
    ///
    /// The stream stops accepting items and consumers unblock immediately; the
    /// state becomes [`RequestState::Cancelled`] once the provider call
    /// returns. Ignored once the request is terminal. Idempotent.
    pub fn cancel(&self) {
        if self.is_terminal() {
            return;
        }
        tracing::debug!(
            request = self.inner.id,
            provider = %self.inner.provider,
            operation = %self.inner.operation,
            "cancelling request"
        );
        self.inner.token.cancel();
        self.inner.results.complete();
    }

    /// Wait until the request reaches a terminal state.
    pub async fn wait(&self) -> RequestState {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|s| *s);
        result.unwrap_or_else(|_| self.state())
    }

    /// Blocking form of [`Request::wait`]. Must not be called from inside an
    /// async task.
    pub fn blocking_wait(&self) -> RequestState {
        futures::executor::block_on(self.wait())
    }

    /// Value returned by the provider call, once completed.
    pub fn value(&self) -> Option<Value> {
        self.inner.outcome.lock().value.clone()
    }

    /// Fault message, if the call faulted.
    pub fn fault(&self) -> Option<String> {
        self.inner.outcome.lock().fault.clone()
    }

    /// Wait for the call and convert its terminal state into a result.
    pub async fn outcome(&self) -> ProviderResult<Value> {
        match self.wait().await {
            RequestState::Completed => Ok(self.value().unwrap_or_default()),
            RequestState::Cancelled => Err(ProviderError::Cancelled),
            _ => Err(ProviderError::Faulted {
                provider: self.inner.provider.clone(),
                operation: self.inner.operation.clone(),
                message: self.fault().unwrap_or_default(),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<RequestState> {
        self.inner.state.subscribe()
    }

    /// Move to `next` unless already terminal. Returns whether the state changed.
    pub(crate) fn transition(&self, next: RequestState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Record the provider call's result, settle the state and close the stream.
    pub(crate) fn finish(&self, outcome: ProviderResult<Value>) {
        if self.is_terminal() {
            self.inner.results.close();
            return;
        }

        let state = match &outcome {
            _ if self.inner.token.is_cancelled() => RequestState::Cancelled,
            Err(e) if e.is_cancelled() => RequestState::Cancelled,
            Ok(_) => RequestState::Completed,
            Err(_) => RequestState::Faulted,
        };

        {
            let mut recorded = self.inner.outcome.lock();
            match outcome {
                Ok(value) => recorded.value = Some(value),
                Err(e) if state == RequestState::Faulted => recorded.fault = Some(e.to_string()),
                Err(_) => {}
            }
        }

        if self.transition(state) && state == RequestState::Faulted {
            let message = self.fault().unwrap_or_default();
            tracing::warn!(
                request = self.inner.id,
                provider = %self.inner.provider,
                operation = %self.inner.operation,
                error = %message,
                "provider call faulted"
            );
            self.inner.host.emit(Diagnostic::error(
                DiagnosticKind::Operation,
                self.inner.provider.clone(),
                format!("{} failed: {}", self.inner.operation, message),
            ));
        }
        self.inner.results.close();
    }

    fn is_live(&self) -> bool {
        !self.inner.token.is_cancelled() && !self.is_terminal()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("provider", &self.inner.provider)
            .field("operation", &self.inner.operation)
            .field("state", &self.state())
            .finish()
    }
}

/// The [`ProviderRequest`] a provider sees while its call runs.
///
/// Once the request has been cancelled or reached a terminal state, every
/// callback is a no-op: yields are dropped, prompts answer `false`, messages
/// are discarded.
pub struct RequestContext {
    request: Request,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

impl ProviderRequest for RequestContext {
    fn yield_value(&self, value: Value) -> bool {
        self.request.is_live() && self.request.results().push(value)
    }

    fn is_cancelled(&self) -> bool {
        !self.request.is_live()
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !self.request.is_live() {
            return;
        }
        self.request.inner.host.emit(Diagnostic::new(
            level,
            DiagnosticKind::Provider,
            self.request.provider(),
            message,
        ));
    }

    fn ask_yes_no(&self, prompt: &str) -> bool {
        self.request.is_live() && self.request.inner.host.ask_yes_no(prompt)
    }

    fn progress(&self, activity_id: u32, percent: u8, message: &str) {
        if self.request.is_live() {
            self.request.inner.host.progress(activity_id, percent, message);
        }
    }

    fn option_keys(&self) -> Vec<String> {
        if self.request.is_live() {
            self.request.inner.host.option_keys()
        } else {
            Vec::new()
        }
    }

    fn option_values(&self, key: &str) -> Vec<String> {
        if self.request.is_live() {
            self.request.inner.host.option_values(key)
        } else {
            Vec::new()
        }
    }

    fn sources(&self) -> Vec<String> {
        if self.request.is_live() {
            self.request.inner.host.sources()
        } else {
            Vec::new()
        }
    }

    fn is_interactive(&self) -> bool {
        self.request.is_live() && self.request.inner.host.is_interactive()
    }

    fn call_session(&self) -> u64 {
        self.request.inner.host.call_session()
    }
}
