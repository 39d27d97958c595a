//! Dispatching provider calls as requests.

use crate::request::{Request, RequestContext, RequestState};
use crate::stream::ResultStream;
use parcelforge_core::{ProviderError, ProviderHandle, ProviderRequest, SharedHost, Value};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default request timeout: one hour.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Cancel requests that run longer than this. `None` disables the limit.
    pub timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Runs provider operations as [`Request`]s.
///
/// Each call runs on the blocking thread pool, so a slow provider never stalls
/// the async runtime or other requests. Every request's cancellation token is
/// a child of the dispatcher's root token; [`Dispatcher::shutdown`] cancels
/// all outstanding requests at once.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct Dispatcher {
    root: CancellationToken,
    options: DispatchOptions,
    next_id: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}

impl Dispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            root: CancellationToken::new(),
            options,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Invoke a single-value operation.
    pub fn invoke(
        &self,
        handle: &ProviderHandle,
        operation: &str,
        args: Vec<Value>,
        host: SharedHost,
    ) -> Request {
        let request = Request::new(
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            handle.label(),
            operation,
            self.root.child_token(),
            host,
        );
        debug!(
            request = request.id(),
            provider = %request.provider(),
            operation,
            "dispatching"
        );

        self.spawn_call(handle.clone(), operation.to_string(), args, request.clone());
        self.supervise(request.clone());
        request
    }

    /// Invoke an operation that yields a sequence of items.
    pub fn invoke_streaming(
        &self,
        handle: &ProviderHandle,
        operation: &str,
        args: Vec<Value>,
        host: SharedHost,
    ) -> StreamingRequest {
        StreamingRequest {
            request: self.invoke(handle, operation, args, host),
        }
    }

    /// Cancel every outstanding request. Requests dispatched afterwards start
    /// out cancelled.
    pub fn shutdown(&self) {
        debug!("dispatcher shutting down");
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    fn spawn_call(
        &self,
        handle: ProviderHandle,
        operation: String,
        args: Vec<Value>,
        request: Request,
    ) {
        request.transition(RequestState::Running);
        let context = RequestContext::new(request.clone());

        let worker = tokio::task::spawn_blocking(move || {
            if context.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            handle.call(&operation, &args, &context)
        });

        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ProviderError::plugin(format!("provider call panicked: {e}"))),
            };
            request.finish(outcome);
        });
    }

    /// Enforce the timeout and unblock consumers as soon as cancellation is
    /// requested by any path.
    fn supervise(&self, request: Request) {
        let timeout = self.options.timeout;
        tokio::spawn(async move {
            let mut state = request.subscribe();
            let token = request.cancellation_token().clone();
            let expiry = async {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = state.wait_for(|s| s.is_terminal()) => {}
                _ = token.cancelled() => request.results().complete(),
                _ = expiry => {
                    warn!(
                        request = request.id(),
                        provider = %request.provider(),
                        operation = %request.operation(),
                        "request timed out"
                    );
                    request.cancel();
                }
            }
        });
    }
}

/// A request whose results are consumed as a stream.
///
/// Dereferences to the underlying [`Request`] for state and cancellation.
#[derive(Debug, Clone)]
pub struct StreamingRequest {
    request: Request,
}

impl StreamingRequest {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn stream(&self) -> &ResultStream<Value> {
        self.request.results()
    }

    pub async fn next(&self) -> Option<Value> {
        self.stream().next().await
    }

    pub fn blocking_next(&self) -> Option<Value> {
        self.stream().blocking_next()
    }

    pub async fn has_more(&self) -> bool {
        self.stream().has_more().await
    }

    pub fn blocking_has_more(&self) -> bool {
        self.stream().blocking_has_more()
    }

    /// Drain every item, then wait for the request to settle.
    pub async fn collect(&self) -> Vec<Value> {
        let items = self.stream().collect().await;
        self.request.wait().await;
        items
    }

    pub fn into_stream(self) -> impl futures::Stream<Item = Value> + Send {
        self.request.results().clone().into_stream()
    }
}

impl Deref for StreamingRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}
