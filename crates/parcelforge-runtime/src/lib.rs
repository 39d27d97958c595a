//! # parcelforge-runtime
//!
//! Asynchronous execution of provider calls.
//!
//! This crate provides:
//! - [`ResultStream`], an ordered, cancellable queue of yielded items
//! - [`Request`], one provider call with a sticky terminal state
//! - [`Dispatcher`], which runs calls on the blocking pool and owns the root
//!   cancellation token
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. Providers must poll
//! `ProviderRequest::is_cancelled` (or watch `yield_value` return `false`) and
//! stop producing. Cancelling a request unblocks its consumers immediately;
//! the request only becomes `Cancelled` once the provider call returns.

pub mod dispatch;
pub mod request;
pub mod stream;

pub use dispatch::{DispatchOptions, Dispatcher, StreamingRequest, DEFAULT_TIMEOUT};
pub use request::{Request, RequestContext, RequestState};
pub use stream::{ResultStream, StreamState};
