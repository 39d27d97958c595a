//! Cancellable, ordered result streams.
//!
//! A [`ResultStream`] is the channel between a provider call that yields items
//! and the caller draining them. The producer pushes while the stream is
//! [`StreamState::Open`]; completing or closing the stream stops production and
//! wakes every waiting consumer. Items already buffered are still delivered
//! after the stream stops accepting new ones.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Lifecycle of a [`ResultStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Accepting items.
    Open,

    /// No longer accepting items; consumers drain what is buffered.
    Completing,

    /// Finished. Buffered items are still delivered.
    Closed,
}

struct Buffer<T> {
    queue: VecDeque<T>,
    state: StreamState,
}

struct Shared<T> {
    buffer: Mutex<Buffer<T>>,
    notify: Notify,
}

/// An ordered queue of yielded items.
///
/// Cloning produces another handle to the same stream. Use one consumption
/// pattern per stream: either pull with `next` or inspect with `has_more`
/// followed by `next`.
pub struct ResultStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for ResultStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.shared.buffer.lock();
        f.debug_struct("ResultStream")
            .field("state", &buffer.state)
            .field("buffered", &buffer.queue.len())
            .finish()
    }
}

impl<T> ResultStream<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer {
                    queue: VecDeque::new(),
                    state: StreamState::Open,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.buffer.lock().state
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.shared.buffer.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item. Returns `false` (and drops the item) once the stream has
    /// stopped accepting items.
    pub fn push(&self, item: T) -> bool {
        {
            let mut buffer = self.shared.buffer.lock();
            if buffer.state != StreamState::Open {
                return false;
            }
            buffer.queue.push_back(item);
        }
        self.shared.notify.notify_waiters();
        true
    }

    /// Stop accepting items and wake consumers. No effect unless open.
    pub fn complete(&self) {
        let changed = {
            let mut buffer = self.shared.buffer.lock();
            if buffer.state == StreamState::Open {
                buffer.state = StreamState::Completing;
                true
            } else {
                false
            }
        };
        if changed {
            self.shared.notify.notify_waiters();
        }
    }

    /// Mark the stream finished and wake consumers. Idempotent.
    pub fn close(&self) {
        self.shared.buffer.lock().state = StreamState::Closed;
        self.shared.notify.notify_waiters();
    }

    /// Take the next item without waiting.
    pub fn try_next(&self) -> Option<T> {
        self.shared.buffer.lock().queue.pop_front()
    }

    /// Take the next item, waiting while the stream is open and empty.
    ///
    /// Returns `None` at end of stream. Calling it again after that keeps
    /// returning `None`.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();
            {
                let mut buffer = self.shared.buffer.lock();
                if let Some(item) = buffer.queue.pop_front() {
                    return Some(item);
                }
                if buffer.state != StreamState::Open {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Wait until an item is available (`true`) or the stream has ended
    /// (`false`), without consuming anything.
    pub async fn has_more(&self) -> bool {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let buffer = self.shared.buffer.lock();
                if !buffer.queue.is_empty() {
                    return true;
                }
                if buffer.state != StreamState::Open {
                    return false;
                }
            }
            notified.await;
        }
    }

    /// Blocking form of [`ResultStream::next`] for synchronous consumers.
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_next(&self) -> Option<T> {
        futures::executor::block_on(self.next())
    }

    /// Blocking form of [`ResultStream::has_more`].
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_has_more(&self) -> bool {
        futures::executor::block_on(self.has_more())
    }

    /// Take everything until end of stream.
    pub async fn collect(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }
}

impl<T: Send + 'static> ResultStream<T> {
    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }
}
