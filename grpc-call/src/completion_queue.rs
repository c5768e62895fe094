/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! The completion queue surface used to hand finished batches back to the
//! application.
//!
//! Operation sets register an opaque [`Tag`] with the transport when they
//! submit a batch.  The transport later pushes `(tag, ok)` onto the queue,
//! the application's poller pops it and hands it back to the owner of the
//! tag, which turns it into the application-visible `(tag, ok)` pair.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// An opaque identifier registered with the transport for one batch and
/// handed back on completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u64);

impl Tag {
    /// Returns a tag that has never been returned before in this process.
    pub fn unique() -> Tag {
        Tag(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an application-chosen value.
    pub const fn from_raw(raw: u64) -> Tag {
        Tag(raw)
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

/// A completed tag and whether the work behind it succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub tag: Tag,
    pub ok: bool,
}

/// The result of polling a [`CompletionQueue`] without waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStatus {
    /// An event was available.
    GotEvent(Event),
    /// Nothing is ready yet.
    Empty,
    /// The queue was shut down and fully drained.
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<Event>,
    // Interceptor-driven batches still in flight.  Shutdown is not reported
    // while this is non-zero.
    avalanches: usize,
    shutdown: bool,
}

/// A queue of completed tags.
#[derive(Debug, Default)]
pub struct CompletionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl CompletionQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueues a completed tag.
    pub fn push(&self, tag: Tag, ok: bool) {
        trace!(?tag, ok, "completion queue push");
        self.state.lock().events.push_back(Event { tag, ok });
        self.notify.notify_waiters();
    }

    /// Pops the oldest event, if any.
    pub fn try_next(&self) -> NextStatus {
        let mut state = self.state.lock();
        if let Some(event) = state.events.pop_front() {
            return NextStatus::GotEvent(event);
        }
        if state.shutdown && state.avalanches == 0 {
            NextStatus::Shutdown
        } else {
            NextStatus::Empty
        }
    }

    /// Waits for the next event.  Returns `None` once the queue has been shut
    /// down and drained.
    pub async fn next(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.try_next() {
                NextStatus::GotEvent(event) => return Some(event),
                NextStatus::Shutdown => return None,
                NextStatus::Empty => notified.await,
            }
        }
    }

    /// Removes and returns the oldest event carrying `tag`, leaving any other
    /// events queued.
    pub fn pluck(&self, tag: Tag) -> Option<Event> {
        let mut state = self.state.lock();
        let pos = state.events.iter().position(|event| event.tag == tag)?;
        state.events.remove(pos)
    }

    /// Records an interceptor-driven batch whose completion must be delivered
    /// before shutdown may be reported.
    pub fn register_avalanching(&self) {
        self.state.lock().avalanches += 1;
    }

    /// Releases a registration made by
    /// [`register_avalanching`](Self::register_avalanching).
    pub fn complete_avalanching(&self) {
        {
            let mut state = self.state.lock();
            assert!(state.avalanches > 0, "avalanche completed without registration");
            state.avalanches -= 1;
        }
        self.notify.notify_waiters();
    }

    /// Returns the number of registered avalanches.
    pub fn pending_avalanches(&self) -> usize {
        self.state.lock().avalanches
    }

    /// Begins shutting the queue down.  Pending events are still delivered.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}
