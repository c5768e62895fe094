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

//! Batch interception.
//!
//! Interceptors are created per call by [`InterceptorFactory`]s and observe
//! every batch started on that call twice: once before it is handed to the
//! transport, and once (in reverse interceptor order) after it completes.
//! On each visit an interceptor inspects the active [`InterceptionHookPoint`]s
//! and the exposed buffers through [`InterceptorBatchMethods`], then decides
//! how the batch continues.

use std::fmt;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::warn;

use crate::completion_queue::{CompletionQueue, Tag};

mod batch_methods;

pub use batch_methods::{InterceptorBatchMethods, InterceptorState};
pub(crate) use batch_methods::{Exposure, RunResult, run_interceptors};

/// The points in a batch's life at which interceptors are invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InterceptionHookPoint {
    PreSendInitialMetadata = 0,
    PreSendMessage = 1,
    PostSendMessage = 2,
    PreSendStatus = 3,
    PreSendClose = 4,
    /// Only reached on hijacked calls, where the hijacking interceptor
    /// supplies the received initial metadata.
    PreRecvInitialMetadata = 5,
    /// Only reached on hijacked calls.
    PreRecvMessage = 6,
    /// Only reached on hijacked calls.
    PreRecvStatus = 7,
    PostRecvInitialMetadata = 8,
    PostRecvMessage = 9,
    PostRecvStatus = 10,
    /// Reserved for server-side close notification, which the server call
    /// surface raises.  Operation sets never register it.
    PostRecvClose = 11,
    /// Reserved for cancellation observers outside the operation sets;
    /// [`Call::cancel`](crate::call::Call::cancel) goes straight to the
    /// transport and does not raise it.
    PreSendCancel = 12,
}

impl InterceptionHookPoint {
    pub(crate) const COUNT: usize = 13;

    const ALL: [InterceptionHookPoint; Self::COUNT] = [
        InterceptionHookPoint::PreSendInitialMetadata,
        InterceptionHookPoint::PreSendMessage,
        InterceptionHookPoint::PostSendMessage,
        InterceptionHookPoint::PreSendStatus,
        InterceptionHookPoint::PreSendClose,
        InterceptionHookPoint::PreRecvInitialMetadata,
        InterceptionHookPoint::PreRecvMessage,
        InterceptionHookPoint::PreRecvStatus,
        InterceptionHookPoint::PostRecvInitialMetadata,
        InterceptionHookPoint::PostRecvMessage,
        InterceptionHookPoint::PostRecvStatus,
        InterceptionHookPoint::PostRecvClose,
        InterceptionHookPoint::PreSendCancel,
    ];

    /// Returns true for the send-side hook points whose units can be hijacked
    /// individually.
    pub fn is_send_hook(self) -> bool {
        matches!(
            self,
            InterceptionHookPoint::PreSendInitialMetadata
                | InterceptionHookPoint::PreSendMessage
                | InterceptionHookPoint::PreSendStatus
                | InterceptionHookPoint::PreSendClose
        )
    }
}

/// A set of [`InterceptionHookPoint`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct HookPoints(u16);

impl HookPoints {
    pub const fn empty() -> Self {
        HookPoints(0)
    }

    pub fn contains(self, hook: InterceptionHookPoint) -> bool {
        self.0 & Self::bit(hook) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = InterceptionHookPoint> {
        InterceptionHookPoint::ALL
            .into_iter()
            .filter(move |hook| self.contains(*hook))
    }

    pub(crate) fn insert(&mut self, hook: InterceptionHookPoint) {
        self.0 |= Self::bit(hook);
    }

    pub(crate) fn remove(&mut self, hook: InterceptionHookPoint) {
        self.0 &= !Self::bit(hook);
    }

    pub(crate) fn clear(&mut self) {
        self.0 = 0;
    }

    const fn bit(hook: InterceptionHookPoint) -> u16 {
        1 << hook as u8
    }
}

impl fmt::Debug for HookPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Observes and rewrites the batches of a call.
///
/// Each invocation of [`intercept`](Interceptor::intercept) must end with
/// exactly one of [`InterceptorBatchMethods::proceed`],
/// [`InterceptorBatchMethods::hijack`],
/// [`InterceptorBatchMethods::hijack_hook_point`] or
/// [`InterceptorBatchMethods::defer`].
pub trait Interceptor: Send + Sync {
    fn intercept(&self, methods: &mut InterceptorBatchMethods<'_>);
}

/// Creates the interceptor instance used for one call.
pub trait InterceptorFactory: Send + Sync {
    /// Returns `None` to skip interception of this call.
    fn create(&self, info: &RpcInfo) -> Option<Box<dyn Interceptor>>;
}

/// The shape of an RPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

/// Which end of the RPC a call belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Per-call interception state: the call's identity and its interceptor
/// chain.
pub struct RpcInfo {
    method: String,
    rpc_type: RpcType,
    side: Side,
    interceptors: Vec<Box<dyn Interceptor>>,
    hijacked_interceptor: Mutex<Option<usize>>,
}

impl RpcInfo {
    /// Builds the info for a client call, asking each factory in order for
    /// an interceptor.
    pub fn client(
        method: impl Into<String>,
        rpc_type: RpcType,
        factories: &[&dyn InterceptorFactory],
    ) -> Self {
        Self::new(method.into(), rpc_type, Side::Client, factories)
    }

    /// Builds the info for a server call.
    pub fn server(
        method: impl Into<String>,
        rpc_type: RpcType,
        factories: &[&dyn InterceptorFactory],
    ) -> Self {
        Self::new(method.into(), rpc_type, Side::Server, factories)
    }

    fn new(
        method: String,
        rpc_type: RpcType,
        side: Side,
        factories: &[&dyn InterceptorFactory],
    ) -> Self {
        let mut info = RpcInfo {
            method,
            rpc_type,
            side,
            interceptors: Vec::with_capacity(factories.len()),
            hijacked_interceptor: Mutex::new(None),
        };
        let interceptors = factories
            .iter()
            .filter_map(|factory| factory.create(&info))
            .collect();
        info.interceptors = interceptors;
        info
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn rpc_type(&self) -> RpcType {
        self.rpc_type
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Returns the number of interceptors in the chain.
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns the index of the interceptor that hijacked the call, if any.
    pub fn hijacked_interceptor(&self) -> Option<usize> {
        *self.hijacked_interceptor.lock()
    }

    pub(crate) fn interceptors(&self) -> &[Box<dyn Interceptor>] {
        &self.interceptors
    }

    pub(crate) fn set_hijacked_interceptor(&self, index: usize) {
        *self.hijacked_interceptor.lock() = Some(index);
    }
}

impl fmt::Debug for RpcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcInfo")
            .field("method", &self.method)
            .field("rpc_type", &self.rpc_type)
            .field("side", &self.side)
            .field("interceptors", &self.interceptors.len())
            .field("hijacked_interceptor", &self.hijacked_interceptor())
            .finish()
    }
}

/// Resumes a batch whose interceptor chose to
/// [`defer`](InterceptorBatchMethods::defer).
///
/// Dropping a continuation without calling [`proceed`](Self::proceed) leaves
/// the batch suspended forever.
#[derive(Debug)]
#[must_use = "the batch stays suspended until the continuation proceeds"]
pub struct Continuation {
    cq: Weak<CompletionQueue>,
    tag: Tag,
}

impl Continuation {
    pub(crate) fn new(cq: Weak<CompletionQueue>, tag: Tag) -> Self {
        Continuation { cq, tag }
    }

    /// Continues the interceptor chain as if the deferring interceptor had
    /// called [`InterceptorBatchMethods::proceed`].  May be called from any
    /// thread; the chain resumes when the operation set next receives its
    /// tag from the completion queue.
    pub fn proceed(self) {
        match self.cq.upgrade() {
            Some(cq) => cq.push(self.tag, true),
            None => warn!(tag = ?self.tag, "completion queue dropped before deferred batch resumed"),
        }
    }
}
