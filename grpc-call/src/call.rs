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

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::completion_queue::{CompletionQueue, Tag};
use crate::config::CallConfig;
use crate::interceptor::RpcInfo;
use crate::metadata::MetadataMap;
use crate::transport::{CallError, CallTransport, OpBatch};

/// A cheaply clonable handle to a transport-level call.
///
/// Every clone holds a reference on the transport's call object; the object
/// is released when the last handle is dropped.  The completion queue is only
/// weakly referenced.
#[derive(Clone)]
pub struct Call {
    transport: Arc<dyn CallTransport>,
    cq: Weak<CompletionQueue>,
    rpc_info: Option<Arc<RpcInfo>>,
    config: Arc<CallConfig>,
}

impl Call {
    pub fn new(transport: Arc<dyn CallTransport>, cq: &Arc<CompletionQueue>) -> Self {
        Call {
            transport,
            cq: Arc::downgrade(cq),
            rpc_info: None,
            config: Arc::default(),
        }
    }

    /// Attaches the call's interceptor chain.
    pub fn with_rpc_info(mut self, rpc_info: RpcInfo) -> Self {
        self.rpc_info = Some(Arc::new(rpc_info));
        self
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn rpc_info(&self) -> Option<&Arc<RpcInfo>> {
        self.rpc_info.as_ref()
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Returns the completion queue, unless it has already been dropped.
    pub fn cq(&self) -> Option<Arc<CompletionQueue>> {
        self.cq.upgrade()
    }

    pub(crate) fn weak_cq(&self) -> Weak<CompletionQueue> {
        self.cq.clone()
    }

    /// Returns the number of live references to the transport's call object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.transport)
    }

    /// Cancels the call.  Batches in flight still complete.
    pub fn cancel(&self) {
        self.transport.cancel();
    }

    pub(crate) fn start_batch(&self, ops: &OpBatch<'_>, tag: Tag) -> Result<(), CallError> {
        self.transport.start_batch(ops, tag)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("rpc_info", &self.rpc_info)
            .field("config", &self.config)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Counters for conditions that are worth surfacing but do not fail a call.
#[derive(Debug, Default)]
pub struct Diagnostics {
    ok_status_with_debug_error_string: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Returns how many calls finished with an OK status that nonetheless
    /// carried a transport debug error string.
    pub fn ok_status_with_debug_error_string(&self) -> u64 {
        self.ok_status_with_debug_error_string.load(Ordering::Relaxed)
    }

    pub(crate) fn record_ok_status_with_debug_error_string(&self) {
        self.ok_status_with_debug_error_string
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct ContextState {
    initial_metadata_received: bool,
    recv_initial_metadata: MetadataMap,
    trailing_metadata: MetadataMap,
    debug_error_string: Option<String>,
}

/// Client-side state of one call, shared between the application and the
/// operation sets that receive into it.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    state: Arc<Mutex<ContextState>>,
    diagnostics: Arc<Diagnostics>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context that reports into a shared set of counters.
    pub fn with_diagnostics(diagnostics: Arc<Diagnostics>) -> Self {
        ClientContext {
            state: Arc::default(),
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Returns true once a receive of the server's initial metadata has been
    /// requested.
    pub fn initial_metadata_received(&self) -> bool {
        self.state.lock().initial_metadata_received
    }

    pub fn recv_initial_metadata(&self) -> MappedMutexGuard<'_, MetadataMap> {
        MutexGuard::map(self.state.lock(), |state| &mut state.recv_initial_metadata)
    }

    pub fn trailing_metadata(&self) -> MappedMutexGuard<'_, MetadataMap> {
        MutexGuard::map(self.state.lock(), |state| &mut state.trailing_metadata)
    }

    /// Returns the transport's description of why the call failed, if it
    /// provided one.
    pub fn debug_error_string(&self) -> Option<String> {
        self.state.lock().debug_error_string.clone()
    }

    pub(crate) fn set_initial_metadata_received(&self) {
        self.state.lock().initial_metadata_received = true;
    }

    pub(crate) fn set_recv_initial_metadata(&self, metadata: MetadataMap) {
        self.state.lock().recv_initial_metadata = metadata;
    }

    pub(crate) fn set_trailing_metadata(&self, metadata: MetadataMap) {
        self.state.lock().trailing_metadata = metadata;
    }

    pub(crate) fn set_debug_error_string(&self, debug_error_string: String) {
        self.state.lock().debug_error_string = Some(debug_error_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingTransport;

    #[test]
    fn clones_share_the_transport_reference() {
        let cq = CompletionQueue::new();
        let transport = RecordingTransport::new(&cq);
        let call = Call::new(transport.clone(), &cq);
        let base = call.ref_count();
        let copy = call.clone();
        assert_eq!(call.ref_count(), base + 1);
        drop(copy);
        assert_eq!(call.ref_count(), base);
    }

    #[test]
    fn cq_is_weak() {
        let cq = CompletionQueue::new();
        let transport = RecordingTransport::new(&cq);
        let call = Call::new(transport, &cq);
        assert!(call.cq().is_some());
        drop(cq);
        assert!(call.cq().is_none());
    }

    #[test]
    fn cancel_reaches_the_transport() {
        let cq = CompletionQueue::new();
        let transport = RecordingTransport::new(&cq);
        let call = Call::new(transport.clone(), &cq);
        call.clone().cancel();
        assert!(transport.was_cancelled());
    }

    #[test]
    fn context_clones_share_state() {
        let context = ClientContext::new();
        let observer = context.clone();
        context.trailing_metadata().insert("k", "v");
        context.set_debug_error_string("boom".to_string());
        assert_eq!(observer.trailing_metadata().get("k").unwrap(), "v");
        assert_eq!(observer.debug_error_string().as_deref(), Some("boom"));
    }
}
