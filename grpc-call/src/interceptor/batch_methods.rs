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

use std::any::Any;
use std::sync::Arc;

use parking_lot::MappedMutexGuard;
use tracing::{debug, error, trace};

use super::{Continuation, HookPoints, InterceptionHookPoint, RpcInfo, Side};
use crate::byte_buffer::ByteBuffer;
use crate::call::Call;
use crate::codec::Serialize;
use crate::completion_queue::Tag;
use crate::metadata::MetadataMap;
use crate::ops::{CallOps, InterceptionBuffers};
use crate::status::Status;

/// The kinds of buffers a unit can expose to interceptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Exposure {
    SendInitialMetadata,
    SendMessage,
    SendStatus,
    RecvInitialMetadata,
    RecvMessage,
    RecvStatus,
}

impl Exposure {
    const COUNT: usize = 6;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Proceed,
    Hijack,
    HijackHookPoint(InterceptionHookPoint),
    Defer,
}

enum Step {
    Run(usize),
    Done,
}

/// How a pass over the interceptor chain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunResult {
    /// Every interceptor proceeded; the operation set continues the batch.
    Finished,
    /// An interceptor deferred; the pass resumes when its continuation
    /// proceeds.
    Deferred,
}

/// Per-batch interception bookkeeping owned by an operation set.
///
/// Records the hook points that fired, which unit slot exposes which buffers,
/// the direction of the current pass and the position in the chain.
#[derive(Debug, Default)]
pub struct InterceptorState {
    hooks: HookPoints,
    hook_slots: [Option<usize>; InterceptionHookPoint::COUNT],
    exposed: [Option<usize>; Exposure::COUNT],
    reverse: bool,
    ran_hijacking_interceptor: bool,
    current_interceptor: usize,
    slot: usize,
    action: Option<Action>,
}

impl InterceptorState {
    /// Resets the state for the pre-batch pass.
    pub(crate) fn clear_state(&mut self) {
        self.reverse = false;
        self.ran_hijacking_interceptor = false;
        self.exposed = [None; Exposure::COUNT];
        self.clear_hooks();
    }

    /// Switches to the post-batch pass.  Exposed buffers carry over.
    pub(crate) fn set_reverse(&mut self) {
        self.reverse = true;
        self.ran_hijacking_interceptor = false;
        self.clear_hooks();
    }

    pub(crate) fn enter_slot(&mut self, slot: usize) {
        self.slot = slot;
    }

    pub(crate) fn add_hook(&mut self, hook: InterceptionHookPoint) {
        self.hooks.insert(hook);
        self.hook_slots[hook as usize] = Some(self.slot);
    }

    pub(crate) fn expose(&mut self, exposure: Exposure) {
        self.exposed[exposure as usize] = Some(self.slot);
    }

    pub(crate) fn conceal(&mut self, exposure: Exposure) {
        self.exposed[exposure as usize] = None;
    }

    fn exposed(&self, exposure: Exposure) -> Option<usize> {
        self.exposed[exposure as usize]
    }

    fn clear_hooks(&mut self) {
        self.hooks.clear();
        self.hook_slots = [None; InterceptionHookPoint::COUNT];
    }

    fn enter_hijacking_state(&mut self, ops: &mut dyn CallOps) {
        self.clear_hooks();
        ops.set_hijacking_state(self);
        self.ran_hijacking_interceptor = true;
    }

    fn first_interceptor(&self, info: &RpcInfo) -> usize {
        if self.reverse {
            info.hijacked_interceptor()
                .unwrap_or(info.interceptor_count() - 1)
        } else {
            0
        }
    }

    // Picks the interceptor to run after the current one proceeds.
    fn advance(&mut self, info: &RpcInfo, ops: &mut dyn CallOps) -> Step {
        let current = self.current_interceptor;
        if self.reverse {
            return if current > 0 {
                Step::Run(current - 1)
            } else {
                Step::Done
            };
        }
        let hijacker = info.hijacked_interceptor();
        if hijacker == Some(current) && !self.ran_hijacking_interceptor {
            // The hijacker runs again, now responsible for the receive results.
            self.enter_hijacking_state(ops);
            return Step::Run(current);
        }
        let next = current + 1;
        if next < info.interceptor_count() && hijacker.is_none_or(|hijacker| next <= hijacker) {
            Step::Run(next)
        } else {
            Step::Done
        }
    }
}

/// Runs the interceptor chain over the current batch until it finishes or an
/// interceptor defers.  With `resume` set, the pass continues after the
/// interceptor that deferred.
pub(crate) fn run_interceptors(
    state: &mut InterceptorState,
    ops: &mut dyn CallOps,
    call: &Call,
    core_tag: Tag,
    resume: bool,
) -> RunResult {
    let Some(info) = call.rpc_info().cloned() else {
        return RunResult::Finished;
    };
    if info.interceptor_count() == 0 {
        return RunResult::Finished;
    }
    let mut step = if resume {
        state.advance(&info, ops)
    } else {
        Step::Run(state.first_interceptor(&info))
    };
    while let Step::Run(index) = step {
        state.current_interceptor = index;
        state.action = None;
        trace!(
            interceptor = index,
            hooks = ?state.hooks,
            reverse = state.reverse,
            "running interceptor"
        );
        info.interceptors()[index].intercept(&mut InterceptorBatchMethods {
            state: &mut *state,
            ops: &mut *ops,
            call,
            core_tag,
        });
        step = match state.action.take() {
            Some(Action::Proceed) => state.advance(&info, ops),
            Some(Action::Hijack) => {
                debug!(interceptor = index, method = info.method(), "interceptor hijacked the call");
                info.set_hijacked_interceptor(index);
                state.enter_hijacking_state(ops);
                Step::Run(index)
            }
            Some(Action::HijackHookPoint(hook)) => {
                debug!(interceptor = index, ?hook, "interceptor hijacked a hook point");
                if let Some(slot) = state.hook_slots[hook as usize] {
                    state.hooks.remove(hook);
                    state.enter_slot(slot);
                    ops.op_mut(slot).set_hijacking_state(state);
                }
                state.advance(&info, ops)
            }
            Some(Action::Defer) => {
                debug!(interceptor = index, "interceptor deferred");
                return RunResult::Deferred;
            }
            None => misuse(&format!(
                "interceptor {index} returned without proceeding, hijacking or deferring"
            )),
        };
    }
    RunResult::Finished
}

fn misuse(message: &str) -> ! {
    error!("API misuse observed: {message}");
    panic!("{message}");
}

/// The view of a batch handed to [`Interceptor::intercept`].
///
/// Accessors return `None` when the batch has no unit of the requested kind,
/// or when the buffer is not available in the current pass.
///
/// [`Interceptor::intercept`]: super::Interceptor::intercept
pub struct InterceptorBatchMethods<'a> {
    state: &'a mut InterceptorState,
    ops: &'a mut dyn CallOps,
    call: &'a Call,
    core_tag: Tag,
}

impl InterceptorBatchMethods<'_> {
    /// Returns true if `hook` fired for this visit.
    pub fn query_interception_hook_point(&self, hook: InterceptionHookPoint) -> bool {
        self.state.hooks.contains(hook)
    }

    pub fn hook_points(&self) -> HookPoints {
        self.state.hooks
    }

    pub fn call(&self) -> &Call {
        self.call
    }

    pub fn rpc_info(&self) -> Option<&RpcInfo> {
        self.call.rpc_info().map(|info| &**info)
    }

    /// Passes the batch on to the next interceptor.
    pub fn proceed(&mut self) {
        self.decide(Action::Proceed);
    }

    /// Takes over the whole call.  Nothing further reaches the transport;
    /// this interceptor is invoked again to supply the receive results, and
    /// interceptors after it never see the call.
    ///
    /// # Panics
    ///
    /// Panics unless this is a client call, the batch sends initial metadata,
    /// and the call has not already been hijacked in this pass.
    pub fn hijack(&mut self) {
        self.require_client_pre_pass("hijack");
        if self.state.ran_hijacking_interceptor {
            misuse("a call may only be hijacked once");
        }
        if !self.query_interception_hook_point(InterceptionHookPoint::PreSendInitialMetadata) {
            misuse("a call may only be hijacked on the batch that sends initial metadata");
        }
        self.decide(Action::Hijack);
    }

    /// Suppresses only the units registered for `hook`, a send-side pre hook
    /// point of this batch, and proceeds.  The rest of the batch still reaches
    /// the transport.
    ///
    /// # Panics
    ///
    /// Panics on a server call, in the post-batch pass, or if `hook` is not an
    /// active send-side pre hook point.
    pub fn hijack_hook_point(&mut self, hook: InterceptionHookPoint) {
        self.require_client_pre_pass("hijack a hook point");
        if !hook.is_send_hook() || !self.query_interception_hook_point(hook) {
            misuse(&format!("{hook:?} is not an active send hook point"));
        }
        self.decide(Action::HijackHookPoint(hook));
    }

    /// Suspends the chain.  The batch continues once the returned
    /// continuation proceeds.
    pub fn defer(&mut self) -> Continuation {
        self.decide(Action::Defer);
        Continuation::new(self.call.weak_cq(), self.core_tag)
    }

    fn decide(&mut self, action: Action) {
        if let Some(previous) = self.state.action {
            misuse(&format!(
                "interceptor chose {action:?} after already choosing {previous:?}"
            ));
        }
        self.state.action = Some(action);
    }

    fn require_client_pre_pass(&self, what: &str) {
        let side = self.call.rpc_info().map(|info| info.side());
        if self.state.reverse || side != Some(Side::Client) {
            misuse(&format!(
                "only client interceptors may {what}, and only before the batch is sent"
            ));
        }
    }

    fn require_hook(&self, hook: InterceptionHookPoint) {
        if !self.query_interception_hook_point(hook) {
            misuse(&format!("{hook:?} is not active"));
        }
    }

    fn buffers(&mut self, exposure: Exposure) -> Option<InterceptionBuffers<'_>> {
        let slot = self.state.exposed(exposure)?;
        Some(self.ops.op_mut(slot).interception_buffers())
    }

    pub fn send_initial_metadata_mut(&mut self) -> Option<&mut MetadataMap> {
        match self.buffers(Exposure::SendInitialMetadata)? {
            InterceptionBuffers::SendInitialMetadata(op) => Some(op.metadata_mut()),
            _ => None,
        }
    }

    /// Returns the message to be sent, if it was handed over by reference and
    /// has not been serialized yet.
    pub fn send_message<M: Any>(&mut self) -> Option<&M> {
        match self.buffers(Exposure::SendMessage)? {
            InterceptionBuffers::SendMessage(op) => op.original_message()?.downcast_ref(),
            _ => None,
        }
    }

    /// Replaces the message to be sent.  It is serialized when the batch is
    /// rendered.
    ///
    /// # Panics
    ///
    /// Panics unless [`InterceptionHookPoint::PreSendMessage`] is active.
    pub fn modify_send_message<M>(&mut self, message: Arc<M>)
    where
        M: Serialize + Send + Sync + 'static,
    {
        self.require_hook(InterceptionHookPoint::PreSendMessage);
        if let Some(InterceptionBuffers::SendMessage(op)) = self.buffers(Exposure::SendMessage) {
            op.replace_message(message);
        }
    }

    /// Returns the serialized message, serializing it first if needed.
    ///
    /// # Panics
    ///
    /// Panics if the pending message fails to serialize.
    pub fn serialized_send_message(&mut self) -> Option<&mut ByteBuffer> {
        match self.buffers(Exposure::SendMessage)? {
            InterceptionBuffers::SendMessage(op) => op.serialized_message(),
            _ => None,
        }
    }

    /// Returns whether the message was sent.  `None` if the batch carries no
    /// message.
    pub fn send_message_status(&mut self) -> Option<bool> {
        match self.buffers(Exposure::SendMessage)? {
            InterceptionBuffers::SendMessage(op) => Some(op.send_succeeded()),
            _ => None,
        }
    }

    /// Marks a hijacked send as failed, which fails the batch.
    ///
    /// # Panics
    ///
    /// Panics unless [`InterceptionHookPoint::PreSendMessage`] is active.
    pub fn fail_hijacked_send_message(&mut self) {
        self.require_hook(InterceptionHookPoint::PreSendMessage);
        if let Some(InterceptionBuffers::SendMessage(op)) = self.buffers(Exposure::SendMessage) {
            op.fail_hijacked_send();
        }
    }

    pub fn send_status(&mut self) -> Option<Status> {
        match self.buffers(Exposure::SendStatus)? {
            InterceptionBuffers::SendStatus(op) => Some(op.status()),
            _ => None,
        }
    }

    /// Replaces the status a server is about to send.
    ///
    /// # Panics
    ///
    /// Panics if the batch does not send a status.
    pub fn modify_send_status(&mut self, status: &Status) {
        match self.buffers(Exposure::SendStatus) {
            Some(InterceptionBuffers::SendStatus(op)) => op.set_status(status),
            _ => misuse("the batch does not send a status"),
        }
    }

    pub fn send_trailing_metadata_mut(&mut self) -> Option<&mut MetadataMap> {
        match self.buffers(Exposure::SendStatus)? {
            InterceptionBuffers::SendStatus(op) => Some(op.trailing_metadata_mut()),
            _ => None,
        }
    }

    /// Returns the receive target if it has type `R`.  After the batch, only
    /// available if a message arrived.
    pub fn recv_message_mut<R: Any>(&mut self) -> Option<&mut R> {
        self.recv_message_any()?.downcast_mut()
    }

    pub fn recv_message_any(&mut self) -> Option<&mut dyn Any> {
        match self.buffers(Exposure::RecvMessage)? {
            InterceptionBuffers::RecvMessage { message, .. } => message,
            _ => None,
        }
    }

    /// Reports that the hijacked receive produced no message.
    ///
    /// # Panics
    ///
    /// Panics unless [`InterceptionHookPoint::PreRecvMessage`] is active.
    pub fn fail_hijacked_recv_message(&mut self) {
        self.require_hook(InterceptionHookPoint::PreRecvMessage);
        if let Some(InterceptionBuffers::RecvMessage { hijack_failed, .. }) =
            self.buffers(Exposure::RecvMessage)
        {
            *hijack_failed = true;
        }
    }

    pub fn recv_initial_metadata_mut(&mut self) -> Option<MappedMutexGuard<'_, MetadataMap>> {
        match self.buffers(Exposure::RecvInitialMetadata)? {
            InterceptionBuffers::RecvInitialMetadata(op) => {
                Some(op.context()?.recv_initial_metadata())
            }
            _ => None,
        }
    }

    pub fn recv_status_mut(&mut self) -> Option<&mut Status> {
        match self.buffers(Exposure::RecvStatus)? {
            InterceptionBuffers::RecvStatus(op) => Some(op.status_mut()),
            _ => None,
        }
    }

    pub fn recv_trailing_metadata_mut(&mut self) -> Option<MappedMutexGuard<'_, MetadataMap>> {
        match self.buffers(Exposure::RecvStatus)? {
            InterceptionBuffers::RecvStatus(op) => Some(op.context()?.trailing_metadata()),
            _ => None,
        }
    }
}
