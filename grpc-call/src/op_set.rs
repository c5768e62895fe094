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

//! The operation set: one batch's lifecycle from interception to delivery.
//!
//! ```text
//! fill_ops ──► pre-batch interceptors ──► render + start_batch
//!                                              │
//!   (tag, ok) ◄── post-batch interceptors ◄── finalize_result ◄── cq
//! ```
//!
//! When the call has interceptors, the post-batch pass always ends with an
//! empty batch whose completion delivers the final result, so the result is
//! handed out on a completion-queue round trip of its own.

use tracing::{error, trace};

use crate::call::Call;
use crate::completion_queue::Tag;
use crate::interceptor::{InterceptorState, RunResult, run_interceptors};
use crate::ops::CallOps;
use crate::transport::OpBatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    PreInterception,
    AwaitingCompletion,
    PostInterception,
}

/// Drives a batch made of the units in `Ops` (a tuple of one to six
/// [`CallOp`](crate::ops::CallOp)s).
///
/// A set handles one batch at a time and is reusable once
/// [`finalize_result`](Self::finalize_result) has returned a result.
pub struct CallOpSet<Ops> {
    ops: Ops,
    tag: Tag,
    core_cq_tag: Tag,
    return_tag: Tag,
    call: Option<Call>,
    // Reference on the call held from fill_ops until the result is returned.
    batch_ref: Option<Call>,
    done_intercepting: bool,
    phase: Phase,
    interceptor_state: InterceptorState,
    saved_status: bool,
}

impl<Ops: CallOps + Default> CallOpSet<Ops> {
    pub fn new() -> Self {
        Self::with_ops(Ops::default())
    }
}

impl<Ops: CallOps> CallOpSet<Ops> {
    pub fn with_ops(ops: Ops) -> Self {
        let tag = Tag::unique();
        CallOpSet {
            ops,
            tag,
            core_cq_tag: tag,
            return_tag: tag,
            call: None,
            batch_ref: None,
            done_intercepting: false,
            phase: Phase::Idle,
            interceptor_state: InterceptorState::default(),
            saved_status: false,
        }
    }

    /// The set's own tag.  Used as both the core and the output tag unless
    /// they are overridden.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The tag submitted to the transport with each batch.
    pub fn core_cq_tag(&self) -> Tag {
        self.core_cq_tag
    }

    /// Replaces the tag submitted to the transport, for callers that route
    /// completions themselves.
    pub fn set_core_cq_tag(&mut self, tag: Tag) {
        self.core_cq_tag = tag;
    }

    /// The tag returned by [`finalize_result`](Self::finalize_result).
    pub fn output_tag(&self) -> Tag {
        self.return_tag
    }

    pub fn set_output_tag(&mut self, tag: Tag) {
        self.return_tag = tag;
    }

    pub fn ops(&self) -> &Ops {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut Ops {
        &mut self.ops
    }

    /// The call the last batch ran on.
    pub fn call(&self) -> Option<&Call> {
        self.call.as_ref()
    }

    /// Starts a batch on `call` with the currently active units.
    ///
    /// # Panics
    ///
    /// Panics if a batch is already in flight, or if the transport rejects
    /// the batch.
    pub fn fill_ops(&mut self, call: &Call) {
        if self.phase != Phase::Idle {
            misuse("started a batch on an operation set that already has one in flight");
        }
        self.done_intercepting = false;
        self.batch_ref = Some(call.clone());
        self.call = Some(call.clone());
        self.ops.configure(call.config());
        if self.intercept_before_batch() {
            self.continue_fill_ops_after_interception();
        }
    }

    /// Handles the completion of this set's core tag.
    ///
    /// Returns the output tag and the batch result once the batch is done, or
    /// `None` if the set is waiting for another completion.
    ///
    /// # Panics
    ///
    /// Panics if no batch is in flight.
    pub fn finalize_result(&mut self, ok: bool) -> Option<(Tag, bool)> {
        match self.phase {
            Phase::Idle => misuse("completion delivered to an operation set with no batch in flight"),
            Phase::PreInterception => {
                if self.resume_interceptors() == RunResult::Finished {
                    self.continue_fill_ops_after_interception();
                }
                return None;
            }
            Phase::PostInterception => {
                if self.resume_interceptors() == RunResult::Finished {
                    self.continue_finalize_result_after_interception();
                }
                return None;
            }
            Phase::AwaitingCompletion => {}
        }

        if self.done_intercepting {
            // The round trip made for the interceptors is back.
            if let Some(cq) = self.call.as_ref().and_then(Call::cq) {
                cq.complete_avalanching();
            }
            return Some(self.complete(self.saved_status));
        }

        let mut ok = ok;
        self.ops.finish_ops(&mut ok);
        self.saved_status = ok;
        trace!(tag = ?self.core_cq_tag, ok, "batch completed");
        if self.intercept_after_batch() {
            return Some(self.complete(ok));
        }
        None
    }

    /// Renders the active units and submits them to the transport.
    ///
    /// # Panics
    ///
    /// Panics if the transport rejects the batch.
    pub fn continue_fill_ops_after_interception(&mut self) {
        let Some(call) = self.call.as_ref() else {
            misuse("rendered a batch before fill_ops");
        };
        self.phase = Phase::AwaitingCompletion;
        let mut batch = OpBatch::new();
        self.ops.add_ops(&mut batch);
        trace!(ops = batch.len(), tag = ?self.core_cq_tag, "starting batch");
        if let Err(err) = call.start_batch(&batch, self.core_cq_tag) {
            misuse(&format!("API misuse of type {err} observed"));
        }
    }

    /// Requests the completion-queue round trip that delivers the result of a
    /// batch whose post-batch interceptors have finished.
    ///
    /// # Panics
    ///
    /// Panics if the transport rejects the empty batch.
    pub fn continue_finalize_result_after_interception(&mut self) {
        let Some(call) = self.call.as_ref() else {
            misuse("finalized a batch before fill_ops");
        };
        self.done_intercepting = true;
        self.phase = Phase::AwaitingCompletion;
        if let Err(err) = call.start_batch(&OpBatch::new(), self.core_cq_tag) {
            misuse(&format!("empty batch rejected with {err}"));
        }
    }

    // Returns true if the batch can be rendered right away.
    fn intercept_before_batch(&mut self) -> bool {
        self.interceptor_state.clear_state();
        self.ops
            .set_interception_hook_points(&mut self.interceptor_state);
        let Some(call) = self.call.as_ref() else {
            return true;
        };
        if !has_interceptors(call) {
            return true;
        }
        // Queue shutdown waits until this batch's extra round trip is done.
        if let Some(cq) = call.cq() {
            cq.register_avalanching();
        }
        self.phase = Phase::PreInterception;
        run_interceptors(
            &mut self.interceptor_state,
            &mut self.ops,
            call,
            self.core_cq_tag,
            false,
        ) == RunResult::Finished
    }

    // Returns true if the result can be delivered right away.
    fn intercept_after_batch(&mut self) -> bool {
        self.interceptor_state.set_reverse();
        self.ops
            .set_finish_interception_hook_points(&mut self.interceptor_state);
        let Some(call) = self.call.as_ref() else {
            return true;
        };
        if !has_interceptors(call) {
            return true;
        }
        self.phase = Phase::PostInterception;
        if run_interceptors(
            &mut self.interceptor_state,
            &mut self.ops,
            call,
            self.core_cq_tag,
            false,
        ) == RunResult::Finished
        {
            self.continue_finalize_result_after_interception();
        }
        false
    }

    fn resume_interceptors(&mut self) -> RunResult {
        let Some(call) = self.call.as_ref() else {
            return RunResult::Finished;
        };
        run_interceptors(
            &mut self.interceptor_state,
            &mut self.ops,
            call,
            self.core_cq_tag,
            true,
        )
    }

    fn complete(&mut self, ok: bool) -> (Tag, bool) {
        self.phase = Phase::Idle;
        self.batch_ref = None;
        (self.return_tag, ok)
    }
}

fn has_interceptors(call: &Call) -> bool {
    call.rpc_info()
        .is_some_and(|info| info.interceptor_count() > 0)
}

fn misuse(message: &str) -> ! {
    error!("API misuse observed: {message}");
    panic!("{message}");
}

impl<Ops: CallOps + Default> Default for CallOpSet<Ops> {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces a set with fresh units and its own tags that shares the
/// original's call.
impl<Ops: CallOps + Default> Clone for CallOpSet<Ops> {
    fn clone(&self) -> Self {
        let mut set = Self::new();
        set.call = self.call.clone();
        set
    }

    /// Takes `source`'s call while keeping this set's identity and units.
    /// Tags that were overridden point back at this set.
    fn clone_from(&mut self, source: &Self) {
        self.core_cq_tag = self.tag;
        self.return_tag = self.tag;
        self.call = source.call.clone();
        self.done_intercepting = false;
        self.interceptor_state = InterceptorState::default();
    }
}

impl<Ops: std::fmt::Debug> std::fmt::Debug for CallOpSet<Ops> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOpSet")
            .field("ops", &self.ops)
            .field("tag", &self.tag)
            .field("core_cq_tag", &self.core_cq_tag)
            .field("return_tag", &self.return_tag)
            .field("phase", &self.phase)
            .field("done_intercepting", &self.done_intercepting)
            .finish_non_exhaustive()
    }
}
