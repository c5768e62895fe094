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

//! Operation units and their fixed-arity composition.
//!
//! Each unit owns one send or receive responsibility of a batch.  A unit is
//! inactive until its setter is called, contributes at most one wire
//! operation when the batch is rendered, and returns to inactive once the
//! batch has completed so that the same unit can carry the next batch.
//!
//! Units are composed into a batch as a tuple of one to six units; the tuple
//! position is the unit's slot, and every pass over the units visits the
//! slots in ascending order.

use std::any::Any;

use crate::config::CallConfig;
use crate::interceptor::InterceptorState;
use crate::transport::OpBatch;

mod recv;
mod send;

pub use recv::{
    CallOpClientRecvStatus, CallOpGenericRecvMessage, CallOpRecvInitialMetadata, CallOpRecvMessage,
};
pub use send::{
    CallOpClientSendClose, CallOpSendInitialMetadata, CallOpSendMessage, CallOpServerSendStatus,
};

mod sealed {
    pub trait Sealed {}
}

/// The capabilities shared by every operation unit.
///
/// Every method is a no-op on an inactive unit.
pub trait CallOp: sealed::Sealed + Send {
    /// Applies per-call settings before the batch is intercepted.
    fn configure(&mut self, _config: &CallConfig) {}

    /// Renders at most one wire operation into `batch`.  A hijacked unit
    /// renders nothing.
    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>);

    /// Runs after the transport completes the batch.  May clear `ok`, never
    /// sets it.
    fn finish_op(&mut self, ok: &mut bool);

    /// Registers the unit's pre-batch hook point and exposes its buffers.
    fn set_interception_hook_point(&mut self, state: &mut InterceptorState);

    /// Registers the unit's post-batch hook point.  This is the last call a
    /// unit receives for a batch.
    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState);

    /// Hands responsibility for this unit's result to an interceptor.
    fn set_hijacking_state(&mut self, state: &mut InterceptorState);

    /// Returns the buffers this unit exposes to interceptors.
    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::None
    }
}

/// A view of one unit's buffers, handed to the interceptor accessors.
pub enum InterceptionBuffers<'a> {
    None,
    SendInitialMetadata(&'a mut CallOpSendInitialMetadata),
    SendMessage(&'a mut CallOpSendMessage),
    SendStatus(&'a mut CallOpServerSendStatus),
    RecvInitialMetadata(&'a mut CallOpRecvInitialMetadata),
    RecvMessage {
        message: Option<&'a mut dyn Any>,
        hijack_failed: &'a mut bool,
    },
    RecvStatus(&'a mut CallOpClientRecvStatus),
}

/// A unit that does nothing.  Fills slots a batch does not need.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallNoOp;

impl sealed::Sealed for CallNoOp {}

impl CallOp for CallNoOp {
    fn add_op<'a>(&'a mut self, _batch: &mut OpBatch<'a>) {}

    fn finish_op(&mut self, _ok: &mut bool) {}

    fn set_interception_hook_point(&mut self, _state: &mut InterceptorState) {}

    fn set_finish_interception_hook_point(&mut self, _state: &mut InterceptorState) {}

    fn set_hijacking_state(&mut self, _state: &mut InterceptorState) {}
}

/// A fixed composition of operation units, implemented for tuples of one to
/// six [`CallOp`]s.
pub trait CallOps: Send {
    fn configure(&mut self, config: &CallConfig);

    fn add_ops<'a>(&'a mut self, batch: &mut OpBatch<'a>);

    fn finish_ops(&mut self, ok: &mut bool);

    fn set_interception_hook_points(&mut self, state: &mut InterceptorState);

    fn set_finish_interception_hook_points(&mut self, state: &mut InterceptorState);

    fn set_hijacking_state(&mut self, state: &mut InterceptorState);

    /// Returns the unit in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the composition has no such slot.
    fn op_mut(&mut self, slot: usize) -> &mut dyn CallOp;
}

macro_rules! impl_call_ops {
    ($($slot:tt $op:ident),+) => {
        impl<$($op: CallOp),+> CallOps for ($($op,)+) {
            fn configure(&mut self, config: &CallConfig) {
                $(self.$slot.configure(config);)+
            }

            fn add_ops<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
                $(self.$slot.add_op(batch);)+
            }

            fn finish_ops(&mut self, ok: &mut bool) {
                $(self.$slot.finish_op(ok);)+
            }

            fn set_interception_hook_points(&mut self, state: &mut InterceptorState) {
                $(
                    state.enter_slot($slot);
                    self.$slot.set_interception_hook_point(state);
                )+
            }

            fn set_finish_interception_hook_points(&mut self, state: &mut InterceptorState) {
                $(
                    state.enter_slot($slot);
                    self.$slot.set_finish_interception_hook_point(state);
                )+
            }

            fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
                $(
                    state.enter_slot($slot);
                    self.$slot.set_hijacking_state(state);
                )+
            }

            fn op_mut(&mut self, slot: usize) -> &mut dyn CallOp {
                match slot {
                    $($slot => &mut self.$slot,)+
                    _ => panic!("no operation in slot {slot}"),
                }
            }
        }
    };
}

impl_call_ops!(0 A);
impl_call_ops!(0 A, 1 B);
impl_call_ops!(0 A, 1 B, 2 C);
impl_call_ops!(0 A, 1 B, 2 C, 3 D);
impl_call_ops!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_call_ops!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataMap;
    use crate::write_options::{InitialMetadataFlags, WriteOptions};

    type FullSet = (
        CallOpSendInitialMetadata,
        CallOpSendMessage,
        CallOpClientSendClose,
        CallOpRecvInitialMetadata,
        CallOpRecvMessage<String>,
        CallOpClientRecvStatus,
    );

    fn rendered(ops: &mut impl CallOps) -> usize {
        let mut batch = OpBatch::new();
        ops.add_ops(&mut batch);
        batch.len()
    }

    #[test]
    fn inactive_units_render_nothing() {
        let mut ops = FullSet::default();
        assert_eq!(rendered(&mut ops), 0);
    }

    #[test]
    fn rendered_count_matches_active_units() {
        let context = crate::call::ClientContext::new();
        let mut ops = FullSet::default();
        ops.0
            .send_initial_metadata(MetadataMap::new(), InitialMetadataFlags::empty());
        ops.1
            .send_message(&String::from("m"), WriteOptions::new())
            .unwrap();
        ops.5.client_recv_status(&context);
        assert_eq!(rendered(&mut ops), 3);

        ops.2.client_send_close();
        ops.3.recv_initial_metadata(&context);
        ops.4.recv_message(String::new());
        assert_eq!(rendered(&mut ops), 6);
    }

    #[test]
    fn finish_on_inactive_units_keeps_ok() {
        let mut ops = FullSet::default();
        let mut ok = true;
        ops.finish_ops(&mut ok);
        assert!(ok);
        let mut ok = false;
        ops.finish_ops(&mut ok);
        assert!(!ok);
    }

    #[test]
    fn noop_slots_are_addressable() {
        let mut ops = (CallNoOp, CallNoOp);
        let mut batch = OpBatch::new();
        ops.op_mut(1).add_op(&mut batch);
        assert!(batch.is_empty());
    }
}
