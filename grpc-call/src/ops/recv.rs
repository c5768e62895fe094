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

use tracing::{debug, warn};

use super::{CallOp, InterceptionBuffers, sealed};
use crate::byte_buffer::ByteBuffer;
use crate::call::ClientContext;
use crate::codec::{Deserialize, DeserializeFunc, DeserializeFuncType};
use crate::config::CallConfig;
use crate::interceptor::{Exposure, InterceptionHookPoint, InterceptorState};
use crate::metadata::MetadataMap;
use crate::status::{Status, StatusCode};
use crate::transport::{Op, OpBatch, ReceivedStatus, RecvSlot};

// The receive-message state machine shared by the typed and the type-erased
// units.
#[derive(Debug, Default)]
struct RecvMessageState {
    active: bool,
    got_message: bool,
    allow_no_message: bool,
    hijacked: bool,
    hijacked_recv_message_failed: bool,
    recv_buf: RecvSlot<ByteBuffer>,
    max_message_size: Option<usize>,
}

impl RecvMessageState {
    fn arm(&mut self) {
        self.active = true;
        self.got_message = false;
        self.hijacked_recv_message_failed = false;
    }

    fn add_op(&mut self, batch: &mut OpBatch<'_>) {
        if !self.active || self.hijacked {
            return;
        }
        self.recv_buf = RecvSlot::new();
        batch.push(Op::RecvMessage {
            message: self.recv_buf.clone(),
        });
    }

    fn finish_op(
        &mut self,
        ok: &mut bool,
        deserialize: impl FnOnce(ByteBuffer) -> Result<(), Status>,
    ) {
        if !self.active {
            return;
        }
        match self.recv_buf.take().filter(ByteBuffer::is_valid) {
            Some(buf) if *ok => {
                let result = match self.max_message_size {
                    Some(limit) if buf.len() > limit => Err(Status::new(
                        StatusCode::ResourceExhausted,
                        format!("received message larger than max ({} vs. {limit})", buf.len()),
                    )),
                    _ => deserialize(buf),
                };
                match result {
                    Ok(()) => self.got_message = true,
                    Err(status) => {
                        debug!(%status, "failed to deserialize received message");
                        self.got_message = false;
                        *ok = false;
                    }
                }
            }
            Some(_) => self.got_message = false,
            None if self.hijacked && !self.hijacked_recv_message_failed => {
                // The hijacking interceptor already stored the message in its
                // deserialized form.
            }
            None => self.no_message(ok),
        }
    }

    fn no_message(&mut self, ok: &mut bool) {
        self.got_message = false;
        if !self.allow_no_message {
            *ok = false;
        }
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if self.active {
            state.expose(Exposure::RecvMessage);
        }
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.active {
            return;
        }
        state.add_hook(InterceptionHookPoint::PostRecvMessage);
        if !self.got_message {
            state.conceal(Exposure::RecvMessage);
        }
        self.active = false;
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
        self.hijacked = true;
        if !self.active {
            return;
        }
        state.add_hook(InterceptionHookPoint::PreRecvMessage);
        self.got_message = true;
    }
}

/// Receives one message into a value of type `R`.
pub struct CallOpRecvMessage<R> {
    message: Option<R>,
    state: RecvMessageState,
}

impl<R> Default for CallOpRecvMessage<R> {
    fn default() -> Self {
        CallOpRecvMessage {
            message: None,
            state: RecvMessageState::default(),
        }
    }
}

impl<R> CallOpRecvMessage<R> {
    /// Requests a message, deserializing it into `target`.
    pub fn recv_message(&mut self, target: R) {
        self.message = Some(target);
        self.state.arm();
    }

    /// Keeps the batch successful if the stream ends without a message.
    pub fn allow_no_message(&mut self) {
        self.state.allow_no_message = true;
    }

    pub fn got_message(&self) -> bool {
        self.state.got_message
    }

    /// Returns the received message.
    pub fn message(&self) -> Option<&R> {
        self.message.as_ref().filter(|_| self.state.got_message)
    }

    pub fn take_message(&mut self) -> Option<R> {
        if !self.state.got_message {
            return None;
        }
        self.state.got_message = false;
        self.message.take()
    }
}

impl<R> std::fmt::Debug for CallOpRecvMessage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOpRecvMessage")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<R> sealed::Sealed for CallOpRecvMessage<R> {}

impl<R: Deserialize + Any + Send> CallOp for CallOpRecvMessage<R> {
    fn configure(&mut self, config: &CallConfig) {
        self.state.max_message_size = config.max_receive_message_size;
    }

    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        self.state.add_op(batch);
    }

    fn finish_op(&mut self, ok: &mut bool) {
        let message = &mut self.message;
        self.state.finish_op(ok, |buf| match message {
            Some(message) => message.deserialize(buf),
            None => Err(Status::new(StatusCode::Internal, "no receive target")),
        });
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        self.state.set_interception_hook_point(state);
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        self.state.set_finish_interception_hook_point(state);
    }

    fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
        self.state.set_hijacking_state(state);
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::RecvMessage {
            message: self.message.as_mut().map(|message| message as &mut dyn Any),
            hijack_failed: &mut self.state.hijacked_recv_message_failed,
        }
    }
}

/// Receives one message into a target whose type is only known to the
/// caller.
#[derive(Default)]
pub struct CallOpGenericRecvMessage {
    deserialize: Option<Box<dyn DeserializeFunc>>,
    state: RecvMessageState,
}

impl CallOpGenericRecvMessage {
    /// Requests a message, deserializing it into `target`.
    pub fn recv_message<R: Deserialize + Any + Send>(&mut self, target: R) {
        self.deserialize = Some(Box::new(DeserializeFuncType::new(target)));
        self.state.arm();
    }

    /// Keeps the batch successful if the stream ends without a message.
    pub fn allow_no_message(&mut self) {
        self.state.allow_no_message = true;
    }

    pub fn got_message(&self) -> bool {
        self.state.got_message
    }

    /// Returns the received message if it has type `R`.
    pub fn message_mut<R: Any>(&mut self) -> Option<&mut R> {
        if !self.state.got_message {
            return None;
        }
        self.deserialize.as_mut()?.message_mut().downcast_mut()
    }

    /// Takes the received message if it has type `R`.
    pub fn take_message<R: Any>(&mut self) -> Option<R> {
        self.message_mut::<R>()?;
        self.state.got_message = false;
        let message = self.deserialize.take()?.into_message();
        message.downcast::<R>().ok().map(|message| *message)
    }
}

impl std::fmt::Debug for CallOpGenericRecvMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOpGenericRecvMessage")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl sealed::Sealed for CallOpGenericRecvMessage {}

impl CallOp for CallOpGenericRecvMessage {
    fn configure(&mut self, config: &CallConfig) {
        self.state.max_message_size = config.max_receive_message_size;
    }

    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        self.state.add_op(batch);
    }

    fn finish_op(&mut self, ok: &mut bool) {
        let deserialize = &mut self.deserialize;
        self.state.finish_op(ok, |buf| match deserialize {
            Some(deserialize) => deserialize.deserialize(buf),
            None => Err(Status::new(StatusCode::Internal, "no receive target")),
        });
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        self.state.set_interception_hook_point(state);
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        self.state.set_finish_interception_hook_point(state);
    }

    fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
        self.state.set_hijacking_state(state);
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::RecvMessage {
            message: self
                .deserialize
                .as_mut()
                .map(|deserialize| deserialize.message_mut()),
            hijack_failed: &mut self.state.hijacked_recv_message_failed,
        }
    }
}

/// Receives the server's initial metadata into a [`ClientContext`].
#[derive(Debug, Default)]
pub struct CallOpRecvInitialMetadata {
    active: bool,
    hijacked: bool,
    context: Option<ClientContext>,
    metadata: RecvSlot<MetadataMap>,
}

impl CallOpRecvInitialMetadata {
    pub fn recv_initial_metadata(&mut self, context: &ClientContext) {
        context.set_initial_metadata_received();
        self.context = Some(context.clone());
        self.active = true;
    }

    pub(crate) fn context(&self) -> Option<&ClientContext> {
        self.context.as_ref()
    }
}

impl sealed::Sealed for CallOpRecvInitialMetadata {}

impl CallOp for CallOpRecvInitialMetadata {
    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.active || self.hijacked {
            return;
        }
        self.metadata = RecvSlot::new();
        batch.push(Op::RecvInitialMetadata {
            metadata: self.metadata.clone(),
        });
    }

    fn finish_op(&mut self, _ok: &mut bool) {
        if !self.active || self.hijacked {
            return;
        }
        if let (Some(context), Some(metadata)) = (&self.context, self.metadata.take()) {
            context.set_recv_initial_metadata(metadata);
        }
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if self.active {
            state.expose(Exposure::RecvInitialMetadata);
        }
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.active {
            return;
        }
        state.add_hook(InterceptionHookPoint::PostRecvInitialMetadata);
        self.active = false;
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
        self.hijacked = true;
        if self.active {
            state.add_hook(InterceptionHookPoint::PreRecvInitialMetadata);
        }
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::RecvInitialMetadata(self)
    }
}

/// Receives the final status of a client call.
///
/// The trailing metadata is stored in the [`ClientContext`]; the status is
/// available from [`status`](Self::status) once the batch has completed.
#[derive(Debug, Default)]
pub struct CallOpClientRecvStatus {
    active: bool,
    hijacked: bool,
    context: Option<ClientContext>,
    status: Status,
    recv_status: RecvSlot<ReceivedStatus>,
}

impl CallOpClientRecvStatus {
    pub fn client_recv_status(&mut self, context: &ClientContext) {
        self.context = Some(context.clone());
        self.status = Status::ok();
        self.active = true;
    }

    /// Returns the call's final status.
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    pub(crate) fn context(&self) -> Option<&ClientContext> {
        self.context.as_ref()
    }
}

impl sealed::Sealed for CallOpClientRecvStatus {}

impl CallOp for CallOpClientRecvStatus {
    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.active || self.hijacked {
            return;
        }
        self.recv_status = RecvSlot::new();
        batch.push(Op::RecvStatusOnClient {
            status: self.recv_status.clone(),
        });
    }

    fn finish_op(&mut self, _ok: &mut bool) {
        if !self.active || self.hijacked {
            return;
        }
        let Some(context) = &self.context else {
            return;
        };
        let Some(received) = self.recv_status.take() else {
            self.status = Status::new(StatusCode::Unknown, "call ended without a status");
            return;
        };
        context.set_trailing_metadata(received.trailing_metadata);
        if received.code == StatusCode::Ok {
            self.status = Status::ok();
            if let Some(debug_error_string) = received.error_string {
                context
                    .diagnostics()
                    .record_ok_status_with_debug_error_string();
                warn!(%debug_error_string, "call finished OK but carried a debug error string");
            }
        } else {
            let details = context
                .trailing_metadata()
                .binary_error_details()
                .cloned()
                .unwrap_or_default();
            self.status = Status::with_details(received.code, received.details, details);
            if let Some(debug_error_string) = received.error_string {
                context.set_debug_error_string(debug_error_string);
            }
        }
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if self.active {
            state.expose(Exposure::RecvStatus);
        }
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.active {
            return;
        }
        state.add_hook(InterceptionHookPoint::PostRecvStatus);
        self.active = false;
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, state: &mut InterceptorState) {
        self.hijacked = true;
        if self.active {
            state.add_hook(InterceptionHookPoint::PreRecvStatus);
        }
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::RecvStatus(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Diagnostics;
    use crate::metadata::BINARY_ERROR_DETAILS_KEY;
    use bytes::Bytes;

    fn render(op: &mut impl CallOp) -> Vec<Op<'static>> {
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        batch
            .iter()
            .map(|op| match op {
                Op::RecvMessage { message } => Op::RecvMessage {
                    message: message.clone(),
                },
                Op::RecvInitialMetadata { metadata } => Op::RecvInitialMetadata {
                    metadata: metadata.clone(),
                },
                Op::RecvStatusOnClient { status } => Op::RecvStatusOnClient {
                    status: status.clone(),
                },
                other => panic!("unexpected op {other:?}"),
            })
            .collect()
    }

    fn message_slot(ops: &[Op<'static>]) -> RecvSlot<ByteBuffer> {
        match &ops[0] {
            Op::RecvMessage { message } => message.clone(),
            other => panic!("unexpected op {other:?}"),
        }
    }

    fn status_slot(ops: &[Op<'static>]) -> RecvSlot<ReceivedStatus> {
        match &ops[0] {
            Op::RecvStatusOnClient { status } => status.clone(),
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn received_message_is_deserialized() {
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        let ops = render(&mut op);
        message_slot(&ops).fill(ByteBuffer::from_bytes(Bytes::from_static(b"hi")));
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        assert!(op.got_message());
        assert_eq!(op.take_message().as_deref(), Some("hi"));
    }

    #[test]
    fn missing_message_fails_the_batch() {
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        render(&mut op);
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
        assert!(!op.got_message());
    }

    #[test]
    fn missing_message_may_be_allowed() {
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        op.allow_no_message();
        render(&mut op);
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        assert!(!op.got_message());
    }

    #[test]
    fn undecodable_message_fails_the_batch() {
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        let ops = render(&mut op);
        message_slot(&ops).fill(ByteBuffer::from_bytes(Bytes::from_static(b"\xff\xfe")));
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
        assert!(op.message().is_none());
    }

    #[test]
    fn failed_transport_discards_the_buffer() {
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        let ops = render(&mut op);
        message_slot(&ops).fill(ByteBuffer::from_bytes(Bytes::from_static(b"hi")));
        let mut ok = false;
        op.finish_op(&mut ok);
        assert!(!ok);
        assert!(!op.got_message());
    }

    #[test]
    fn oversized_message_fails_the_batch() {
        let mut op = CallOpRecvMessage::<Bytes>::default();
        op.configure(&CallConfig::new().with_max_receive_message_size(1));
        op.recv_message(Bytes::new());
        let ops = render(&mut op);
        message_slot(&ops).fill(ByteBuffer::from_bytes(Bytes::from_static(b"hi")));
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
    }

    #[test]
    fn hijacked_message_failure_runs_no_message_handling() {
        let mut state = InterceptorState::default();
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        op.set_hijacking_state(&mut state);
        assert!(render(&mut op).is_empty());
        assert!(op.got_message());
        if let InterceptionBuffers::RecvMessage { hijack_failed, .. } = op.interception_buffers() {
            *hijack_failed = true;
        }
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
        assert!(!op.got_message());
    }

    #[test]
    fn hijacked_message_success_keeps_interceptor_value() {
        let mut state = InterceptorState::default();
        let mut op = CallOpRecvMessage::<String>::default();
        op.recv_message(String::new());
        op.set_hijacking_state(&mut state);
        if let InterceptionBuffers::RecvMessage {
            message: Some(message),
            ..
        } = op.interception_buffers()
        {
            *message.downcast_mut::<String>().unwrap() = "cached".to_string();
        }
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        assert_eq!(op.message().map(String::as_str), Some("cached"));
    }

    #[test]
    fn generic_receive_downcasts_to_the_target_type() {
        let mut op = CallOpGenericRecvMessage::default();
        op.recv_message(String::new());
        let ops = render(&mut op);
        message_slot(&ops).fill(ByteBuffer::from_bytes(Bytes::from_static(b"generic")));
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        assert!(op.message_mut::<Vec<u8>>().is_none());
        assert_eq!(op.take_message::<String>().as_deref(), Some("generic"));
        assert!(op.take_message::<String>().is_none());
    }

    #[test]
    fn initial_metadata_lands_in_the_context() {
        let context = ClientContext::new();
        let mut op = CallOpRecvInitialMetadata::default();
        op.recv_initial_metadata(&context);
        assert!(context.initial_metadata_received());
        let ops = render(&mut op);
        match &ops[0] {
            Op::RecvInitialMetadata { metadata } => {
                metadata.fill([("server", "yes")].into_iter().collect())
            }
            other => panic!("unexpected op {other:?}"),
        }
        let mut ok = true;
        op.finish_op(&mut ok);
        assert_eq!(context.recv_initial_metadata().get("server").unwrap(), "yes");
    }

    #[test]
    fn error_status_collects_details_and_debug_string() {
        let context = ClientContext::new();
        let mut op = CallOpClientRecvStatus::default();
        op.client_recv_status(&context);
        let ops = render(&mut op);
        let mut trailing_metadata = MetadataMap::new();
        trailing_metadata.insert(BINARY_ERROR_DETAILS_KEY, Bytes::from_static(b"details"));
        status_slot(&ops).fill(ReceivedStatus {
            code: StatusCode::Unavailable,
            details: "connection reset".to_string(),
            error_string: Some("socket closed".to_string()),
            trailing_metadata,
        });
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        let status = op.status();
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert_eq!(status.message(), "connection reset");
        assert_eq!(status.details(), "details");
        assert_eq!(context.debug_error_string().as_deref(), Some("socket closed"));
    }

    #[test]
    fn ok_status_with_debug_string_is_counted_not_attached() {
        let diagnostics = Diagnostics::new();
        let context = ClientContext::with_diagnostics(diagnostics.clone());
        let mut op = CallOpClientRecvStatus::default();
        op.client_recv_status(&context);
        let ops = render(&mut op);
        status_slot(&ops).fill(ReceivedStatus {
            code: StatusCode::Ok,
            error_string: Some("spurious".to_string()),
            ..Default::default()
        });
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(ok);
        assert!(op.status().is_ok());
        assert_eq!(context.debug_error_string(), None);
        assert_eq!(diagnostics.ok_status_with_debug_error_string(), 1);
    }

    #[test]
    fn missing_status_is_unknown() {
        let context = ClientContext::new();
        let mut op = CallOpClientRecvStatus::default();
        op.client_recv_status(&context);
        render(&mut op);
        let mut ok = false;
        op.finish_op(&mut ok);
        assert_eq!(op.status().code(), StatusCode::Unknown);
    }
}
