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

use bytes::Bytes;
use tracing::{debug, error};

use super::{CallOp, InterceptionBuffers, sealed};
use crate::byte_buffer::ByteBuffer;
use crate::codec::{BufferOwnership, ErasedMessage, Serialize, serialize_owned};
use crate::config::CallConfig;
use crate::interceptor::{Exposure, InterceptionHookPoint, InterceptorState};
use crate::metadata::{MetadataArray, MetadataMap, fill_metadata_array};
use crate::status::{Status, StatusCode};
use crate::transport::{Op, OpBatch};
use crate::write_options::{CompressionLevel, InitialMetadataFlags, WriteOptions};

/// Sends the call's initial metadata.
#[derive(Debug, Default)]
pub struct CallOpSendInitialMetadata {
    send: bool,
    hijacked: bool,
    flags: InitialMetadataFlags,
    metadata: MetadataMap,
    compression_level: Option<CompressionLevel>,
    default_compression_level: Option<CompressionLevel>,
    // Lives from add_op until the matching finish_op.
    initial_metadata: MetadataArray,
}

impl CallOpSendInitialMetadata {
    pub fn send_initial_metadata(&mut self, metadata: MetadataMap, flags: InitialMetadataFlags) {
        self.compression_level = None;
        self.send = true;
        self.flags = flags;
        self.metadata = metadata;
    }

    /// Overrides the channel's default compression level for this call.
    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        self.compression_level = Some(level);
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }
}

impl sealed::Sealed for CallOpSendInitialMetadata {}

impl CallOp for CallOpSendInitialMetadata {
    fn configure(&mut self, config: &CallConfig) {
        self.default_compression_level = config.default_compression_level;
    }

    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.send || self.hijacked {
            return;
        }
        self.initial_metadata = fill_metadata_array(&self.metadata, &Bytes::new());
        let this: &'a Self = self;
        batch.push(Op::SendInitialMetadata {
            metadata: &this.initial_metadata,
            flags: this.flags,
            compression_level: this.compression_level.or(this.default_compression_level),
        });
    }

    fn finish_op(&mut self, _ok: &mut bool) {
        if !self.send || self.hijacked {
            return;
        }
        self.initial_metadata = MetadataArray::default();
        self.send = false;
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.send {
            return;
        }
        state.add_hook(InterceptionHookPoint::PreSendInitialMetadata);
        state.expose(Exposure::SendInitialMetadata);
    }

    fn set_finish_interception_hook_point(&mut self, _state: &mut InterceptorState) {
        self.send = false;
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, _state: &mut InterceptorState) {
        self.hijacked = true;
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::SendInitialMetadata(self)
    }
}

/// Sends one message.
///
/// [`send_message`](Self::send_message) serializes right away, so the caller's
/// value may be dropped as soon as it returns.
/// [`send_message_ptr`](Self::send_message_ptr) keeps the message and
/// serializes it when the batch is rendered, which lets interceptors inspect
/// or replace the typed message.
#[derive(Default)]
pub struct CallOpSendMessage {
    active: bool,
    hijacked: bool,
    failed_send: bool,
    oversized: bool,
    message: Option<Arc<dyn ErasedMessage>>,
    send_buf: ByteBuffer,
    write_options: WriteOptions,
    max_message_size: Option<usize>,
}

impl CallOpSendMessage {
    /// Serializes `message` for sending with `options`.  The options apply to
    /// this message only.
    pub fn send_message<M>(&mut self, message: &M, options: WriteOptions) -> Result<(), Status>
    where
        M: Serialize + ?Sized,
    {
        self.arm(options);
        self.message = None;
        match Serialize::serialize(message, &mut self.send_buf) {
            Ok(BufferOwnership::Owned) => Ok(()),
            Ok(BufferOwnership::Borrowed) => {
                self.send_buf.duplicate();
                Ok(())
            }
            Err(status) => {
                self.send_buf.clear();
                self.active = false;
                Err(status)
            }
        }
    }

    /// Keeps `message` and serializes it when the batch is rendered.
    pub fn send_message_ptr<M>(&mut self, message: Arc<M>, options: WriteOptions) -> Result<(), Status>
    where
        M: Serialize + Send + Sync + 'static,
    {
        self.arm(options);
        self.send_buf.clear();
        self.message = Some(message);
        Ok(())
    }

    /// Returns the options the next render will use.
    pub fn write_options(&self) -> WriteOptions {
        self.write_options
    }

    fn arm(&mut self, options: WriteOptions) {
        self.active = true;
        self.failed_send = false;
        self.oversized = false;
        self.write_options = options;
    }

    fn serialize_pending(&mut self) {
        if let Some(message) = self.message.take() {
            if let Err(status) = serialize_owned(&*message, &mut self.send_buf) {
                error!(%status, "failed to serialize a message that was accepted for sending");
                panic!("failed to serialize a message that was accepted for sending: {status}");
            }
        }
    }

    pub(crate) fn original_message(&self) -> Option<&dyn Any> {
        self.message.as_deref().map(|message| message.as_any())
    }

    pub(crate) fn replace_message(&mut self, message: Arc<dyn ErasedMessage>) {
        self.send_buf.clear();
        self.message = Some(message);
    }

    pub(crate) fn serialized_message(&mut self) -> Option<&mut ByteBuffer> {
        if !self.active {
            return None;
        }
        self.serialize_pending();
        self.send_buf.is_valid().then_some(&mut self.send_buf)
    }

    pub(crate) fn send_succeeded(&self) -> bool {
        !self.failed_send
    }

    pub(crate) fn fail_hijacked_send(&mut self) {
        self.failed_send = true;
    }
}

impl std::fmt::Debug for CallOpSendMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOpSendMessage")
            .field("active", &self.active)
            .field("hijacked", &self.hijacked)
            .field("failed_send", &self.failed_send)
            .field("deferred", &self.message.is_some())
            .field("send_buf", &self.send_buf)
            .field("write_options", &self.write_options)
            .finish()
    }
}

impl sealed::Sealed for CallOpSendMessage {}

impl CallOp for CallOpSendMessage {
    fn configure(&mut self, config: &CallConfig) {
        self.max_message_size = config.max_send_message_size;
    }

    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.active || self.hijacked {
            return;
        }
        self.serialize_pending();
        let flags = self.write_options.flags();
        self.write_options = WriteOptions::default();
        if let Some(limit) = self.max_message_size {
            let size = self.send_buf.len();
            if size > limit {
                debug!(size, limit, "message exceeds the send size limit");
                self.oversized = true;
                return;
            }
        }
        let this: &'a Self = self;
        batch.push(Op::SendMessage {
            message: &this.send_buf,
            flags,
        });
    }

    fn finish_op(&mut self, ok: &mut bool) {
        if !self.active {
            return;
        }
        self.send_buf.clear();
        if self.hijacked && self.failed_send {
            *ok = false;
        } else if self.oversized {
            self.failed_send = true;
            *ok = false;
        } else if !*ok {
            self.failed_send = true;
        }
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.active {
            return;
        }
        state.add_hook(InterceptionHookPoint::PreSendMessage);
        state.expose(Exposure::SendMessage);
    }

    fn set_finish_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if self.active {
            state.add_hook(InterceptionHookPoint::PostSendMessage);
        }
        // The serialized bytes now belong to the transport.  Only the send
        // result stays visible.
        self.send_buf.clear();
        self.message = None;
        self.active = false;
        self.hijacked = false;
        self.oversized = false;
    }

    fn set_hijacking_state(&mut self, _state: &mut InterceptorState) {
        self.hijacked = true;
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::SendMessage(self)
    }
}

/// Half-closes the client side of a call.
#[derive(Debug, Default)]
pub struct CallOpClientSendClose {
    send: bool,
    hijacked: bool,
}

impl CallOpClientSendClose {
    pub fn client_send_close(&mut self) {
        self.send = true;
    }
}

impl sealed::Sealed for CallOpClientSendClose {}

impl CallOp for CallOpClientSendClose {
    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.send || self.hijacked {
            return;
        }
        batch.push(Op::SendCloseFromClient);
    }

    fn finish_op(&mut self, _ok: &mut bool) {
        self.send = false;
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if self.send {
            state.add_hook(InterceptionHookPoint::PreSendClose);
        }
    }

    fn set_finish_interception_hook_point(&mut self, _state: &mut InterceptorState) {
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, _state: &mut InterceptorState) {
        self.hijacked = true;
    }
}

/// Sends the final status and trailing metadata of a server call.
#[derive(Debug, Default)]
pub struct CallOpServerSendStatus {
    send_status_available: bool,
    hijacked: bool,
    code: StatusCode,
    error_message: String,
    error_details: Bytes,
    metadata: MetadataMap,
    trailing_metadata: MetadataArray,
}

impl CallOpServerSendStatus {
    pub fn server_send_status(&mut self, trailing_metadata: MetadataMap, status: &Status) {
        self.metadata = trailing_metadata;
        self.set_status(status);
        self.send_status_available = true;
    }

    pub(crate) fn status(&self) -> Status {
        Status::with_details(
            self.code,
            self.error_message.clone(),
            self.error_details.clone(),
        )
    }

    pub(crate) fn set_status(&mut self, status: &Status) {
        self.code = status.code();
        self.error_message = status.message().to_owned();
        self.error_details = status.details().clone();
    }

    pub(crate) fn trailing_metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }
}

impl sealed::Sealed for CallOpServerSendStatus {}

impl CallOp for CallOpServerSendStatus {
    fn add_op<'a>(&'a mut self, batch: &mut OpBatch<'a>) {
        if !self.send_status_available || self.hijacked {
            return;
        }
        self.trailing_metadata = fill_metadata_array(&self.metadata, &self.error_details);
        let this: &'a Self = self;
        batch.push(Op::SendStatusFromServer {
            trailing_metadata: &this.trailing_metadata,
            status: this.code,
            status_details: (!this.error_message.is_empty()).then_some(this.error_message.as_str()),
        });
    }

    fn finish_op(&mut self, _ok: &mut bool) {
        if !self.send_status_available || self.hijacked {
            return;
        }
        self.trailing_metadata = MetadataArray::default();
        self.send_status_available = false;
    }

    fn set_interception_hook_point(&mut self, state: &mut InterceptorState) {
        if !self.send_status_available {
            return;
        }
        state.add_hook(InterceptionHookPoint::PreSendStatus);
        state.expose(Exposure::SendStatus);
    }

    fn set_finish_interception_hook_point(&mut self, _state: &mut InterceptorState) {
        self.send_status_available = false;
        self.hijacked = false;
    }

    fn set_hijacking_state(&mut self, _state: &mut InterceptorState) {
        self.hijacked = true;
    }

    fn interception_buffers(&mut self) -> InterceptionBuffers<'_> {
        InterceptionBuffers::SendStatus(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BufferOwnership;
    use crate::metadata::BINARY_ERROR_DETAILS_KEY;

    fn render(op: &mut impl CallOp) -> usize {
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        batch.len()
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize(&self, _out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
            Err(Status::new(StatusCode::Internal, "cannot encode"))
        }
    }

    #[test]
    fn write_options_reset_after_render() {
        let mut op = CallOpSendMessage::default();
        let mut options = WriteOptions::new();
        options.set_no_compression().set_buffer_hint().set_last_message();
        op.send_message(&Bytes::from_static(b"m"), options).unwrap();
        assert_eq!(op.write_options(), options);
        assert_eq!(render(&mut op), 1);
        assert_eq!(op.write_options(), WriteOptions::default());
    }

    #[test]
    fn rendered_message_carries_its_flags() {
        let mut op = CallOpSendMessage::default();
        let mut options = WriteOptions::new();
        options.set_write_through();
        op.send_message(&String::from("hello"), options).unwrap();
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        match batch.iter().next() {
            Some(Op::SendMessage { message, flags }) => {
                assert_eq!(message.to_bytes(), "hello");
                assert_eq!(*flags, options.flags());
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn borrowed_serialization_is_copied() {
        let payload = Bytes::from(vec![1u8, 2, 3]);
        let mut op = CallOpSendMessage::default();
        op.send_message(&payload, WriteOptions::new()).unwrap();
        let buf = op.serialized_message().unwrap();
        assert_eq!(buf.to_bytes(), payload);
        assert_ne!(buf.slices()[0].as_ptr(), payload.as_ptr());
    }

    #[test]
    fn serialization_failure_is_reported_and_leaves_unit_inactive() {
        let mut op = CallOpSendMessage::default();
        let err = op
            .send_message(&Unserializable, WriteOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Internal);
        assert_eq!(render(&mut op), 0);
    }

    #[test]
    #[should_panic(expected = "failed to serialize")]
    fn deferred_serialization_failure_at_render_is_fatal() {
        let mut op = CallOpSendMessage::default();
        op.send_message_ptr(Arc::new(Unserializable), WriteOptions::new())
            .unwrap();
        render(&mut op);
    }

    #[test]
    fn deferred_message_is_visible_until_rendered() {
        let mut op = CallOpSendMessage::default();
        op.send_message_ptr(Arc::new(String::from("later")), WriteOptions::new())
            .unwrap();
        let original = op.original_message().unwrap();
        assert_eq!(original.downcast_ref::<String>().unwrap(), "later");
        assert_eq!(render(&mut op), 1);
        assert!(op.original_message().is_none());
    }

    #[test]
    fn hijacked_units_render_nothing() {
        let mut state = InterceptorState::default();
        let mut metadata = CallOpSendInitialMetadata::default();
        metadata.send_initial_metadata(MetadataMap::new(), InitialMetadataFlags::empty());
        metadata.set_hijacking_state(&mut state);
        assert_eq!(render(&mut metadata), 0);

        let mut message = CallOpSendMessage::default();
        message
            .send_message(&Bytes::from_static(b"m"), WriteOptions::new())
            .unwrap();
        message.set_hijacking_state(&mut state);
        assert_eq!(render(&mut message), 0);

        let mut close = CallOpClientSendClose::default();
        close.client_send_close();
        close.set_hijacking_state(&mut state);
        assert_eq!(render(&mut close), 0);
    }

    #[test]
    fn failed_hijacked_send_fails_the_batch() {
        let mut state = InterceptorState::default();
        let mut op = CallOpSendMessage::default();
        op.send_message(&Bytes::from_static(b"m"), WriteOptions::new())
            .unwrap();
        op.fail_hijacked_send();
        op.set_hijacking_state(&mut state);
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
    }

    #[test]
    fn transport_failure_marks_send_failed() {
        let mut op = CallOpSendMessage::default();
        op.send_message(&Bytes::from_static(b"m"), WriteOptions::new())
            .unwrap();
        render(&mut op);
        let mut ok = false;
        op.finish_op(&mut ok);
        assert!(!ok);
        assert!(!op.send_succeeded());
    }

    #[test]
    fn oversized_message_is_not_sent() {
        let mut op = CallOpSendMessage::default();
        op.configure(&CallConfig::new().with_max_send_message_size(2));
        op.send_message(&Bytes::from_static(b"too long"), WriteOptions::new())
            .unwrap();
        assert_eq!(render(&mut op), 0);
        let mut ok = true;
        op.finish_op(&mut ok);
        assert!(!ok);
    }

    #[test]
    fn server_status_renders_message_and_trailers() {
        let mut op = CallOpServerSendStatus::default();
        let trailers: MetadataMap = [("a", "1"), ("b", "2")].into_iter().collect();
        op.server_send_status(
            trailers,
            &Status::new(StatusCode::PermissionDenied, "nope"),
        );
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        match batch.iter().next() {
            Some(Op::SendStatusFromServer {
                trailing_metadata,
                status,
                status_details,
            }) => {
                assert_eq!(*status, StatusCode::PermissionDenied);
                assert_eq!(*status_details, Some("nope"));
                assert_eq!(trailing_metadata.len(), 2);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn server_status_appends_error_details() {
        let mut op = CallOpServerSendStatus::default();
        op.server_send_status(
            MetadataMap::new(),
            &Status::with_details(StatusCode::Internal, "", Bytes::from_static(b"\x08\x01")),
        );
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        match batch.iter().next() {
            Some(Op::SendStatusFromServer {
                trailing_metadata,
                status_details,
                ..
            }) => {
                assert_eq!(*status_details, None);
                assert_eq!(trailing_metadata.len(), 1);
                assert_eq!(
                    &**trailing_metadata.as_slice()[0].key(),
                    BINARY_ERROR_DETAILS_KEY
                );
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn initial_metadata_uses_default_compression() {
        let mut op = CallOpSendInitialMetadata::default();
        op.configure(&CallConfig::new().with_default_compression_level(CompressionLevel::High));
        op.send_initial_metadata(MetadataMap::new(), InitialMetadataFlags::WAIT_FOR_READY);
        let mut batch = OpBatch::new();
        op.add_op(&mut batch);
        match batch.iter().next() {
            Some(Op::SendInitialMetadata {
                flags,
                compression_level,
                ..
            }) => {
                assert!(flags.contains(InitialMetadataFlags::WAIT_FOR_READY));
                assert_eq!(*compression_level, Some(CompressionLevel::High));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn finish_releases_the_unit_for_the_next_batch() {
        let mut state = InterceptorState::default();
        let mut op = CallOpClientSendClose::default();
        op.client_send_close();
        assert_eq!(render(&mut op), 1);
        let mut ok = true;
        op.finish_op(&mut ok);
        op.set_finish_interception_hook_point(&mut state);
        assert_eq!(render(&mut op), 0);
    }
}
