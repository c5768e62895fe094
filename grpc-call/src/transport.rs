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

//! The boundary between operation sets and the transport that executes their
//! batches.
//!
//! An [`OpBatch`] holds at most [`MAX_OPS`] wire-level operation descriptors.
//! Send descriptors borrow buffers owned by the operation units, so a
//! transport must copy (or cheaply clone) whatever it needs before
//! [`CallTransport::start_batch`] returns.  Receive descriptors carry a
//! [`RecvSlot`] that the transport fills before it completes the batch.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::byte_buffer::ByteBuffer;
use crate::completion_queue::Tag;
use crate::metadata::{MetadataArray, MetadataMap};
use crate::status::StatusCode;
use crate::write_options::{CompressionLevel, InitialMetadataFlags, WriteFlags};

/// The largest number of operations a single batch may carry.
pub const MAX_OPS: usize = 6;

/// A single wire-level operation.
#[derive(Debug)]
pub enum Op<'a> {
    SendInitialMetadata {
        metadata: &'a MetadataArray,
        flags: InitialMetadataFlags,
        compression_level: Option<CompressionLevel>,
    },
    SendMessage {
        message: &'a ByteBuffer,
        flags: WriteFlags,
    },
    SendCloseFromClient,
    SendStatusFromServer {
        trailing_metadata: &'a MetadataArray,
        status: StatusCode,
        /// `None` when the status carries no message.
        status_details: Option<&'a str>,
    },
    RecvInitialMetadata {
        metadata: RecvSlot<MetadataMap>,
    },
    RecvMessage {
        message: RecvSlot<ByteBuffer>,
    },
    RecvStatusOnClient {
        status: RecvSlot<ReceivedStatus>,
    },
}

/// A bounded, stack-allocated list of operations submitted together.
#[derive(Debug)]
pub struct OpBatch<'a> {
    ops: [Option<Op<'a>>; MAX_OPS],
    len: usize,
}

impl<'a> OpBatch<'a> {
    pub fn new() -> Self {
        OpBatch {
            ops: [const { None }; MAX_OPS],
            len: 0,
        }
    }

    /// Appends an operation.
    ///
    /// # Panics
    ///
    /// Panics if the batch already holds [`MAX_OPS`] operations.
    pub fn push(&mut self, op: Op<'a>) {
        assert!(
            self.len < MAX_OPS,
            "a batch holds at most {MAX_OPS} operations"
        );
        self.ops[self.len] = Some(op);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Op<'a>> {
        self.ops[..self.len].iter().flatten()
    }
}

impl Default for OpBatch<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared, single-value cell through which the transport delivers received
/// data back to the unit that requested it.
#[derive(Debug)]
pub struct RecvSlot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> RecvSlot<T> {
    pub fn new() -> Self {
        RecvSlot {
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Stores the received value, replacing any previous one.
    pub fn fill(&self, value: T) {
        *self.value.lock() = Some(value);
    }

    /// Takes the received value out, if one was delivered.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }
}

impl<T> Clone for RecvSlot<T> {
    fn clone(&self) -> Self {
        RecvSlot {
            value: self.value.clone(),
        }
    }
}

impl<T> Default for RecvSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The raw status fields a client receives when a call ends.
#[derive(Debug, Clone, Default)]
pub struct ReceivedStatus {
    pub code: StatusCode,
    pub details: String,
    /// Transport-level diagnostic text, only expected on failed calls.
    pub error_string: Option<String>,
    pub trailing_metadata: MetadataMap,
}

/// Executes batches for a single call.
///
/// Implementations report completion by pushing `(tag, ok)` onto the call's
/// completion queue.  A batch with no operations must still complete, with
/// `ok` set to true.
pub trait CallTransport: Send + Sync {
    /// Starts executing `ops`.  An `Err` means the batch was rejected outright
    /// and will never complete.
    fn start_batch(&self, ops: &OpBatch<'_>, tag: Tag) -> Result<(), CallError>;

    /// Cancels the call.  Batches in flight still complete, with `ok` false.
    fn cancel(&self);
}

/// Reasons a transport rejects a batch.  Every one of these indicates misuse
/// of the call API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallError {
    Error,
    NotOnServer,
    NotOnClient,
    AlreadyAccepted,
    AlreadyInvoked,
    NotInvoked,
    AlreadyFinished,
    TooManyOperations,
    InvalidFlags,
    InvalidMetadata,
    InvalidMessage,
    NotServerCompletionQueue,
    BatchTooBig,
    PayloadTypeMismatch,
    CompletionQueueShutdown,
}

impl CallError {
    fn as_str(self) -> &'static str {
        match self {
            CallError::Error => "GRPC_CALL_ERROR",
            CallError::NotOnServer => "GRPC_CALL_ERROR_NOT_ON_SERVER",
            CallError::NotOnClient => "GRPC_CALL_ERROR_NOT_ON_CLIENT",
            CallError::AlreadyAccepted => "GRPC_CALL_ERROR_ALREADY_ACCEPTED",
            CallError::AlreadyInvoked => "GRPC_CALL_ERROR_ALREADY_INVOKED",
            CallError::NotInvoked => "GRPC_CALL_ERROR_NOT_INVOKED",
            CallError::AlreadyFinished => "GRPC_CALL_ERROR_ALREADY_FINISHED",
            CallError::TooManyOperations => "GRPC_CALL_ERROR_TOO_MANY_OPERATIONS",
            CallError::InvalidFlags => "GRPC_CALL_ERROR_INVALID_FLAGS",
            CallError::InvalidMetadata => "GRPC_CALL_ERROR_INVALID_METADATA",
            CallError::InvalidMessage => "GRPC_CALL_ERROR_INVALID_MESSAGE",
            CallError::NotServerCompletionQueue => {
                "GRPC_CALL_ERROR_NOT_SERVER_COMPLETION_QUEUE"
            }
            CallError::BatchTooBig => "GRPC_CALL_ERROR_BATCH_TOO_BIG",
            CallError::PayloadTypeMismatch => "GRPC_CALL_ERROR_PAYLOAD_TYPE_MISMATCH",
            CallError::CompletionQueueShutdown => "GRPC_CALL_ERROR_COMPLETION_QUEUE_SHUTDOWN",
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_iterates_in_push_order() {
        let mut batch = OpBatch::new();
        assert!(batch.is_empty());
        batch.push(Op::SendCloseFromClient);
        batch.push(Op::RecvMessage {
            message: RecvSlot::new(),
        });
        let kinds: Vec<_> = batch
            .iter()
            .map(|op| matches!(op, Op::SendCloseFromClient))
            .collect();
        assert_eq!(kinds, vec![true, false]);
    }

    #[test]
    #[should_panic(expected = "at most 6 operations")]
    fn batch_rejects_a_seventh_operation() {
        let mut batch = OpBatch::new();
        for _ in 0..=MAX_OPS {
            batch.push(Op::SendCloseFromClient);
        }
    }

    #[test]
    fn recv_slot_is_shared_between_clones() {
        let slot = RecvSlot::new();
        let transport_side = slot.clone();
        transport_side.fill(ByteBuffer::from_bytes("hi".into()));
        assert!(slot.is_filled());
        assert_eq!(slot.take().unwrap().to_bytes(), "hi");
        assert!(!transport_side.is_filled());
    }

    #[test]
    fn call_error_display_uses_core_names() {
        assert_eq!(
            CallError::TooManyOperations.to_string(),
            "GRPC_CALL_ERROR_TOO_MANY_OPERATIONS"
        );
    }
}
