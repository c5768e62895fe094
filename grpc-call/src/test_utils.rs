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

//! Test support: a transport that records every batch it is handed.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::byte_buffer::ByteBuffer;
use crate::completion_queue::{CompletionQueue, NextStatus, Tag};
use crate::metadata::{MetadataArray, MetadataMap};
use crate::op_set::CallOpSet;
use crate::ops::CallOps;
use crate::status::StatusCode;
use crate::transport::{CallError, CallTransport, Op, OpBatch, ReceivedStatus, RecvSlot};
use crate::write_options::{CompressionLevel, InitialMetadataFlags, WriteFlags};

/// An owned copy of an [`Op`].
#[derive(Debug)]
pub(crate) enum RecordedOp {
    SendInitialMetadata {
        metadata: Vec<(String, Bytes)>,
        flags: InitialMetadataFlags,
        compression_level: Option<CompressionLevel>,
    },
    SendMessage {
        message: Bytes,
        flags: WriteFlags,
    },
    SendCloseFromClient,
    SendStatusFromServer {
        trailing_metadata: Vec<(String, Bytes)>,
        status: StatusCode,
        status_details: Option<String>,
    },
    RecvInitialMetadata(RecvSlot<MetadataMap>),
    RecvMessage(RecvSlot<ByteBuffer>),
    RecvStatusOnClient(RecvSlot<ReceivedStatus>),
}

impl RecordedOp {
    fn record(op: &Op<'_>) -> RecordedOp {
        match op {
            Op::SendInitialMetadata {
                metadata,
                flags,
                compression_level,
            } => RecordedOp::SendInitialMetadata {
                metadata: entries(metadata),
                flags: *flags,
                compression_level: *compression_level,
            },
            Op::SendMessage { message, flags } => RecordedOp::SendMessage {
                message: message.to_bytes(),
                flags: *flags,
            },
            Op::SendCloseFromClient => RecordedOp::SendCloseFromClient,
            Op::SendStatusFromServer {
                trailing_metadata,
                status,
                status_details,
            } => RecordedOp::SendStatusFromServer {
                trailing_metadata: entries(trailing_metadata),
                status: *status,
                status_details: status_details.map(str::to_string),
            },
            Op::RecvInitialMetadata { metadata } => RecordedOp::RecvInitialMetadata(metadata.clone()),
            Op::RecvMessage { message } => RecordedOp::RecvMessage(message.clone()),
            Op::RecvStatusOnClient { status } => RecordedOp::RecvStatusOnClient(status.clone()),
        }
    }
}

fn entries(array: &MetadataArray) -> Vec<(String, Bytes)> {
    array
        .as_slice()
        .iter()
        .map(|entry| (entry.key().to_string(), entry.value().clone()))
        .collect()
}

#[derive(Debug)]
pub(crate) struct RecordedBatch {
    pub(crate) tag: Tag,
    pub(crate) ops: Vec<RecordedOp>,
}

impl RecordedBatch {
    /// Fills every receive slot in the batch the way a healthy server would.
    pub(crate) fn respond(&self, response: &Response) {
        for op in &self.ops {
            match op {
                RecordedOp::RecvInitialMetadata(slot) => {
                    slot.fill(response.initial_metadata.clone())
                }
                RecordedOp::RecvMessage(slot) => {
                    if let Some(message) = &response.message {
                        slot.fill(ByteBuffer::from_bytes(message.clone()));
                    }
                }
                RecordedOp::RecvStatusOnClient(slot) => slot.fill(response.status.clone()),
                _ => {}
            }
        }
    }
}

/// What [`RecordedBatch::respond`] writes into the receive slots.
#[derive(Debug, Default)]
pub(crate) struct Response {
    pub(crate) initial_metadata: MetadataMap,
    pub(crate) message: Option<Bytes>,
    pub(crate) status: ReceivedStatus,
}

/// Records batches and leaves completing them to the test, except for empty
/// batches which complete right away.
#[derive(Debug)]
pub(crate) struct RecordingTransport {
    cq: Weak<CompletionQueue>,
    batches: Mutex<Vec<Arc<RecordedBatch>>>,
    next_error: Mutex<Option<CallError>>,
    cancelled: Mutex<bool>,
}

impl RecordingTransport {
    pub(crate) fn new(cq: &Arc<CompletionQueue>) -> Arc<Self> {
        Arc::new(RecordingTransport {
            cq: Arc::downgrade(cq),
            batches: Mutex::new(Vec::new()),
            next_error: Mutex::new(None),
            cancelled: Mutex::new(false),
        })
    }

    /// Makes the next `start_batch` fail with `err`.
    pub(crate) fn fail_next_batch(&self, err: CallError) {
        *self.next_error.lock() = Some(err);
    }

    pub(crate) fn batches(&self) -> Vec<Arc<RecordedBatch>> {
        self.batches.lock().clone()
    }

    pub(crate) fn batch(&self, index: usize) -> Arc<RecordedBatch> {
        self.batches.lock()[index].clone()
    }

    pub(crate) fn last_batch(&self) -> Arc<RecordedBatch> {
        self.batches
            .lock()
            .last()
            .cloned()
            .expect("no batch was started")
    }

    pub(crate) fn was_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Completes `tag` on the queue.
    pub(crate) fn complete(&self, tag: Tag, ok: bool) {
        if let Some(cq) = self.cq.upgrade() {
            cq.push(tag, ok);
        }
    }
}

impl CallTransport for RecordingTransport {
    fn start_batch(&self, ops: &OpBatch<'_>, tag: Tag) -> Result<(), CallError> {
        if let Some(err) = self.next_error.lock().take() {
            return Err(err);
        }
        let batch = RecordedBatch {
            tag,
            ops: ops.iter().map(RecordedOp::record).collect(),
        };
        let empty = batch.ops.is_empty();
        self.batches.lock().push(Arc::new(batch));
        if empty {
            self.complete(tag, true);
        }
        Ok(())
    }

    fn cancel(&self) {
        *self.cancelled.lock() = true;
    }
}

/// Feeds queued events for `set`'s core tag into it until it delivers a
/// result.  Returns `None` if the queue runs dry first.
pub(crate) fn drain<Ops: CallOps>(
    cq: &CompletionQueue,
    set: &mut CallOpSet<Ops>,
) -> Option<(Tag, bool)> {
    loop {
        match cq.try_next() {
            NextStatus::GotEvent(event) => {
                assert_eq!(event.tag, set.core_cq_tag(), "event for an unknown tag");
                if let Some(result) = set.finalize_result(event.ok) {
                    return Some(result);
                }
            }
            NextStatus::Empty | NextStatus::Shutdown => return None,
        }
    }
}
