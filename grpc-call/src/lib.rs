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

//! Call-batch execution and interception for [gRPC] calls.
//!
//! A call is driven by submitting batches of operations: send the initial
//! metadata, send a message, half-close, receive the status, and so on.  An
//! [`CallOpSet`] composes up to six operation units, lets the call's
//! interceptors observe or rewrite the batch, hands the rendered batch to a
//! [`CallTransport`], and turns the transport's completion into a final
//! `(tag, ok)` result on a [`CompletionQueue`].
//!
//! This version is in progress and not recommended for any production use.  All
//! APIs are unstable.  Proceed at your own risk.
//!
//! [gRPC]: https://grpc.io

pub mod byte_buffer;
pub(crate) mod byte_str;
pub mod call;
pub mod codec;
pub mod completion_queue;
pub mod config;
pub mod interceptor;
pub mod metadata;
pub mod op_set;
pub mod ops;
pub mod status;
pub mod transport;
pub mod write_options;

#[cfg(test)]
pub(crate) mod test_utils;

pub use byte_buffer::ByteBuffer;
pub use byte_str::ByteStr;
pub use call::{Call, ClientContext, Diagnostics};
pub use completion_queue::{CompletionQueue, Event, NextStatus, Tag};
pub use config::CallConfig;
pub use metadata::MetadataMap;
pub use op_set::CallOpSet;
pub use status::{Status, StatusCode};
pub use transport::{CallError, CallTransport};
pub use write_options::{CompressionLevel, InitialMetadataFlags, WriteOptions};
