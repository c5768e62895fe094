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

//! Per-message write options and per-call send flags.

use std::ops::{BitOr, BitOrAssign};

use serde::Deserialize;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bits:expr;)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($bits);)*

            /// Returns a set with no flags.
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Returns the raw bits.
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Returns true if every flag in `other` is set in `self`.
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Wire flags attached to a single send-message operation.
    WriteFlags {
        /// The write may be buffered and need not go out on the wire
        /// immediately.
        BUFFER_HINT = 0x1;
        /// Per-message compression is disabled for this write.
        NO_COMPRESS = 0x2;
        /// The write completes only once its bytes reached the socket.
        THROUGH = 0x4;
    }
}

flag_set! {
    /// Flags attached to a send-initial-metadata operation.
    InitialMetadataFlags {
        IDEMPOTENT_REQUEST = 0x10;
        WAIT_FOR_READY = 0x20;
        CACHEABLE_REQUEST = 0x40;
        WAIT_FOR_READY_EXPLICITLY_SET = 0x80;
        /// Initial metadata may be held back and coalesced with the first
        /// message.
        CORKED = 0x100;
    }
}

/// A compression level requested for a call's outgoing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Low,
    Medium,
    High,
}

/// Per-message write options.
///
/// Everything except `last_message` is a wire flag.  `last_message` changes
/// the composition of the batch instead: on a client it folds the half-close
/// into the same batch as the message, on a server it holds the write until
/// the status is sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    flags: WriteFlags,
    last_message: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all wire flags.
    pub fn clear(&mut self) {
        self.flags = WriteFlags::empty();
    }

    /// Returns the wire flags.
    pub fn flags(&self) -> WriteFlags {
        self.flags
    }

    /// Disables compression for the next message write.
    pub fn set_no_compression(&mut self) -> &mut Self {
        self.flags.insert(WriteFlags::NO_COMPRESS);
        self
    }

    pub fn clear_no_compression(&mut self) -> &mut Self {
        self.flags.remove(WriteFlags::NO_COMPRESS);
        self
    }

    pub fn no_compression(&self) -> bool {
        self.flags.contains(WriteFlags::NO_COMPRESS)
    }

    /// Allows the write to be buffered rather than sent immediately.
    pub fn set_buffer_hint(&mut self) -> &mut Self {
        self.flags.insert(WriteFlags::BUFFER_HINT);
        self
    }

    pub fn clear_buffer_hint(&mut self) -> &mut Self {
        self.flags.remove(WriteFlags::BUFFER_HINT);
        self
    }

    pub fn buffer_hint(&self) -> bool {
        self.flags.contains(WriteFlags::BUFFER_HINT)
    }

    /// Corking is the same bit as the buffer hint.
    pub fn set_corked(&mut self) -> &mut Self {
        self.set_buffer_hint()
    }

    pub fn clear_corked(&mut self) -> &mut Self {
        self.clear_buffer_hint()
    }

    pub fn is_corked(&self) -> bool {
        self.buffer_hint()
    }

    /// Marks this write as the last message of the stream.
    pub fn set_last_message(&mut self) -> &mut Self {
        self.last_message = true;
        self
    }

    pub fn clear_last_message(&mut self) -> &mut Self {
        self.last_message = false;
        self
    }

    pub fn is_last_message(&self) -> bool {
        self.last_message
    }

    /// Requires the bytes to reach the socket before the write completes.
    pub fn set_write_through(&mut self) -> &mut Self {
        self.flags.insert(WriteFlags::THROUGH);
        self
    }

    pub fn clear_write_through(&mut self) -> &mut Self {
        self.flags.remove(WriteFlags::THROUGH);
        self
    }

    pub fn is_write_through(&self) -> bool {
        self.flags.contains(WriteFlags::THROUGH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corked_aliases_buffer_hint() {
        let mut options = WriteOptions::new();
        options.set_corked();
        assert!(options.buffer_hint());
        options.clear_buffer_hint();
        assert!(!options.is_corked());
    }

    #[test]
    fn last_message_is_not_a_wire_flag() {
        let mut options = WriteOptions::new();
        options.set_last_message().set_no_compression().set_write_through();
        assert_eq!(options.flags(), WriteFlags::NO_COMPRESS | WriteFlags::THROUGH);
        options.clear();
        assert!(options.flags().is_empty());
        assert!(options.is_last_message());
    }

    #[test]
    fn compression_level_parses_lowercase() {
        let level: CompressionLevel = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(level, CompressionLevel::Medium);
    }
}
