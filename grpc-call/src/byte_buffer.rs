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

use bytes::{Bytes, BytesMut};

/// A serialized message as a sequence of byte slices.
///
/// A buffer is either invalid (no message) or valid; a valid buffer may still
/// hold zero bytes, which is how an empty message is represented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    slices: Option<Vec<Bytes>>,
}

impl ByteBuffer {
    /// Returns an invalid buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a valid buffer holding `bytes`.
    pub fn from_bytes(bytes: Bytes) -> Self {
        ByteBuffer {
            slices: Some(vec![bytes]),
        }
    }

    /// Returns a valid buffer holding `slices` in order.
    pub fn from_slices(slices: impl IntoIterator<Item = Bytes>) -> Self {
        ByteBuffer {
            slices: Some(slices.into_iter().collect()),
        }
    }

    /// Returns true if the buffer holds a message.
    pub fn is_valid(&self) -> bool {
        self.slices.is_some()
    }

    /// Returns the total number of bytes held.
    pub fn len(&self) -> usize {
        self.slices().iter().map(Bytes::len).sum()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the slices making up the message.
    pub fn slices(&self) -> &[Bytes] {
        self.slices.as_deref().unwrap_or_default()
    }

    /// Drops the contents and makes the buffer invalid.
    pub fn clear(&mut self) {
        self.slices = None;
    }

    /// Takes the contents out, leaving the buffer invalid.
    pub fn release(&mut self) -> ByteBuffer {
        ByteBuffer {
            slices: self.slices.take(),
        }
    }

    /// Replaces every slice with a freshly allocated copy, so that the buffer
    /// no longer aliases memory owned by someone else.
    pub fn duplicate(&mut self) {
        if let Some(slices) = self.slices.as_mut() {
            for slice in slices.iter_mut() {
                *slice = Bytes::copy_from_slice(slice);
            }
        }
    }

    /// Returns the message as one contiguous chunk.  A single-slice buffer is
    /// returned without copying.
    pub fn to_bytes(&self) -> Bytes {
        match self.slices() {
            [] => Bytes::new(),
            [single] => single.clone(),
            many => {
                let mut out = BytesMut::with_capacity(self.len());
                for slice in many {
                    out.extend_from_slice(slice);
                }
                out.freeze()
            }
        }
    }
}

impl From<Bytes> for ByteBuffer {
    fn from(bytes: Bytes) -> Self {
        ByteBuffer::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_is_still_valid() {
        let buf = ByteBuffer::from_bytes(Bytes::new());
        assert!(buf.is_valid());
        assert!(buf.is_empty());
        assert!(!ByteBuffer::new().is_valid());
    }

    #[test]
    fn release_leaves_buffer_invalid() {
        let mut buf = ByteBuffer::from_slices([Bytes::from_static(b"ab"), Bytes::from_static(b"c")]);
        let taken = buf.release();
        assert!(!buf.is_valid());
        assert_eq!(taken.to_bytes(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn duplicate_stops_aliasing() {
        let source = Bytes::from(vec![1u8, 2, 3]);
        let mut buf = ByteBuffer::from_bytes(source.clone());
        assert_eq!(buf.slices()[0].as_ptr(), source.as_ptr());
        buf.duplicate();
        assert_ne!(buf.slices()[0].as_ptr(), source.as_ptr());
        assert_eq!(buf.to_bytes(), source);
    }
}
