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

//! Serialization capabilities used to move messages in and out of
//! [`ByteBuffer`]s.

use std::any::Any;

use bytes::Bytes;

use crate::byte_buffer::ByteBuffer;
use crate::{Status, StatusCode};

/// Reports who owns the memory a serializer wrote into a [`ByteBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwnership {
    /// The buffer exclusively owns freshly produced memory.
    Owned,
    /// The buffer aliases memory that is still shared with the message.
    Borrowed,
}

/// Serializes a message into the wire representation.
pub trait Serialize {
    /// Writes the serialized form of `self` into `out`.
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status>;
}

/// Deserializes a message from the wire representation.
pub trait Deserialize {
    /// Replaces the contents of `self` with the message held in `buf`.
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status>;
}

impl Serialize for Bytes {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
        *out = ByteBuffer::from_bytes(self.clone());
        Ok(BufferOwnership::Borrowed)
    }
}

impl Serialize for ByteBuffer {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
        *out = self.clone();
        Ok(BufferOwnership::Borrowed)
    }
}

impl Serialize for Vec<u8> {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
        *out = ByteBuffer::from_bytes(Bytes::copy_from_slice(self));
        Ok(BufferOwnership::Owned)
    }
}

impl Serialize for String {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
        *out = ByteBuffer::from_bytes(Bytes::copy_from_slice(self.as_bytes()));
        Ok(BufferOwnership::Owned)
    }
}

impl Deserialize for Bytes {
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
        *self = buf.to_bytes();
        Ok(())
    }
}

impl Deserialize for ByteBuffer {
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
        *self = buf;
        Ok(())
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
        *self = buf.to_bytes().to_vec();
        Ok(())
    }
}

impl Deserialize for String {
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
        *self = String::from_utf8(buf.to_bytes().to_vec()).map_err(|e| {
            Status::new(
                StatusCode::Internal,
                format!("failed to decode message as UTF-8: {e}"),
            )
        })?;
        Ok(())
    }
}

/// A message whose serializer travels with it, so that serialization can be
/// deferred until the batch is rendered.  Interceptors see the original value
/// through [`as_any`](ErasedMessage::as_any).
pub(crate) trait ErasedMessage: Send + Sync {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status>;

    fn as_any(&self) -> &dyn Any;
}

impl<M: Serialize + Any + Send + Sync> ErasedMessage for M {
    fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
        Serialize::serialize(self, out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Serializes `message` into `out`, taking a private copy of the result
/// unless the serializer already produced exclusively owned memory.
pub(crate) fn serialize_owned(
    message: &(impl ErasedMessage + ?Sized),
    out: &mut ByteBuffer,
) -> Result<(), Status> {
    let ownership = message.serialize(out)?;
    if ownership == BufferOwnership::Borrowed {
        out.duplicate();
    }
    Ok(())
}

/// A type-erased receive target: deserializes a wire buffer into a message
/// whose concrete type is hidden behind this trait.
pub trait DeserializeFunc: Send {
    /// Deserializes `buf` into the hidden target.
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status>;

    /// Returns the target as `Any` so that it can be downcast.
    fn message_mut(&mut self) -> &mut dyn Any;

    /// Consumes self, returning the target.
    fn into_message(self: Box<Self>) -> Box<dyn Any + Send>;
}

pub(crate) struct DeserializeFuncType<R> {
    message: R,
}

impl<R> DeserializeFuncType<R> {
    pub(crate) fn new(message: R) -> Self {
        Self { message }
    }
}

impl<R: Deserialize + Any + Send> DeserializeFunc for DeserializeFuncType<R> {
    fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
        self.message.deserialize(buf)
    }

    fn message_mut(&mut self) -> &mut dyn Any {
        &mut self.message
    }

    fn into_message(self: Box<Self>) -> Box<dyn Any + Send> {
        Box::new(self.message)
    }
}

#[cfg(feature = "prost")]
pub use self::prost_codec::ProstMessage;

#[cfg(feature = "prost")]
mod prost_codec {
    use super::*;

    /// Adapts a prost message to [`Serialize`] and [`Deserialize`].
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ProstMessage<M>(pub M);

    impl<M: prost::Message> Serialize for ProstMessage<M> {
        fn serialize(&self, out: &mut ByteBuffer) -> Result<BufferOwnership, Status> {
            *out = ByteBuffer::from_bytes(Bytes::from(self.0.encode_to_vec()));
            Ok(BufferOwnership::Owned)
        }
    }

    impl<M: prost::Message + Default> Deserialize for ProstMessage<M> {
        fn deserialize(&mut self, buf: ByteBuffer) -> Result<(), Status> {
            self.0 = M::decode(buf.to_bytes()).map_err(|e| {
                Status::new(StatusCode::Internal, format!("failed to decode message: {e}"))
            })?;
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_serialization_is_copied() {
        let message = Bytes::from(vec![9u8; 16]);
        let mut out = ByteBuffer::new();
        serialize_owned(&message, &mut out).unwrap();
        assert_ne!(out.slices()[0].as_ptr(), message.as_ptr());
        assert_eq!(out.to_bytes(), message);
    }

    #[test]
    fn owned_serialization_is_kept() {
        let message = String::from("hi");
        let mut out = ByteBuffer::new();
        assert_eq!(
            Serialize::serialize(&message, &mut out).unwrap(),
            BufferOwnership::Owned
        );
    }

    #[test]
    fn invalid_utf8_fails_string_deserialization() {
        let mut target = String::new();
        let err = target
            .deserialize(ByteBuffer::from_bytes(Bytes::from_static(&[0xff])))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::Internal);
    }

    #[test]
    fn erased_target_downcasts() {
        let mut func: Box<dyn DeserializeFunc> = Box::new(DeserializeFuncType::new(Vec::<u8>::new()));
        func.deserialize(ByteBuffer::from_bytes(Bytes::from_static(b"xyz")))
            .unwrap();
        assert_eq!(
            func.message_mut().downcast_mut::<Vec<u8>>().unwrap(),
            &b"xyz".to_vec()
        );
        let message = func.into_message().downcast::<Vec<u8>>().unwrap();
        assert_eq!(*message, b"xyz".to_vec());
    }
}
