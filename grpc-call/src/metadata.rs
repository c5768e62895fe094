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

//! Metadata maps and the wire arrays rendered from them.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::byte_str::ByteStr;

/// The reserved metadata key carrying a status's binary error details.
pub const BINARY_ERROR_DETAILS_KEY: &str = "grpc-status-details-bin";

/// An ordered multi-map from metadata keys to values.
///
/// Keys iterate in sorted order; values stored under the same key keep their
/// insertion order.  Duplicate keys are permitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: BTreeMap<ByteStr, Vec<Bytes>>,
    len: usize,
}

impl MetadataMap {
    /// Returns an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of key/value pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `value` under `key`, keeping any values already present.
    pub fn insert(&mut self, key: impl Into<ByteStr>, value: impl Into<Bytes>) {
        self.entries.entry(key.into()).or_default().push(value.into());
        self.len += 1;
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.entries.get(key).and_then(|values| values.first())
    }

    /// Returns every value stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &Bytes> {
        self.entries.get(key).into_iter().flatten()
    }

    /// Returns true if at least one value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes every value stored under `key` and returns them.
    pub fn remove(&mut self, key: &str) -> Vec<Bytes> {
        let removed = self.entries.remove(key).unwrap_or_default();
        self.len -= removed.len();
        removed
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }

    /// Iterates over all key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ByteStr, &Bytes)> {
        self.entries
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key, value)))
    }

    /// Returns the binary error details carried in this map, if any.
    pub fn binary_error_details(&self) -> Option<&Bytes> {
        self.get(BINARY_ERROR_DETAILS_KEY)
    }
}

impl<K: Into<ByteStr>, V: Into<Bytes>> FromIterator<(K, V)> for MetadataMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = MetadataMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<ByteStr>, V: Into<Bytes>> Extend<(K, V)> for MetadataMap {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

/// One key/value pair of a [`MetadataArray`].
///
/// Both halves reference the storage of the map they were rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    key: ByteStr,
    value: Bytes,
}

impl MetadataEntry {
    pub fn key(&self) -> &ByteStr {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

/// A contiguous array of metadata entries ready for the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataArray {
    entries: Box<[MetadataEntry]>,
}

impl MetadataArray {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetadataEntry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[MetadataEntry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a MetadataArray {
    type Item = &'a MetadataEntry;
    type IntoIter = std::slice::Iter<'a, MetadataEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Renders `metadata` into a wire array, appending a
/// [`BINARY_ERROR_DETAILS_KEY`] entry when `optional_error_details` is not
/// empty.
///
/// The entries share storage with `metadata`; nothing is copied.  An empty map
/// with no error details yields an array with no backing allocation.
///
/// The array is a view of the map at the time of the call.  Callers must keep
/// the map unchanged until the batch that carries the array has finished:
/// edits made afterwards are never seen by the transport.
pub fn fill_metadata_array(metadata: &MetadataMap, optional_error_details: &Bytes) -> MetadataArray {
    let count = metadata.len() + usize::from(!optional_error_details.is_empty());
    if count == 0 {
        return MetadataArray::default();
    }
    let mut entries = Vec::with_capacity(count);
    entries.extend(metadata.iter().map(|(key, value)| MetadataEntry {
        key: key.clone(),
        value: value.clone(),
    }));
    if !optional_error_details.is_empty() {
        entries.push(MetadataEntry {
            key: ByteStr::from_static(BINARY_ERROR_DETAILS_KEY),
            value: optional_error_details.clone(),
        });
    }
    MetadataArray {
        entries: entries.into_boxed_slice(),
    }
}
