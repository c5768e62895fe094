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

use std::error::Error;

use serde::Deserialize;

use crate::write_options::CompressionLevel;

/// Per-channel settings applied to every batch of the calls created on it,
/// usually provided as a JSON object.
///
/// ```
/// # use grpc_call::CallConfig;
/// let config = CallConfig::from_json(r#"{
///     "maxSendMessageSize": 1024,
///     "defaultCompressionLevel": "low"
/// }"#).unwrap();
/// assert_eq!(config.max_send_message_size, Some(1024));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct CallConfig {
    /// Messages that serialize to more bytes than this are not sent, and the
    /// batch carrying them fails.
    #[serde(default)]
    pub max_send_message_size: Option<usize>,
    /// Received messages larger than this fail to deserialize.
    #[serde(default)]
    pub max_receive_message_size: Option<usize>,
    /// Compression level used for calls that do not pick one themselves.
    #[serde(default)]
    pub default_compression_level: Option<CompressionLevel>,
}

impl CallConfig {
    /// Returns a config with no limits and no default compression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON config.
    pub fn from_json(json: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        serde_json::from_str(json).map_err(|e| format!("failed to parse JSON config: {e}").into())
    }

    pub fn with_max_send_message_size(mut self, limit: usize) -> Self {
        self.max_send_message_size = Some(limit);
        self
    }

    pub fn with_max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = Some(limit);
        self
    }

    pub fn with_default_compression_level(mut self, level: CompressionLevel) -> Self {
        self.default_compression_level = Some(level);
        self
    }
}
