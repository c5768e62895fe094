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

use std::fmt;

use bytes::Bytes;

mod status_code;

pub use status_code::StatusCode;

/// Represents a gRPC status.
///
/// A status carries a code, a human readable message, and optional binary
/// error details, which travel in the `grpc-status-details-bin` trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
    details: Bytes,
}

impl Status {
    /// Create a new `Status` with the given code and message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
            details: Bytes::new(),
        }
    }

    /// Create a new `Status` with the given code, message and binary error
    /// details.
    pub fn with_details(code: StatusCode, message: impl Into<String>, details: Bytes) -> Self {
        Status {
            code,
            message: message.into(),
            details,
        }
    }

    /// Returns an OK status with an empty message.
    pub fn ok() -> Self {
        Status::new(StatusCode::Ok, "")
    }

    /// Get the `StatusCode` of this `Status`.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Get the message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the binary error details of this `Status`.  Empty if none were
    /// provided.
    pub fn details(&self) -> &Bytes {
        &self.details
    }

    /// Returns true if the code is `StatusCode::Ok`.
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {}, message: {:?}", self.code, self.message)?;
        if !self.details.is_empty() {
            write!(f, ", details: {} bytes", self.details.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_new() {
        let status = Status::new(StatusCode::PermissionDenied, "nope");
        assert_eq!(status.code(), StatusCode::PermissionDenied);
        assert_eq!(status.message(), "nope");
        assert!(status.details().is_empty());
        assert!(!status.is_ok());
    }

    #[test]
    fn test_status_default_is_ok() {
        let status = Status::default();
        assert!(status.is_ok());
        assert_eq!(status.message(), "");
    }

    #[test]
    fn test_status_display() {
        let status = Status::with_details(
            StatusCode::Internal,
            "boom",
            Bytes::from_static(b"\x08\x01"),
        );
        let shown = status.to_string();
        assert!(shown.contains("Internal"));
        assert!(shown.contains("boom"));
        assert!(shown.contains("2 bytes"));
    }
}
