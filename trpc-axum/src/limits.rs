//! Message size limits for transcoded requests and responses.
//!
//! - **Receive limit**: bounds the request body, checked while the body is
//!   collected and again after decompression.
//! - **Send limit**: bounds the encoded (and compressed) response body.

use trpc_axum_core::{Error, RetCode};

/// Default receive limit (4 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for message size limits.
///
/// ```rust
/// use trpc_axum::MessageLimits;
///
/// let limits = MessageLimits::default()
///     .receive_max_bytes(16 * 1024 * 1024)
///     .send_max_bytes(8 * 1024 * 1024);
/// assert_eq!(limits.get_send_max_bytes(), Some(8 * 1024 * 1024));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    receive_max_bytes: Option<usize>,
    send_max_bytes: Option<usize>,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            receive_max_bytes: Some(DEFAULT_MAX_MESSAGE_SIZE),
            send_max_bytes: None,
        }
    }
}

impl MessageLimits {
    /// Limits with no restrictions in either direction.
    pub fn unlimited() -> Self {
        Self {
            receive_max_bytes: None,
            send_max_bytes: None,
        }
    }

    /// Set the maximum request body size.
    pub fn receive_max_bytes(mut self, max: usize) -> Self {
        self.receive_max_bytes = Some(max);
        self
    }

    /// Set the maximum response body size.
    pub fn send_max_bytes(mut self, max: usize) -> Self {
        self.send_max_bytes = Some(max);
        self
    }

    pub fn get_receive_max_bytes(&self) -> Option<usize> {
        self.receive_max_bytes
    }

    pub fn get_send_max_bytes(&self) -> Option<usize> {
        self.send_max_bytes
    }

    /// The receive limit for `axum::body::to_bytes`; `usize::MAX` if unlimited.
    pub fn receive_max_bytes_or_max(&self) -> usize {
        self.receive_max_bytes.unwrap_or(usize::MAX)
    }

    /// Check a request body size against the receive limit.
    pub fn check_receive(&self, size: usize) -> Result<(), Error> {
        check(self.receive_max_bytes, size, RetCode::ServerDecodeFail)
    }

    /// Check a response body size against the send limit.
    pub fn check_send(&self, size: usize) -> Result<(), Error> {
        check(self.send_max_bytes, size, RetCode::ServerEncodeFail)
    }
}

fn check(limit: Option<usize>, size: usize, code: RetCode) -> Result<(), Error> {
    if let Some(max) = limit
        && size > max
    {
        return Err(Error::framework(
            code,
            format!("message size {size} bytes exceeds maximum allowed size of {max} bytes"),
        ));
    }
    Ok(())
}
