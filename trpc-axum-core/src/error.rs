//! Framework return codes and error types.
//!
//! This module provides the core error types used across the RPC core:
//! - [`RetCode`]: Framework return codes with stable wire values
//! - [`Error`]: The error value carried through filters, handlers and `Msg` error slots
//! - [`CodecError`], [`CompressionError`], [`SerializationError`]: Registry and stage errors
//! - [`ErrorResponseBody`]: JSON shape of an error sent to HTTP clients

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;

/// Framework return codes.
///
/// The numeric values are part of the wire contract and must not change.
/// Codes below 1000 that are not listed here are reserved for the framework;
/// business errors use arbitrary codes through [`Error::business`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RetCode {
    Ok = 0,
    ServerDecodeFail = 1,
    ServerEncodeFail = 2,
    ServerNoService = 11,
    ServerNoFunc = 12,
    ServerTimeout = 21,
    ServerOverload = 22,
    ServerThrottled = 23,
    ServerFullLinkTimeout = 24,
    ServerSystemErr = 31,
    ServerAuthFail = 41,
    ServerValidateFail = 51,
    ClientInvokeTimeout = 101,
    ClientFullLinkTimeout = 102,
    ClientConnectFail = 111,
    ClientEncodeFail = 121,
    ClientDecodeFail = 122,
    ClientThrottled = 123,
    ClientOverload = 124,
    ClientRouteErr = 131,
    ClientNetErr = 141,
    ClientValidateFail = 151,
    ClientCanceled = 161,
    ClientReadFrameErr = 171,
    Unknown = 999,
}

impl RetCode {
    /// Get the integer wire value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a framework code by its integer value.
    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => Self::Ok,
            1 => Self::ServerDecodeFail,
            2 => Self::ServerEncodeFail,
            11 => Self::ServerNoService,
            12 => Self::ServerNoFunc,
            21 => Self::ServerTimeout,
            22 => Self::ServerOverload,
            23 => Self::ServerThrottled,
            24 => Self::ServerFullLinkTimeout,
            31 => Self::ServerSystemErr,
            41 => Self::ServerAuthFail,
            51 => Self::ServerValidateFail,
            101 => Self::ClientInvokeTimeout,
            102 => Self::ClientFullLinkTimeout,
            111 => Self::ClientConnectFail,
            121 => Self::ClientEncodeFail,
            122 => Self::ClientDecodeFail,
            123 => Self::ClientThrottled,
            124 => Self::ClientOverload,
            131 => Self::ClientRouteErr,
            141 => Self::ClientNetErr,
            151 => Self::ClientValidateFail,
            161 => Self::ClientCanceled,
            171 => Self::ClientReadFrameErr,
            999 => Self::Unknown,
            _ => return None,
        };
        Some(code)
    }

    /// Get the symbolic name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ServerDecodeFail => "server_decode_fail",
            Self::ServerEncodeFail => "server_encode_fail",
            Self::ServerNoService => "server_no_service",
            Self::ServerNoFunc => "server_no_func",
            Self::ServerTimeout => "server_timeout",
            Self::ServerOverload => "server_overload",
            Self::ServerThrottled => "server_throttled",
            Self::ServerFullLinkTimeout => "server_full_link_timeout",
            Self::ServerSystemErr => "server_system_err",
            Self::ServerAuthFail => "server_auth_fail",
            Self::ServerValidateFail => "server_validate_fail",
            Self::ClientInvokeTimeout => "client_invoke_timeout",
            Self::ClientFullLinkTimeout => "client_full_link_timeout",
            Self::ClientConnectFail => "client_connect_fail",
            Self::ClientEncodeFail => "client_encode_fail",
            Self::ClientDecodeFail => "client_decode_fail",
            Self::ClientThrottled => "client_throttled",
            Self::ClientOverload => "client_overload",
            Self::ClientRouteErr => "client_route_err",
            Self::ClientNetErr => "client_net_err",
            Self::ClientValidateFail => "client_validate_fail",
            Self::ClientCanceled => "client_canceled",
            Self::ClientReadFrameErr => "client_read_frame_err",
            Self::Unknown => "unknown",
        }
    }
}

/// Error returned when parsing a [`RetCode`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseRetCodeError(());

impl fmt::Display for ParseRetCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown return code")
    }
}

impl std::error::Error for ParseRetCodeError {}

impl FromStr for RetCode {
    type Err = ParseRetCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "server_decode_fail" => Ok(Self::ServerDecodeFail),
            "server_encode_fail" => Ok(Self::ServerEncodeFail),
            "server_no_service" => Ok(Self::ServerNoService),
            "server_no_func" => Ok(Self::ServerNoFunc),
            "server_timeout" => Ok(Self::ServerTimeout),
            "server_overload" => Ok(Self::ServerOverload),
            "server_throttled" => Ok(Self::ServerThrottled),
            "server_full_link_timeout" => Ok(Self::ServerFullLinkTimeout),
            "server_system_err" => Ok(Self::ServerSystemErr),
            "server_auth_fail" => Ok(Self::ServerAuthFail),
            "server_validate_fail" => Ok(Self::ServerValidateFail),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseRetCodeError(())),
        }
    }
}

/// Whether an error was raised by the framework or by business code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised by the framework itself (codecs, routing, timeouts).
    Framework,
    /// Returned by a business handler.
    Business,
}

/// The error value used throughout the RPC core.
///
/// Captures a return code, an optional message, and optionally an explicit
/// HTTP status that overrides the code-to-status mapping applied by HTTP
/// transports.
///
/// # Example
///
/// ```
/// use trpc_axum_core::{Error, RetCode};
///
/// let err = Error::framework(RetCode::ServerNoFunc, "no route");
/// assert_eq!(err.code(), 12);
/// assert_eq!(err.ret_code(), Some(RetCode::ServerNoFunc));
///
/// let err = Error::business(10001, "balance too low");
/// assert!(err.is_business());
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    code: i32,
    message: Option<String>,
    http_status: Option<StatusCode>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a framework error.
    pub fn framework<S: Into<String>>(code: RetCode, message: S) -> Self {
        Self {
            kind: ErrorKind::Framework,
            code: code.as_i32(),
            message: Some(message.into()),
            http_status: None,
            cause: None,
        }
    }

    /// Create a business error with an arbitrary code.
    pub fn business<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            kind: ErrorKind::Business,
            code,
            message: Some(message.into()),
            http_status: None,
            cause: None,
        }
    }

    /// Create a framework error with just a code.
    pub fn from_code(code: RetCode) -> Self {
        Self {
            kind: ErrorKind::Framework,
            code: code.as_i32(),
            message: None,
            http_status: None,
            cause: None,
        }
    }

    /// Create a server decode failure.
    pub fn decode_fail<S: Into<String>>(message: S) -> Self {
        Self::framework(RetCode::ServerDecodeFail, message)
    }

    /// Create a server encode failure.
    pub fn encode_fail<S: Into<String>>(message: S) -> Self {
        Self::framework(RetCode::ServerEncodeFail, message)
    }

    /// Create a "no function" error for unroutable calls.
    pub fn no_func<S: Into<String>>(message: S) -> Self {
        Self::framework(RetCode::ServerNoFunc, message)
    }

    /// Create a server timeout error.
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::framework(RetCode::ServerTimeout, message)
    }

    /// Create a system error.
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::framework(RetCode::ServerSystemErr, message)
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true for errors returned by business code.
    pub fn is_business(&self) -> bool {
        self.kind == ErrorKind::Business
    }

    /// Get the integer return code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Get the framework return code, if this is a framework error with a known code.
    pub fn ret_code(&self) -> Option<RetCode> {
        match self.kind {
            ErrorKind::Framework => RetCode::from_i32(self.code),
            ErrorKind::Business => None,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the explicit HTTP status override, if any.
    pub fn http_status(&self) -> Option<StatusCode> {
        self.http_status
    }

    /// Attach an explicit HTTP status.
    ///
    /// HTTP transports use it instead of the code-to-status table.
    pub fn with_http_status(mut self, status: StatusCode) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// JSON body sent to HTTP clients.
    pub fn response_body(&self) -> ErrorResponseBody<'_> {
        ErrorResponseBody {
            code: self.code,
            message: self.message.as_deref().unwrap_or_default(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Framework => "framework",
            ErrorKind::Business => "business",
        };
        write!(f, "type:{kind}, code:{}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ", msg:{msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// JSON body structure for error responses.
#[derive(Serialize)]
pub struct ErrorResponseBody<'a> {
    pub code: i32,
    pub message: &'a str,
}

/// Frame codec errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// No codec registered under the given protocol name.
    #[error("codec not registered: {0}")]
    NotRegistered(String),

    /// Incomplete frame header.
    #[error("incomplete frame header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// Declared payload length does not match the frame.
    #[error("frame length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Invalid frame flags.
    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),
}

/// Compressor registry and stage errors.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// No compressor registered for the type code.
    #[error("compressor not registered: {0}")]
    NotRegistered(i32),

    /// Compression failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    /// Decompression failed.
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Serializer registry and stage errors.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// No serializer registered for the type code.
    #[error("serializer not registered: {0}")]
    NotRegistered(i32),

    /// The serializer cannot handle this kind of body.
    #[error("{serializer} serializer does not support {body} bodies")]
    UnsupportedBody {
        serializer: &'static str,
        body: &'static str,
    },

    /// Marshal failed.
    #[error("marshal failed: {0}")]
    Marshal(String),

    /// Unmarshal failed.
    #[error("unmarshal failed: {0}")]
    Unmarshal(String),
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::decode_fail(err.to_string()).with_cause(err)
    }
}
