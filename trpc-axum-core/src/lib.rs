//! Core RPC types for trpc-axum.
//!
//! This crate provides the role-independent pieces shared by servers and
//! clients (the `trpc-axum` crate builds the HTTP transcoding layer on top).
//!
//! ## Modules
//!
//! - [`error`]: Return codes and error types
//! - [`msg`]: The per-call message record
//! - [`context`]: Per-call context and the message pool
//! - [`pool`]: Free-list object pool
//! - [`codec`]: Frame codecs and the codec registry
//! - [`envelope`]: Length-prefixed envelope framing
//! - [`compression`]: Compressors and the compressor registry
//! - [`serialization`]: Serializers and the serializer registry
//! - [`pipeline`]: Request/response stage composition

pub mod codec;
pub mod compression;
pub mod context;
pub mod envelope;
pub mod error;
pub mod msg;
pub mod pipeline;
pub mod pool;
pub mod serialization;

pub use codec::*;
pub use compression::*;
pub use context::*;
pub use envelope::*;
pub use error::*;
pub use msg::*;
pub use pipeline::*;
pub use pool::*;
pub use serialization::*;
