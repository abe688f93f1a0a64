//! # trpc-axum
//!
//! RESTful transcoding for tRPC services on [Axum](https://github.com/tokio-rs/axum).
//!
//! Plain HTTP requests are mapped onto RPC methods through HTTP rules
//! (`GET /v1/{name=shelves/*/books/*}`), decoded into protobuf messages
//! described at runtime by [`prost_reflect`], run through a server filter
//! chain and handler, and encoded back as JSON, protobuf or form data.
//!
//! ## Features
//!
//! - **HTTP rules:** [`httprule`] parses and matches `google.api.http` style
//!   URL templates, including `*`, `**`, nested variables and `:verb`.
//! - **Transcoding:** path captures, query parameters and the request body
//!   all populate the request message; a [`dat::DoubleArrayTrie`] keeps query
//!   parameters from overwriting fields bound by the path or body.
//! - **Negotiation:** `Content-Type`, `Content-Encoding`, `Accept` and
//!   `Accept-Encoding` pick serializers and compressors from the registries in
//!   [`trpc_axum_core`].
//! - **Axum-native:** a [`restful::Router`] is a `tower::Service` that mounts
//!   into any `axum::Router`.
//!
//! See the [`restful`] module for a complete example.

pub mod dat;
pub mod filter;
pub mod form;
pub mod httprule;
pub mod limits;
pub mod populate;
pub mod restful;
pub mod timeout;

#[cfg(test)]
mod test_util;

pub use limits::MessageLimits;
pub use restful::{Binding, Router, RouterBuilder};

// Re-export several crates
pub use prost_reflect;
pub use trpc_axum_core;

pub mod prelude {
    //! A prelude for `trpc-axum` providing the most common types.
    pub use crate::filter::{Filter, FilterChain, Handler, HandlerResult, Next, filter_fn, handler_fn};
    pub use crate::limits::MessageLimits;
    pub use crate::restful::{Binding, BodyRule, Router, RouterBuilder, set_status_code};
    pub use trpc_axum_core::{Context, Error, Msg, RetCode};
}
