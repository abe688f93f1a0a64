//! RESTful transcoding.
//!
//! A [`Router`] maps plain HTTP requests onto RPC handlers through
//! [`Binding`]s built from HTTP rules. Per request it:
//!
//! 1. matches the method and path against the bindings in registration order
//! 2. runs the header matcher, which fills in the call's [`Msg`]
//! 3. negotiates serializer and compressor from `Content-Type`,
//!    `Content-Encoding`, `Accept` and `Accept-Encoding`
//! 4. decompresses and decodes the body into the request (or into the body
//!    field)
//! 5. populates path captures, then query parameters not already claimed by
//!    the path or body
//! 6. runs the filter chain and handler under the effective deadline
//! 7. encodes and compresses the response
//!
//! Every failure ends in the error handler, so each request gets a response.
//!
//! ```rust,no_run
//! use http::Method;
//! use trpc_axum::filter::handler_fn;
//! use trpc_axum::restful::{Binding, RouterBuilder};
//! # fn descriptors() -> (prost_reflect::MessageDescriptor, prost_reflect::MessageDescriptor) { unimplemented!() }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (input, output) = descriptors();
//! let get_book = Binding::new(
//!     "/library.Library/GetBook",
//!     Method::GET,
//!     "/v1/{name=shelves/*/books/*}",
//!     input,
//!     output,
//!     handler_fn(|_ctx, req| Box::pin(async move { Ok(req) })),
//! )?;
//! let app = RouterBuilder::new("trpc.library.server.Library")
//!     .binding(get_book)
//!     .build()
//!     .into_axum();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod binding;
mod errors;
mod router;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use http::{Response, StatusCode, request::Parts};
use trpc_axum_core::{Context, Error, Msg};

pub use binding::{Binding, BindingError, BodyRule};
pub use errors::{MARSHAL_ERROR_FALLBACK, default_error_handler, http_status};
pub use router::{Router, RouterBuilder};

use crate::timeout::parse_timeout;

/// Header naming the calling service.
pub const TRPC_CALLER_HEADER: &str = "trpc-caller";

/// Establishes the call's [`Msg`] from the request head before any decoding.
///
/// Arguments are the request head, the message, the router's service name
/// and the matched RPC name. An error rejects the request as a decode
/// failure.
pub type HeaderMatcher = Arc<dyn Fn(&Parts, &mut Msg, &str, &str) -> Result<(), Error> + Send + Sync>;

/// Turns any error into the HTTP response sent to the client.
pub type ErrorHandler = Arc<dyn Fn(&Parts, &Error) -> Response<axum::body::Body> + Send + Sync>;

/// Response status chosen by a handler, carried in the message's common meta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseStatus(pub StatusCode);

/// Set the HTTP status of a successful response (default `200 OK`).
pub fn set_status_code(ctx: &mut Context, status: StatusCode) {
    ctx.msg_mut().common_meta_mut().insert(ResponseStatus(status));
}

/// The default header matcher.
///
/// Sets the callee service and RPC names, reads `trpc-caller` and
/// `trpc-timeout`, and records the peer address when axum's
/// `ConnectInfo<SocketAddr>` is present.
pub fn default_header_matcher(parts: &Parts, msg: &mut Msg, service: &str, rpc_name: &str) -> Result<(), Error> {
    if !service.is_empty() {
        msg.set_callee_service_name(service);
    }
    msg.set_server_rpc_name(rpc_name);

    if let Some(caller) = parts.headers.get(TRPC_CALLER_HEADER) {
        let caller = caller
            .to_str()
            .map_err(|_| Error::decode_fail("invalid trpc-caller header"))?;
        msg.set_caller_service_name(caller);
    }
    if let Some(timeout) = parse_timeout(&parts.headers) {
        msg.set_request_timeout(timeout);
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        msg.set_remote_addr(*addr);
    }
    Ok(())
}
