//! Server filter chain.
//!
//! Filters wrap the business handler in registration order. Each filter gets
//! the call [`Context`], the decoded request and a [`Next`] that runs the
//! rest of the chain; it may inspect or mutate either, short-circuit with an
//! error, or post-process the response.
//!
//! ```rust
//! use trpc_axum::filter::{filter_fn, handler_fn, FilterChain};
//!
//! let chain = FilterChain::new().with(filter_fn(|ctx, req, next| {
//!     Box::pin(async move {
//!         ctx.msg_mut().set_caller_method("logged");
//!         next.run(ctx, req).await
//!     })
//! }));
//! let handler = handler_fn(|_ctx, req| Box::pin(async move { Ok(req) }));
//! # let _ = (chain, handler);
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use prost_reflect::DynamicMessage;
use trpc_axum_core::{Context, Error};

/// What a handler or filter produces.
pub type HandlerResult = Result<DynamicMessage, Error>;

/// The business handler at the end of a chain.
pub type Handler =
    Arc<dyn for<'a> Fn(&'a mut Context, DynamicMessage) -> BoxFuture<'a, HandlerResult> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context, DynamicMessage) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A server-side interceptor.
pub trait Filter: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, req: DynamicMessage, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// The remainder of a chain, handed to each filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    handler: &'a Handler,
}

impl<'a> Next<'a> {
    /// Run the remaining filters and then the handler.
    pub fn run(self, ctx: &'a mut Context, req: DynamicMessage) -> BoxFuture<'a, HandlerResult> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.call(
                ctx,
                req,
                Next {
                    filters: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(ctx, req),
        }
    }
}

struct FnFilter<F>(F);

impl<F> Filter for FnFilter<F>
where
    F: for<'a> Fn(&'a mut Context, DynamicMessage, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, req: DynamicMessage, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx, req, next)
    }
}

/// Wrap a closure as a filter.
pub fn filter_fn<F>(f: F) -> Arc<dyn Filter>
where
    F: for<'a> Fn(&'a mut Context, DynamicMessage, Next<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}

/// An ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter; it runs after the ones already added.
    pub fn with(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the chain around `handler`.
    pub fn handle<'a>(&'a self, ctx: &'a mut Context, req: DynamicMessage, handler: &'a Handler) -> BoxFuture<'a, HandlerResult> {
        Next {
            filters: &self.filters,
            handler,
        }
        .run(ctx, req)
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::descriptor;
    use prost_reflect::Value;
    use trpc_axum_core::RetCode;

    fn trace_filter(tag: &'static str) -> Arc<dyn Filter> {
        filter_fn(move |ctx, req, next| {
            Box::pin(async move {
                let seen = format!("{}{tag}>", ctx.msg().caller_method());
                ctx.msg_mut().set_caller_method(seen);
                let mut rsp = next.run(ctx, req).await?;
                let view = rsp
                    .get_field_by_name("view")
                    .map(|v| v.as_str().unwrap_or_default().to_owned())
                    .unwrap_or_default();
                rsp.set_field_by_name("view", Value::String(format!("{view}<{tag}")));
                Ok(rsp)
            })
        })
    }

    fn echo() -> Handler {
        handler_fn(|ctx, mut req| {
            Box::pin(async move {
                let seen = format!("{}handler", ctx.msg().caller_method());
                ctx.msg_mut().set_caller_method(seen);
                req.set_field_by_name("view", Value::String("h".into()));
                Ok(req)
            })
        })
    }

    #[tokio::test]
    async fn test_filters_run_in_order() {
        let chain = FilterChain::new()
            .with(trace_filter("a"))
            .with(trace_filter("b"));
        let mut ctx = Context::with_new_message();
        let req = DynamicMessage::new(descriptor("GetBookRequest"));

        let rsp = chain.handle(&mut ctx, req, &echo()).await.unwrap();
        assert_eq!(ctx.msg().caller_method(), "a>b>handler");
        assert_eq!(
            rsp.get_field_by_name("view").unwrap().into_owned(),
            Value::String("h<b<a".into())
        );
    }

    #[tokio::test]
    async fn test_filter_short_circuits() {
        let deny = filter_fn(|_ctx, _req, _next| {
            Box::pin(async move { Err(Error::framework(RetCode::ServerAuthFail, "denied")) })
        });
        let chain = FilterChain::new().with(deny).with(trace_filter("never"));
        let mut ctx = Context::with_new_message();
        let req = DynamicMessage::new(descriptor("GetBookRequest"));

        let err = chain.handle(&mut ctx, req, &echo()).await.unwrap_err();
        assert_eq!(err.ret_code(), Some(RetCode::ServerAuthFail));
        assert_eq!(ctx.msg().caller_method(), "");
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        let mut ctx = Context::new();
        let req = DynamicMessage::new(descriptor("GetBookRequest"));
        let rsp = chain.handle(&mut ctx, req, &echo()).await.unwrap();
        assert_eq!(
            rsp.get_field_by_name("view").unwrap().into_owned(),
            Value::String("h".into())
        );
    }
}
