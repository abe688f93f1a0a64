//! The transcoding router and its builder.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use axum::body::Body as HttpBody;
use futures::future::BoxFuture;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, request::Parts};
use percent_encoding::percent_decode_str;
use prost_reflect::{DynamicMessage, Kind, ReflectMessage, Value};
use trpc_axum_core::{
    Body, CompressorRegistry, Context, Error, ResponsePipeline, SerializerRegistry, compress_type,
    serialization_type,
};

use super::binding::{Binding, BodyRule};
use super::errors::default_error_handler;
use super::{ErrorHandler, HeaderMatcher, ResponseStatus, default_header_matcher};
use crate::filter::{Filter, FilterChain};
use crate::form::FormSerializer;
use crate::limits::MessageLimits;
use crate::populate::{populate_message, populate_pairs};
use crate::timeout::compute_effective_timeout;

/// Builder for [`Router`].
///
/// Registries start with the built-in serializers (plus the form
/// serializer) and compressors. They may be replaced or extended until
/// [`build`](Self::build), which freezes them.
pub struct RouterBuilder {
    service_name: String,
    bindings: Vec<Binding>,
    serializers: SerializerRegistry,
    compressors: CompressorRegistry,
    filters: FilterChain,
    header_matcher: HeaderMatcher,
    error_handler: ErrorHandler,
    timeout: Option<Duration>,
    discard_unknown_params: bool,
    default_serialization: i32,
    limits: MessageLimits,
}

impl RouterBuilder {
    /// A builder for the service `service_name` (e.g. `trpc.app.server.Service`).
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut serializers = SerializerRegistry::with_builtins();
        FormSerializer::register(&mut serializers);
        Self {
            service_name: service_name.into(),
            bindings: Vec::new(),
            serializers,
            compressors: CompressorRegistry::with_builtins(),
            filters: FilterChain::new(),
            header_matcher: Arc::new(default_header_matcher),
            error_handler: Arc::new(default_error_handler),
            timeout: None,
            discard_unknown_params: false,
            default_serialization: serialization_type::JSON,
            limits: MessageLimits::default(),
        }
    }

    /// Add a binding. Bindings are tried in the order they were added.
    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Replace the serializer registry.
    pub fn serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    pub fn serializers_mut(&mut self) -> &mut SerializerRegistry {
        &mut self.serializers
    }

    /// Replace the compressor registry.
    pub fn compressors(mut self, compressors: CompressorRegistry) -> Self {
        self.compressors = compressors;
        self
    }

    pub fn compressors_mut(&mut self) -> &mut CompressorRegistry {
        &mut self.compressors
    }

    /// Append a server filter.
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn header_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Parts, &mut trpc_axum_core::Msg, &str, &str) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.header_matcher = Arc::new(matcher);
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &Error) -> Response<HttpBody> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Router-level timeout. A tighter `trpc-timeout` from the client wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ignore query parameters that name no field instead of failing.
    pub fn discard_unknown_params(mut self, discard: bool) -> Self {
        self.discard_unknown_params = discard;
        self
    }

    /// Serializer used when `Content-Type` is absent or unrecognized.
    pub fn default_serialization(mut self, code: i32) -> Self {
        self.default_serialization = code;
        self
    }

    pub fn message_limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Freeze the configuration into a router.
    pub fn build(self) -> Router {
        let mut bindings: HashMap<Method, Vec<Binding>> = HashMap::new();
        for binding in self.bindings {
            tracing::debug!(
                rpc = %binding.name,
                method = %binding.method,
                template = %binding.template,
                "registered binding"
            );
            bindings.entry(binding.method.clone()).or_default().push(binding);
        }
        Router {
            inner: Arc::new(Inner {
                service_name: self.service_name,
                bindings,
                serializers: Arc::new(self.serializers),
                compressors: Arc::new(self.compressors),
                filters: self.filters,
                header_matcher: self.header_matcher,
                error_handler: self.error_handler,
                timeout: self.timeout,
                discard_unknown_params: self.discard_unknown_params,
                default_serialization: self.default_serialization,
                limits: self.limits,
            }),
        }
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("service_name", &self.service_name)
            .field("bindings", &self.bindings)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A RESTful transcoding router.
///
/// Implements `tower::Service`, so it can be mounted into an
/// [`axum::Router`] with [`into_axum`](Self::into_axum) or
/// `fallback_service`/`nest_service`.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

struct Inner {
    service_name: String,
    bindings: HashMap<Method, Vec<Binding>>,
    serializers: Arc<SerializerRegistry>,
    compressors: Arc<CompressorRegistry>,
    filters: FilterChain,
    header_matcher: HeaderMatcher,
    error_handler: ErrorHandler,
    timeout: Option<Duration>,
    discard_unknown_params: bool,
    default_serialization: i32,
    limits: MessageLimits,
}

/// Serializer and compressor codes chosen for one request.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    request_serialization: i32,
    request_compression: i32,
    response_serialization: i32,
    response_compression: i32,
}

impl Router {
    /// An axum router that sends every request here.
    pub fn into_axum(self) -> axum::Router {
        axum::Router::new().fallback_service(self)
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.inner.serializers
    }

    pub fn compressors(&self) -> &CompressorRegistry {
        &self.inner.compressors
    }

    /// Handle one request. Never fails: errors become error responses.
    pub async fn handle(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        self.inner.handle(req).await
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("service_name", &self.inner.service_name)
            .field("bindings", &self.inner.bindings)
            .finish_non_exhaustive()
    }
}

impl tower::Service<Request<HttpBody>> for Router {
    type Response = Response<HttpBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<HttpBody>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.handle(req).await) })
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl Inner {
    async fn handle(&self, req: Request<HttpBody>) -> Response<HttpBody> {
        let (parts, body) = req.into_parts();
        match self.transcode(&parts, body).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(
                    method = %parts.method,
                    path = parts.uri.path(),
                    error = %err,
                    "request failed"
                );
                (self.error_handler)(&parts, &err)
            }
        }
    }

    /// First binding, in registration order, whose template matches.
    fn route(&self, method: &Method, path: &str) -> Option<(&Binding, HashMap<String, String>)> {
        self.bindings
            .get(method)?
            .iter()
            .find_map(|b| b.template.match_path(path).ok().map(|captures| (b, captures)))
    }

    async fn transcode(&self, parts: &Parts, body: HttpBody) -> Result<Response<HttpBody>, Error> {
        let path = percent_decode_str(parts.uri.path())
            .decode_utf8()
            .map_err(|e| Error::decode_fail(format!("invalid path encoding: {e}")))?;
        let (binding, captures) = self
            .route(&parts.method, &path)
            .ok_or_else(|| Error::no_func(format!("no binding for {} {}", parts.method, path)))?;
        tracing::debug!(rpc = %binding.name, "matched binding");

        let mut ctx = Context::with_new_message();
        (self.header_matcher)(parts, ctx.msg_mut(), &self.service_name, &binding.name)
            .map_err(|e| Error::decode_fail(format!("header match failed: {e}")).with_cause(e))?;

        let codecs = self.negotiate(&parts.headers)?;
        let msg = ctx.msg_mut();
        msg.set_serialization_type(codecs.request_serialization);
        msg.set_compress_type(codecs.request_compression);

        let mut req = DynamicMessage::new(binding.input.clone());
        self.decode_body(binding, &codecs, body, &mut req).await?;

        for (field, value) in &captures {
            let field_path: Vec<&str> = field.split('.').collect();
            populate_message(&mut req, &field_path, &[value])?;
        }
        if !matches!(binding.body, BodyRule::Whole)
            && let Some(query) = parts.uri.query()
        {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
                .map_err(|e| Error::decode_fail(format!("invalid query string: {e}")))?;
            populate_pairs(
                &mut req,
                pairs,
                |p| binding.is_claimed(p),
                self.discard_unknown_params,
            )?;
        }

        if let Some(timeout) = compute_effective_timeout(self.timeout, ctx.msg().request_timeout()) {
            ctx.set_timeout(timeout);
        }
        let result = match ctx.remaining() {
            Some(remaining) => {
                tokio::time::timeout(remaining, self.filters.handle(&mut ctx, req, &binding.handler))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::timeout(format!(
                            "{} timed out after {remaining:?}",
                            binding.name
                        )))
                    })
            }
            None => self.filters.handle(&mut ctx, req, &binding.handler).await,
        };
        let rsp = match result {
            Ok(rsp) => rsp,
            Err(err) => {
                ctx.msg_mut().set_server_rsp_err(Some(err.clone()));
                return Err(err);
            }
        };

        self.encode_response(&mut ctx, binding, &codecs, rsp)
    }

    fn negotiate(&self, headers: &HeaderMap) -> Result<Negotiated, Error> {
        let request_serialization = match header_str(headers, header::CONTENT_TYPE) {
            Some(value) => self.serializers.code_for_content_type(value).unwrap_or_else(|| {
                tracing::debug!(content_type = value, "unrecognized content type, using default serializer");
                self.default_serialization
            }),
            None => self.default_serialization,
        };

        let request_compression = match header_str(headers, header::CONTENT_ENCODING) {
            Some(value) => self
                .compressors
                .code_for_name(value)
                .ok_or_else(|| Error::decode_fail(format!("unsupported content encoding {value}")))?,
            None => compress_type::NOOP,
        };

        let response_serialization = header_str(headers, header::ACCEPT)
            .and_then(|accept| {
                accept.split(',').find_map(|entry| {
                    let media = entry.split(';').next().unwrap_or_default();
                    self.serializers.code_for_content_type(media)
                })
            })
            .unwrap_or(request_serialization);

        let response_compression = match header_str(headers, header::ACCEPT_ENCODING) {
            Some(accept) => self
                .compressors
                .negotiate(Some(accept))
                .unwrap_or(compress_type::NOOP),
            None => request_compression,
        };

        Ok(Negotiated {
            request_serialization,
            request_compression,
            response_serialization,
            response_compression,
        })
    }

    async fn decode_body(
        &self,
        binding: &Binding,
        codecs: &Negotiated,
        body: HttpBody,
        req: &mut DynamicMessage,
    ) -> Result<(), Error> {
        if matches!(binding.body, BodyRule::None) {
            return Ok(());
        }

        let data = axum::body::to_bytes(body, self.limits.receive_max_bytes_or_max())
            .await
            .map_err(|e| Error::decode_fail(format!("failed to read request body: {e}")))?;
        let data = self
            .compressors
            .decompress(codecs.request_compression, data)
            .map_err(|e| Error::decode_fail(e.to_string()).with_cause(e))?;
        self.limits.check_receive(data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        match &binding.body {
            BodyRule::None => Ok(()),
            BodyRule::Whole => self.unmarshal(codecs.request_serialization, &data, req),
            BodyRule::Field(fields) => {
                let Some((leaf, parents)) = fields.split_last() else {
                    return Ok(());
                };
                let Kind::Message(desc) = leaf.kind() else {
                    return Err(Error::decode_fail(format!("body field {} is not a message", leaf.name())));
                };
                let mut sub = DynamicMessage::new(desc);
                self.unmarshal(codecs.request_serialization, &data, &mut sub)?;

                let mut target = req;
                for fd in parents {
                    target = target
                        .get_field_mut(fd)
                        .as_message_mut()
                        .ok_or_else(|| Error::decode_fail(format!("field {} is not a message", fd.name())))?;
                }
                target
                    .try_set_field(leaf, Value::Message(sub))
                    .map_err(|e| Error::decode_fail(e.to_string()))
            }
        }
    }

    fn unmarshal(&self, code: i32, data: &[u8], msg: &mut DynamicMessage) -> Result<(), Error> {
        let desc = msg.descriptor();
        let mut body = Body::Message(std::mem::replace(msg, DynamicMessage::new(desc)));
        let result = self.serializers.unmarshal(code, data, &mut body);
        if let Body::Message(decoded) = body {
            *msg = decoded;
        }
        result.map_err(|e| Error::decode_fail(e.to_string()).with_cause(e))
    }

    fn encode_response(
        &self,
        ctx: &mut Context,
        binding: &Binding,
        codecs: &Negotiated,
        mut rsp: DynamicMessage,
    ) -> Result<Response<HttpBody>, Error> {
        for name in &binding.response_body {
            rsp = match rsp.take_field_by_name(name) {
                Some(Value::Message(field)) => field,
                None => match rsp.descriptor().get_field_by_name(name).map(|fd| fd.kind()) {
                    Some(Kind::Message(desc)) => DynamicMessage::new(desc),
                    _ => return Err(Error::encode_fail(format!("response has no message field {name}"))),
                },
                Some(_) => return Err(Error::encode_fail(format!("response field {name} is not a message"))),
            };
        }

        let msg = ctx.msg_mut();
        msg.set_serialization_type(codecs.response_serialization);
        msg.set_compress_type(codecs.response_compression);
        let data = ResponsePipeline::encode(&self.serializers, &self.compressors, msg, &Body::Message(rsp))?;
        self.limits.check_send(data.len())?;

        let status = msg
            .common_meta()
            .and_then(|meta| meta.get::<ResponseStatus>())
            .map_or(StatusCode::OK, |s| s.0);

        let mut response = Response::new(HttpBody::from(data));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        if let Some(content_type) = self
            .serializers
            .content_type_for_code(codecs.response_serialization)
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        if codecs.response_compression != compress_type::NOOP
            && let Some(encoding) = self
                .compressors
                .name_for_code(codecs.response_compression)
                .and_then(|name| HeaderValue::from_str(name).ok())
        {
            headers.insert(header::CONTENT_ENCODING, encoding);
        }
        Ok(response)
    }
}
