//! The per-call message record.
//!
//! A [`Msg`] carries everything the framework knows about one RPC while it is
//! in flight: addressing, caller/callee identity, serialization hints,
//! metadata, protocol heads and error slots. It is acquired from the message
//! pool by [`Context::with_new_message`](crate::Context::with_new_message),
//! mutated along the call path and reset when the owning context is released.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Extensions;

use crate::error::Error;

/// Transparent metadata passed between caller and callee.
pub type MetaData = HashMap<String, Bytes>;

/// Opaque protocol-specific head value (frame head, request/response head).
pub type Head = Arc<dyn Any + Send + Sync>;

/// Wildcard service name that skips app/server/service decomposition.
pub const WILDCARD_SERVICE_NAME: &str = "*";

/// Number of dot-separated sections in a fully qualified service name
/// (`trpc.app.server.service`).
const SERVICE_SECTION_LENGTH: usize = 4;

/// Shape of an RPC call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallType {
    /// Request followed by a response.
    #[default]
    Unary,
    /// Request only; the caller does not wait for a response.
    OneWay,
}

/// Extensible typed bag for cross-cutting features that have no dedicated field.
///
/// Values are keyed by their type. Copying a message deep-clones the bag.
#[derive(Clone, Debug, Default)]
pub struct CommonMeta(Extensions);

impl CommonMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.0.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.0.get_mut::<T>()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.0.remove::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The per-call message record.
///
/// Every field starts at its zero value. Messages owned by the process-wide
/// pool carry an internal marker so that releasing them returns the
/// allocation; messages built with [`Msg::default`] or [`Clone`] are never
/// pooled.
#[derive(Debug, Default)]
pub struct Msg {
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,

    namespace: String,
    env_name: String,
    set_name: String,
    env_transfer: String,

    request_timeout: Option<Duration>,
    serialization_type: i32,
    compress_type: i32,
    call_type: CallType,

    server_rpc_name: String,
    client_rpc_name: String,

    caller_service_name: String,
    caller_app: String,
    caller_server: String,
    caller_service: String,
    caller_method: String,

    callee_service_name: String,
    callee_app: String,
    callee_server: String,
    callee_service: String,
    callee_method: String,
    callee_container_name: String,
    callee_set_name: String,

    server_metadata: Option<MetaData>,
    client_metadata: Option<MetaData>,

    frame_head: Option<Head>,
    server_req_head: Option<Head>,
    server_rsp_head: Option<Head>,
    client_req_head: Option<Head>,
    client_rsp_head: Option<Head>,

    server_rsp_err: Option<Error>,
    client_rsp_err: Option<Error>,

    stream_id: u32,
    request_id: u32,
    stream_frame: Option<Head>,

    dyeing: bool,
    dyeing_key: String,

    logger: Option<tracing::Span>,
    common_meta: Option<CommonMeta>,

    pooled: bool,
}

macro_rules! string_accessors {
    ($($(#[$doc:meta])* $field:ident => $setter:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $field(&self) -> &str {
                &self.$field
            }

            pub fn $setter(&mut self, value: impl Into<String>) {
                self.$field = value.into();
            }
        )*
    };
}

macro_rules! head_accessors {
    ($($field:ident => $setter:ident;)*) => {
        $(
            pub fn $field(&self) -> Option<&Head> {
                self.$field.as_ref()
            }

            pub fn $setter(&mut self, head: Head) {
                self.$field = Some(head);
            }
        )*
    };
}

impl Msg {
    pub(crate) fn new_pooled() -> Self {
        Self {
            pooled: true,
            ..Self::default()
        }
    }

    /// Returns true when this message is owned by the message pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Reset every field to its zero value.
    ///
    /// The pool marker survives the reset.
    pub fn reset(&mut self) {
        let pooled = self.pooled;
        *self = Self {
            pooled,
            ..Self::default()
        };
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    string_accessors! {
        /// Naming namespace (e.g. `Production`, `Development`).
        namespace => set_namespace;
        /// Environment name.
        env_name => set_env_name;
        /// Set name for set-based routing.
        set_name => set_set_name;
        /// Environment list passed transparently to downstream calls.
        env_transfer => set_env_transfer;
        caller_app => set_caller_app;
        caller_server => set_caller_server;
        caller_service => set_caller_service;
        caller_method => set_caller_method;
        callee_app => set_callee_app;
        callee_server => set_callee_server;
        callee_service => set_callee_service;
        callee_method => set_callee_method;
        callee_container_name => set_callee_container_name;
        callee_set_name => set_callee_set_name;
        /// Key used by the dyeing (request coloring) feature.
        dyeing_key => set_dyeing_key;
    }

    /// Timeout the caller allows for this request.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = Some(timeout);
    }

    /// Serializer type code (see [`serialization_type`](crate::serialization_type)).
    pub fn serialization_type(&self) -> i32 {
        self.serialization_type
    }

    pub fn set_serialization_type(&mut self, code: i32) {
        self.serialization_type = code;
    }

    /// Compressor type code (see [`compress_type`](crate::compress_type)).
    pub fn compress_type(&self) -> i32 {
        self.compress_type
    }

    pub fn set_compress_type(&mut self, code: i32) {
        self.compress_type = code;
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn set_call_type(&mut self, call_type: CallType) {
        self.call_type = call_type;
    }

    /// RPC name of the call this server is handling.
    pub fn server_rpc_name(&self) -> &str {
        &self.server_rpc_name
    }

    /// Set the server RPC name.
    ///
    /// Derives the callee method from the name while the callee method is
    /// still empty. Setting the current value again does nothing.
    pub fn set_server_rpc_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.server_rpc_name == name {
            return;
        }
        self.derive_callee_method(&name);
        self.server_rpc_name = name;
    }

    /// RPC name of the downstream call this client is making.
    pub fn client_rpc_name(&self) -> &str {
        &self.client_rpc_name
    }

    /// Set the client RPC name; derives the callee method like
    /// [`set_server_rpc_name`](Self::set_server_rpc_name).
    pub fn set_client_rpc_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.client_rpc_name == name {
            return;
        }
        self.derive_callee_method(&name);
        self.client_rpc_name = name;
    }

    fn derive_callee_method(&mut self, rpc_name: &str) {
        if !self.callee_method.is_empty() {
            return;
        }
        self.callee_method = if is_trpc_rpc_name(rpc_name) {
            method_from_rpc_name(rpc_name).to_owned()
        } else {
            rpc_name.to_owned()
        };
    }

    pub fn caller_service_name(&self) -> &str {
        &self.caller_service_name
    }

    /// Set the caller service name and decompose it into app, server and service.
    ///
    /// The wildcard `*` is stored without decomposition.
    pub fn set_caller_service_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.caller_service_name == name {
            return;
        }
        if name != WILDCARD_SERVICE_NAME {
            let (app, server, service) = parse_service_name(&name);
            self.caller_app = app.to_owned();
            self.caller_server = server.to_owned();
            self.caller_service = service.to_owned();
        }
        self.caller_service_name = name;
    }

    pub fn callee_service_name(&self) -> &str {
        &self.callee_service_name
    }

    /// Set the callee service name and decompose it into app, server and service.
    ///
    /// The wildcard `*` is stored without decomposition.
    pub fn set_callee_service_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.callee_service_name == name {
            return;
        }
        if name != WILDCARD_SERVICE_NAME {
            let (app, server, service) = parse_service_name(&name);
            self.callee_app = app.to_owned();
            self.callee_server = server.to_owned();
            self.callee_service = service.to_owned();
        }
        self.callee_service_name = name;
    }

    /// Metadata received from the upstream caller. `None` until set.
    pub fn server_metadata(&self) -> Option<&MetaData> {
        self.server_metadata.as_ref()
    }

    /// Set server metadata. `None` installs an empty map.
    pub fn set_server_metadata(&mut self, md: Option<MetaData>) {
        self.server_metadata = Some(md.unwrap_or_default());
    }

    /// Server metadata, installing an empty map first if none is set.
    pub fn server_metadata_mut(&mut self) -> &mut MetaData {
        self.server_metadata.get_or_insert_with(MetaData::new)
    }

    /// Metadata sent to the downstream callee. `None` until set.
    pub fn client_metadata(&self) -> Option<&MetaData> {
        self.client_metadata.as_ref()
    }

    /// Set client metadata. `None` installs an empty map.
    pub fn set_client_metadata(&mut self, md: Option<MetaData>) {
        self.client_metadata = Some(md.unwrap_or_default());
    }

    /// Client metadata, installing an empty map first if none is set.
    pub fn client_metadata_mut(&mut self) -> &mut MetaData {
        self.client_metadata.get_or_insert_with(MetaData::new)
    }

    head_accessors! {
        frame_head => set_frame_head;
        server_req_head => set_server_req_head;
        server_rsp_head => set_server_rsp_head;
        client_req_head => set_client_req_head;
        client_rsp_head => set_client_rsp_head;
        stream_frame => set_stream_frame;
    }

    /// Error the server handler returned for this call.
    pub fn server_rsp_err(&self) -> Option<&Error> {
        self.server_rsp_err.as_ref()
    }

    pub fn set_server_rsp_err(&mut self, err: Option<Error>) {
        self.server_rsp_err = err;
    }

    /// Error the downstream callee returned.
    pub fn client_rsp_err(&self) -> Option<&Error> {
        self.client_rsp_err.as_ref()
    }

    pub fn set_client_rsp_err(&mut self, err: Option<Error>) {
        self.client_rsp_err = err;
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn set_stream_id(&mut self, id: u32) {
        self.stream_id = id;
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn set_request_id(&mut self, id: u32) {
        self.request_id = id;
    }

    pub fn dyeing(&self) -> bool {
        self.dyeing
    }

    pub fn set_dyeing(&mut self, dyeing: bool) {
        self.dyeing = dyeing;
    }

    /// Per-call logging span.
    pub fn logger(&self) -> Option<&tracing::Span> {
        self.logger.as_ref()
    }

    pub fn set_logger(&mut self, span: tracing::Span) {
        self.logger = Some(span);
    }

    pub fn common_meta(&self) -> Option<&CommonMeta> {
        self.common_meta.as_ref()
    }

    pub fn set_common_meta(&mut self, meta: CommonMeta) {
        self.common_meta = Some(meta);
    }

    /// Common meta, installing an empty bag first if none is set.
    pub fn common_meta_mut(&mut self) -> &mut CommonMeta {
        self.common_meta.get_or_insert_with(CommonMeta::new)
    }

    /// Copy every field from `src`.
    ///
    /// Metadata and common meta are deep-copied, heads are shared. The pool
    /// marker of `self` is left untouched.
    pub fn copy_from(&mut self, src: &Msg) {
        let pooled = self.pooled;
        *self = Self {
            remote_addr: src.remote_addr,
            local_addr: src.local_addr,
            namespace: src.namespace.clone(),
            env_name: src.env_name.clone(),
            set_name: src.set_name.clone(),
            env_transfer: src.env_transfer.clone(),
            request_timeout: src.request_timeout,
            serialization_type: src.serialization_type,
            compress_type: src.compress_type,
            call_type: src.call_type,
            server_rpc_name: src.server_rpc_name.clone(),
            client_rpc_name: src.client_rpc_name.clone(),
            caller_service_name: src.caller_service_name.clone(),
            caller_app: src.caller_app.clone(),
            caller_server: src.caller_server.clone(),
            caller_service: src.caller_service.clone(),
            caller_method: src.caller_method.clone(),
            callee_service_name: src.callee_service_name.clone(),
            callee_app: src.callee_app.clone(),
            callee_server: src.callee_server.clone(),
            callee_service: src.callee_service.clone(),
            callee_method: src.callee_method.clone(),
            callee_container_name: src.callee_container_name.clone(),
            callee_set_name: src.callee_set_name.clone(),
            server_metadata: src.server_metadata.clone(),
            client_metadata: src.client_metadata.clone(),
            frame_head: src.frame_head.clone(),
            server_req_head: src.server_req_head.clone(),
            server_rsp_head: src.server_rsp_head.clone(),
            client_req_head: src.client_req_head.clone(),
            client_rsp_head: src.client_rsp_head.clone(),
            server_rsp_err: src.server_rsp_err.clone(),
            client_rsp_err: src.client_rsp_err.clone(),
            stream_id: src.stream_id,
            request_id: src.request_id,
            stream_frame: src.stream_frame.clone(),
            dyeing: src.dyeing,
            dyeing_key: src.dyeing_key.clone(),
            logger: src.logger.clone(),
            common_meta: src.common_meta.clone(),
            pooled,
        };
    }

    /// Copy the fields every derived call inherits.
    ///
    /// The compress type is deliberately not inherited: a downstream hop
    /// negotiates its own compression.
    pub(crate) fn copy_common(&mut self, src: &Msg) {
        self.remote_addr = src.remote_addr;
        self.local_addr = src.local_addr;
        self.call_type = src.call_type;
        self.request_timeout = src.request_timeout;
        self.serialization_type = src.serialization_type;
        self.server_rpc_name.clone_from(&src.server_rpc_name);
        self.client_rpc_name.clone_from(&src.client_rpc_name);
        self.server_req_head.clone_from(&src.server_req_head);
        self.server_rsp_head.clone_from(&src.server_rsp_head);
        self.dyeing = src.dyeing;
        self.dyeing_key.clone_from(&src.dyeing_key);
        self.server_metadata.clone_from(&src.server_metadata);
        self.logger.clone_from(&src.logger);
        self.namespace.clone_from(&src.namespace);
        self.env_name.clone_from(&src.env_name);
        self.set_name.clone_from(&src.set_name);
        self.env_transfer.clone_from(&src.env_transfer);
        self.common_meta.clone_from(&src.common_meta);
    }

    /// A server turning into a client: the callee of the upstream call
    /// becomes the caller of the downstream call.
    pub(crate) fn copy_server_to_client(&mut self, src: &Msg) {
        self.client_metadata.clone_from(&src.server_metadata);
        self.caller_service_name.clone_from(&src.callee_service_name);
        self.caller_app.clone_from(&src.callee_app);
        self.caller_server.clone_from(&src.callee_server);
        self.caller_service.clone_from(&src.callee_service);
        self.caller_method.clone_from(&src.callee_method);
    }

    /// Streaming re-entry on the server: caller and callee carry over as is.
    pub(crate) fn copy_server_to_server(&mut self, src: &Msg) {
        self.caller_service_name.clone_from(&src.caller_service_name);
        self.caller_app.clone_from(&src.caller_app);
        self.caller_server.clone_from(&src.caller_server);
        self.caller_service.clone_from(&src.caller_service);
        self.caller_method.clone_from(&src.caller_method);
        self.callee_service_name.clone_from(&src.callee_service_name);
        self.callee_app.clone_from(&src.callee_app);
        self.callee_server.clone_from(&src.callee_server);
        self.callee_service.clone_from(&src.callee_service);
        self.callee_method.clone_from(&src.callee_method);
        self.stream_id = src.stream_id;
    }
}

/// Cloning yields an unpooled copy of every field.
impl Clone for Msg {
    fn clone(&self) -> Self {
        let mut msg = Msg::default();
        msg.copy_from(self);
        msg
    }
}

/// Split a service name into its (app, server, service) triplet.
///
/// Names with at least four dot-separated sections (`trpc.app.server.service`)
/// drop the leading protocol section; shorter names fill the triplet from the
/// left.
///
/// ```
/// use trpc_axum_core::parse_service_name;
///
/// assert_eq!(parse_service_name("trpc.app.server.Greeter"), ("app", "server", "Greeter"));
/// assert_eq!(parse_service_name("app.server"), ("app", "server", ""));
/// ```
pub fn parse_service_name(name: &str) -> (&str, &str, &str) {
    if name.matches('.').count() >= SERVICE_SECTION_LENGTH - 1 {
        let mut parts = name.splitn(SERVICE_SECTION_LENGTH, '.').skip(1);
        let app = parts.next().unwrap_or_default();
        let server = parts.next().unwrap_or_default();
        let service = parts.next().unwrap_or_default();
        return (app, server, service);
    }
    let mut parts = name.splitn(SERVICE_SECTION_LENGTH - 1, '.');
    let app = parts.next().unwrap_or_default();
    let server = parts.next().unwrap_or_default();
    let service = parts.next().unwrap_or_default();
    (app, server, service)
}

/// Whether `name` has the `/pkg.service/method` shape.
pub fn is_trpc_rpc_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('/') else {
        return false;
    };
    let Some((service, method)) = rest.split_once('/') else {
        return false;
    };
    let Some((pkg, service)) = service.split_once('.') else {
        return false;
    };
    !pkg.is_empty() && !service.is_empty() && !method.is_empty() && !method.contains(['/', '.'])
}

fn method_from_rpc_name(name: &str) -> &str {
    name.rsplit_once('/').map_or(name, |(_, method)| method)
}
