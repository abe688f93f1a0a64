//! Serializers and the serializer registry.
//!
//! Serializers convert between bytes and a [`Body`]: either a reflected
//! protobuf message or raw bytes. They are keyed by the integer codes in
//! [`serialization_type`]; HTTP content types map onto those codes.
//!
//! Code ranges: 0-127 are shared across language implementations, 128-999
//! are reserved for this implementation, 1000 and above are free for user
//! serializers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use prost::Message as _;
use prost_reflect::{DeserializeOptions, DynamicMessage, ReflectMessage};

use crate::error::SerializationError;

/// Stable serializer type codes.
pub mod serialization_type {
    /// Protocol buffers binary.
    pub const PB: i32 = 0;
    /// JCE.
    pub const JCE: i32 = 1;
    /// JSON.
    pub const JSON: i32 = 2;
    /// FlatBuffers.
    pub const FLAT_BUFFER: i32 = 3;
    /// Raw bytes, no serialization.
    pub const NOOP: i32 = 4;
    /// `application/xml`.
    pub const XML: i32 = 5;
    /// `text/xml`.
    pub const TEXT_XML: i32 = 6;
    /// Skip serialization entirely.
    pub const UNSUPPORTED: i32 = 128;
    /// `application/x-www-form-urlencoded`.
    pub const FORM: i32 = 129;
    /// Query-string-only GET requests.
    pub const GET: i32 = 130;
    /// `multipart/form-data`.
    pub const FORM_DATA: i32 = 131;
}

/// Content type names registered by [`SerializerRegistry::with_builtins`].
pub mod content_type {
    pub const PROTOBUF: &str = "application/protobuf";
    pub const X_PROTOBUF: &str = "application/x-protobuf";
    pub const PB: &str = "application/pb";
    pub const PROTO: &str = "application/proto";
    pub const JSON: &str = "application/json";
    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const FORM: &str = "application/x-www-form-urlencoded";
}

/// Application-level value a serializer reads or writes.
#[derive(Debug, Clone)]
pub enum Body {
    /// A reflected protobuf message.
    Message(DynamicMessage),
    /// Raw bytes.
    Bytes(Bytes),
}

impl Body {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Message(_) => "message",
            Body::Bytes(_) => "bytes",
        }
    }

    /// The message, if this body holds one.
    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Body::Message(msg) => Some(msg),
            Body::Bytes(_) => None,
        }
    }

    pub fn as_message_mut(&mut self) -> Option<&mut DynamicMessage> {
        match self {
            Body::Message(msg) => Some(msg),
            Body::Bytes(_) => None,
        }
    }

    pub fn into_message(self) -> Option<DynamicMessage> {
        match self {
            Body::Message(msg) => Some(msg),
            Body::Bytes(_) => None,
        }
    }

    /// The raw bytes, if this body holds them.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Bytes(b) => Some(b),
            Body::Message(_) => None,
        }
    }
}

/// Conversion between bytes and a [`Body`].
pub trait Serializer: Send + Sync + 'static {
    /// Serialize `body`.
    fn marshal(&self, body: &Body) -> Result<Bytes, SerializationError>;

    /// Deserialize `data` into `body`.
    fn unmarshal(&self, data: &[u8], body: &mut Body) -> Result<(), SerializationError>;
}

/// A boxed serializer for type-erased storage.
#[derive(Clone)]
pub struct BoxedSerializer(Arc<dyn Serializer>);

impl BoxedSerializer {
    pub fn new<S: Serializer>(serializer: S) -> Self {
        BoxedSerializer(Arc::new(serializer))
    }

    pub fn marshal(&self, body: &Body) -> Result<Bytes, SerializationError> {
        self.0.marshal(body)
    }

    pub fn unmarshal(&self, data: &[u8], body: &mut Body) -> Result<(), SerializationError> {
        self.0.unmarshal(data, body)
    }
}

impl fmt::Debug for BoxedSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxedSerializer").finish_non_exhaustive()
    }
}

/// Built-in serializers, dispatched without dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinSerializer {
    /// Protocol buffers binary format.
    Proto,
    /// Protocol buffers canonical JSON mapping. Unknown fields are ignored.
    Json,
    /// Raw bytes in, raw bytes out.
    Noop,
}

impl BuiltinSerializer {
    fn name(&self) -> &'static str {
        match self {
            Self::Proto => "proto",
            Self::Json => "json",
            Self::Noop => "noop",
        }
    }

    fn unsupported(&self, body: &Body) -> SerializationError {
        SerializationError::UnsupportedBody {
            serializer: self.name(),
            body: body.kind(),
        }
    }
}

impl Serializer for BuiltinSerializer {
    fn marshal(&self, body: &Body) -> Result<Bytes, SerializationError> {
        match (self, body) {
            (Self::Proto, Body::Message(msg)) => Ok(Bytes::from(msg.encode_to_vec())),
            (Self::Json, Body::Message(msg)) => serde_json::to_vec(msg)
                .map(Bytes::from)
                .map_err(|e| SerializationError::Marshal(e.to_string())),
            (Self::Noop, Body::Bytes(b)) => Ok(b.clone()),
            _ => Err(self.unsupported(body)),
        }
    }

    fn unmarshal(&self, data: &[u8], body: &mut Body) -> Result<(), SerializationError> {
        match (self, body) {
            (Self::Proto, Body::Message(msg)) => msg
                .merge(data)
                .map_err(|e| SerializationError::Unmarshal(e.to_string())),
            (Self::Json, Body::Message(msg)) => {
                let options = DeserializeOptions::new().deny_unknown_fields(false);
                let mut de = serde_json::Deserializer::from_slice(data);
                let decoded =
                    DynamicMessage::deserialize_with_options(msg.descriptor(), &mut de, &options)
                        .map_err(|e| SerializationError::Unmarshal(e.to_string()))?;
                de.end()
                    .map_err(|e| SerializationError::Unmarshal(e.to_string()))?;
                *msg = decoded;
                Ok(())
            }
            (Self::Noop, Body::Bytes(bytes)) => {
                *bytes = Bytes::copy_from_slice(data);
                Ok(())
            }
            (_, body) => Err(self.unsupported(body)),
        }
    }
}

#[derive(Debug, Clone)]
enum Registered {
    Builtin(BuiltinSerializer),
    Custom(BoxedSerializer),
}

/// Serializers keyed by type code, plus the content types that select them.
///
/// Populate the registry at startup, then share it read-only; lookups take
/// no lock.
#[derive(Debug, Clone, Default)]
pub struct SerializerRegistry {
    serializers: HashMap<i32, Registered>,
    names: HashMap<String, i32>,
    primary_names: HashMap<i32, String>,
}

impl SerializerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the protobuf, JSON and noop serializers and their
    /// content types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin(serialization_type::PB, BuiltinSerializer::Proto);
        registry.register_builtin(serialization_type::JSON, BuiltinSerializer::Json);
        registry.register_builtin(serialization_type::NOOP, BuiltinSerializer::Noop);

        registry.register_name(content_type::PROTOBUF, serialization_type::PB);
        registry.register_name(content_type::X_PROTOBUF, serialization_type::PB);
        registry.register_name(content_type::PB, serialization_type::PB);
        registry.register_name(content_type::PROTO, serialization_type::PB);
        registry.register_name(content_type::JSON, serialization_type::JSON);
        registry.register_name(content_type::OCTET_STREAM, serialization_type::NOOP);
        registry.register_name(content_type::FORM, serialization_type::FORM);
        registry
    }

    /// Register a built-in serializer under `code`, replacing any previous one.
    pub fn register_builtin(&mut self, code: i32, serializer: BuiltinSerializer) {
        self.serializers.insert(code, Registered::Builtin(serializer));
    }

    /// Register a custom serializer under `code`, replacing any previous one.
    pub fn register<S: Serializer>(&mut self, code: i32, serializer: S) {
        self.serializers
            .insert(code, Registered::Custom(BoxedSerializer::new(serializer)));
    }

    /// Map a content type to a type code.
    ///
    /// The first name registered for a code is the one sent in responses.
    pub fn register_name(&mut self, name: &str, code: i32) {
        let name = name.to_ascii_lowercase();
        self.primary_names.entry(code).or_insert_with(|| name.clone());
        self.names.insert(name, code);
    }

    /// Returns true if a serializer is registered under `code`.
    pub fn contains(&self, code: i32) -> bool {
        self.serializers.contains_key(&code)
    }

    /// Resolve a `Content-Type` or `Accept` value to a registered type code.
    ///
    /// The media type must match a registered name exactly (ignoring case).
    /// A `charset=utf-8` parameter is tolerated; any other parameter makes
    /// the value unmatched.
    pub fn code_for_content_type(&self, value: &str) -> Option<i32> {
        let essence = media_type_essence(value)?;
        let code = *self.names.get(&essence)?;
        self.contains(code).then_some(code)
    }

    /// The content type sent for responses serialized with `code`.
    pub fn content_type_for_code(&self, code: i32) -> Option<&str> {
        self.primary_names.get(&code).map(String::as_str)
    }

    /// Serialize `body` with the serializer registered under `code`.
    ///
    /// [`serialization_type::UNSUPPORTED`] skips serialization and returns
    /// `Ok(None)`.
    pub fn marshal(&self, code: i32, body: &Body) -> Result<Option<Bytes>, SerializationError> {
        if code == serialization_type::UNSUPPORTED {
            return Ok(None);
        }
        match self.serializers.get(&code) {
            Some(Registered::Builtin(s)) => s.marshal(body).map(Some),
            Some(Registered::Custom(s)) => s.marshal(body).map(Some),
            None => Err(SerializationError::NotRegistered(code)),
        }
    }

    /// Deserialize `data` into `body` with the serializer registered under `code`.
    ///
    /// [`serialization_type::UNSUPPORTED`] and empty input leave `body`
    /// untouched.
    pub fn unmarshal(&self, code: i32, data: &[u8], body: &mut Body) -> Result<(), SerializationError> {
        if code == serialization_type::UNSUPPORTED {
            return Ok(());
        }
        let serializer = self
            .serializers
            .get(&code)
            .ok_or(SerializationError::NotRegistered(code))?;
        if data.is_empty() {
            return Ok(());
        }
        match serializer {
            Registered::Builtin(s) => s.unmarshal(data, body),
            Registered::Custom(s) => s.unmarshal(data, body),
        }
    }
}

/// Lowercased media type of a header value, or `None` if it carries a
/// parameter other than `charset=utf-8`.
fn media_type_essence(value: &str) -> Option<String> {
    let mut parts = value.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    if essence.is_empty() {
        return None;
    }
    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (key, val) = param.split_once('=')?;
        let val = val.trim().trim_matches('"');
        if !key.trim().eq_ignore_ascii_case("charset") || !val.eq_ignore_ascii_case("utf-8") {
            return None;
        }
    }
    Some(essence)
}
