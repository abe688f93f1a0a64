//! Frame codecs and the codec registry.
//!
//! A [`Codec`] turns a whole wire frame into a body and back, recording any
//! protocol header it finds on the [`Msg`]. Codecs are independent of
//! serialization and compression; see [`crate::pipeline`] for how the
//! stages compose.
//!
//! Unlike the serializer and compressor registries, the codec registry
//! accepts registrations at any time and guards its map with a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::envelope::EnvelopeCodec;
use crate::error::CodecError;
use crate::msg::Msg;

/// Protocol name of the envelope codec in [`CodecRegistry::with_builtins`].
pub const ENVELOPE_PROTOCOL: &str = "envelope";

/// Protocol name of the HTTP codec in [`CodecRegistry::with_builtins`].
pub const HTTP_PROTOCOL: &str = "http";

/// Whole-frame encoder/decoder for one protocol.
pub trait Codec: Send + Sync + 'static {
    /// Wrap `body` in a frame.
    fn encode(&self, msg: &mut Msg, body: Bytes) -> Result<Bytes, CodecError>;

    /// Unwrap a frame into its body.
    fn decode(&self, msg: &mut Msg, frame: Bytes) -> Result<Bytes, CodecError>;
}

/// A boxed codec for type-erased storage.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn Codec>);

impl BoxedCodec {
    pub fn new<C: Codec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    pub fn encode(&self, msg: &mut Msg, body: Bytes) -> Result<Bytes, CodecError> {
        self.0.encode(msg, body)
    }

    pub fn decode(&self, msg: &mut Msg, frame: Bytes) -> Result<Bytes, CodecError> {
        self.0.decode(msg, frame)
    }
}

impl fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxedCodec").finish_non_exhaustive()
    }
}

/// Codec for HTTP transports.
///
/// The HTTP server has already separated headers from the body, so frames
/// pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpCodec;

impl Codec for HttpCodec {
    fn encode(&self, _msg: &mut Msg, body: Bytes) -> Result<Bytes, CodecError> {
        Ok(body)
    }

    fn decode(&self, _msg: &mut Msg, frame: Bytes) -> Result<Bytes, CodecError> {
        Ok(frame)
    }
}

#[derive(Clone, Default)]
struct CodecPair {
    server: Option<BoxedCodec>,
    client: Option<BoxedCodec>,
}

/// Codecs keyed by protocol name, one for each side of a call.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: RwLock<HashMap<String, CodecPair>>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the envelope and HTTP codecs registered on both sides.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(
            ENVELOPE_PROTOCOL,
            Some(BoxedCodec::new(EnvelopeCodec)),
            Some(BoxedCodec::new(EnvelopeCodec)),
        );
        registry.register(
            HTTP_PROTOCOL,
            Some(BoxedCodec::new(HttpCodec)),
            Some(BoxedCodec::new(HttpCodec)),
        );
        registry
    }

    /// Register the server and client codecs for a protocol.
    ///
    /// A `None` side keeps whatever was registered before.
    pub fn register(&self, name: &str, server: Option<BoxedCodec>, client: Option<BoxedCodec>) {
        let mut codecs = self.codecs.write().unwrap_or_else(PoisonError::into_inner);
        let pair = codecs.entry(name.to_owned()).or_default();
        if server.is_some() {
            pair.server = server;
        }
        if client.is_some() {
            pair.client = client;
        }
    }

    /// The server-side codec for a protocol.
    pub fn server(&self, name: &str) -> Result<BoxedCodec, CodecError> {
        let codecs = self.codecs.read().unwrap_or_else(PoisonError::into_inner);
        codecs
            .get(name)
            .and_then(|pair| pair.server.clone())
            .ok_or_else(|| CodecError::NotRegistered(name.to_owned()))
    }

    /// The client-side codec for a protocol.
    pub fn client(&self, name: &str) -> Result<BoxedCodec, CodecError> {
        let codecs = self.codecs.read().unwrap_or_else(PoisonError::into_inner);
        codecs
            .get(name)
            .and_then(|pair| pair.client.clone())
            .ok_or_else(|| CodecError::NotRegistered(name.to_owned()))
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codecs = self.codecs.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CodecRegistry")
            .field("protocols", &codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::wrap_envelope;

    #[test]
    fn test_builtins_registered() {
        let registry = CodecRegistry::with_builtins();
        assert!(registry.server(ENVELOPE_PROTOCOL).is_ok());
        assert!(registry.client(HTTP_PROTOCOL).is_ok());
        assert_eq!(
            registry.server("grpc").unwrap_err(),
            CodecError::NotRegistered("grpc".into())
        );
    }

    #[test]
    fn test_register_one_side() {
        let registry = CodecRegistry::new();
        registry.register("p", Some(BoxedCodec::new(HttpCodec)), None);
        assert!(registry.server("p").is_ok());
        assert!(registry.client("p").is_err());

        registry.register("p", None, Some(BoxedCodec::new(EnvelopeCodec)));
        assert!(registry.server("p").is_ok());
        assert!(registry.client("p").is_ok());
    }

    #[test]
    fn test_http_codec_passthrough() {
        let mut msg = Msg::default();
        let body = Bytes::from_static(b"{}");
        assert_eq!(HttpCodec.decode(&mut msg, body.clone()).unwrap(), body);
        assert_eq!(HttpCodec.encode(&mut msg, body.clone()).unwrap(), body);
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(CodecRegistry::with_builtins());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let name = format!("proto-{i}");
                    registry.register(&name, Some(BoxedCodec::new(EnvelopeCodec)), None);
                    let codec = registry.server(&name).unwrap();
                    let mut msg = Msg::default();
                    codec
                        .decode(&mut msg, wrap_envelope(b"x", 0))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Bytes::from_static(b"x"));
        }
    }
}
