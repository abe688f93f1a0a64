//! Request and response pipelines.
//!
//! Pipelines compose the per-call transformation stages:
//! - [`RequestPipeline`]: frame decode (optional), decompress, unmarshal
//! - [`ResponsePipeline`]: marshal, compress, frame encode (optional)
//!
//! Stage selection comes from the [`Msg`]: its compress type picks the
//! compressor and its serialization type picks the serializer. Failures are
//! reported as framework errors: decode-side failures as
//! [`RetCode::ServerDecodeFail`], encode-side failures as
//! [`RetCode::ServerEncodeFail`].

use bytes::Bytes;

use crate::codec::BoxedCodec;
use crate::compression::CompressorRegistry;
use crate::error::{Error, RetCode};
use crate::msg::Msg;
use crate::serialization::{Body, SerializerRegistry};

/// Request pipeline - decodes incoming request bodies.
pub struct RequestPipeline;

impl RequestPipeline {
    /// Decompress `data` and unmarshal it into `body`.
    ///
    /// Decompression always completes before deserialization starts.
    pub fn decode(
        serializers: &SerializerRegistry,
        compressors: &CompressorRegistry,
        msg: &Msg,
        data: Bytes,
        body: &mut Body,
    ) -> Result<(), Error> {
        let data = compressors
            .decompress(msg.compress_type(), data)
            .map_err(|e| Error::framework(RetCode::ServerDecodeFail, e.to_string()).with_cause(e))?;
        serializers
            .unmarshal(msg.serialization_type(), &data, body)
            .map_err(|e| Error::framework(RetCode::ServerDecodeFail, e.to_string()).with_cause(e))
    }

    /// Unwrap a wire frame with `codec`, then [`decode`](Self::decode) its body.
    pub fn decode_frame(
        codec: &BoxedCodec,
        serializers: &SerializerRegistry,
        compressors: &CompressorRegistry,
        msg: &mut Msg,
        frame: Bytes,
        body: &mut Body,
    ) -> Result<(), Error> {
        let data = codec.decode(msg, frame)?;
        Self::decode(serializers, compressors, msg, data, body)
    }
}

/// Response pipeline - encodes outgoing response bodies.
pub struct ResponsePipeline;

impl ResponsePipeline {
    /// Marshal `body` and compress the result.
    ///
    /// A serializer that skips serialization yields an empty payload.
    pub fn encode(
        serializers: &SerializerRegistry,
        compressors: &CompressorRegistry,
        msg: &Msg,
        body: &Body,
    ) -> Result<Bytes, Error> {
        let data = serializers
            .marshal(msg.serialization_type(), body)
            .map_err(|e| Error::framework(RetCode::ServerEncodeFail, e.to_string()).with_cause(e))?
            .unwrap_or_default();
        compressors
            .compress(msg.compress_type(), data)
            .map_err(|e| Error::framework(RetCode::ServerEncodeFail, e.to_string()).with_cause(e))
    }

    /// [`encode`](Self::encode) `body`, then wrap it in a frame with `codec`.
    pub fn encode_frame(
        codec: &BoxedCodec,
        serializers: &SerializerRegistry,
        compressors: &CompressorRegistry,
        msg: &mut Msg,
        body: &Body,
    ) -> Result<Bytes, Error> {
        let data = Self::encode(serializers, compressors, msg, body)?;
        codec.encode(msg, data).map_err(|e| {
            Error::framework(RetCode::ServerEncodeFail, e.to_string()).with_cause(e)
        })
    }
}
