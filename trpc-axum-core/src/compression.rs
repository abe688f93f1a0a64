//! Compressors and the compressor registry.
//!
//! Compressors are keyed by the integer codes in [`compress_type`]. The
//! built-in algorithms are dispatched through [`BuiltinCompressor`];
//! anything else is registered as a [`BoxedCompressor`].
//!
//! Built-ins:
//! - [`GzipCompressor`]: gzip via flate2
//! - [`ZlibCompressor`]: zlib via flate2 (HTTP `deflate`)
//! - [`StreamSnappyCompressor`]: snappy framing format (requires `compression-snappy`)
//! - [`BlockSnappyCompressor`]: raw snappy blocks (requires `compression-snappy`)

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression as FlateLevel;
use flate2::read::GzDecoder;
use flate2::write::{GzEncoder, ZlibDecoder, ZlibEncoder};

use crate::error::CompressionError;
use crate::pool::Pool;

/// Stable compressor type codes.
pub mod compress_type {
    /// No compression.
    pub const NOOP: i32 = 0;
    /// Gzip.
    pub const GZIP: i32 = 1;
    /// Snappy, framing format.
    pub const SNAPPY: i32 = 2;
    /// Zlib.
    pub const ZLIB: i32 = 3;
    /// Snappy, framing format (explicit stream variant).
    pub const STREAM_SNAPPY: i32 = 4;
    /// Snappy, raw block format.
    pub const BLOCK_SNAPPY: i32 = 5;
}

/// Default flate2 level, matching zlib's default.
const DEFAULT_FLATE_LEVEL: u32 = 6;

/// Byte-buffer to byte-buffer compression.
///
/// Implement this trait to plug a custom algorithm into a
/// [`CompressorRegistry`].
///
/// # Example
///
/// ```ignore
/// use trpc_axum_core::Compressor;
/// use bytes::Bytes;
/// use std::io;
///
/// struct Lz4Compressor;
///
/// impl Compressor for Lz4Compressor {
///     fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
///         // ... lz4 compression
///     }
///
///     fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
///         // ... lz4 decompression
///     }
/// }
/// ```
pub trait Compressor: Send + Sync + 'static {
    /// Compress data.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// A boxed compressor for type-erased storage.
#[derive(Clone)]
pub struct BoxedCompressor(Arc<dyn Compressor>);

impl BoxedCompressor {
    pub fn new<C: Compressor>(compressor: C) -> Self {
        BoxedCompressor(Arc::new(compressor))
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.decompress(data)
    }
}

impl fmt::Debug for BoxedCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxedCompressor").finish_non_exhaustive()
    }
}

/// Gzip compressor using flate2.
///
/// Output buffers are pooled across calls.
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    level: u32,
    buffers: Arc<Pool<Vec<u8>>>,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::with_level(DEFAULT_FLATE_LEVEL)
    }
}

impl GzipCompressor {
    /// Create a gzip compressor with the given level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
            buffers: Arc::new(Pool::new()),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn take_buffer(&self) -> Vec<u8> {
        self.buffers.get_or_else(Vec::new)
    }

    fn finish_buffer(&self, mut buf: Vec<u8>) -> Bytes {
        let out = Bytes::copy_from_slice(&buf);
        buf.clear();
        self.buffers.put(buf);
        out
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(self.take_buffer(), FlateLevel::new(self.level));
        encoder.write_all(data)?;
        let buf = encoder.finish()?;
        Ok(self.finish_buffer(buf))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut buf = self.take_buffer();
        GzDecoder::new(data).read_to_end(&mut buf)?;
        Ok(self.finish_buffer(buf))
    }
}

/// Zlib compressor using flate2.
///
/// Encoder and decoder objects are pooled and reset between uses. A decoder
/// that failed is dropped rather than returned to the pool.
#[derive(Debug, Clone)]
pub struct ZlibCompressor {
    level: u32,
    encoders: Arc<Pool<ZlibEncoder<Vec<u8>>>>,
    decoders: Arc<Pool<ZlibDecoder<Vec<u8>>>>,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::with_level(DEFAULT_FLATE_LEVEL)
    }
}

impl ZlibCompressor {
    /// Create a zlib compressor with the given level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
            encoders: Arc::new(Pool::new()),
            decoders: Arc::new(Pool::new()),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let level = FlateLevel::new(self.level);
        let mut encoder = self
            .encoders
            .get_or_else(|| ZlibEncoder::new(Vec::new(), level));
        encoder.write_all(data)?;
        let out = encoder.reset(Vec::new())?;
        self.encoders.put(encoder);
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = self
            .decoders
            .get_or_else(|| ZlibDecoder::new(Vec::new()));
        decoder.write_all(data)?;
        decoder.try_finish()?;
        let out = decoder.reset(Vec::new())?;
        self.decoders.put(decoder);
        Ok(Bytes::from(out))
    }
}

/// Snappy compressor using the framing (stream) format.
#[cfg(feature = "compression-snappy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSnappyCompressor;

#[cfg(feature = "compression-snappy")]
impl Compressor for StreamSnappyCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = snap::write::FrameEncoder::new(Vec::with_capacity(data.len()));
        encoder.write_all(data)?;
        let out = encoder
            .into_inner()
            .map_err(|e| io::Error::other(e.error().to_string()))?;
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut out = Vec::new();
        snap::read::FrameDecoder::new(data).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Snappy compressor using the raw block format.
///
/// Raw encoders and decoders are pooled across calls.
#[cfg(feature = "compression-snappy")]
#[derive(Clone, Default)]
pub struct BlockSnappyCompressor {
    encoders: Arc<Pool<snap::raw::Encoder>>,
    decoders: Arc<Pool<snap::raw::Decoder>>,
}

#[cfg(feature = "compression-snappy")]
impl fmt::Debug for BlockSnappyCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockSnappyCompressor").finish_non_exhaustive()
    }
}

#[cfg(feature = "compression-snappy")]
impl Compressor for BlockSnappyCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = self.encoders.get_or_else(snap::raw::Encoder::new);
        let out = encoder
            .compress_vec(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e));
        self.encoders.put(encoder);
        Ok(Bytes::from(out?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = self.decoders.get_or_else(snap::raw::Decoder::new);
        let out = decoder
            .decompress_vec(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        self.decoders.put(decoder);
        Ok(Bytes::from(out?))
    }
}

/// Built-in compressors, dispatched without dynamic lookup.
#[derive(Debug, Clone)]
pub enum BuiltinCompressor {
    Noop,
    Gzip(GzipCompressor),
    Zlib(ZlibCompressor),
    #[cfg(feature = "compression-snappy")]
    StreamSnappy(StreamSnappyCompressor),
    #[cfg(feature = "compression-snappy")]
    BlockSnappy(BlockSnappyCompressor),
}

impl BuiltinCompressor {
    /// The default built-in for a type code, if there is one.
    pub fn for_code(code: i32) -> Option<Self> {
        match code {
            compress_type::NOOP => Some(Self::Noop),
            compress_type::GZIP => Some(Self::Gzip(GzipCompressor::default())),
            compress_type::ZLIB => Some(Self::Zlib(ZlibCompressor::default())),
            #[cfg(feature = "compression-snappy")]
            compress_type::SNAPPY | compress_type::STREAM_SNAPPY => {
                Some(Self::StreamSnappy(StreamSnappyCompressor))
            }
            #[cfg(feature = "compression-snappy")]
            compress_type::BLOCK_SNAPPY => {
                Some(Self::BlockSnappy(BlockSnappyCompressor::default()))
            }
            _ => None,
        }
    }
}

impl Compressor for BuiltinCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Self::Noop => Ok(Bytes::copy_from_slice(data)),
            Self::Gzip(c) => c.compress(data),
            Self::Zlib(c) => c.compress(data),
            #[cfg(feature = "compression-snappy")]
            Self::StreamSnappy(c) => c.compress(data),
            #[cfg(feature = "compression-snappy")]
            Self::BlockSnappy(c) => c.compress(data),
        }
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Self::Noop => Ok(Bytes::copy_from_slice(data)),
            Self::Gzip(c) => c.decompress(data),
            Self::Zlib(c) => c.decompress(data),
            #[cfg(feature = "compression-snappy")]
            Self::StreamSnappy(c) => c.decompress(data),
            #[cfg(feature = "compression-snappy")]
            Self::BlockSnappy(c) => c.decompress(data),
        }
    }
}

#[derive(Debug, Clone)]
enum Registered {
    Builtin(BuiltinCompressor),
    Custom(BoxedCompressor),
}

impl Registered {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Self::Builtin(c) => c.compress(data),
            Self::Custom(c) => c.compress(data),
        }
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Self::Builtin(c) => c.decompress(data),
            Self::Custom(c) => c.decompress(data),
        }
    }
}

/// Compressors keyed by type code, plus the HTTP encoding names that select them.
///
/// Populate the registry at startup, then share it read-only (for example
/// behind an `Arc`); lookups take no lock.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use trpc_axum_core::{CompressorRegistry, compress_type};
///
/// let registry = CompressorRegistry::with_builtins();
/// let body = Bytes::from_static(b"hello hello hello");
/// let packed = registry.compress(compress_type::GZIP, body.clone()).unwrap();
/// assert_eq!(registry.decompress(compress_type::GZIP, packed).unwrap(), body);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompressorRegistry {
    compressors: HashMap<i32, Registered>,
    names: HashMap<String, i32>,
    primary_names: HashMap<i32, String>,
}

impl CompressorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in compressor and the standard HTTP names.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let mut codes = vec![
            compress_type::NOOP,
            compress_type::GZIP,
            compress_type::ZLIB,
        ];
        #[cfg(feature = "compression-snappy")]
        codes.extend([
            compress_type::SNAPPY,
            compress_type::STREAM_SNAPPY,
            compress_type::BLOCK_SNAPPY,
        ]);
        for code in codes {
            if let Some(builtin) = BuiltinCompressor::for_code(code) {
                registry.register_builtin(code, builtin);
            }
        }
        registry.register_name("identity", compress_type::NOOP);
        registry.register_name("gzip", compress_type::GZIP);
        registry.register_name("deflate", compress_type::ZLIB);
        #[cfg(feature = "compression-snappy")]
        registry.register_name("snappy", compress_type::SNAPPY);
        registry
    }

    /// Register a built-in compressor under `code`, replacing any previous one.
    pub fn register_builtin(&mut self, code: i32, compressor: BuiltinCompressor) {
        self.compressors.insert(code, Registered::Builtin(compressor));
    }

    /// Register a custom compressor under `code`, replacing any previous one.
    pub fn register<C: Compressor>(&mut self, code: i32, compressor: C) {
        self.compressors
            .insert(code, Registered::Custom(BoxedCompressor::new(compressor)));
    }

    /// Map an HTTP content-coding name to a type code.
    ///
    /// The first name registered for a code is used in response headers.
    pub fn register_name(&mut self, name: &str, code: i32) {
        let name = name.to_ascii_lowercase();
        self.primary_names.entry(code).or_insert_with(|| name.clone());
        self.names.insert(name, code);
    }

    /// Returns true if a compressor is registered under `code`.
    pub fn contains(&self, code: i32) -> bool {
        self.compressors.contains_key(&code)
    }

    /// Resolve a content-coding name to a registered type code.
    pub fn code_for_name(&self, name: &str) -> Option<i32> {
        let code = *self.names.get(&name.trim().to_ascii_lowercase())?;
        (code == compress_type::NOOP || self.contains(code)).then_some(code)
    }

    /// The HTTP content-coding name for a type code.
    pub fn name_for_code(&self, code: i32) -> Option<&str> {
        self.primary_names.get(&code).map(String::as_str)
    }

    /// Compress `data` with the compressor registered under `code`.
    ///
    /// [`compress_type::NOOP`] and empty input return `data` unchanged.
    pub fn compress(&self, code: i32, data: Bytes) -> Result<Bytes, CompressionError> {
        if code == compress_type::NOOP {
            return Ok(data);
        }
        let compressor = self
            .compressors
            .get(&code)
            .ok_or(CompressionError::NotRegistered(code))?;
        if data.is_empty() {
            return Ok(data);
        }
        compressor.compress(&data).map_err(CompressionError::Compress)
    }

    /// Decompress `data` with the compressor registered under `code`.
    ///
    /// [`compress_type::NOOP`] and empty input return `data` unchanged.
    pub fn decompress(&self, code: i32, data: Bytes) -> Result<Bytes, CompressionError> {
        if code == compress_type::NOOP {
            return Ok(data);
        }
        let compressor = self
            .compressors
            .get(&code)
            .ok_or(CompressionError::NotRegistered(code))?;
        if data.is_empty() {
            return Ok(data);
        }
        compressor
            .decompress(&data)
            .map_err(CompressionError::Decompress)
    }

    /// Pick the response compressor from an `Accept-Encoding` header.
    ///
    /// The first registered encoding in client order wins; `q=0` entries are
    /// skipped. Returns `None` when the header is absent or nothing in it is
    /// acceptable.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<i32> {
        let accept = accept?;

        for token in accept.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            // Parse "gzip;q=0.5" into encoding="gzip", q_value=Some("0.5")
            let (encoding, q_value) = match token.split_once(';') {
                Some((enc, params)) => {
                    let q = params.split(';').find_map(|p| p.trim().strip_prefix("q="));
                    (enc.trim(), q)
                }
                None => (token, None),
            };

            if let Some(q) = q_value {
                if q.trim().parse::<f32>().is_ok_and(|q| q == 0.0) {
                    continue;
                }
            }

            if let Some(code) = self.code_for_name(encoding) {
                return Some(code);
            }
        }

        None
    }
}
