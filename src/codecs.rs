//! Codec specifications, the codec registry, and the encode/decode pipeline.
//!
//! A codec is identified by a short string id plus a free-form configuration
//! map; the container treats every codec as a named black box with an
//! encode/decode contract. The registry is injectable so hosts can supply
//! their own implementations; a process-wide default registry ships with the
//! `null`, `gz`, and `zstd` codecs.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use ciborium::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BinPickleError, BinPickleResult};

/// A codec configuration as stored in the index: the codec id plus its
/// parameters, flattened into a single self-describing map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecSpec {
    /// Registry id of the codec (`"gz"`, `"zstd"`, ...).
    pub id: String,
    /// Codec parameters, keyed by name. Unknown keys round-trip verbatim.
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}

impl CodecSpec {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            config: BTreeMap::new(),
        }
    }

    /// Add a configuration option, builder style.
    pub fn with_option<S: Into<String>, V: Into<Value>>(mut self, key: S, value: V) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Read an integer option, if present and integral.
    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.config
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|n| i64::try_from(n).ok())
    }
}

/// An encode/decode transformation applied to buffer payloads.
///
/// `encode` output length is authoritative: whatever the codec returns is the
/// stored length. `decode` must invert `encode` exactly; the pipeline checks
/// the final decoded length against the index.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// The configuration that reconstructs this codec through a registry.
    fn spec(&self) -> CodecSpec;

    fn encode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>>;
}

/// Resolves codec configurations to codec instances.
pub trait CodecRegistry: Send + Sync {
    /// Instantiate the codec described by `spec`, or fail with
    /// [`BinPickleError::UnknownCodec`] naming the missing id.
    fn resolve(&self, spec: &CodecSpec) -> BinPickleResult<Arc<dyn Codec>>;
}

type CodecFactory = Arc<dyn Fn(&CodecSpec) -> BinPickleResult<Arc<dyn Codec>> + Send + Sync>;

/// String-id keyed codec registry.
///
/// Safe for concurrent use; registration replaces any previous factory for
/// the same id.
pub struct StandardRegistry {
    factories: RwLock<HashMap<String, CodecFactory>>,
}

impl StandardRegistry {
    /// An empty registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry preloaded with the built-in `null`, `gz`, and `zstd`
    /// codecs.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register("null", |_spec| Ok(Arc::new(NullCodec) as Arc<dyn Codec>));
        registry.register("gz", |spec| {
            let level = match spec.option_i64("level") {
                Some(level @ 0..=9) => level as u32,
                Some(level) => {
                    return Err(BinPickleError::codec(format!(
                        "gz compression level {level} out of range 0..=9"
                    )));
                }
                None => GzCodec::DEFAULT_LEVEL,
            };
            Ok(Arc::new(GzCodec { level }) as Arc<dyn Codec>)
        });
        registry.register("zstd", |spec| {
            let level = match spec.option_i64("level") {
                Some(level @ 1..=22) => level as i32,
                Some(level) => {
                    return Err(BinPickleError::codec(format!(
                        "zstd compression level {level} out of range 1..=22"
                    )));
                }
                None => ZstdCodec::DEFAULT_LEVEL,
            };
            Ok(Arc::new(ZstdCodec { level }) as Arc<dyn Codec>)
        });
        registry
    }

    /// Register a codec factory under `id`.
    pub fn register<F>(&self, id: &str, factory: F)
    where
        F: Fn(&CodecSpec) -> BinPickleResult<Arc<dyn Codec>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(id.to_string(), Arc::new(factory));
    }
}

impl CodecRegistry for StandardRegistry {
    fn resolve(&self, spec: &CodecSpec) -> BinPickleResult<Arc<dyn Codec>> {
        let factory = self
            .factories
            .read()
            .get(&spec.id)
            .cloned()
            .ok_or_else(|| BinPickleError::UnknownCodec(spec.id.clone()))?;
        factory(spec)
    }
}

/// The process-wide default registry used when no registry is injected.
pub fn default_registry() -> Arc<StandardRegistry> {
    static REGISTRY: OnceLock<Arc<StandardRegistry>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(StandardRegistry::with_builtins())))
}

/// Passthrough codec.
#[derive(Debug)]
pub struct NullCodec;

impl Codec for NullCodec {
    fn spec(&self) -> CodecSpec {
        CodecSpec::new("null")
    }

    fn encode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Zlib (gzip-compatible) codec.
#[derive(Debug)]
pub struct GzCodec {
    level: u32,
}

impl GzCodec {
    pub const DEFAULT_LEVEL: u32 = 9;
}

impl Codec for GzCodec {
    fn spec(&self) -> CodecSpec {
        CodecSpec::new("gz").with_option("level", self.level as i64)
    }

    fn encode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(BinPickleError::codec)
    }

    fn decode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(BinPickleError::codec)?;
        Ok(out)
    }
}

/// Zstandard codec.
#[derive(Debug)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub const DEFAULT_LEVEL: i32 = 3;
}

impl Codec for ZstdCodec {
    fn spec(&self) -> CodecSpec {
        CodecSpec::new("zstd").with_option("level", self.level as i64)
    }

    fn encode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        zstd::stream::encode_all(data, self.level).map_err(BinPickleError::codec)
    }

    fn decode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        zstd::stream::decode_all(data).map_err(BinPickleError::codec)
    }
}

/// A resolved codec chain.
///
/// Encoding applies the codecs first-to-last; decoding applies their inverses
/// last-to-first. An empty chain is the identity.
#[derive(Debug)]
pub struct CodecPipeline {
    steps: Vec<Arc<dyn Codec>>,
}

impl CodecPipeline {
    /// Resolve a chain of codec specs against a registry.
    pub fn resolve(registry: &dyn CodecRegistry, specs: &[CodecSpec]) -> BinPickleResult<Self> {
        let steps = specs
            .iter()
            .map(|spec| registry.resolve(spec))
            .collect::<BinPickleResult<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// The identity pipeline.
    pub fn identity() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The configuration chain that reconstructs this pipeline, in encode
    /// order. This is what the writer records in the index.
    pub fn specs(&self) -> Vec<CodecSpec> {
        self.steps.iter().map(|codec| codec.spec()).collect()
    }

    /// Apply the chain to `data`. The returned length is the authoritative
    /// stored length.
    pub fn encode(&self, data: &[u8]) -> BinPickleResult<Vec<u8>> {
        let mut out = data.to_vec();
        for codec in &self.steps {
            out = codec.encode(&out)?;
        }
        Ok(out)
    }

    /// Reverse the chain over `data`, which may be a mapped region. Fails
    /// with [`BinPickleError::DecodeMismatch`] unless the result has exactly
    /// `dec_length` bytes.
    pub fn decode(&self, data: &[u8], dec_length: u64) -> BinPickleResult<Vec<u8>> {
        let mut out = data.to_vec();
        for codec in self.steps.iter().rev() {
            out = codec.decode(&out)?;
        }
        if out.len() as u64 != dec_length {
            return Err(BinPickleError::DecodeMismatch {
                expected: dec_length,
                actual: out.len() as u64,
            });
        }
        Ok(out)
    }
}
