//! Record value codecs, cached per schema pair.
//!
//! Log records carry the writer's schema id; the storage node decodes with a
//! reader schema that may be newer. Building a codec for a (writer, reader)
//! pair is expensive, so the registry constructs each one once and hands out
//! shared instances after that. Construction happens on first use, never up
//! front, and a one-time self-probe downgrades the registry to reporting
//! unverified if the factory cannot round-trip a known payload.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use bytes::Bytes;
use strata_core::SchemaId;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors from codec construction or use.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No codec can be built for the schema pair.
    #[error("unsupported schema pair {pair}: {reason}")]
    UnsupportedSchema {
        /// The pair that failed.
        pair: SchemaPair,
        /// Failure detail.
        reason: String,
    },

    /// A payload could not be decoded.
    #[error("malformed payload under schema pair {pair}: {reason}")]
    Malformed {
        /// The pair in use.
        pair: SchemaPair,
        /// Failure detail.
        reason: String,
    },
}

/// A writer/reader schema id pair identifying one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaPair {
    /// Schema the record was written with.
    pub writer: SchemaId,
    /// Schema the reader wants the value in.
    pub reader: SchemaId,
}

impl SchemaPair {
    /// Creates a schema pair.
    #[must_use]
    pub const fn new(writer: SchemaId, reader: SchemaId) -> Self {
        Self { writer, reader }
    }

    /// A pair reading with the same schema it was written with.
    #[must_use]
    pub const fn same(schema: SchemaId) -> Self {
        Self {
            writer: schema,
            reader: schema,
        }
    }
}

impl std::fmt::Display for SchemaPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.writer.get(), self.reader.get())
    }
}

/// Transforms record values between wire and storage form for one pair.
pub trait RecordCodec: Send + Sync {
    /// Decodes a wire payload into its storage form.
    ///
    /// # Errors
    /// Returns [`CodecError::Malformed`] if the payload does not match the
    /// writer schema.
    fn decode(&self, payload: &Bytes) -> CodecResult<Bytes>;

    /// Encodes a storage value into wire form under the writer schema.
    ///
    /// # Errors
    /// Returns [`CodecError::Malformed`] if the value cannot be represented.
    fn encode(&self, value: &Bytes) -> CodecResult<Bytes>;
}

/// Builds codecs for schema pairs.
pub trait CodecFactory: Send + Sync {
    /// Constructs the codec for a pair.
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedSchema`] if no codec exists for the
    /// pair.
    fn create(&self, pair: SchemaPair) -> CodecResult<Arc<dyn RecordCodec>>;
}

/// Caches one codec per schema pair, built on first use.
pub struct CodecRegistry {
    factory: Box<dyn CodecFactory>,
    cache: RwLock<HashMap<SchemaPair, Arc<dyn RecordCodec>>>,
    /// One-time factory self-probe result.
    verified: OnceLock<bool>,
}

impl CodecRegistry {
    /// Creates a registry over the given factory. No codecs are built yet.
    #[must_use]
    pub fn new(factory: Box<dyn CodecFactory>) -> Self {
        Self {
            factory,
            cache: RwLock::new(HashMap::new()),
            verified: OnceLock::new(),
        }
    }

    /// Returns the codec for a pair, building and caching it on first use.
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedSchema`] if the factory cannot build
    /// the pair. Failures are not cached; a later registration of the schema
    /// can make the same call succeed.
    ///
    /// # Panics
    /// Panics if the cache lock is poisoned.
    pub fn codec_for(&self, pair: SchemaPair) -> CodecResult<Arc<dyn RecordCodec>> {
        if let Some(codec) = self
            .cache
            .read()
            .expect("codec cache lock poisoned")
            .get(&pair)
        {
            return Ok(Arc::clone(codec));
        }

        let mut cache = self.cache.write().expect("codec cache lock poisoned");
        // Another thread may have built it while we waited for the lock.
        if let Some(codec) = cache.get(&pair) {
            return Ok(Arc::clone(codec));
        }
        let codec = self.factory.create(pair)?;
        debug!(%pair, "built codec");
        cache.insert(pair, Arc::clone(&codec));
        Ok(codec)
    }

    /// Returns how many codecs have been built.
    ///
    /// # Panics
    /// Panics if the cache lock is poisoned.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().expect("codec cache lock poisoned").len()
    }

    /// Returns true if the factory passed its one-time round-trip probe.
    ///
    /// The probe builds a same-schema codec and round-trips a fixed payload
    /// through it. It runs at most once per registry; an unverified registry
    /// still serves codecs, callers decide whether to trust them.
    pub fn is_verified(&self, probe_schema: SchemaId) -> bool {
        *self.verified.get_or_init(|| {
            let pair = SchemaPair::same(probe_schema);
            let payload = Bytes::from_static(b"codec-self-probe");
            let result = self
                .factory
                .create(pair)
                .and_then(|codec| codec.decode(&codec.encode(&payload)?));
            match result {
                Ok(round_tripped) if round_tripped == payload => true,
                Ok(_) => {
                    warn!(%pair, "codec probe returned different bytes");
                    false
                }
                Err(err) => {
                    warn!(%pair, %err, "codec probe failed");
                    false
                }
            }
        })
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("cached", &self.cached_count())
            .finish_non_exhaustive()
    }
}

/// Codec that passes payloads through unchanged.
#[derive(Debug, Clone, Copy)]
struct IdentityCodec;

impl RecordCodec for IdentityCodec {
    fn decode(&self, payload: &Bytes) -> CodecResult<Bytes> {
        Ok(payload.clone())
    }

    fn encode(&self, value: &Bytes) -> CodecResult<Bytes> {
        Ok(value.clone())
    }
}

/// Factory for byte-transparent codecs, for stores whose values are opaque
/// bytes end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodecFactory;

impl CodecFactory for IdentityCodecFactory {
    fn create(&self, _pair: SchemaPair) -> CodecResult<Arc<dyn RecordCodec>> {
        Ok(Arc::new(IdentityCodec))
    }
}
