use thiserror::Error;

use crate::codec::CodecError;
use crate::types::TagSet;

/// Type-erased error of a fallback computation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure of [`ReadThroughCache::read_through()`](crate::ReadThroughCache::read_through).
///
/// `E` is the error type of the [`TaggedCacheClient`](crate::traits::TaggedCacheClient). All variants but
/// `InvalidArgument` carry the key and tags of the call they came from. None of them are retried by the cache.
#[derive(Debug, Error)]
pub enum ReadThroughError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Caller misuse, reported before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The client failed for a reason other than a cache miss. The fallback was not invoked.
    #[error("failed to get cache(key={key}, tags={tags})")]
    CacheRead {
        key:    String,
        tags:   TagSet,
        #[source]
        source: E,
    },

    /// The fallback failed. The cache was not touched.
    #[error("get data from source(key={key}, tags={tags})")]
    SourceFetch {
        key:    String,
        tags:   TagSet,
        #[source]
        source: BoxError,
    },

    /// The computed value could not be serialized; check the value type. Neither the cache nor the output were
    /// touched.
    #[error("encode value for cache(key={key}, tags={tags})")]
    Encode {
        key:    String,
        tags:   TagSet,
        #[source]
        source: CodecError,
    },

    /// Cached bytes could not be decoded into the requested type. Either a codec/type mismatch or corrupted data.
    #[error("decode cache(key={key}, tags={tags})")]
    Decode {
        key:    String,
        tags:   TagSet,
        #[source]
        source: CodecError,
    },

    /// Writing the computed value failed; the value was discarded.
    #[error("failed to set cache(key={key}, tags={tags})")]
    CacheWrite {
        key:    String,
        tags:   TagSet,
        #[source]
        source: E,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    CacheRead,
    SourceFetch,
    Encode,
    Decode,
    CacheWrite,
}

impl<E> ReadThroughError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::CacheRead { .. } => ErrorKind::CacheRead,
            Self::SourceFetch { .. } => ErrorKind::SourceFetch,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::CacheWrite { .. } => ErrorKind::CacheWrite,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::CacheRead { key, .. }
            | Self::SourceFetch { key, .. }
            | Self::Encode { key, .. }
            | Self::Decode { key, .. }
            | Self::CacheWrite { key, .. } => Some(key),
        }
    }

    pub fn tags(&self) -> Option<&TagSet> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::CacheRead { tags, .. }
            | Self::SourceFetch { tags, .. }
            | Self::Encode { tags, .. }
            | Self::Decode { tags, .. }
            | Self::CacheWrite { tags, .. } => Some(tags),
        }
    }
}
