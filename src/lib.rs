//! # rt-cache
//!
//! A read-through cache façade with tag-based invalidation.
//!
//! Given a key, a set of tags and a fallback computation, [`ReadThroughCache::read_through()`] either decodes the
//! cached value or runs the fallback, stores its result under the key and tags, and hands it back. The caller never
//! deals with cache misses itself. [`ReadThroughCache::purge()`] drops an entry by its key or every entry carrying a
//! tag.
//!
//! # The Basics
//!
//! The cache operates on the following principles:
//!
//! - It is store-agnostic. The actual storage, along with the tag bookkeeping, is behind the [`TaggedCacheClient`]
//!   trait. [`MemoryTaggedClient`](memory::MemoryTaggedClient) is an in-process implementation over the
//!   [moka](https://crates.io/crates/moka) cache.
//! - It is value-agnostic. Anything `serde` can serialize is cached through a [`Codec`](codec::Codec); postcard is
//!   used by default.
//! - Every entry must be tagged. Tags are the only bulk invalidation handle, so a read-through with an empty tag set
//!   is rejected.
//! - Nothing happens in the background. A call awaits the cache read, the fallback on a miss, and the cache write, in
//!   this order, and then returns.
//! - Nothing is retried. Every failure is reported to the caller along with the key and tags involved, see
//!   [`ReadThroughError`](error::ReadThroughError).
//!
//! # Misses And Writes
//!
//! By default a failure to write the freshly computed value fails the call, even though the value itself was
//! obtained. [`WriteFailurePolicy::BestEffort`](types::WriteFailurePolicy) turns cache writes into best-effort ones.
//!
//! Concurrent misses of the same key each run their fallback. With `single_flight(true)` the cache serializes them
//! per key so that only the first one reaches the source while the others are served from the freshly populated
//! entry.

pub mod cache;
pub mod codec;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::ReadThroughCache;
#[doc(inline)]
pub use traits::TaggedCacheClient;

pub mod prelude {
    pub use crate::cache::ReadThroughCache;
    pub use crate::codec::Codec;
    pub use crate::codec::CodecError;
    pub use crate::codec::JsonCodec;
    pub use crate::codec::PostcardCodec;
    pub use crate::error::BoxError;
    pub use crate::error::ErrorKind;
    pub use crate::error::ReadThroughError;
    pub use crate::memory::MemoryClientError;
    pub use crate::memory::MemoryTaggedClient;
    pub use crate::traits::CacheMiss;
    pub use crate::traits::TaggedCacheClient;
    pub use crate::types::*;
}
