use async_trait::async_trait;
use std::sync::Arc;

use crate::types::TagSet;

/// Lets the cache tell a well-defined "nothing stored here" condition from every other failure of a client.
pub trait CacheMiss {
    fn is_cache_miss(&self) -> bool;
}

// For types that talk to the actual cache store. Tag bookkeeping and purge cascading are theirs, not ours.
#[async_trait]
pub trait TaggedCacheClient: Send + Sync + 'static {
    /// Must report [`CacheMiss::is_cache_miss()`] as `true` when a `get` or `delete` found no live entry.
    type Error: std::error::Error + CacheMiss + Send + Sync + 'static;

    async fn get(&self, key: &str, tags: &TagSet) -> Result<Vec<u8>, Self::Error>;

    /// Overwrites any existing entry at `key` and (re)associates it with `tags`.
    async fn set(&self, key: &str, value: Vec<u8>, tags: &TagSet) -> Result<(), Self::Error>;

    /// `key_or_tag` is either an entry key or a tag. Deleting a tag drops all entries stored with it.
    async fn delete(&self, key_or_tag: &str) -> Result<(), Self::Error>;
}

#[async_trait]
impl<TC> TaggedCacheClient for Arc<TC>
where
    TC: TaggedCacheClient,
{
    type Error = TC::Error;

    async fn get(&self, key: &str, tags: &TagSet) -> Result<Vec<u8>, Self::Error> {
        (**self).get(key, tags).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, tags: &TagSet) -> Result<(), Self::Error> {
        (**self).set(key, value, tags).await
    }

    async fn delete(&self, key_or_tag: &str) -> Result<(), Self::Error> {
        (**self).delete(key_or_tag).await
    }
}
