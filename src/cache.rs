use crate::prelude::*;
use fieldx::fxstruct;
use moka::{future::Cache, ops::compute::Op};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

type FlightLocks = Cache<String, Arc<FlightSlot>>;

// Per-key lock of the single-flight mode. The slot stays in the table for as long as any task has joined it, no matter
// how long the fallback takes. A caller cancelled while waiting leaves its count behind and the slot is then reused by
// later misses of the key.
#[derive(Debug, Default)]
struct FlightSlot {
    lock:  Mutex<()>,
    users: AtomicUsize,
}

/// The read-through façade over a [`TaggedCacheClient`].
///
/// ```ignore
/// let cache = ReadThroughCache::<MyClient>::builder()
///     .client(my_client)
///     .name("users")
///     .build()?;
///
/// let mut user = User::default();
/// cache
///     .read_through("user:42", &TagSet::from(["user", "region:eu"]), &mut user, || async {
///         db.load_user(42).await
///     })
///     .await?;
///
/// // Every entry stored with the "user" tag is gone after this.
/// cache.purge("user").await?;
/// ```
#[fxstruct(
    sync,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`ReadThroughCache`].", "", "See [`ReadThroughCache::builder()`] method."),
        method_doc("Implement builder pattern for [`ReadThroughCache`]."),
    )
)]
pub struct ReadThroughCache<TC, C = PostcardCodec>
where
    TC: TaggedCacheClient,
    C: Codec,
{
    #[fieldx(get(clone), builder(vis(pub), required, into))]
    client: Arc<TC>,

    #[fieldx(get, default(C::default()))]
    codec: C,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get(copy), default("read-through"))]
    name: &'static str,

    #[fieldx(get(copy), default(WriteFailurePolicy::Strict))]
    write_failure_policy: WriteFailurePolicy,

    /// Serialize concurrent misses of the same key so that only one of them runs the fallback.
    #[fieldx(get(copy), default(false))]
    single_flight: bool,

    #[fieldx(lazy, private, get(clone), builder(off))]
    flight_locks: Arc<FlightLocks>,
}

impl<TC, C> ReadThroughCache<TC, C>
where
    TC: TaggedCacheClient,
    C: Codec,
{
    fn build_flight_locks(&self) -> Arc<FlightLocks> {
        Arc::new(Cache::builder().name(self.name()).build())
    }

    /// Resolve the value of `key` into `out`, either from the cache or from `fallback`.
    ///
    /// On a miss `fallback` is invoked exactly once, its value is encoded and written to the cache under `key` and
    /// `tags`, and only then is it moved into `out`. On any error `out` is left untouched.
    ///
    /// # Errors
    ///
    /// See [`ReadThroughError`] for the possible failures and what state each of them leaves behind.
    #[instrument(level = "debug", skip(self, out, fallback), fields(cache = self.name()))]
    pub async fn read_through<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        out: &mut T,
        fallback: F,
    ) -> Result<Outcome, ReadThroughError<TC::Error>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        let (value, outcome) = self.resolve(key, tags, fallback).await?;
        *out = value;
        Ok(outcome)
    }

    /// Same as [`read_through()`](Self::read_through) for callers without a pre-existing binding.
    ///
    /// # Errors
    ///
    /// See [`ReadThroughError`].
    #[instrument(level = "debug", skip(self, fallback), fields(cache = self.name()))]
    pub async fn fetch<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        fallback: F,
    ) -> Result<T, ReadThroughError<TC::Error>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        Ok(self.resolve(key, tags, fallback).await?.0)
    }

    /// Delete the entry at `key_or_tag`, or every entry stored with the tag `key_or_tag`.
    ///
    /// The client's result is returned as is. In particular, when nothing matched the error reports
    /// [`CacheMiss::is_cache_miss()`] as `true` and may be treated as a normal outcome.
    #[instrument(level = "debug", skip(self), fields(cache = self.name()))]
    pub async fn purge(&self, key_or_tag: &str) -> Result<(), TC::Error> {
        self.client().delete(key_or_tag).await.inspect_err(|err| {
            if err.is_cache_miss() {
                debug!("nothing to purge");
            }
            else {
                warn!(error = %err, "purge failed");
            }
        })
    }

    async fn resolve<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        fallback: F,
    ) -> Result<(T, Outcome), ReadThroughError<TC::Error>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        if tags.is_empty() {
            return Err(ReadThroughError::InvalidArgument("empty tag set"));
        }

        match self.client().get(key, tags).await {
            Ok(bytes) => Ok((self.decode_hit(key, tags, &bytes)?, Outcome::Hit)),
            Err(err) if err.is_cache_miss() => {
                debug!("cache miss");
                if self.single_flight() {
                    self.populate_single_flight(key, tags, fallback).await
                }
                else {
                    Ok((self.populate(key, tags, fallback).await?, Outcome::Populated))
                }
            }
            Err(err) => Err(ReadThroughError::CacheRead {
                key:    key.to_owned(),
                tags:   tags.clone(),
                source: err,
            }),
        }
    }

    fn decode_hit<T>(&self, key: &str, tags: &TagSet, bytes: &[u8]) -> Result<T, ReadThroughError<TC::Error>>
    where
        T: DeserializeOwned,
    {
        let value = self.codec().decode(bytes).map_err(|source| ReadThroughError::Decode {
            key: key.to_owned(),
            tags: tags.clone(),
            source,
        })?;
        debug!(bytes = bytes.len(), "cache hit");
        Ok(value)
    }

    async fn populate<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        fallback: F,
    ) -> Result<T, ReadThroughError<TC::Error>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        let value = fallback().await.map_err(|err| ReadThroughError::SourceFetch {
            key:    key.to_owned(),
            tags:   tags.clone(),
            source: err.into(),
        })?;

        let bytes = self.codec().encode(&value).map_err(|source| ReadThroughError::Encode {
            key: key.to_owned(),
            tags: tags.clone(),
            source,
        })?;

        if let Err(err) = self.client().set(key, bytes, tags).await {
            match self.write_failure_policy() {
                WriteFailurePolicy::Strict => {
                    return Err(ReadThroughError::CacheWrite {
                        key:    key.to_owned(),
                        tags:   tags.clone(),
                        source: err,
                    })
                }
                WriteFailurePolicy::BestEffort => {
                    warn!(error = %err, "cache write failed, returning uncached value");
                }
            }
        }
        else {
            debug!("cache populated");
        }

        Ok(value)
    }

    async fn populate_single_flight<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        fallback: F,
    ) -> Result<(T, Outcome), ReadThroughError<TC::Error>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        let slot = self.join_flight(key).await;
        let result = {
            let _guard = slot.lock.lock().await;
            self.reread_or_populate(key, tags, fallback).await
        };
        self.leave_flight(key, &slot).await;
        result
    }

    // Another task may have populated the key while we were waiting for the lock, hence the second lookup.
    async fn reread_or_populate<T, F, Fut, FE>(
        &self,
        key: &str,
        tags: &TagSet,
        fallback: F,
    ) -> Result<(T, Outcome), ReadThroughError<TC::Error>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FE>>,
        FE: Into<BoxError>,
    {
        match self.client().get(key, tags).await {
            Ok(bytes) => Ok((self.decode_hit(key, tags, &bytes)?, Outcome::Hit)),
            Err(err) if err.is_cache_miss() => Ok((self.populate(key, tags, fallback).await?, Outcome::Populated)),
            Err(err) => Err(ReadThroughError::CacheRead {
                key:    key.to_owned(),
                tags:   tags.clone(),
                source: err,
            }),
        }
    }

    // Joining and leaving are both compute operations on the key, which moka runs one at a time per key; the count is
    // therefore exact.
    async fn join_flight(&self, key: &str) -> Arc<FlightSlot> {
        let locks = self.flight_locks();
        locks
            .entry_by_ref(key)
            .and_upsert_with(|current| async move {
                let slot = current.map(|entry| entry.into_value()).unwrap_or_default();
                slot.users.fetch_add(1, Ordering::AcqRel);
                slot
            })
            .await
            .into_value()
    }

    async fn leave_flight(&self, key: &str, slot: &Arc<FlightSlot>) {
        let locks = self.flight_locks();
        locks
            .entry_by_ref(key)
            .and_compute_with(|current| async move {
                match current {
                    Some(current) if Arc::ptr_eq(current.value(), slot) => {
                        if slot.users.fetch_sub(1, Ordering::AcqRel) == 1 {
                            Op::Remove
                        }
                        else {
                            Op::Nop
                        }
                    }
                    _ => Op::Nop,
                }
            })
            .await;
    }
}
