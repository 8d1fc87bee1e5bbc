//! In-process [`TaggedCacheClient`] backed by the [moka](https://crates.io/crates/moka) cache.
//!
//! Tags are invalidated by generation: every known tag has a generation number and each entry remembers the generations
//! of its tags as of the moment it was written. An entry is fresh only while all of its tags are still known at those
//! generations. Purging a tag forgets it, which turns every entry stamped with it stale, and drops those entries.
//!
//! A tag is known only while some stored entry is stamped with its current generation. Once the last such entry is
//! gone, whether evicted, deleted by key or replaced, the tag is forgotten too and purging it reports a miss.

use crate::prelude::*;
use async_trait::async_trait;
use fieldx::fxstruct;
use moka::{future::Cache, ops::compute::Op, policy::EvictionPolicy};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::trace;

type Entries = Cache<String, Arc<StoredEntry>>;
type TagTable = Mutex<HashMap<String, TagState>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryClientError {
    #[error("cache miss")]
    CacheMiss,
}

impl CacheMiss for MemoryClientError {
    fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }
}

#[derive(Debug)]
struct StoredEntry {
    value: Vec<u8>,
    // Tag name and its generation at the time of the write.
    tags:  Vec<(String, u64)>,
}

impl StoredEntry {
    fn carries(&self, tag: &str) -> bool {
        self.tags.iter().any(|(t, _)| t == tag)
    }

    fn stamped(&self, tag: &str, generation: u64) -> bool {
        self.tags.iter().any(|(t, g)| t == tag && *g == generation)
    }
}

#[derive(Debug)]
struct TagState {
    generation: u64,
    // Stored entries stamped with `generation`.
    live:       usize,
}

#[fxstruct(sync, no_new, default(off), builder)]
pub struct MemoryTaggedClient {
    #[fieldx(get(copy), default(10_000))]
    max_capacity: u64,

    #[fieldx(lazy, private, get(clone), builder(off))]
    entries: Arc<Entries>,

    #[fieldx(private, get, builder(off), default(Arc::new(Mutex::new(HashMap::new()))))]
    tags: Arc<TagTable>,

    // Generations are never reused: a forgotten tag written again must not revive entries stamped before the purge.
    #[fieldx(private, get, builder(off), default(AtomicU64::new(1)))]
    next_generation: AtomicU64,
}

impl MemoryTaggedClient {
    fn build_entries(&self) -> Arc<Entries> {
        let tags = Arc::clone(self.tags());
        Arc::new(
            Cache::builder()
                .max_capacity(self.max_capacity())
                .name("tagged-memory")
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .eviction_listener(move |key: Arc<String>, entry: Arc<StoredEntry>, cause| {
                    trace!(key = %key, ?cause, "entry removed");
                    release_tags(&tags, &entry);
                })
                .build(),
        )
    }

    /// Number of stored entries. An entry written concurrently with a purge of its tag may be counted until it is
    /// accessed.
    pub async fn entry_count(&self) -> u64 {
        let entries = self.entries();
        entries.run_pending_tasks().await;
        entries.entry_count()
    }

    /// Checks if there is an entry at `key` without validating its tags.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn is_fresh(&self, entry: &StoredEntry) -> bool {
        let tags = self.tags().lock();
        entry
            .tags
            .iter()
            .all(|(tag, generation)| tags.get(tag).is_some_and(|state| state.generation == *generation))
    }

    // Only removes the entry if it is still the one that was looked at; a concurrent `set` may have replaced it.
    async fn remove_unchanged(&self, key: &str, seen: &Arc<StoredEntry>) {
        let entries = self.entries();
        entries
            .entry_by_ref(key)
            .and_compute_with(|current| async move {
                match current {
                    Some(current) if Arc::ptr_eq(current.value(), seen) => Op::Remove,
                    _ => Op::Nop,
                }
            })
            .await;
    }

    async fn drop_stamped(&self, tag: &str, generation: u64) {
        let stale: Vec<_> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.stamped(tag, generation))
            .collect();

        trace!(tag, count = stale.len(), "dropping entries of a purged tag");

        for (key, entry) in stale {
            self.remove_unchanged(key.as_str(), &entry).await;
        }
    }
}

fn release_tags(tags: &TagTable, entry: &StoredEntry) {
    let mut tags = tags.lock();
    for (tag, generation) in &entry.tags {
        let drained = match tags.get_mut(tag) {
            Some(state) if state.generation == *generation => {
                state.live = state.live.saturating_sub(1);
                state.live == 0
            }
            _ => false,
        };
        if drained {
            tags.remove(tag);
        }
    }
}

#[async_trait]
impl TaggedCacheClient for MemoryTaggedClient {
    type Error = MemoryClientError;

    async fn get(&self, key: &str, tags: &TagSet) -> Result<Vec<u8>, Self::Error> {
        let entry = self.entries().get(key).await.ok_or(MemoryClientError::CacheMiss)?;

        if !self.is_fresh(&entry) {
            trace!(key, "dropping stale entry");
            self.remove_unchanged(key, &entry).await;
            return Err(MemoryClientError::CacheMiss);
        }

        // Not written with all of the requested tags; a miss, but the entry itself is valid.
        if !tags.iter().all(|tag| entry.carries(tag)) {
            return Err(MemoryClientError::CacheMiss);
        }

        Ok(entry.value.clone())
    }

    async fn set(&self, key: &str, value: Vec<u8>, tags: &TagSet) -> Result<(), Self::Error> {
        let stamped = {
            let mut known = self.tags().lock();
            tags.iter()
                .map(|tag| {
                    let state = known.entry(tag.to_owned()).or_insert_with(|| TagState {
                        generation: self.next_generation().fetch_add(1, Ordering::Relaxed),
                        live:       0,
                    });
                    state.live += 1;
                    (tag.to_owned(), state.generation)
                })
                .collect()
        };

        self.entries()
            .insert(key.to_owned(), Arc::new(StoredEntry { value, tags: stamped }))
            .await;
        Ok(())
    }

    async fn delete(&self, key_or_tag: &str) -> Result<(), Self::Error> {
        let removed_key = self.entries().remove(key_or_tag).await.is_some();

        // Forgetting the tag is what invalidates its entries; dropping them right away keeps other tags' counts exact.
        let purged = self.tags().lock().remove(key_or_tag);
        let purged_tag = purged.is_some();
        if let Some(state) = purged {
            self.drop_stamped(key_or_tag, state.generation).await;
        }

        trace!(key_or_tag, removed_key, purged_tag, "delete");

        if removed_key || purged_tag {
            Ok(())
        }
        else {
            Err(MemoryClientError::CacheMiss)
        }
    }
}
