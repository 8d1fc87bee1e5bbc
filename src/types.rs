use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Labels attached to a cache entry at write time.
///
/// Tags are the only bulk invalidation handle: purging a tag drops every entry that was stored with it. The core does
/// not enforce ordering or uniqueness; a [`TaggedCacheClient`](crate::traits::TaggedCacheClient) implementation may
/// deduplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }
}

impl<S> FromIterator<S> for TagSet
where
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<S, const N: usize> From<[S; N]> for TagSet
where
    S: Into<String>,
{
    fn from(tags: [S; N]) -> Self {
        Self::new(tags)
    }
}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        Self(tags)
    }
}

impl Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(" "))
    }
}

/// How a successful read-through resolved the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Decoded from the cached bytes.
    Hit,
    /// Computed by the fallback and written to the cache.
    Populated,
}

/// What to do when writing a freshly computed value to the cache fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteFailurePolicy {
    /// Fail the whole call; the computed value is not handed to the caller.
    #[default]
    Strict,
    /// Log the failure and hand the computed value over as if it had been cached.
    BestEffort,
}
