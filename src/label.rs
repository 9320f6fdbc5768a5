//! Label keys: the identity of a metric time series.
//!
//! A [`LabelKey`] is an immutable, ordered sequence of strings.  It is used both for the label
//! *names* of a metric family (validated once, at construction) and for the label *values* that
//! identify a single child time series within a family.
//!
//! Keys are built compositionally: prepending values to an existing key, or concatenating two
//! keys, shares the underlying string storage of the inputs instead of copying it.  A key built
//! from a registry-wide static prefix, a metric-level static middle, and per-series values holds
//! three reference-counted segments, and every child of the same collector shares the first two.
//! Equality and hashing are defined purely over the flattened content, never over how many
//! segments happen to compose it.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;
use rapidhash::fast::RapidHasher;

/// An allocation-optimized string for label content.
///
/// Lets callers pass `&'static str` label values without paying for an owned `String`.
pub type SharedString = Cow<'static, str>;

/// One contiguous run of values owned by a single composition step.
type Segment = Arc<[SharedString]>;

static EMPTY: Lazy<LabelKey> = Lazy::new(|| LabelKey::from_segments(Vec::new()));

/// An immutable, ordered sequence of label strings.
///
/// Cloning a `LabelKey` is cheap (two `Arc` bumps), as is composing one out of existing keys via
/// [`prepend`](LabelKey::prepend) or [`concat`](LabelKey::concat).  The full content hash is
/// computed once at construction, so map lookups and equality checks against unequal keys
/// short-circuit without walking the strings themselves.
#[derive(Clone)]
pub struct LabelKey {
    segments: Arc<[Segment]>,
    len: usize,
    hash: u64,
}

impl LabelKey {
    /// Returns the empty key.
    ///
    /// This is the identity of the unlabelled child of every collector.
    pub fn empty() -> LabelKey {
        EMPTY.clone()
    }

    /// Creates a key from an ordered sequence of values.
    pub fn from_values<I, S>(values: I) -> LabelKey
    where
        I: IntoIterator<Item = S>,
        S: Into<SharedString>,
    {
        let own = values.into_iter().map(Into::into).collect::<Vec<_>>();
        if own.is_empty() {
            return LabelKey::empty();
        }

        LabelKey::from_segments(vec![Arc::from(own)])
    }

    fn from_segments(segments: Vec<Segment>) -> LabelKey {
        let len = segments.iter().map(|s| s.len()).sum();
        let hash = content_hash(segments.iter().flat_map(|s| s.iter()));

        LabelKey { segments: Arc::from(segments), len, hash }
    }

    /// Creates a new key with `values` in front of this key's content.
    ///
    /// The existing key's segments are shared with the result, not copied: only the newly
    /// prepended values are materialized.
    pub fn prepend<I, S>(&self, values: I) -> LabelKey
    where
        I: IntoIterator<Item = S>,
        S: Into<SharedString>,
    {
        let own = values.into_iter().map(Into::into).collect::<Vec<_>>();
        if own.is_empty() {
            return self.clone();
        }

        let mut segments = Vec::with_capacity(1 + self.segments.len());
        segments.push(Arc::from(own));
        segments.extend(self.segments.iter().cloned());

        LabelKey::from_segments(segments)
    }

    /// Creates a new key holding this key's content followed by `other`'s content.
    ///
    /// Both inputs' segments are shared with the result, not copied.
    pub fn concat(&self, other: &LabelKey) -> LabelKey {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut segments = Vec::with_capacity(self.segments.len() + other.segments.len());
        segments.extend(self.segments.iter().cloned());
        segments.extend(other.segments.iter().cloned());

        LabelKey::from_segments(segments)
    }

    /// Number of values in the flattened sequence.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the flattened sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates the flattened values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().flat_map(|s| s.iter().map(|v| v.as_ref()))
    }

    /// Whether any value in the sequence equals `value`.
    pub fn contains(&self, value: &str) -> bool {
        self.iter().any(|v| v == value)
    }

    /// Materializes the flattened content as owned strings.
    ///
    /// This copies every value and is intended for diagnostics and exposition output only.
    /// Identity and lookup paths should use [`iter`](LabelKey::iter), [`eq`](PartialEq::eq), and
    /// the cached hash instead.
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(ToOwned::to_owned).collect()
    }

    /// The content hash computed at construction.
    pub fn get_hash(&self) -> u64 {
        self.hash
    }
}

fn content_hash<'a, I>(values: I) -> u64
where
    I: Iterator<Item = &'a SharedString>,
{
    let mut hasher = RapidHasher::default();
    for value in values {
        hasher.write(value.as_bytes());
        // Separator so that ["ab"] and ["a", "b"] hash differently.
        hasher.write_u8(0x1f);
    }
    hasher.finish()
}

impl PartialEq for LabelKey {
    fn eq(&self, other: &LabelKey) -> bool {
        if self.hash != other.hash || self.len != other.len {
            return false;
        }

        self.iter().eq(other.iter())
    }
}

impl Eq for LabelKey {}

impl Hash for LabelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for LabelKey {
    // Render the flattened content; the segment topology is an implementation detail.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<S> FromIterator<S> for LabelKey
where
    S: Into<SharedString>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> LabelKey {
        LabelKey::from_values(iter)
    }
}

/// A pass-through hasher for pre-hashed [`LabelKey`]s.
///
/// `LabelKey` computes its content hash at construction and its `Hash` impl only ever calls
/// `write_u64` with that value.  Using this hasher as the map hasher means lookups via
/// `raw_entry` with the precomputed hash agree with the map's own hashing.
///
/// # Panics
///
/// Panics if any write method other than `write_u64` is used, or if `finish` is called before a
/// hash has been written; this hasher is only meaningful for pre-hashed key types.
#[derive(Debug, Default)]
pub struct KeyHasher {
    hash: Option<u64>,
}

impl Hasher for KeyHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.hash.expect("KeyHasher::finish() called without write_u64()")
    }

    fn write(&mut self, _bytes: &[u8]) {
        panic!("KeyHasher only supports write_u64() for pre-hashed key types");
    }

    #[inline(always)]
    fn write_u64(&mut self, i: u64) {
        self.hash = Some(i);
    }
}
