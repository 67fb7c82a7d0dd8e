//! Read access to compiled DNS data.
//!
//! Two backends serve the same key space: an immutable hash-table
//! file produced by the offline compiler (`hashfile`), and a
//! log-structured key-value store that can be appended to and
//! replayed (`kv`).  Everything above them goes through the [`Store`]
//! trait, which hands out values as borrowed slices tied to the
//! reader's lifetime.

use std::fmt;
use std::sync::Arc;

pub mod frame;
pub mod hashfile;
pub mod key;
pub mod kv;
pub mod location;

pub use crate::frame::{Frame, FrameError, FrameIter, RecordFrame};
pub use crate::hashfile::HashFile;
pub use crate::kv::{Batch, KvSnapshot, KvStore, Mode};
pub use crate::location::LocationId;

/// Whether a frame callback wants more frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameStep {
    Continue,
    Stop,
}

/// The read interface over a store backend.
///
/// Lookup results borrow from the reader: a query holds its reader
/// for as long as it holds any value slice.
pub trait Store {
    /// Single exact-match lookup.  Absent keys are `Ok(None)`, never
    /// an error.
    ///
    /// # Errors
    ///
    /// If the underlying read fails or the data is corrupt.
    fn lookup<'s>(&'s self, key: &[u8]) -> Result<Option<&'s [u8]>, StoreError>;

    /// Batched lookup, order preserving.  Each key gets its own
    /// result; an absent value is reported as absent, not as an
    /// error.
    fn lookup_many<'s>(&'s self, keys: &[Vec<u8>]) -> Vec<Result<Option<&'s [u8]>, StoreError>> {
        keys.iter().map(|key| self.lookup(key)).collect()
    }

    /// The first key in `keys` whose value is present, with its
    /// index.
    ///
    /// # Errors
    ///
    /// If a lookup fails before a present key is found.
    fn first_present<'s>(
        &'s self,
        keys: &[Vec<u8>],
    ) -> Result<Option<(&'s [u8], usize)>, StoreError> {
        for (index, key) in keys.iter().enumerate() {
            if let Some(value) = self.lookup(key)? {
                return Ok(Some((value, index)));
            }
        }
        Ok(None)
    }

    /// Iterate the value frames associated with `key`.  Scoped record
    /// frames whose location differs from `location` are skipped, as
    /// are frames of unknown kind.  `f` returns whether to keep
    /// going.
    ///
    /// # Errors
    ///
    /// If the read fails or a frame is malformed.
    fn for_each_frame(
        &self,
        key: &[u8],
        location: &LocationId,
        f: &mut dyn FnMut(Frame<'_>) -> FrameStep,
    ) -> Result<(), StoreError>;
}

/// Errors surfaced by store backends.
#[derive(Debug)]
pub enum StoreError {
    /// An underlying file or engine error.
    Io(std::io::Error),

    /// A length mismatch or otherwise malformed on-disk structure.
    Corrupt(&'static str),

    /// A malformed value frame.
    Frame(FrameError),

    /// Point get of a key that is not there.
    KeyAbsent,

    /// Delete of a frame that is not there.
    ValueAbsent,

    /// A write operation on a read-only (secondary) instance.
    ReadOnly,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Io(error) => write!(f, "store IO error: {error}"),
            StoreError::Corrupt(what) => write!(f, "store corrupt: {what}"),
            StoreError::Frame(error) => write!(f, "bad value frame: {error}"),
            StoreError::KeyAbsent => write!(f, "key absent"),
            StoreError::ValueAbsent => write!(f, "value absent"),
            StoreError::ReadOnly => write!(f, "store is read-only"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(error) => Some(error),
            StoreError::Frame(error) => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::Io(error)
    }
}

impl From<FrameError> for StoreError {
    fn from(error: FrameError) -> Self {
        StoreError::Frame(error)
    }
}

/// The active store, whichever backend it is.  This is what the
/// reload controller swaps.
#[derive(Clone)]
pub enum AnyStore {
    Hash(Arc<HashFile>),
    Kv(Arc<KvStore>),
}

impl AnyStore {
    /// Acquire a reader over the store's current contents.  For the
    /// hash file this is a handle on the mapping; for the KV store it
    /// is a snapshot, so later writes do not show through.
    pub fn reader(&self) -> StoreReader {
        match self {
            AnyStore::Hash(file) => StoreReader::Hash(file.clone()),
            AnyStore::Kv(store) => StoreReader::Kv(store.snapshot()),
        }
    }
}

/// A refcounted reader over one consistent view of the store.
#[derive(Clone)]
pub enum StoreReader {
    Hash(Arc<HashFile>),
    Kv(KvSnapshot),
}

impl Store for StoreReader {
    fn lookup<'s>(&'s self, key: &[u8]) -> Result<Option<&'s [u8]>, StoreError> {
        match self {
            StoreReader::Hash(file) => file.lookup(key),
            StoreReader::Kv(snapshot) => snapshot.lookup(key),
        }
    }

    fn for_each_frame(
        &self,
        key: &[u8],
        location: &LocationId,
        f: &mut dyn FnMut(Frame<'_>) -> FrameStep,
    ) -> Result<(), StoreError> {
        match self {
            StoreReader::Hash(file) => file.for_each_frame(key, location, f),
            StoreReader::Kv(snapshot) => snapshot.for_each_frame(key, location, f),
        }
    }
}
