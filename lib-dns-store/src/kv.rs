//! The log-structured KV backend.
//!
//! A store directory holds a single append-only record log.  An
//! in-memory ordered table is rebuilt from the log on open and kept
//! behind an `Arc`, so a snapshot is one refcount bump and is
//! completely unaffected by later writes.
//!
//! Log record layout (all integers little-endian):
//!
//! ```text
//!     op u8 (1 = put, 2 = delete), key_len u32, value_len u32,
//!     key octets, value octets
//! ```
//!
//! A primary instance appends; a secondary opens the same directory
//! read-only and catches up with the primary by replaying log records
//! appended since its last call.  One key holds the concatenation of
//! all value frames for that key; frame-level adds and deletes are
//! read-modify-write cycles under the process-wide write mutex.
//! Concurrent readers are unaffected: they hold the previous table.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::frame::Frame;
use crate::location::LocationId;
use crate::{frame, FrameStep, Store, StoreError};

const LOG_FILE: &str = "kv.log";
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] kv lock poisoned, cannot recover from this - aborting";

/// Where an instance sits in the primary/secondary protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Owns the log and may write.
    Primary,

    /// Read-only, and has applied every log record it has seen.
    SecondaryUpToDate,

    /// Read-only, currently replaying log records.
    SecondaryCatchingUp,
}

type Memtable = BTreeMap<Vec<u8>, Vec<u8>>;

struct Writer {
    mode: Mode,
    /// Append handle; present on the primary only.
    log: Option<File>,
    /// How much of the log has been applied to the memtable.
    applied: u64,
}

/// A log-structured key-value store.
pub struct KvStore {
    dir: PathBuf,
    memtable: RwLock<Arc<Memtable>>,
    writer: Mutex<Writer>,
}

impl KvStore {
    /// Open (or create) a store directory as the primary.
    ///
    /// # Errors
    ///
    /// If the directory or log cannot be opened, or the log is
    /// unreadable.
    pub fn open_primary(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let mut log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;

        let (memtable, applied) = replay(&mut log, 0, Memtable::new())?;
        log.seek(SeekFrom::End(0))?;

        tracing::info!(dir = %dir.display(), keys = %memtable.len(), "opened kv store as primary");

        Ok(Self {
            dir: dir.to_path_buf(),
            memtable: RwLock::new(Arc::new(memtable)),
            writer: Mutex::new(Writer {
                mode: Mode::Primary,
                log: Some(log),
                applied,
            }),
        })
    }

    /// Open an existing store directory read-only, as a secondary
    /// that will catch up with the primary on request.
    ///
    /// # Errors
    ///
    /// If the log cannot be opened or is unreadable.
    pub fn open_secondary(dir: &Path) -> Result<Self, StoreError> {
        let mut log = File::open(dir.join(LOG_FILE))?;
        let (memtable, applied) = replay(&mut log, 0, Memtable::new())?;

        tracing::info!(dir = %dir.display(), keys = %memtable.len(), "opened kv store as secondary");

        Ok(Self {
            dir: dir.to_path_buf(),
            memtable: RwLock::new(Arc::new(memtable)),
            writer: Mutex::new(Writer {
                mode: Mode::SecondaryUpToDate,
                log: None,
                applied,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> Mode {
        self.writer.lock().expect(MUTEX_POISON_MESSAGE).mode
    }

    /// A consistent view of the store as of now.
    pub fn snapshot(&self) -> KvSnapshot {
        KvSnapshot {
            memtable: self.memtable.read().expect(MUTEX_POISON_MESSAGE).clone(),
        }
    }

    /// Apply all log records appended since the last call (or open).
    /// Returns how many records were applied.  On the primary this is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// If the log cannot be read.  A torn final record is not an
    /// error: replay stops before it and the next call retries.
    pub fn catch_up(&self) -> Result<usize, StoreError> {
        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);
        if writer.mode == Mode::Primary {
            return Ok(0);
        }

        writer.mode = Mode::SecondaryCatchingUp;
        let result = self.catch_up_locked(&mut writer);
        writer.mode = Mode::SecondaryUpToDate;
        result
    }

    fn catch_up_locked(&self, writer: &mut Writer) -> Result<usize, StoreError> {
        let mut log = File::open(self.dir.join(LOG_FILE))?;
        let base = (**self.memtable.read().expect(MUTEX_POISON_MESSAGE)).clone();
        let before = writer.applied;
        let (memtable, applied, records) = replay_counting(&mut log, writer.applied, base)?;

        if records > 0 {
            *self.memtable.write().expect(MUTEX_POISON_MESSAGE) = Arc::new(memtable);
            writer.applied = applied;
            tracing::debug!(
                records = %records,
                from = %before,
                to = %applied,
                "kv catch-up applied log records"
            );
        }

        Ok(records)
    }

    /// Point get.  A missing key is an error here, unlike the
    /// driver-level `lookup`.
    ///
    /// # Errors
    ///
    /// `KeyAbsent` if the key is not there.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.memtable
            .read()
            .expect(MUTEX_POISON_MESSAGE)
            .get(key)
            .cloned()
            .ok_or(StoreError::KeyAbsent)
    }

    /// Batched point get, order preserving: every key gets its own
    /// result, evaluated against one consistent view.
    pub fn get_many(&self, keys: &[Vec<u8>]) -> Vec<Result<Vec<u8>, StoreError>> {
        let memtable = self.memtable.read().expect(MUTEX_POISON_MESSAGE).clone();
        keys.iter()
            .map(|key| memtable.get(key).cloned().ok_or(StoreError::KeyAbsent))
            .collect()
    }

    /// Store a whole value under a key.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a secondary; IO errors from the log.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);
        self.commit(&mut writer, &[(key.to_vec(), Some(value.to_vec()))])
    }

    /// Remove a key outright.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a secondary; IO errors from the log.
    pub fn delete_key(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);
        self.commit(&mut writer, &[(key.to_vec(), None)])
    }

    /// Append one encoded frame to the value of `key`, creating the
    /// key if needed.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a secondary; IO errors from the log.
    pub fn add_frame(&self, key: &[u8], encoded_frame: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);

        let mut value = self
            .memtable
            .read()
            .expect(MUTEX_POISON_MESSAGE)
            .get(key)
            .cloned()
            .unwrap_or_default();
        value.extend_from_slice(encoded_frame);

        self.commit(&mut writer, &[(key.to_vec(), Some(value))])
    }

    /// Remove the frame byte-equal to `encoded_frame` from the value
    /// of `key`.  Removing the last frame deletes the key itself.
    ///
    /// # Errors
    ///
    /// `ValueAbsent` if no such frame exists (including when the key
    /// itself is absent); `ReadOnly` on a secondary.
    pub fn delete_frame(&self, key: &[u8], encoded_frame: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);

        let value = self
            .memtable
            .read()
            .expect(MUTEX_POISON_MESSAGE)
            .get(key)
            .cloned()
            .ok_or(StoreError::ValueAbsent)?;
        let updated = remove_frame(&value, encoded_frame)?;

        self.commit(&mut writer, &[(key.to_vec(), updated)])
    }

    /// Apply a batch atomically: group the operations by key, fetch
    /// every affected key once, integrate adds and deletes in memory,
    /// and write all the modified keys back in one commit.
    ///
    /// # Errors
    ///
    /// `ValueAbsent` if a delete misses (nothing is applied);
    /// `ReadOnly` on a secondary.
    pub fn apply_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        if batch.ops.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);

        // union of affected keys, in first-touched order
        let mut keys: Vec<&[u8]> = Vec::new();
        for (key, _) in &batch.ops {
            if !keys.iter().any(|k| *k == key.as_slice()) {
                keys.push(key);
            }
        }

        let memtable = self.memtable.read().expect(MUTEX_POISON_MESSAGE).clone();
        let mut staged: Vec<(Vec<u8>, Option<Vec<u8>>)> = keys
            .iter()
            .map(|key| (key.to_vec(), memtable.get(*key).cloned()))
            .collect();

        for (key, op) in &batch.ops {
            let entry = staged
                .iter_mut()
                .find(|(k, _)| k == key)
                .expect("staged every affected key");
            match op {
                BatchOp::Add(frame) => {
                    let value = entry.1.get_or_insert_with(Vec::new);
                    value.extend_from_slice(frame);
                }
                BatchOp::Delete(frame) => {
                    let value = entry.1.take().ok_or(StoreError::ValueAbsent)?;
                    entry.1 = remove_frame(&value, frame)?;
                }
            }
        }

        self.commit(&mut writer, &staged)
    }

    /// Copy a consistent view of the log into `dest_dir`.  Taken
    /// under the write mutex, so no record is ever half-copied.
    ///
    /// # Errors
    ///
    /// IO errors from the copy.
    pub fn backup(&self, dest_dir: &Path) -> Result<(), StoreError> {
        let _writer = self.writer.lock().expect(MUTEX_POISON_MESSAGE);
        std::fs::create_dir_all(dest_dir)?;
        std::fs::copy(self.dir.join(LOG_FILE), dest_dir.join(LOG_FILE))?;
        Ok(())
    }

    /// Materialise a backup into a fresh store directory.  The
    /// restored directory can then be opened as primary or secondary.
    ///
    /// # Errors
    ///
    /// IO errors from the copy.
    pub fn restore(backup_dir: &Path, dest_dir: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(dest_dir)?;
        std::fs::copy(backup_dir.join(LOG_FILE), dest_dir.join(LOG_FILE))?;
        Ok(())
    }

    /// Write log records for `changes` (None = delete key) and swap
    /// in a memtable with them applied.  The caller holds the write
    /// mutex.
    fn commit(
        &self,
        writer: &mut Writer,
        changes: &[(Vec<u8>, Option<Vec<u8>>)],
    ) -> Result<(), StoreError> {
        let log = writer.log.as_mut().ok_or(StoreError::ReadOnly)?;

        let mut appended = 0u64;
        for (key, value) in changes {
            appended += append_record(log, key, value.as_deref())?;
        }
        log.sync_data()?;

        let mut memtable =
            (**self.memtable.read().expect(MUTEX_POISON_MESSAGE)).clone();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    memtable.insert(key.clone(), value.clone());
                }
                None => {
                    memtable.remove(key);
                }
            }
        }
        *self.memtable.write().expect(MUTEX_POISON_MESSAGE) = Arc::new(memtable);
        writer.applied += appended;

        Ok(())
    }
}

/// An ordered set of frame-level adds and deletes, grouped by key at
/// apply time.
#[derive(Default)]
pub struct Batch {
    ops: Vec<(Vec<u8>, BatchOp)>,
}

enum BatchOp {
    Add(Vec<u8>),
    Delete(Vec<u8>),
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &[u8], encoded_frame: &[u8]) {
        self.ops
            .push((key.to_vec(), BatchOp::Add(encoded_frame.to_vec())));
    }

    pub fn delete(&mut self, key: &[u8], encoded_frame: &[u8]) {
        self.ops
            .push((key.to_vec(), BatchOp::Delete(encoded_frame.to_vec())));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// A consistent, immutable view of the store.
#[derive(Clone)]
pub struct KvSnapshot {
    memtable: Arc<Memtable>,
}

impl KvSnapshot {
    pub fn len(&self) -> usize {
        self.memtable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memtable.is_empty()
    }

    /// Ordered iteration over every (key, value) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.memtable
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

impl Store for KvSnapshot {
    fn lookup<'s>(&'s self, key: &[u8]) -> Result<Option<&'s [u8]>, StoreError> {
        Ok(self.memtable.get(key).map(Vec::as_slice))
    }

    fn for_each_frame(
        &self,
        key: &[u8],
        location: &LocationId,
        f: &mut dyn FnMut(Frame<'_>) -> FrameStep,
    ) -> Result<(), StoreError> {
        if let Some(value) = self.memtable.get(key) {
            frame::for_each_value_frame(value, location, f)?;
        }
        Ok(())
    }
}

/// Scan the frames of `value` and drop the one byte-equal to
/// `encoded_frame`.  Returns the rewritten value, or `None` when the
/// last frame went away.
fn remove_frame(value: &[u8], encoded_frame: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    let mut out = Vec::with_capacity(value.len().saturating_sub(encoded_frame.len()));
    let mut removed = false;
    let mut position = 0;

    // walk raw frame extents; the frame need not decode, only match
    while position < value.len() {
        let remaining = &value[position..];
        if remaining.len() < 4 {
            return Err(StoreError::Frame(crate::FrameError::MalformedFrame));
        }
        let len =
            u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        if remaining.len() - 4 < len {
            return Err(StoreError::Frame(crate::FrameError::UnexpectedEnd));
        }
        let extent = &remaining[..4 + len];
        if !removed && extent == encoded_frame {
            removed = true;
        } else {
            out.extend_from_slice(extent);
        }
        position += 4 + len;
    }

    if !removed {
        return Err(StoreError::ValueAbsent);
    }
    Ok(if out.is_empty() { None } else { Some(out) })
}

fn append_record(log: &mut File, key: &[u8], value: Option<&[u8]>) -> Result<u64, StoreError> {
    let (op, value) = match value {
        Some(value) => (OP_PUT, value),
        None => (OP_DELETE, &[][..]),
    };

    let mut record = Vec::with_capacity(9 + key.len() + value.len());
    record.push(op);
    record.extend_from_slice(&(key.len() as u32).to_le_bytes());
    record.extend_from_slice(&(value.len() as u32).to_le_bytes());
    record.extend_from_slice(key);
    record.extend_from_slice(value);

    log.write_all(&record)?;
    Ok(record.len() as u64)
}

fn replay(log: &mut File, from: u64, base: Memtable) -> Result<(Memtable, u64), StoreError> {
    let (memtable, applied, _) = replay_counting(log, from, base)?;
    Ok((memtable, applied))
}

/// Apply complete log records from offset `from` onwards.  A torn
/// trailing record (a crash mid-append) stops the replay without an
/// error; everything before it is applied.
fn replay_counting(
    log: &mut File,
    from: u64,
    base: Memtable,
) -> Result<(Memtable, u64, usize), StoreError> {
    log.seek(SeekFrom::Start(from))?;
    let mut octets = Vec::new();
    log.read_to_end(&mut octets)?;

    let mut memtable = base;
    let mut position = 0usize;
    let mut records = 0usize;

    loop {
        let remaining = &octets[position..];
        if remaining.len() < 9 {
            break;
        }
        let op = remaining[0];
        let key_len =
            u32::from_le_bytes([remaining[1], remaining[2], remaining[3], remaining[4]]) as usize;
        let value_len =
            u32::from_le_bytes([remaining[5], remaining[6], remaining[7], remaining[8]]) as usize;
        if remaining.len() < 9 + key_len + value_len {
            break;
        }

        let key = &remaining[9..9 + key_len];
        let value = &remaining[9 + key_len..9 + key_len + value_len];

        match op {
            OP_PUT => {
                memtable.insert(key.to_vec(), value.to_vec());
            }
            OP_DELETE => {
                memtable.remove(key);
            }
            _ => return Err(StoreError::Corrupt("unknown log record op")),
        }

        position += 9 + key_len + value_len;
        records += 1;
    }

    Ok((memtable, from + position as u64, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_record_frame;

    fn encoded(rdata: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_record_frame(&mut out, None, 1, 300, rdata);
        out
    }

    #[test]
    fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        assert!(matches!(store.get(b"k"), Err(StoreError::KeyAbsent)));

        store.put(b"k", b"v").unwrap();
        assert_eq!(b"v".to_vec(), store.get(b"k").unwrap());

        let results = store.get_many(&[b"k".to_vec(), b"missing".to_vec()]);
        assert_eq!(b"v".to_vec(), *results[0].as_ref().unwrap());
        assert!(matches!(results[1], Err(StoreError::KeyAbsent)));

        store.delete_key(b"k").unwrap();
        assert!(matches!(store.get(b"k"), Err(StoreError::KeyAbsent)));
    }

    #[test]
    fn reopen_replays_the_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KvStore::open_primary(dir.path()).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
            store.delete_key(b"a").unwrap();
        }

        let store = KvStore::open_primary(dir.path()).unwrap();
        assert!(matches!(store.get(b"a"), Err(StoreError::KeyAbsent)));
        assert_eq!(b"2".to_vec(), store.get(b"b").unwrap());
    }

    #[test]
    fn torn_trailing_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KvStore::open_primary(dir.path()).unwrap();
            store.put(b"a", b"1").unwrap();
        }
        // simulate a crash mid-append
        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        log.write_all(&[OP_PUT, 50, 0, 0, 0]).unwrap();
        drop(log);

        let store = KvStore::open_primary(dir.path()).unwrap();
        assert_eq!(b"1".to_vec(), store.get(b"a").unwrap());
    }

    #[test]
    fn frame_add_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        let f1 = encoded(&[1, 1, 1, 1]);
        let f2 = encoded(&[2, 2, 2, 2]);

        store.add_frame(b"k", &f1).unwrap();
        store.add_frame(b"k", &f2).unwrap();

        let mut expected = f1.clone();
        expected.extend_from_slice(&f2);
        assert_eq!(expected, store.get(b"k").unwrap());

        // deleting a frame that is not there fails and changes
        // nothing
        assert!(matches!(
            store.delete_frame(b"k", &encoded(&[9, 9, 9, 9])),
            Err(StoreError::ValueAbsent)
        ));
        assert_eq!(expected, store.get(b"k").unwrap());

        store.delete_frame(b"k", &f1).unwrap();
        assert_eq!(f2, store.get(b"k").unwrap());

        // deleting the last frame removes the key
        store.delete_frame(b"k", &f2).unwrap();
        assert!(matches!(store.get(b"k"), Err(StoreError::KeyAbsent)));
    }

    #[test]
    fn batch_applies_atomically_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        let f1 = encoded(&[1, 1, 1, 1]);
        let f2 = encoded(&[2, 2, 2, 2]);
        let f3 = encoded(&[3, 3, 3, 3]);
        store.add_frame(b"a", &f1).unwrap();

        let mut batch = Batch::new();
        batch.add(b"a", &f2);
        batch.delete(b"a", &f1);
        batch.add(b"b", &f3);
        store.apply_batch(&batch).unwrap();

        assert_eq!(f2, store.get(b"a").unwrap());
        assert_eq!(f3, store.get(b"b").unwrap());
    }

    #[test]
    fn batch_delete_miss_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        let f1 = encoded(&[1, 1, 1, 1]);
        store.add_frame(b"a", &f1).unwrap();

        let mut batch = Batch::new();
        batch.add(b"b", &f1);
        batch.delete(b"a", &encoded(&[9, 9, 9, 9]));
        assert!(matches!(
            store.apply_batch(&batch),
            Err(StoreError::ValueAbsent)
        ));

        assert!(matches!(store.get(b"b"), Err(StoreError::KeyAbsent)));
        assert_eq!(f1, store.get(b"a").unwrap());
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        store.put(b"stable", b"before").unwrap();
        let snapshot = store.snapshot();

        store.put(b"stable", b"after").unwrap();
        store.put(b"new", b"value").unwrap();
        store.delete_key(b"stable").unwrap();

        assert_eq!(Some(&b"before"[..]), snapshot.lookup(b"stable").unwrap());
        assert_eq!(None, snapshot.lookup(b"new").unwrap());
        assert_eq!(1, snapshot.len());
    }

    #[test]
    fn snapshot_iteration_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_primary(dir.path()).unwrap();

        store.put(b"c", b"3").unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();

        let snapshot = store.snapshot();
        let keys: Vec<&[u8]> = snapshot.iter().map(|(k, _)| k).collect();
        assert_eq!(vec![&b"a"[..], &b"b"[..], &b"c"[..]], keys);
    }

    #[test]
    fn secondary_catches_up_with_primary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = KvStore::open_primary(dir.path()).unwrap();
        primary.put(b"seen", b"1").unwrap();

        let secondary = KvStore::open_secondary(dir.path()).unwrap();
        assert_eq!(Mode::SecondaryUpToDate, secondary.mode());
        assert_eq!(b"1".to_vec(), secondary.get(b"seen").unwrap());

        primary.put(b"later", b"2").unwrap();
        assert!(matches!(secondary.get(b"later"), Err(StoreError::KeyAbsent)));

        assert_eq!(1, secondary.catch_up().unwrap());
        assert_eq!(b"2".to_vec(), secondary.get(b"later").unwrap());
        assert_eq!(Mode::SecondaryUpToDate, secondary.mode());

        // idempotent when there is nothing new
        assert_eq!(0, secondary.catch_up().unwrap());
    }

    #[test]
    fn secondary_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let _primary = KvStore::open_primary(dir.path()).unwrap();
        let secondary = KvStore::open_secondary(dir.path()).unwrap();

        assert!(matches!(
            secondary.put(b"k", b"v"),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn backup_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let restored_dir = tempfile::tempdir().unwrap();

        let store = KvStore::open_primary(dir.path()).unwrap();
        store.put(b"kept", b"yes").unwrap();
        store.backup(backup_dir.path()).unwrap();

        // writes after the backup are not part of it
        store.put(b"kept", b"overwritten").unwrap();
        store.put(b"extra", b"also").unwrap();

        KvStore::restore(backup_dir.path(), restored_dir.path()).unwrap();
        let restored = KvStore::open_primary(restored_dir.path()).unwrap();
        assert_eq!(b"yes".to_vec(), restored.get(b"kept").unwrap());
        assert!(matches!(restored.get(b"extra"), Err(StoreError::KeyAbsent)));
    }
}
