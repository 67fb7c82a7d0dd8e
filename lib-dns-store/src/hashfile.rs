//! The immutable hash-file backend.
//!
//! An on-disk constant database, produced by the offline compiler and
//! never modified in place:
//!
//! ```text
//!     0..2048     256 pairs of (u32 table_offset, u32 slot_count)
//!     2048..M     records: (u32 key_len, u32 value_len, key, value)
//!     M..end      256 hash tables of (u32 hash, u32 record_offset)
//! ```
//!
//! All integers are little-endian.  A key hashes into one of 256
//! top-level tables (`hash mod 256`); within the table the starting
//! slot is `(hash / 256) mod slot_count`, probed linearly at load
//! factor ~0.5.  An empty slot (`record_offset == 0`) ends the probe.
//! Multiple records under the same key occupy their own slots and are
//! visited in probe order.
//!
//! Reads go through a shared memory mapping with bounds-checked
//! arithmetic and no allocation.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::frame::{self, Frame};
use crate::location::LocationId;
use crate::{FrameStep, Store, StoreError};

/// Size of the table-of-tables header.
pub const HEADER_LEN: usize = 2048;

/// Number of top-level hash tables.
pub const NUM_TABLES: u32 = 256;

/// The 32-bit key hash: the classic constant-database hash,
/// starting at 5381, then `h = (h * 33) xor octet` for each key
/// octet.
pub fn hash(key: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &octet in key {
        h = (h << 5).wrapping_add(h) ^ u32::from(octet);
    }
    h
}

/// A read-only view over a hash file.
pub struct HashFile {
    map: Mmap,
    path: PathBuf,
}

impl HashFile {
    /// Map the file and validate its header.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened or is structurally unsound.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        // safety: the file is produced once by the compiler and
        // swapped in by path; reloads open a new mapping rather than
        // mutating this one.
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < HEADER_LEN {
            return Err(StoreError::Corrupt("file shorter than the table header"));
        }

        let this = Self {
            map,
            path: path.to_path_buf(),
        };

        for table in 0..NUM_TABLES {
            let (offset, slot_count) = this.table(table);
            if slot_count == 0 {
                continue;
            }
            let end = (offset as usize)
                .checked_add(slot_count as usize * 8)
                .ok_or(StoreError::Corrupt("table extent overflows"))?;
            if (offset as usize) < HEADER_LEN || end > this.map.len() {
                return Err(StoreError::Corrupt("table outside the file"));
            }
        }

        Ok(this)
    }

    /// The path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh mapping of the same path.  This is what a partial
    /// reload does for this backend: the compiler replaces the file,
    /// the server re-maps it.
    ///
    /// # Errors
    ///
    /// As for `open`.
    pub fn reopen(&self) -> Result<Self, StoreError> {
        Self::open(&self.path)
    }

    fn table(&self, index: u32) -> (u32, u32) {
        let at = index as usize * 8;
        // in bounds: the header length is checked at open
        let offset = u32::from_le_bytes(self.map[at..at + 4].try_into().unwrap());
        let slot_count = u32::from_le_bytes(self.map[at + 4..at + 8].try_into().unwrap());
        (offset, slot_count)
    }

    fn read_u32(&self, at: usize) -> Result<u32, StoreError> {
        let octets = self
            .map
            .get(at..at + 4)
            .ok_or(StoreError::Corrupt("read past end of file"))?;
        Ok(u32::from_le_bytes(octets.try_into().unwrap()))
    }

    fn slice(&self, at: usize, len: usize) -> Result<&[u8], StoreError> {
        let end = at
            .checked_add(len)
            .ok_or(StoreError::Corrupt("record extent overflows"))?;
        self.map
            .get(at..end)
            .ok_or(StoreError::Corrupt("record outside the file"))
    }

    /// Visit the value of every record stored under `key`, in probe
    /// order, until the callback stops.
    fn probe<'s>(
        &'s self,
        key: &[u8],
        f: &mut dyn FnMut(&'s [u8]) -> Result<FrameStep, StoreError>,
    ) -> Result<(), StoreError> {
        let h = hash(key);
        let (table_offset, slot_count) = self.table(h % NUM_TABLES);
        if slot_count == 0 {
            return Ok(());
        }

        let start_slot = (h / NUM_TABLES) % slot_count;
        for i in 0..slot_count {
            let slot = (start_slot + i) % slot_count;
            let at = table_offset as usize + slot as usize * 8;
            let slot_hash = self.read_u32(at)?;
            let record_offset = self.read_u32(at + 4)? as usize;

            if record_offset == 0 {
                return Ok(());
            }
            if slot_hash != h {
                continue;
            }

            let key_len = self.read_u32(record_offset)? as usize;
            let value_len = self.read_u32(record_offset + 4)? as usize;
            let stored_key = self.slice(record_offset + 8, key_len)?;
            if stored_key != key {
                continue;
            }

            let value = self.slice(record_offset + 8 + key_len, value_len)?;
            if f(value)? == FrameStep::Stop {
                return Ok(());
            }
        }

        Ok(())
    }
}

impl Store for HashFile {
    fn lookup<'s>(&'s self, key: &[u8]) -> Result<Option<&'s [u8]>, StoreError> {
        let mut found = None;
        self.probe(key, &mut |value| {
            found = Some(value);
            Ok(FrameStep::Stop)
        })?;
        Ok(found)
    }

    fn for_each_frame(
        &self,
        key: &[u8],
        location: &LocationId,
        f: &mut dyn FnMut(Frame<'_>) -> FrameStep,
    ) -> Result<(), StoreError> {
        self.probe(key, &mut |value| {
            Ok(frame::for_each_value_frame(value, location, &mut *f)?)
        })
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod writer {
    //! Builds hash files the way the offline compiler does, for
    //! tests.

    use super::*;
    use std::io::Write;

    /// Accumulates records and writes a complete file.
    #[derive(Default)]
    pub struct HashFileWriter {
        records: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl HashFileWriter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a record.  The same key may be inserted repeatedly;
        /// each insertion is its own record.
        pub fn insert(&mut self, key: &[u8], value: &[u8]) {
            self.records.push((key.to_vec(), value.to_vec()));
        }

        /// Build the file octets: header, record area, then the 256
        /// tables at load factor 0.5.
        pub fn build(&self) -> Vec<u8> {
            let mut record_area = Vec::new();
            let mut buckets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); NUM_TABLES as usize];

            for (key, value) in &self.records {
                let offset = (HEADER_LEN + record_area.len()) as u32;
                let h = hash(key);
                record_area.extend_from_slice(&(key.len() as u32).to_le_bytes());
                record_area.extend_from_slice(&(value.len() as u32).to_le_bytes());
                record_area.extend_from_slice(key);
                record_area.extend_from_slice(value);
                buckets[(h % NUM_TABLES) as usize].push((h, offset));
            }

            let mut header = Vec::with_capacity(HEADER_LEN);
            let mut tables = Vec::new();
            let tables_start = HEADER_LEN + record_area.len();

            for bucket in &buckets {
                let slot_count = (bucket.len() * 2) as u32;
                let table_offset = if slot_count == 0 {
                    0
                } else {
                    (tables_start + tables.len()) as u32
                };
                header.extend_from_slice(&table_offset.to_le_bytes());
                header.extend_from_slice(&slot_count.to_le_bytes());

                if slot_count == 0 {
                    continue;
                }

                let mut slots = vec![(0u32, 0u32); slot_count as usize];
                for &(h, offset) in bucket {
                    let mut slot = ((h / NUM_TABLES) % slot_count) as usize;
                    while slots[slot].1 != 0 {
                        slot = (slot + 1) % slot_count as usize;
                    }
                    slots[slot] = (h, offset);
                }
                for (h, offset) in slots {
                    tables.extend_from_slice(&h.to_le_bytes());
                    tables.extend_from_slice(&offset.to_le_bytes());
                }
            }

            let mut out = Vec::with_capacity(tables_start + tables.len());
            out.extend_from_slice(&header);
            out.extend_from_slice(&record_area);
            out.extend_from_slice(&tables);
            out
        }

        /// Write the file to disk.
        ///
        /// # Errors
        ///
        /// If the file cannot be written.
        pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(&self.build())?;
            file.sync_all()
        }
    }
}
