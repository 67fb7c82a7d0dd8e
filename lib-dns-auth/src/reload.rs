//! Hot reloads of the backing store.
//!
//! Readers share the active store through a `StoreHandle`; a reload
//! only takes the write half of the lock for the pointer exchange, so
//! in-flight queries delay the close of the previous store but never
//! block the swap.
//!
//! Two reload flavours, driven by signal files in a control directory
//! and an opportunistic timer:
//!
//! - partial: the current store catches up with its own on-disk state
//!   (KV log replay, or a re-map of the hash file);
//! - full: a different store path is opened, validated by probing a
//!   configured key, and swapped in.
//!
//! Signals are debounced through a single-slot channel: a reload
//! already pending absorbs any number of further signals.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use dns_store::{key, AnyStore, HashFile, KvStore, Store, StoreError, StoreReader};
use dns_types::protocol::types::DomainName;

use crate::cache::SharedResponseCache;
use crate::watch::{FsEvent, WatchEvent};

/// Name of the partial-reload signal file.
pub const RELOAD_FILE: &str = "reload";

/// Name of the full-reload signal file; its first line is the new
/// store path.
pub const SWITCHDB_FILE: &str = "switchdb";

/// Monotonic reload counters, exported by the server binary.
#[derive(Debug, Default)]
pub struct ReloadStats {
    pub partial_reloads: AtomicU64,
    pub full_reloads: AtomicU64,
    pub timeouts: AtomicU64,
    pub validation_failures: AtomicU64,
    pub failures: AtomicU64,
}

/// The shared, swappable store.  Cloning shares the same slot.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<AnyStore>>,
}

impl StoreHandle {
    pub fn new(store: AnyStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Acquire a reader over the active store.  The reader keeps its
    /// view alive for as long as the query holds it, even across a
    /// swap.
    pub async fn reader(&self) -> StoreReader {
        self.inner.read().await.reader()
    }

    async fn current(&self) -> AnyStore {
        self.inner.read().await.clone()
    }

    async fn swap(&self, store: AnyStore) {
        *self.inner.write().await = store;
    }
}

/// Open a store path: a directory is a KV store (opened as a
/// secondary, the compiler being the primary), a file is a hash file.
///
/// # Errors
///
/// If the path cannot be opened as its kind of store.
pub fn open_any_store(path: &Path) -> Result<AnyStore, StoreError> {
    if std::fs::metadata(path)?.is_dir() {
        Ok(AnyStore::Kv(Arc::new(KvStore::open_secondary(path)?)))
    } else {
        Ok(AnyStore::Hash(Arc::new(HashFile::open(path)?)))
    }
}

/// A debounced request for reload work.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReloadSignal {
    Partial,
    Full(PathBuf),
}

pub struct ReloadController {
    handle: StoreHandle,
    cache: SharedResponseCache,
    stats: Arc<ReloadStats>,
    probe_key: Vec<u8>,
    timeout: Duration,
}

impl ReloadController {
    pub fn new(
        handle: StoreHandle,
        cache: SharedResponseCache,
        probe_name: &DomainName,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            cache,
            stats: Arc::new(ReloadStats::default()),
            probe_key: key::record_key(&probe_name.octets),
            timeout,
        }
    }

    pub fn stats(&self) -> Arc<ReloadStats> {
        self.stats.clone()
    }

    /// Catch the active store up with its on-disk state.  Bounded by
    /// the configured timeout; on timeout the old store stays in
    /// service and a counter is bumped.  Returns whether the reload
    /// succeeded.
    pub async fn partial_reload(&self) -> bool {
        let started = Instant::now();
        let current = self.handle.current().await;

        let work = tokio::time::timeout(self.timeout, async {
            match current {
                AnyStore::Kv(store) => {
                    tokio::task::spawn_blocking(move || store.catch_up().map(|_| None))
                        .await
                        .unwrap_or_else(|join_error| {
                            Err(StoreError::Io(std::io::Error::other(join_error)))
                        })
                }
                AnyStore::Hash(file) => tokio::task::spawn_blocking(move || {
                    file.reopen().map(|file| Some(AnyStore::Hash(Arc::new(file))))
                })
                .await
                .unwrap_or_else(|join_error| {
                    Err(StoreError::Io(std::io::Error::other(join_error)))
                }),
            }
        })
        .await;

        match work {
            Err(_elapsed) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(timeout = ?self.timeout, "partial reload timed out, keeping old store");
                false
            }
            Ok(Err(error)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%error, "partial reload failed, keeping old store");
                false
            }
            Ok(Ok(swapped)) => {
                if let Some(store) = swapped {
                    self.handle.swap(store).await;
                }
                self.cache.purge();
                self.stats.partial_reloads.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    duration_seconds = %started.elapsed().as_secs_f64(),
                    "partial reload done"
                );
                true
            }
        }
    }

    /// Open the store at `path`, validate it by looking up the probe
    /// key, and swap it in.  On any failure the old store stays
    /// active.  Returns whether the swap happened.
    pub async fn full_reload(&self, path: &Path) -> bool {
        let started = Instant::now();
        let owned_path = path.to_path_buf();

        let opened = tokio::task::spawn_blocking(move || open_any_store(&owned_path))
            .await
            .unwrap_or_else(|join_error| Err(StoreError::Io(std::io::Error::other(join_error))));

        let store = match opened {
            Ok(store) => store,
            Err(error) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %path.display(), %error, "full reload failed to open, keeping old store");
                return false;
            }
        };

        match store.reader().lookup(&self.probe_key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.stats.validation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %path.display(), "probe key not found in new store, keeping old store");
                return false;
            }
            Err(error) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %path.display(), %error, "probe lookup failed in new store, keeping old store");
                return false;
            }
        }

        self.handle.swap(store).await;
        self.cache.purge();
        self.stats.full_reloads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            path = %path.display(),
            duration_seconds = %started.elapsed().as_secs_f64(),
            "full reload done"
        );
        true
    }

    /// Act on one signal, deleting its signal file on success.
    pub async fn handle_signal(&self, control_dir: &Path, signal: ReloadSignal) {
        match signal {
            ReloadSignal::Partial => {
                if self.partial_reload().await {
                    let _ = std::fs::remove_file(control_dir.join(RELOAD_FILE));
                }
            }
            ReloadSignal::Full(path) => {
                if self.full_reload(&path).await {
                    let _ = std::fs::remove_file(control_dir.join(SWITCHDB_FILE));
                }
            }
        }
    }

    /// The controller loop: translate watcher events into debounced
    /// signals, and drive opportunistic partial reloads on a timer.
    /// Runs until the watcher channel closes.
    pub async fn run(
        self: Arc<Self>,
        control_dir: PathBuf,
        mut events: mpsc::Receiver<WatchEvent>,
        reload_interval: Duration,
    ) {
        let (signal_tx, mut signal_rx) = mpsc::channel::<ReloadSignal>(1);

        let translator_dir = control_dir.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.event == FsEvent::Removed {
                    continue;
                }

                let signal = if event.path == translator_dir.join(SWITCHDB_FILE) {
                    match read_switchdb(&event.path) {
                        Some(path) => ReloadSignal::Full(path),
                        None => continue,
                    }
                } else {
                    // the reload file, or the data path itself
                    ReloadSignal::Partial
                };

                // single-slot debounce: a pending reload absorbs this
                let _ = signal_tx.try_send(signal);
            }
        });

        let mut ticker = tokio::time::interval(reload_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it
        ticker.tick().await;

        loop {
            tokio::select! {
                signal = signal_rx.recv() => match signal {
                    Some(signal) => self.handle_signal(&control_dir, signal).await,
                    None => return,
                },
                _ = ticker.tick() => {
                    self.partial_reload().await;
                }
            }
        }
    }
}

/// The first line of a `switchdb` file is the new store path.
fn read_switchdb(path: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(PathBuf::from(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store::*;
    use dns_store::frame::encode_record_frame;
    use dns_store::hashfile::writer::HashFileWriter;
    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::{RecordType, RecordTypeWithData};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn controller(store: AnyStore) -> (ReloadController, StoreHandle) {
        let handle = StoreHandle::new(store);
        let controller = ReloadController::new(
            handle.clone(),
            SharedResponseCache::with_desired_size(16),
            &domain("example.com."),
            TIMEOUT,
        );
        (controller, handle)
    }

    fn added_record() -> (Vec<u8>, Vec<u8>) {
        let owner = domain("added.example.com.");
        let rtd = RecordTypeWithData::A {
            address: std::net::Ipv4Addr::new(4, 4, 4, 4),
        };
        let mut frame = Vec::new();
        encode_record_frame(
            &mut frame,
            None,
            u16::from(RecordType::A),
            300,
            &rtd.rdata_octets(),
        );
        (dns_store::key::record_key(&owner.octets), frame)
    }

    #[tokio::test]
    async fn partial_reload_catches_up_kv_secondary() {
        let (dir, primary) = fixture_kv_store();
        let secondary = KvStore::open_secondary(dir.path()).unwrap();
        let (controller, handle) = controller(AnyStore::Kv(Arc::new(secondary)));

        let (key, frame) = added_record();
        primary.add_frame(&key, &frame).unwrap();

        // the secondary has not caught up yet
        let reader = handle.reader().await;
        assert_eq!(None, reader.lookup(&key).unwrap());
        drop(reader);

        assert!(controller.partial_reload().await);

        let reader = handle.reader().await;
        assert!(reader.lookup(&key).unwrap().is_some());
        assert_eq!(
            1,
            controller.stats().partial_reloads.load(Ordering::Relaxed)
        );
    }

    #[tokio::test]
    async fn readers_survive_a_swap() {
        let (_dir, primary) = fixture_kv_store();
        let dir = primary.dir().to_path_buf();
        let secondary = KvStore::open_secondary(&dir).unwrap();
        let (controller, handle) = controller(AnyStore::Kv(Arc::new(secondary)));

        let (key, frame) = added_record();
        let reader_before = handle.reader().await;

        primary.add_frame(&key, &frame).unwrap();
        assert!(controller.partial_reload().await);

        // the old reader still serves its snapshot
        assert_eq!(None, reader_before.lookup(&key).unwrap());
        // a fresh reader sees the new record
        assert!(handle.reader().await.lookup(&key).unwrap().is_some());
    }

    #[tokio::test]
    async fn full_reload_swaps_after_probe_validation() {
        let (_fixture_dir, file) = fixture_hash_store();
        let (controller, handle) = controller(AnyStore::Hash(Arc::new(file)));

        // a replacement store that still carries the probe key
        let new_dir = tempfile::tempdir().unwrap();
        let new_path = new_dir.path().join("next.chf");
        let mut writer = HashFileWriter::new();
        let apex = domain("example.com.");
        let mut frame = Vec::new();
        encode_record_frame(
            &mut frame,
            None,
            u16::from(RecordType::SOA),
            180,
            &RecordTypeWithData::SOA {
                mname: domain("ns1.example.com."),
                rname: domain("hostmaster.example.com."),
                serial: 2,
                refresh: 3600,
                retry: 600,
                expire: 604_800,
                minimum: 180,
            }
            .rdata_octets(),
        );
        writer.insert(&dns_store::key::record_key(&apex.octets), &frame);
        let (key, added) = added_record();
        writer.insert(&key, &added);
        writer.write_to(&new_path).unwrap();

        assert!(controller.full_reload(&new_path).await);
        assert!(handle.reader().await.lookup(&key).unwrap().is_some());
        assert_eq!(1, controller.stats().full_reloads.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn full_reload_rejects_store_without_probe_key() {
        let (_fixture_dir, file) = fixture_hash_store();
        let (controller, handle) = controller(AnyStore::Hash(Arc::new(file)));

        let new_dir = tempfile::tempdir().unwrap();
        let new_path = new_dir.path().join("empty.chf");
        let mut writer = HashFileWriter::new();
        writer.insert(b"unrelated", b"value");
        writer.write_to(&new_path).unwrap();

        assert!(!controller.full_reload(&new_path).await);
        assert_eq!(
            1,
            controller
                .stats()
                .validation_failures
                .load(Ordering::Relaxed)
        );

        // the old store is still serving
        let probe = dns_store::key::record_key(&domain("example.com.").octets);
        assert!(handle.reader().await.lookup(&probe).unwrap().is_some());
    }

    #[tokio::test]
    async fn signal_files_drive_reloads_and_are_deleted() {
        let (dir, primary) = fixture_kv_store();
        let secondary = KvStore::open_secondary(dir.path()).unwrap();
        let (controller, handle) = controller(AnyStore::Kv(Arc::new(secondary)));
        let controller = Arc::new(controller);

        let control_dir = tempfile::tempdir().unwrap();
        std::fs::write(control_dir.path().join(RELOAD_FILE), b"").unwrap();

        let (key, frame) = added_record();
        primary.add_frame(&key, &frame).unwrap();

        controller
            .handle_signal(control_dir.path(), ReloadSignal::Partial)
            .await;

        assert!(handle.reader().await.lookup(&key).unwrap().is_some());
        assert!(!control_dir.path().join(RELOAD_FILE).exists());
    }

    #[tokio::test]
    async fn watcher_events_reach_the_controller() {
        let (dir, primary) = fixture_kv_store();
        let secondary = KvStore::open_secondary(dir.path()).unwrap();
        let (controller, handle) = controller(AnyStore::Kv(Arc::new(secondary)));
        let controller = Arc::new(controller);

        let control_dir = tempfile::tempdir().unwrap();
        let events = crate::watch::spawn_poll_watcher(
            vec![control_dir.path().to_path_buf()],
            Duration::from_millis(20),
        );
        tokio::spawn(controller.clone().run(
            control_dir.path().to_path_buf(),
            events,
            Duration::from_secs(3600),
        ));

        let (key, frame) = added_record();
        primary.add_frame(&key, &frame).unwrap();
        std::fs::write(control_dir.path().join(RELOAD_FILE), b"").unwrap();

        tokio::time::timeout(TIMEOUT, async {
            loop {
                if handle.reader().await.lookup(&key).unwrap().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("reload never became visible");

        assert!(!control_dir.path().join(RELOAD_FILE).exists());
    }
}
