//! Journaled disk cache of raw encoded image bytes.
//!
//! Blobs live in `<dir>/<key>.img`. A write streams into `<key>.tmp` and is
//! renamed into place on commit, so readers only ever see complete blobs.
//! The journal (see [`super::journal`]) records access order and sizes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use fs4::fs_std::FileExt;
use lru::LruCache;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::journal::{self, JOURNAL_FILE, JournalWriter, Record};
use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Default disk cache size in bytes (50 MB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Subdirectory of the platform cache directory used by default.
pub const DEFAULT_CACHE_DIR_NAME: &str = "bitmap";

const BLOB_EXT: &str = "img";
const TMP_EXT: &str = "tmp";
const LOCK_FILE: &str = ".lock";

/// Redundant journal records tolerated before compaction.
const COMPACT_THRESHOLD: usize = 2000;

struct State {
    index: LruCache<CacheKey, u64>,
    size: u64,
    journal: JournalWriter,
    redundant: usize,
}

struct Store {
    dir: PathBuf,
    capacity: u64,
    state: Mutex<State>,
    in_flight: Arc<parking_lot::Mutex<HashSet<CacheKey>>>,
    _lock: std::fs::File,
}

/// Counters for disk cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskStats {
    /// Calls to any public entry operation, including on a disabled cache.
    pub operations: u64,
    /// Reads that found a blob.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Writes made visible.
    pub commits: u64,
    /// Writes discarded.
    pub aborts: u64,
    /// `begin_write` calls refused because another write held the key.
    pub rejected_writes: u64,
}

#[derive(Default)]
struct Counters {
    operations: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    rejected_writes: AtomicU64,
}

/// Disk-based LRU cache that persists raw image bytes.
///
/// If opening fails the cache is disabled for its whole lifetime and every
/// operation returns absent or [`CacheError::Disabled`].
pub struct DiskImageCache {
    store: Option<Store>,
    counters: Counters,
}

/// An in-progress write for a single key.
///
/// Finish it with [`DiskImageCache::commit`] or [`DiskImageCache::abort`].
/// Dropping it unfinished discards the partial bytes.
pub struct DiskWriter {
    key: CacheKey,
    tmp_path: PathBuf,
    file: Option<BufWriter<fs::File>>,
    written: u64,
    finished: bool,
    in_flight: Arc<parking_lot::Mutex<HashSet<CacheKey>>>,
}

impl DiskWriter {
    /// Key this writer targets.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Appends a chunk to the pending blob.
    ///
    /// # Errors
    /// Returns error if the temp file cannot be written.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> CacheResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CacheError::IoError("Writer already finished".to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| CacheError::io("Failed to write cache file", &e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn release(&mut self) {
        self.file = None;
        if !self.finished {
            self.finished = true;
            self.in_flight.lock().remove(&self.key);
        }
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(key = %self.key, "Disk cache write dropped without commit or abort");
            self.file = None;
            let _ = std::fs::remove_file(&self.tmp_path);
            self.release();
        }
    }
}

impl DiskImageCache {
    /// Opens the cache in `dir`, holding at most `capacity` bytes.
    ///
    /// Creates the directory if needed, takes an exclusive lock on it and
    /// replays the journal. The cache comes back disabled if the directory
    /// cannot be created or locked, or if the volume has less free space
    /// than `capacity`.
    pub async fn open(dir: PathBuf, capacity: u64) -> Self {
        match Store::open(dir.clone(), capacity).await {
            Ok(store) => {
                let entries = store.state.lock().await.index.len();
                info!(dir = %dir.display(), capacity, entries, "Disk cache opened");
                Self {
                    store: Some(store),
                    counters: Counters::default(),
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Disk cache unavailable, continuing without it");
                Self::disabled()
            }
        }
    }

    /// Opens the cache in the default location (`<cache dir>/bitmap`).
    pub async fn default_location(capacity: u64) -> Self {
        Self::open(default_cache_dir(), capacity).await
    }

    /// Creates a cache that is permanently disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            store: None,
            counters: Counters::default(),
        }
    }

    /// Returns true if the cache opened successfully.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns the backing directory, if enabled.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.dir.as_path())
    }

    /// Reads the committed blob for `key`, promoting it in the LRU.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let store = self.store.as_ref()?;
        if !key.is_valid_file_stem() {
            warn!(key = %key, "Rejecting malformed cache key");
            return None;
        }

        let file = {
            let mut state = store.state.lock().await;
            if state.index.get(key).is_none() {
                drop(state);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Disk cache miss");
                return None;
            }

            let path = store.blob_path(key);
            match fs::File::open(&path).await {
                Ok(file) => {
                    store.record(&mut state, &Record::Read(key.clone())).await;
                    file
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Indexed blob missing, dropping entry");
                    if let Some(size) = state.index.pop(key) {
                        state.size -= size;
                    }
                    store.record(&mut state, &Record::Remove(key.clone())).await;
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        let mut file = file;
        let mut buf = Vec::new();
        if let Err(e) = file.read_to_end(&mut buf).await {
            warn!(key = %key, error = %e, "Failed to read cached blob");
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, size = buf.len(), "Disk cache hit");
        Some(Bytes::from(buf))
    }

    /// Starts a write for `key`.
    ///
    /// Returns `None` if the cache is disabled or another write for the same
    /// key has not finished yet.
    pub async fn begin_write(&self, key: &CacheKey) -> Option<DiskWriter> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let store = self.store.as_ref()?;
        if !key.is_valid_file_stem() {
            warn!(key = %key, "Rejecting malformed cache key");
            return None;
        }

        if !store.in_flight.lock().insert(key.clone()) {
            self.counters.rejected_writes.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Write already in progress, refusing second writer");
            return None;
        }

        let tmp_path = store.tmp_path(key);
        let mut writer = DiskWriter {
            key: key.clone(),
            tmp_path: tmp_path.clone(),
            file: None,
            written: 0,
            finished: false,
            in_flight: store.in_flight.clone(),
        };

        match fs::File::create(&tmp_path).await {
            Ok(file) => writer.file = Some(BufWriter::new(file)),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to create cache temp file");
                writer.release();
                return None;
            }
        }

        let mut state = store.state.lock().await;
        store.record(&mut state, &Record::Dirty(key.clone())).await;
        drop(state);

        trace!(key = %key, "Began disk cache write");
        Some(writer)
    }

    /// Makes the writer's bytes visible under its key.
    ///
    /// Evicts least recently used entries if the cache is now over capacity.
    ///
    /// # Errors
    /// Returns error if the blob cannot be synced or moved into place; the
    /// write is aborted in that case.
    pub async fn commit(&self, mut writer: DiskWriter) -> CacheResult<()> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let Some(store) = self.store.as_ref() else {
            writer.release();
            return Err(CacheError::Disabled);
        };

        if let Err(e) = finish_file(&mut writer).await {
            self.discard(store, writer).await;
            return Err(e);
        }

        let key = writer.key.clone();
        let size = writer.written;
        let mut state = store.state.lock().await;

        if let Err(e) = fs::rename(&writer.tmp_path, store.blob_path(&key)).await {
            drop(state);
            self.discard(store, writer).await;
            return Err(CacheError::io("Failed to move blob into place", &e));
        }

        if let Some(old) = state.index.put(key.clone(), size) {
            state.size -= old;
            state.redundant += 1;
        }
        state.size += size;
        store.record(&mut state, &Record::Clean(key.clone(), size)).await;
        writer.release();

        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, size, total = state.size, "Committed blob to disk cache");

        store.trim_to_capacity(&mut state).await;
        store.compact_if_needed(&mut state).await;
        Ok(())
    }

    /// Discards the writer's bytes. The store is left as it was.
    pub async fn abort(&self, writer: DiskWriter) {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        match self.store.as_ref() {
            Some(store) => self.discard(store, writer).await,
            None => {
                let mut writer = writer;
                writer.release();
            }
        }
    }

    async fn discard(&self, store: &Store, mut writer: DiskWriter) {
        writer.file = None;
        if let Err(e) = fs::remove_file(&writer.tmp_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(key = %writer.key, error = %e, "Failed to remove aborted temp file");
        }

        let mut state = store.state.lock().await;
        let record = match state.index.peek(&writer.key) {
            Some(&size) => Record::Clean(writer.key.clone(), size),
            None => Record::Remove(writer.key.clone()),
        };
        store.record(&mut state, &record).await;
        state.redundant += 1;
        drop(state);

        writer.release();
        self.counters.aborts.fetch_add(1, Ordering::Relaxed);
        debug!(key = %writer.key, "Aborted disk cache write");
    }

    /// Persists buffered journal records.
    ///
    /// # Errors
    /// Returns error if the cache is disabled or the journal cannot be synced.
    pub async fn flush(&self) -> CacheResult<()> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let store = self.store.as_ref().ok_or(CacheError::Disabled)?;
        let mut state = store.state.lock().await;
        state.journal.flush().await
    }

    /// Removes an entry.
    ///
    /// # Errors
    /// Returns error if a write for the key is in progress or the blob cannot
    /// be deleted.
    pub async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let store = self.store.as_ref().ok_or(CacheError::Disabled)?;
        if store.in_flight.lock().contains(key) {
            return Err(CacheError::WriteInProgress(key.to_string()));
        }

        let mut state = store.state.lock().await;
        let Some(size) = state.index.pop(key) else {
            return Ok(false);
        };
        state.size -= size;
        store.record(&mut state, &Record::Remove(key.clone())).await;
        store.delete_blob(key).await?;
        debug!(key = %key, "Removed entry from disk cache");
        Ok(true)
    }

    /// Removes every committed entry. In-progress writes are unaffected.
    ///
    /// # Errors
    /// Returns error if the cache is disabled or the journal cannot be
    /// rewritten.
    pub async fn clear(&self) -> CacheResult<()> {
        let store = self.store.as_ref().ok_or(CacheError::Disabled)?;
        let mut state = store.state.lock().await;

        while let Some((key, _)) = state.index.pop_lru() {
            if let Err(e) = store.delete_blob(&key).await {
                warn!(key = %key, error = %e, "Failed to remove cache file");
            }
        }
        state.size = 0;
        store.rewrite_journal(&mut state).await?;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns true if a committed entry exists for `key`.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        match &self.store {
            Some(store) => store.state.lock().await.index.contains(key),
            None => false,
        }
    }

    /// Returns the committed size in bytes.
    pub async fn size(&self) -> u64 {
        match &self.store {
            Some(store) => store.state.lock().await.size,
            None => 0,
        }
    }

    /// Returns the number of committed entries.
    pub async fn len(&self) -> usize {
        match &self.store {
            Some(store) => store.state.lock().await.index.len(),
            None => 0,
        }
    }

    /// Returns true if the cache holds no committed entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the configured capacity, or zero if disabled.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.store.as_ref().map_or(0, |s| s.capacity)
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> DiskStats {
        let c = &self.counters;
        DiskStats {
            operations: c.operations.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            aborts: c.aborts.load(Ordering::Relaxed),
            rejected_writes: c.rejected_writes.load(Ordering::Relaxed),
        }
    }
}

async fn finish_file(writer: &mut DiskWriter) -> CacheResult<()> {
    let mut file = writer
        .file
        .take()
        .ok_or_else(|| CacheError::IoError("Writer already finished".to_string()))?;
    file.flush()
        .await
        .map_err(|e| CacheError::io("Failed to flush cache file", &e))?;
    file.get_ref()
        .sync_all()
        .await
        .map_err(|e| CacheError::io("Failed to sync cache file", &e))
}

impl Store {
    async fn open(dir: PathBuf, capacity: u64) -> CacheResult<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io("Failed to create cache dir", &e))?;

        let available = fs4::available_space(&dir)
            .map_err(|e| CacheError::io("Failed to query free space", &e))?;
        if available < capacity {
            return Err(CacheError::IoError(format!(
                "Only {available} bytes free, need {capacity}"
            )));
        }

        let lock = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| CacheError::io("Failed to create lock file", &e))?;
        FileExt::try_lock_exclusive(&lock)
            .map_err(|e| CacheError::io("Cache directory is locked by another instance", &e))?;

        let replayed = match journal::replay(&dir).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Disk cache journal unusable, starting fresh");
                wipe_dir(&dir).await?;
                None
            }
        };

        let (mut index, dangling) = match replayed {
            Some(r) => (r.entries, r.dangling),
            None => (LruCache::unbounded(), HashSet::new()),
        };

        let size = reconcile(&dir, &mut index, &dangling).await?;

        let journal =
            JournalWriter::rewrite(&dir, index.iter().rev(), std::iter::empty()).await?;

        let store = Self {
            dir,
            capacity,
            state: Mutex::new(State {
                index,
                size,
                journal,
                redundant: 0,
            }),
            in_flight: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            _lock: lock,
        };

        {
            let mut state = store.state.lock().await;
            store.trim_to_capacity(&mut state).await;
            if let Err(e) = state.journal.flush().await {
                warn!(error = %e, "Failed to flush journal after open");
            }
        }

        Ok(store)
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{BLOB_EXT}", key.as_str()))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{TMP_EXT}", key.as_str()))
    }

    async fn delete_blob(&self, key: &CacheKey) -> CacheResult<()> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io("Failed to remove cache file", &e)),
        }
    }

    /// Appends a journal record. Failures are logged; the next open
    /// reconciles the index against the directory.
    async fn record(&self, state: &mut State, record: &Record) {
        if let Err(e) = state.journal.append(record).await {
            warn!(error = %e, "Failed to append journal record");
        }
        if matches!(record, Record::Read(_)) {
            state.redundant += 1;
        }
    }

    async fn trim_to_capacity(&self, state: &mut State) {
        while state.size > self.capacity {
            let Some((key, size)) = state.index.pop_lru() else {
                break;
            };
            if let Err(e) = self.delete_blob(&key).await {
                warn!(key = %key, error = %e, "Failed to evict cache file");
            }
            state.size -= size;
            state.redundant += 1;
            self.record(state, &Record::Remove(key.clone())).await;
            debug!(key = %key, size, total = state.size, "Evicted from disk cache");
        }
    }

    async fn compact_if_needed(&self, state: &mut State) {
        if state.redundant >= COMPACT_THRESHOLD && state.redundant >= state.index.len() {
            if let Err(e) = self.rewrite_journal(state).await {
                warn!(error = %e, "Journal compaction failed");
            }
        }
    }

    async fn rewrite_journal(&self, state: &mut State) -> CacheResult<()> {
        if let Err(e) = state.journal.flush().await {
            warn!(error = %e, "Failed to flush journal before rewrite");
        }
        let in_flight: Vec<CacheKey> = self.in_flight.lock().iter().cloned().collect();
        state.journal =
            JournalWriter::rewrite(&self.dir, state.index.iter().rev(), in_flight.iter()).await?;
        state.redundant = 0;
        debug!(entries = state.index.len(), "Rewrote disk cache journal");
        Ok(())
    }
}

/// Drops index entries whose blobs are missing, fixes recorded sizes from
/// the filesystem, and deletes leftovers of interrupted writes and orphans.
async fn reconcile(
    dir: &Path,
    index: &mut LruCache<CacheKey, u64>,
    dangling: &HashSet<CacheKey>,
) -> CacheResult<u64> {
    let mut on_disk = HashSet::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::io("Failed to read cache dir", &e))?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(CacheKey::new);
        let ext = path.extension().and_then(|e| e.to_str());

        match (stem, ext) {
            (Some(key), Some(TMP_EXT)) => {
                if dangling.contains(&key) {
                    debug!(key = %key, "Removing interrupted write");
                }
                let _ = fs::remove_file(&path).await;
            }
            (Some(key), Some(BLOB_EXT)) if index.contains(&key) => {
                if let Ok(meta) = entry.metadata().await
                    && let Some(size) = index.peek_mut(&key)
                {
                    *size = meta.len();
                }
                on_disk.insert(key);
            }
            (Some(key), Some(BLOB_EXT)) => {
                debug!(key = %key, "Removing orphaned blob");
                let _ = fs::remove_file(&path).await;
            }
            _ => {}
        }
    }

    let missing: Vec<CacheKey> = index
        .iter()
        .filter(|(k, _)| !on_disk.contains(*k))
        .map(|(k, _)| k.clone())
        .collect();
    for key in missing {
        debug!(key = %key, "Journal entry without blob, dropping");
        index.pop(&key);
    }

    Ok(index.iter().map(|(_, size)| *size).sum())
}

async fn wipe_dir(dir: &Path) -> CacheResult<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::io("Failed to read cache dir", &e))?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name == LOCK_FILE {
            continue;
        }
        let is_ours = name == JOURNAL_FILE
            || path
                .extension()
                .is_some_and(|ext| ext == BLOB_EXT || ext == TMP_EXT);
        if is_ours && fs::remove_file(&path).await.is_err() {
            warn!(path = %path.display(), "Failed to remove cache file");
        }
    }
    Ok(())
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "imgcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("imgcache")
                .join("cache")
                .join(DEFAULT_CACHE_DIR_NAME)
        },
        |dirs| dirs.cache_dir().join(DEFAULT_CACHE_DIR_NAME),
    )
}
