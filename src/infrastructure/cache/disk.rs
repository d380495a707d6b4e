//! Disk-backed cache tier: persistent, versioned, size-bounded.
//!
//! Each entry holds two slots keyed by the cache key: slot `0` is a
//! one-byte raster/raw marker, slot `1` is the payload. A `version` tag
//! file guards the schema; opening a store with a different version
//! discards prior contents. Entries are evicted least-recently-used by
//! access time once the store exceeds its byte budget.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Default maximum disk store size in bytes (100 MiB).
pub const DEFAULT_DISK_BUDGET: u64 = 100 * 1024 * 1024;

const VERSION_FILE: &str = "version";
const SLOT_MARKER: &str = "0";
const SLOT_PAYLOAD: &str = "1";
const TMP_EXT: &str = "tmp";

/// Marker persisted in an entry's first slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The payload is an encoded raster image.
    Raster,
    /// The payload is a verbatim (animated) byte stream.
    Raw,
}

impl EntryKind {
    const fn as_slot(self) -> &'static [u8] {
        match self {
            Self::Raster => b"1",
            Self::Raw => b"0",
        }
    }

    fn from_slot(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"1" => Some(Self::Raster),
            b"0" => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Read-only view of a disk entry at lookup time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    kind: EntryKind,
    payload: Vec<u8>,
}

impl Snapshot {
    /// The entry's raster/raw marker.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The payload slot.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the snapshot, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Persistent, versioned, size-bounded store.
pub struct DiskStore {
    root: PathBuf,
    version: u32,
    max_bytes: u64,
    current_bytes: AtomicU64,
    item_count: AtomicUsize,
    active_edits: Mutex<HashSet<String>>,
}

impl DiskStore {
    /// Opens or initializes a store in `root`.
    ///
    /// A stored version differing from `version` triggers a full reset.
    /// Leftover temporary files from interrupted commits are discarded.
    ///
    /// # Errors
    /// Returns [`CacheError::Unavailable`] if the directory cannot be
    /// created or scanned; callers degrade to memory+network operation.
    pub async fn open(root: PathBuf, version: u32, max_bytes: u64) -> CacheResult<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to create cache dir: {e}")))?;

        let store = Self {
            root,
            version,
            max_bytes,
            current_bytes: AtomicU64::new(0),
            item_count: AtomicUsize::new(0),
            active_edits: Mutex::new(HashSet::new()),
        };

        let stored = store.read_version().await;
        if stored != Some(version) {
            if let Some(stored) = stored {
                debug!(stored, expected = version, "Disk store version mismatch, resetting");
            }
            store
                .remove_entries()
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            store.write_version().await?;
        }

        store
            .rescan()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        store.evict_if_needed().await;

        Ok(store)
    }

    /// Looks up an entry, returning its marker and payload.
    ///
    /// Any read failure, including a corrupt marker, reports a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Snapshot> {
        let marker = match fs::read(self.slot_path(key.as_str(), SLOT_MARKER)).await {
            Ok(bytes) => bytes,
            Err(_) => {
                trace!(key = %key, "Disk cache miss");
                return None;
            }
        };
        let Some(kind) = EntryKind::from_slot(&marker) else {
            warn!(key = %key, "Corrupt marker slot, treating as miss");
            return None;
        };
        let payload = fs::read(self.slot_path(key.as_str(), SLOT_PAYLOAD)).await.ok()?;
        trace!(key = %key, size = payload.len(), "Disk cache hit");
        Some(Snapshot { kind, payload })
    }

    /// Begins an exclusive edit of one entry.
    ///
    /// Returns `None` while another editor for the same key is active.
    /// Slot contents are buffered until [`Editor::commit`]; a dropped
    /// editor leaves no visible trace.
    pub fn edit(&self, key: &CacheKey) -> Option<Editor<'_>> {
        let mut edits = self.active_edits.lock();
        if !edits.insert(key.as_str().to_owned()) {
            trace!(key = %key, "Edit already in progress");
            return None;
        }
        Some(Editor {
            store: self,
            key: key.as_str().to_owned(),
            kind: None,
            payload: None,
            finished: false,
        })
    }

    /// Removes every entry and reinitializes the version tag.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or the tag cannot
    /// be rewritten.
    pub async fn clear(&self) -> CacheResult<()> {
        self.remove_entries().await?;
        self.write_version().await?;
        debug!("Cleared disk store");
        Ok(())
    }

    /// Current usage in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether an entry exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.slot_path(key.as_str(), SLOT_PAYLOAD))
            .await
            .unwrap_or(false)
    }

    fn slot_path(&self, key: &str, slot: &str) -> PathBuf {
        self.root.join(format!("{key}.{slot}"))
    }

    fn tmp_path(&self, key: &str, slot: &str) -> PathBuf {
        self.root.join(format!("{key}.{slot}.{TMP_EXT}"))
    }

    fn release_edit(&self, key: &str) {
        self.active_edits.lock().remove(key);
    }

    async fn read_version(&self) -> Option<u32> {
        let raw = fs::read_to_string(self.root.join(VERSION_FILE)).await.ok()?;
        raw.trim().parse().ok()
    }

    async fn write_version(&self) -> CacheResult<()> {
        fs::write(self.root.join(VERSION_FILE), self.version.to_string())
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to write version tag: {e}")))
    }

    /// Deletes all slot files and resets the counters.
    async fn remove_entries(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::Io(format!("failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::Io(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if is_slot_file(&path) && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        self.current_bytes.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Seeds the size and entry counters from the directory contents and
    /// discards temporary files left by interrupted commits.
    async fn rescan(&self) -> CacheResult<()> {
        let mut total = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::Io(format!("failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TMP_EXT) {
                let _ = fs::remove_file(&path).await;
                continue;
            }
            if !is_slot_file(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
                if path.extension().is_some_and(|ext| ext == SLOT_PAYLOAD) {
                    count += 1;
                }
            }
        }

        self.current_bytes.store(total, Ordering::Relaxed);
        self.item_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    /// Evicts least-recently-used entries once usage exceeds the budget,
    /// freeing 10% headroom past the limit.
    async fn evict_if_needed(&self) {
        let current = self.size();
        if current <= self.max_bytes {
            return;
        }

        debug!(
            current_bytes = current,
            max_bytes = self.max_bytes,
            "Disk store over limit, evicting"
        );

        let Ok(mut dir) = fs::read_dir(&self.root).await else {
            return;
        };

        let mut entries: HashMap<String, (Option<SystemTime>, u64)> = HashMap::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if !is_slot_file(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let slot = entries.entry(stem.to_owned()).or_insert((None, 0));
            slot.1 += meta.len();
            if path.extension().is_some_and(|ext| ext == SLOT_PAYLOAD) {
                slot.0 = Some(meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH));
            }
        }

        let mut entries: Vec<(String, Option<SystemTime>, u64)> = entries
            .into_iter()
            .map(|(key, (accessed, bytes))| (key, accessed, bytes))
            .collect();
        entries.sort_by_key(|(_, accessed, _)| accessed.unwrap_or(SystemTime::UNIX_EPOCH));

        let target = current - self.max_bytes + (self.max_bytes / 10);
        let mut freed_bytes = 0u64;
        let mut freed_count = 0usize;

        for (key, _, bytes) in entries {
            if freed_bytes >= target {
                break;
            }
            if self.active_edits.lock().contains(&key) {
                continue;
            }
            let removed_payload = fs::remove_file(self.slot_path(&key, SLOT_PAYLOAD)).await.is_ok();
            let _ = fs::remove_file(self.slot_path(&key, SLOT_MARKER)).await;
            if removed_payload {
                freed_bytes += bytes;
                freed_count += 1;
                trace!(key = %key, "Evicted disk entry");
            }
        }

        self.current_bytes.fetch_sub(freed_bytes, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);

        debug!(freed_bytes, freed_count, "Disk store eviction complete");
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("root", &self.root)
            .field("version", &self.version)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

fn is_slot_file(path: &std::path::Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == SLOT_MARKER || ext == SLOT_PAYLOAD)
}

/// Transactional writer for one entry.
///
/// Slot contents are buffered in memory; `commit` writes them through
/// temporary files and renames, so readers never observe a partial entry.
#[derive(Debug)]
pub struct Editor<'a> {
    store: &'a DiskStore,
    key: String,
    kind: Option<EntryKind>,
    payload: Option<Vec<u8>>,
    finished: bool,
}

impl Editor<'_> {
    /// Sets the marker slot.
    pub fn set_marker(&mut self, kind: EntryKind) {
        self.kind = Some(kind);
    }

    /// Sets the payload slot.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
    }

    /// Writes both slots and makes the entry visible.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] if either slot is unset or a write
    /// fails; a failed commit leaves no partial entry behind.
    pub async fn commit(mut self) -> CacheResult<()> {
        self.finished = true;
        let result = self.commit_inner().await;
        self.store.release_edit(&self.key);
        result
    }

    async fn commit_inner(&self) -> CacheResult<()> {
        let kind = self
            .kind
            .ok_or_else(|| CacheError::Io("commit with unset marker slot".into()))?;
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| CacheError::Io("commit with unset payload slot".into()))?;

        let marker_path = self.store.slot_path(&self.key, SLOT_MARKER);
        let payload_path = self.store.slot_path(&self.key, SLOT_PAYLOAD);

        let old_len = {
            let marker = fs::metadata(&marker_path).await.map(|m| m.len()).ok();
            let payload = fs::metadata(&payload_path).await.map(|m| m.len()).ok();
            payload.map(|p| p + marker.unwrap_or(0))
        };

        self.write_slot(SLOT_MARKER, kind.as_slot(), &marker_path).await?;
        if let Err(e) = self.write_slot(SLOT_PAYLOAD, payload, &payload_path).await {
            // Marker already renamed; drop the half-written entry.
            let _ = fs::remove_file(&marker_path).await;
            return Err(e);
        }

        let new_len = (kind.as_slot().len() + payload.len()) as u64;
        match old_len {
            Some(old) if new_len > old => {
                self.store.current_bytes.fetch_add(new_len - old, Ordering::Relaxed);
            }
            Some(old) => {
                self.store.current_bytes.fetch_sub(old - new_len, Ordering::Relaxed);
            }
            None => {
                self.store.current_bytes.fetch_add(new_len, Ordering::Relaxed);
                self.store.item_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(key = %self.key, size = new_len, "Committed disk entry");
        self.store.evict_if_needed().await;
        Ok(())
    }

    async fn write_slot(
        &self,
        slot: &str,
        bytes: &[u8],
        final_path: &std::path::Path,
    ) -> CacheResult<()> {
        let tmp = self.store.tmp_path(&self.key, slot);

        let result = async {
            let mut file = fs::File::create(&tmp)
                .await
                .map_err(|e| CacheError::Io(format!("failed to create slot file: {e}")))?;
            file.write_all(bytes)
                .await
                .map_err(|e| CacheError::Io(format!("failed to write slot file: {e}")))?;
            file.flush()
                .await
                .map_err(|e| CacheError::Io(format!("failed to flush slot file: {e}")))?;
            fs::rename(&tmp, final_path)
                .await
                .map_err(|e| CacheError::Io(format!("failed to publish slot file: {e}")))
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }
}

impl Drop for Editor<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.release_edit(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name, 0, 0)
    }

    async fn create_store(max_bytes: u64) -> (DiskStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::open(temp.path().to_path_buf(), 1, max_bytes)
            .await
            .unwrap();
        (store, temp)
    }

    async fn put(store: &DiskStore, key: &CacheKey, kind: EntryKind, payload: &[u8]) {
        let mut editor = store.edit(key).unwrap();
        editor.set_marker(kind);
        editor.set_payload(payload.to_vec());
        editor.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_and_lookup_roundtrip() {
        let (store, _temp) = create_store(1024 * 1024).await;
        let k = key("a");

        put(&store, &k, EntryKind::Raw, b"payload bytes").await;

        let snapshot = store.lookup(&k).await.unwrap();
        assert_eq!(snapshot.kind(), EntryKind::Raw);
        assert_eq!(snapshot.payload(), b"payload bytes");
    }

    #[tokio::test]
    async fn test_marker_roundtrip() {
        let (store, _temp) = create_store(1024 * 1024).await;
        put(&store, &key("raster"), EntryKind::Raster, b"png bytes").await;
        put(&store, &key("raw"), EntryKind::Raw, b"gif bytes").await;

        assert_eq!(store.lookup(&key("raster")).await.unwrap().kind(), EntryKind::Raster);
        assert_eq!(store.lookup(&key("raw")).await.unwrap().kind(), EntryKind::Raw);
    }

    #[tokio::test]
    async fn test_lookup_miss() {
        let (store, _temp) = create_store(1024 * 1024).await;
        assert!(store.lookup(&key("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_edit_leaves_no_trace() {
        let (store, _temp) = create_store(1024 * 1024).await;
        let k = key("a");

        {
            let mut editor = store.edit(&k).unwrap();
            editor.set_marker(EntryKind::Raw);
            editor.set_payload(b"never committed".to_vec());
        }

        assert!(store.lookup(&k).await.is_none());
        assert_eq!(store.size(), 0);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_edits_are_exclusive_per_key() {
        let (store, _temp) = create_store(1024 * 1024).await;
        let k = key("a");

        let first = store.edit(&k).unwrap();
        assert!(store.edit(&k).is_none());
        // A different key is unaffected.
        assert!(store.edit(&key("b")).is_some());
        drop(first);
        assert!(store.edit(&k).is_some());
    }

    #[tokio::test]
    async fn test_version_mismatch_resets() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let store = DiskStore::open(root.clone(), 1, 1024 * 1024).await.unwrap();
        put(&store, &key("a"), EntryKind::Raw, b"old schema").await;
        drop(store);

        let store = DiskStore::open(root, 2, 1024 * 1024).await.unwrap();
        assert!(store.lookup(&key("a")).await.is_none());
        assert_eq!(store.size(), 0);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let store = DiskStore::open(root.clone(), 1, 1024 * 1024).await.unwrap();
        put(&store, &key("a"), EntryKind::Raster, b"persisted").await;
        let size = store.size();
        drop(store);

        let store = DiskStore::open(root, 1, 1024 * 1024).await.unwrap();
        assert_eq!(store.size(), size);
        assert_eq!(store.len(), 1);
        let snapshot = store.lookup(&key("a")).await.unwrap();
        assert_eq!(snapshot.payload(), b"persisted");
    }

    #[tokio::test]
    async fn test_eviction_drops_least_recently_used() {
        let (store, _temp) = create_store(16).await;

        put(&store, &key("old"), EntryKind::Raw, b"0123456789").await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        put(&store, &key("new"), EntryKind::Raw, b"0123456789").await;

        assert_eq!(store.len(), 1);
        assert!(store.lookup(&key("new")).await.is_some());
        assert!(store.lookup(&key("old")).await.is_none());
    }

    #[tokio::test]
    async fn test_replacement_adjusts_size() {
        let (store, _temp) = create_store(1024 * 1024).await;
        let k = key("a");

        put(&store, &k, EntryKind::Raw, b"0123456789").await;
        let before = store.size();
        put(&store, &k, EntryKind::Raw, b"01234").await;

        assert_eq!(store.size(), before - 5);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_store_usable() {
        let (store, _temp) = create_store(1024 * 1024).await;
        put(&store, &key("a"), EntryKind::Raw, b"data").await;
        put(&store, &key("b"), EntryKind::Raw, b"data").await;

        store.clear().await.unwrap();
        assert_eq!(store.size(), 0);
        assert_eq!(store.len(), 0);

        put(&store, &key("c"), EntryKind::Raw, b"fresh").await;
        assert!(store.lookup(&key("c")).await.is_some());
    }

    #[tokio::test]
    async fn test_interrupted_commit_leftovers_discarded() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let store = DiskStore::open(root.clone(), 1, 1024 * 1024).await.unwrap();
        put(&store, &key("a"), EntryKind::Raw, b"kept").await;
        drop(store);

        // Simulate a crash mid-commit.
        std::fs::write(root.join(format!("{}.1.tmp", key("b").as_str())), b"junk").unwrap();

        let store = DiskStore::open(root.clone(), 1, 1024 * 1024).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(!root.join(format!("{}.1.tmp", key("b").as_str())).exists());
    }
}
