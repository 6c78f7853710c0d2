//! Artifact store.
//!
//! Payloads live in a backend (memory or a directory); the store keeps the
//! index of handle, digest and expiry. Every retrieval re-hashes the payload,
//! so a caller gets the exact bytes that were stored or an error.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::clock::after;
use crate::error::CoreError;

pub trait ArtifactBackend: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    /// `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

#[derive(Default)]
pub struct MemoryBackend {
    payloads: Mutex<FxHashMap<String, Arc<[u8]>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactBackend for MemoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.payloads.lock().insert(key.to_string(), Arc::from(bytes));
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.payloads.lock().get(key).map(|p| p.to_vec()))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.payloads.lock().remove(key);
        Ok(())
    }
}

/// One `.xlsx` file per artifact under `dir`.
pub struct DirBackend {
    dir: PathBuf,
}

impl DirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.xlsx"))
    }
}

impl ArtifactBackend for DirBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        // Write then rename so a reader never sees a partial file
        let tmp = self.dir.join(format!("{key}.partial"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.path(key))
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// What the store recorded for a freshly stored payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub handle: String,
    pub digest: String,
    pub size_bytes: usize,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    digest: String,
    expires_at: DateTime<Utc>,
}

type Key = (String, String);

pub struct ArtifactStore {
    backend: Box<dyn ArtifactBackend>,
    retention: Duration,
    index: Mutex<FxHashMap<Key, IndexEntry>>,
    /// Purge time of handles dropped by retention, so late callers hear
    /// "expired". Forgotten one retention window after the purge.
    expired: Mutex<FxHashMap<Key, DateTime<Utc>>>,
}

impl ArtifactStore {
    pub fn new(backend: Box<dyn ArtifactBackend>, retention: Duration) -> Self {
        Self {
            backend,
            retention,
            index: Mutex::new(FxHashMap::default()),
            expired: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn in_memory(retention: Duration) -> Self {
        Self::new(Box::new(MemoryBackend::new()), retention)
    }

    pub fn put(&self, tenant: &str, bytes: &[u8], now: DateTime<Utc>) -> Result<StoredArtifact, CoreError> {
        let handle = format!("art-{}", uuid::Uuid::new_v4().simple());
        let digest = blake3::hash(bytes).to_hex().to_string();

        self.backend.put(&handle, bytes).map_err(|e| {
            log::warn!("artifact {handle}: store failed: {e}");
            CoreError::ArtifactUnavailable(format!("could not store artifact: {e}"))
        })?;

        let expires_at = after(now, self.retention);
        self.index.lock().insert(
            (tenant.to_string(), handle.clone()),
            IndexEntry { digest: digest.clone(), expires_at },
        );
        log::info!("artifact {handle}: stored {} bytes, expires {}", bytes.len(), expires_at.to_rfc3339());

        Ok(StoredArtifact { handle, digest, size_bytes: bytes.len(), expires_at })
    }

    pub fn get(&self, tenant: &str, handle: &str, now: DateTime<Utc>) -> Result<Vec<u8>, CoreError> {
        let key = (tenant.to_string(), handle.to_string());
        let entry = self.index.lock().get(&key).cloned();
        let Some(entry) = entry else {
            if self.expired.lock().contains_key(&key) {
                return Err(CoreError::ArtifactExpired(handle.to_string()));
            }
            return Err(CoreError::UnknownHandle(handle.to_string()));
        };

        if now >= entry.expires_at {
            self.purge(&key, now);
            return Err(CoreError::ArtifactExpired(handle.to_string()));
        }

        let bytes = self
            .backend
            .get(handle)
            .map_err(|e| CoreError::ArtifactUnavailable(format!("{handle}: {e}")))?
            .ok_or_else(|| CoreError::ArtifactUnavailable(format!("{handle}: payload missing")))?;

        if blake3::hash(&bytes).to_hex().as_str() != entry.digest {
            log::warn!("artifact {handle}: digest mismatch");
            return Err(CoreError::ArtifactUnavailable(format!("{handle}: payload failed verification")));
        }
        Ok(bytes)
    }

    /// Drop every artifact past retention, and tombstones older than one
    /// more retention window. Returns how many artifacts were purged.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Key> = self
            .index
            .lock()
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            self.purge(key, now);
        }

        let retention = self.retention;
        let mut expired = self.expired.lock();
        let before = expired.len();
        expired.retain(|_, purged_at| now < after(*purged_at, retention));
        if expired.len() < before {
            log::debug!("forgot {} expired artifact handle(s)", before - expired.len());
        }
        due.len()
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(&self, key: &Key, now: DateTime<Utc>) {
        self.index.lock().remove(key);
        self.expired.lock().insert(key.clone(), now);
        if let Err(e) = self.backend.remove(&key.1) {
            log::warn!("artifact {}: remove failed: {e}", key.1);
        }
        log::info!("artifact {}: purged", key.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn repeated_get_is_byte_identical() {
        let store = ArtifactStore::in_memory(DAY);
        let stored = store.put("t", b"payload", t0()).unwrap();
        assert_eq!(stored.size_bytes, 7);
        let a = store.get("t", &stored.handle, t0()).unwrap();
        let b = store.get("t", &stored.handle, t0()).unwrap();
        assert_eq!(a, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn expired_handle_reports_expired() {
        let store = ArtifactStore::in_memory(DAY);
        let stored = store.put("t", b"payload", t0()).unwrap();
        let later = after(t0(), DAY);
        assert_eq!(
            store.get("t", &stored.handle, later),
            Err(CoreError::ArtifactExpired(stored.handle.clone()))
        );
        // still expired after the purge
        assert_eq!(
            store.get("t", &stored.handle, t0()),
            Err(CoreError::ArtifactExpired(stored.handle.clone()))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn expired_tombstone_is_forgotten_after_another_window() {
        let store = ArtifactStore::in_memory(DAY);
        let stored = store.put("t", b"payload", t0()).unwrap();
        let purged_at = after(t0(), DAY);
        assert_eq!(store.purge_expired(purged_at), 1);

        // within one more window the handle still reads as expired
        let almost = after(purged_at, DAY - Duration::from_secs(1));
        assert_eq!(store.purge_expired(almost), 0);
        assert_eq!(
            store.get("t", &stored.handle, almost),
            Err(CoreError::ArtifactExpired(stored.handle.clone()))
        );

        let forgotten = after(purged_at, DAY);
        assert_eq!(store.purge_expired(forgotten), 0);
        assert_eq!(
            store.get("t", &stored.handle, forgotten),
            Err(CoreError::UnknownHandle(stored.handle.clone()))
        );
        assert!(store.expired.lock().is_empty());
    }

    #[test]
    fn tenants_do_not_share_handles() {
        let store = ArtifactStore::in_memory(DAY);
        let stored = store.put("a", b"x", t0()).unwrap();
        assert!(matches!(store.get("b", &stored.handle, t0()), Err(CoreError::UnknownHandle(_))));
    }

    #[test]
    fn sweep_purges_only_due() {
        let store = ArtifactStore::in_memory(DAY);
        store.put("t", b"old", t0()).unwrap();
        let fresh = store.put("t", b"new", after(t0(), Duration::from_secs(3600))).unwrap();
        assert_eq!(store.purge_expired(after(t0(), DAY)), 1);
        assert!(store.get("t", &fresh.handle, after(t0(), DAY)).is_ok());
    }

    #[test]
    fn tampered_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(Box::new(DirBackend::new(dir.path()).unwrap()), DAY);
        let stored = store.put("t", b"original", t0()).unwrap();
        assert_eq!(store.get("t", &stored.handle, t0()).unwrap(), b"original");

        let path = dir.path().join(format!("{}.xlsx", stored.handle));
        fs::write(&path, b"0riginal").unwrap();
        assert!(matches!(store.get("t", &stored.handle, t0()), Err(CoreError::ArtifactUnavailable(_))));

        fs::remove_file(&path).unwrap();
        assert!(matches!(store.get("t", &stored.handle, t0()), Err(CoreError::ArtifactUnavailable(_))));
    }
}
