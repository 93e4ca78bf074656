//! On-disk staging area for blobs awaiting merge
//!
//! A blob is written to `.<id>`, flushed, then renamed to `<id>`. Only the
//! rename makes it visible under its final name, so a crash mid-write leaves
//! at most a dot-prefixed temp file behind. Each file has one owner at a
//! time: ingestion until the rename, the merger until deletion.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::errors::{PendingError, PendingResult};
use super::id::{is_valid_id, random_id};

const TEMP_PREFIX: char = '.';

/// Staging directory for pending records.
#[derive(Debug, Clone)]
pub struct PendingStore {
    dir: PathBuf,
    id_length: usize,
}

impl PendingStore {
    /// Opens the store rooted at `dir`, creating the directory if missing.
    pub fn open(dir: impl AsRef<Path>, id_length: usize) -> PendingResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(PendingError::Directory)?;
        Ok(Self { dir, id_length })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the final path for a pending id.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn temp_path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", TEMP_PREFIX, id))
    }

    /// Durably stages `bytes` and returns the new pending id.
    ///
    /// When this returns `Ok`, the file `<dir>/<id>` holds exactly `bytes`.
    pub fn stage(&self, bytes: &[u8]) -> PendingResult<String> {
        let id = loop {
            let candidate = random_id(self.id_length);
            if !self.path_for(&candidate).exists() {
                break candidate;
            }
        };

        let temp_path = self.temp_path_for(&id);
        if let Err(source) = write_synced(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(PendingError::StageFailed { id, source });
        }

        if let Err(source) = fs::rename(&temp_path, self.path_for(&id)) {
            let _ = fs::remove_file(&temp_path);
            return Err(PendingError::RenameFailed { id, source });
        }

        sync_dir(&self.dir).map_err(|source| PendingError::RenameFailed {
            id: id.clone(),
            source,
        })?;

        Ok(id)
    }

    /// Reads the full contents of a staged record.
    pub fn read(&self, id: &str) -> PendingResult<Vec<u8>> {
        self.check_id(id)?;
        fs::read(self.path_for(id)).map_err(|source| PendingError::ReadFailed {
            id: id.to_string(),
            source,
        })
    }

    /// Deletes a merged record.
    pub fn remove(&self, id: &str) -> PendingResult<()> {
        self.check_id(id)?;
        fs::remove_file(self.path_for(id)).map_err(|source| PendingError::RemoveFailed {
            id: id.to_string(),
            source,
        })
    }

    /// Deletes leftover temp files. Returns how many were removed.
    ///
    /// A temp file was never renamed, so its producer was never acknowledged.
    pub fn sweep_temp_files(&self) -> PendingResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(PendingError::Directory)? {
            let entry = entry.map_err(PendingError::Directory)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            let is_temp = name
                .strip_prefix(TEMP_PREFIX)
                .map(|rest| rest.len() == self.id_length && is_valid_id(rest))
                .unwrap_or(false);

            if is_temp && entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                fs::remove_file(entry.path()).map_err(PendingError::Directory)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Lists staged records, oldest first (modification time, then name).
    ///
    /// Every regular file whose name is a valid id counts, whoever wrote it.
    /// The directory belongs to the broker; nothing else may place files there.
    pub fn list_pending(&self) -> PendingResult<Vec<String>> {
        let mut found: Vec<(SystemTime, String)> = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(PendingError::Directory)? {
            let entry = entry.map_err(PendingError::Directory)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.len() != self.id_length || !is_valid_id(&name) {
                continue;
            }

            let metadata = entry.metadata().map_err(PendingError::Directory)?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name));
        }

        found.sort();
        Ok(found.into_iter().map(|(_, name)| name).collect())
    }

    fn check_id(&self, id: &str) -> PendingResult<()> {
        if is_valid_id(id) {
            Ok(())
        } else {
            Err(PendingError::InvalidId(id.to_string()))
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::id::PENDING_ID_LENGTH;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> PendingStore {
        PendingStore::open(temp_dir.path(), PENDING_ID_LENGTH).unwrap()
    }

    #[test]
    fn test_stage_materializes_under_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let id = store.stage(b"payload").unwrap();

        assert_eq!(id.len(), PENDING_ID_LENGTH);
        assert_eq!(fs::read(store.path_for(&id)).unwrap(), b"payload");
        assert!(!store.temp_path_for(&id).exists());
    }

    #[test]
    fn test_read_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let id = store.stage(b"a|b").unwrap();

        assert_eq!(store.read(&id).unwrap(), b"a|b");
        store.remove(&id).unwrap();

        assert!(!store.path_for(&id).exists());
        assert!(matches!(store.read(&id), Err(PendingError::ReadFailed { .. })));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert!(matches!(store.read("../etc"), Err(PendingError::InvalidId(_))));
        assert!(matches!(store.remove(".hidden"), Err(PendingError::InvalidId(_))));
    }

    #[test]
    fn test_sweep_removes_only_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let kept = store.stage(b"kept").unwrap();
        fs::write(temp_dir.path().join(".abcdefghij"), b"torn").unwrap();
        fs::write(temp_dir.path().join(".notes"), b"unrelated").unwrap();

        assert_eq!(store.sweep_temp_files().unwrap(), 1);

        assert!(store.path_for(&kept).exists());
        assert!(!temp_dir.path().join(".abcdefghij").exists());
        assert!(temp_dir.path().join(".notes").exists());
    }

    #[test]
    fn test_list_pending_skips_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let id = store.stage(b"x").unwrap();
        fs::write(temp_dir.path().join("log_000"), b"").unwrap();
        fs::write(temp_dir.path().join("short"), b"").unwrap();
        fs::create_dir(temp_dir.path().join("ABCDEFGHIJ")).unwrap();

        assert_eq!(store.list_pending().unwrap(), vec![id]);
    }
}
