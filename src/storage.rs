//! File-backed record store.

use fs4::fs_std::FileExt;
use getrandom::fill;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::UserId;
use crate::store::{CredentialRecord, RecordPatch, RecordStore, upsert_into};

#[derive(Serialize, Deserialize, Default)]
struct Table {
    records: HashMap<UserId, CredentialRecord>,
}

/// A record store persisting the credential table as a JSON file.
///
/// Every write rewrites the whole file with an atomic replace, so readers
/// see either the previous or the new table. Each operation holds a lock on
/// the sidecar `<file>.lock` (exclusive for writes, shared for reads), which
/// serializes read-modify-write cycles across instances and processes.
pub struct FileStore {
    path: PathBuf,
}

/// Held table lock; released on drop.
struct TableLock {
    file: File,
}

impl Drop for TableLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStore {
    /// Creates a store over the given path. The file is created on first write.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns `true` if the table file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open_lock_file(&self) -> std::io::Result<File> {
        self.create_parent_dir()?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
    }

    fn lock_exclusive(&self) -> Result<TableLock> {
        let file = self
            .open_lock_file()
            .map_err(|e| Error::storage_with("failed to open credential table lock", e))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| Error::storage_with("failed to lock credential table", e))?;
        Ok(TableLock { file })
    }

    fn lock_shared(&self) -> Result<TableLock> {
        let file = self
            .open_lock_file()
            .map_err(|e| Error::storage_with("failed to open credential table lock", e))?;
        FileExt::lock_shared(&file)
            .map_err(|e| Error::storage_with("failed to lock credential table", e))?;
        Ok(TableLock { file })
    }

    fn create_parent_dir(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    /// Loads the table; a missing file is an empty table.
    fn load(&self) -> Result<Table> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Table::default()),
            Err(e) => return Err(Error::storage_with("failed to read credential table", e)),
        };

        serde_json::from_slice(&data)
            .map_err(|e| Error::storage_with("credential table is not valid JSON", e))
    }

    fn persist(&self, table: &Table) -> Result<()> {
        let data = serde_json::to_vec_pretty(table)
            .map_err(|e| Error::storage_with("failed to serialize credential table", e))?;
        self.save(&data)
            .map_err(|e| Error::storage_with("failed to write credential table", e))
    }

    /// Writes data using atomic replace.
    ///
    /// 1. Write to a temporary file with a random name next to the target
    /// 2. Sync the temporary file to disk
    /// 3. Atomically replace the old file with the new one
    /// 4. Sync the parent directory so the rename is persisted
    fn save(&self, data: &[u8]) -> std::io::Result<()> {
        self.create_parent_dir()?;

        let tmp_path = self.random_tmp_path()?;

        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        tmp_file.write_all(data)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        self.sync_parent_dir()
    }

    #[cfg(not(target_os = "windows"))]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
            _ => Ok(()),
        }
    }

    /// `ReplaceFileW` with write-through already flushes the directory entry.
    #[cfg(target_os = "windows")]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Unique temporary path in the same directory: `<file>.tmp.<randomhex>`.
    fn random_tmp_path(&self) -> std::io::Result<PathBuf> {
        let mut buf = [0u8; 8];
        fill(&mut buf).map_err(|_| std::io::Error::other("OS random generator unavailable"))?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "store path has no file name"))?
            .to_string_lossy();

        Ok(self
            .path
            .with_file_name(format!("{file_name}.tmp.{}", hex::encode(buf))))
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// Uses `ReplaceFileW` with `REPLACEFILE_WRITE_THROUGH`; falls back to a
    /// rename when the target does not exist yet.
    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> std::io::Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            return fs::rename(tmp_path, &self.path);
        }

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY:
        // - Strings are valid UTF-16 and null-terminated
        // - Pointers remain valid during the call
        // - Windows does not retain the pointers after return
        let result = unsafe {
            ReplaceFileW(
                target_w.as_ptr(),
                tmp_w.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if result == 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    /// On Unix, `rename()` is atomic when both paths are on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> std::io::Result<()> {
        fs::rename(tmp_path, &self.path)
    }
}

impl RecordStore for FileStore {
    fn upsert(&self, patch: RecordPatch) -> Result<CredentialRecord> {
        let _lock = self.lock_exclusive()?;
        let mut table = self.load()?;
        let record = upsert_into(&mut table.records, &patch);
        self.persist(&table)?;
        debug!(path = %self.path.display(), rows = table.records.len(), "credential table written");
        Ok(record)
    }

    fn select(&self, user_id: &UserId) -> Result<Option<CredentialRecord>> {
        let _lock = self.lock_shared()?;
        Ok(self.load()?.records.remove(user_id))
    }

    fn delete(&self, user_id: &UserId) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        let mut table = self.load()?;
        if table.records.remove(user_id).is_some() {
            self.persist(&table)?;
        }
        Ok(())
    }
}
