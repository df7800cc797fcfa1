use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{AppData, SettingsFile, Task};

const DATA_FILE: &str = "data.json";
const SETTINGS_FILE: &str = "settings.json";
const ARCHIVE_FILE: &str = "archive.json";
const BACKUP_DIR: &str = "backups";
const BACKUP_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("refusing to copy the data file onto itself: {}", .0.display())]
    SameFile(PathBuf),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
            StorageError::Missing(_) => true,
            _ => false,
        }
    }
}

pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self) -> PathBuf {
        self.root.join(DATA_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(BACKUP_DIR))?;
        Ok(())
    }

    /// Loads the store, never failing. A missing file yields an empty store that is written
    /// out right away; an unreadable one yields an empty store and is copied aside first.
    pub fn load(&self) -> AppData {
        let path = self.data_path();
        if !path.exists() {
            let data = AppData::default();
            if let Err(error) = self.ensure_dirs().and_then(|_| self.save(&data)) {
                log::warn!("failed to create {}: {error}", path.display());
            }
            return data;
        }
        match self.try_load() {
            Ok(data) => data,
            Err(error) => {
                log::warn!(
                    "failed to load {}: {error}; starting with an empty store",
                    path.display()
                );
                self.preserve_corrupt(&path);
                AppData::default()
            }
        }
    }

    pub fn try_load(&self) -> Result<AppData, StorageError> {
        self.load_json(self.data_path())
    }

    pub fn load_settings(&self) -> Result<SettingsFile, StorageError> {
        self.load_json(self.root.join(SETTINGS_FILE))
    }

    pub fn save(&self, data: &AppData) -> Result<(), StorageError> {
        self.write_atomic(self.data_path(), data)
    }

    /// Copies the current data file into `backups/` before overwriting it.
    pub fn save_with_backup(&self, data: &AppData) -> Result<(), StorageError> {
        if self.data_path().exists() {
            self.create_backup()?;
        }
        self.save(data)
    }

    pub fn save_settings(&self, data: &SettingsFile) -> Result<(), StorageError> {
        self.write_atomic(self.root.join(SETTINGS_FILE), data)
    }

    /// Copies the data file verbatim to `dest`.
    pub fn export_to(&self, dest: &Path) -> Result<(), StorageError> {
        let source = self.data_path();
        if !source.exists() {
            return Err(StorageError::Missing(source));
        }
        if dest.exists() && fs::canonicalize(dest)? == fs::canonicalize(&source)? {
            return Err(StorageError::SameFile(dest.to_path_buf()));
        }
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::copy(&source, dest)?;
        log::info!("exported {} to {}", source.display(), dest.display());
        Ok(())
    }

    /// Replaces the data file with the bytes of `source` and returns the store they hold.
    /// The source is parsed first; an invalid file leaves the current data untouched.
    pub fn import_from(&self, source: &Path) -> Result<AppData, StorageError> {
        if !source.exists() {
            return Err(StorageError::Missing(source.to_path_buf()));
        }
        let bytes = fs::read(source)?;
        let data: AppData = serde_json::from_slice(&bytes)?;
        write_atomic_bytes(&self.data_path(), &bytes)?;
        log::info!("imported {}", source.display());
        Ok(data)
    }

    /// Appends completed tasks to the archive, skipping ids already archived.
    /// Returns how many tasks were added.
    pub fn archive_completed(&self, tasks: &[Task]) -> Result<usize, StorageError> {
        let mut archive = self.try_load_archive()?;
        let mut seen: HashSet<String> = archive.iter().map(|task| task.id.clone()).collect();
        let mut added = 0;
        for task in tasks {
            if seen.insert(task.id.clone()) {
                archive.push(task.clone());
                added += 1;
            }
        }
        self.write_atomic(self.root.join(ARCHIVE_FILE), &archive)?;
        Ok(added)
    }

    /// Drops the task with `task_id` from the archive. Returns whether it was there.
    pub fn unarchive(&self, task_id: &str) -> Result<bool, StorageError> {
        let mut archive = self.try_load_archive()?;
        let before = archive.len();
        archive.retain(|task| task.id != task_id);
        if archive.len() == before {
            return Ok(false);
        }
        self.write_atomic(self.root.join(ARCHIVE_FILE), &archive)?;
        Ok(true)
    }

    pub fn try_load_archive(&self) -> Result<Vec<Task>, StorageError> {
        match self.load_json(self.root.join(ARCHIVE_FILE)) {
            Err(error) if error.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    pub fn load_archive(&self) -> Vec<Task> {
        self.try_load_archive().unwrap_or_else(|error| {
            log::warn!("failed to load archive: {error}");
            Vec::new()
        })
    }

    /// Copies the data file into `backups/` and returns the backup's file name.
    pub fn create_backup(&self) -> Result<String, StorageError> {
        let source = self.data_path();
        if !source.exists() {
            return Err(StorageError::Missing(source));
        }
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let backup_name = format!("data-{timestamp}.json");
        fs::copy(&source, self.root.join(BACKUP_DIR).join(&backup_name))?;
        self.trim_backups()?;
        log::info!("created backup {backup_name}");
        Ok(backup_name)
    }

    pub fn list_backups(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let mut entries: Vec<_> = fs::read_dir(self.root.join(BACKUP_DIR))?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok());
        let mut results = Vec::new();
        for entry in entries {
            if let Some(name) = entry.file_name().to_str() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|dur| dur.as_secs() as i64)
                    .unwrap_or(0);
                results.push((name.to_string(), modified));
            }
        }
        Ok(results)
    }

    pub fn restore_backup(&self, filename: &str) -> Result<AppData, StorageError> {
        let path = self.backup_path(filename)?;
        let data: AppData = self.load_json(path)?;
        self.save(&data)?;
        Ok(data)
    }

    pub fn delete_backup(&self, filename: &str) -> Result<(), StorageError> {
        let path = self.backup_path(filename)?;
        fs::remove_file(path)?;
        Ok(())
    }

    fn backup_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let invalid = filename.trim().is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..");
        if invalid {
            return Err(StorageError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(BACKUP_DIR).join(filename))
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    fn write_atomic<T: Serialize>(&self, path: PathBuf, data: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(data)?;
        write_atomic_bytes(&path, &json)
    }

    /// Copies an unreadable data file aside, once per distinct content.
    fn preserve_corrupt(&self, path: &Path) {
        if let Ok(bytes) = fs::read(path) {
            if let Some(existing) = self.find_corrupt_copy(&bytes) {
                log::debug!("unreadable data file already kept as {}", existing.display());
                return;
            }
        }
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let keep = self.root.join(format!("data.corrupt-{timestamp}.json"));
        match fs::copy(path, &keep) {
            Ok(_) => log::warn!("kept unreadable data file as {}", keep.display()),
            Err(error) => log::warn!("failed to keep unreadable data file: {error}"),
        }
    }

    fn find_corrupt_copy(&self, bytes: &[u8]) -> Option<PathBuf> {
        fs::read_dir(&self.root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("data.corrupt-"))
            })
            .find(|path| fs::read(path).is_ok_and(|kept| kept == bytes))
    }

    fn trim_backups(&self) -> Result<(), StorageError> {
        let mut entries: Vec<_> = fs::read_dir(self.root.join(BACKUP_DIR))?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok());
        let to_remove = entries.len().saturating_sub(BACKUP_LIMIT);
        for entry in entries.into_iter().take(to_remove) {
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }
}

/// Stages `bytes` next to `path`, syncs, then renames over it.
pub(crate) fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}
