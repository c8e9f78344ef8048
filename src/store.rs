//! Content-addressed file storage: raw blobs under the upload directory
//! named by file id, with an in-memory metadata index. The index entry is
//! the source of truth; a blob without one is an orphan and gets swept.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{ErrorCode, FileInfo};

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub info: FileInfo,
    pub path: PathBuf,
}

pub struct FileStore {
    upload_dir: PathBuf,
    max_file_size: u64,
    ttl: Duration,
    index: Mutex<HashMap<Uuid, StoredFile>>,
}

impl FileStore {
    pub fn new(config: &AppConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.upload_dir)?;
        std::fs::create_dir_all(config.upload_dir.join("tmp"))?;
        Ok(FileStore {
            upload_dir: config.upload_dir.clone(),
            max_file_size: config.max_file_size,
            ttl: Duration::hours(config.file_ttl_hours),
            index: Mutex::new(HashMap::new()),
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Rocket's temp dir is pinned here so persisting an upload is an atomic
    /// same-filesystem rename.
    pub fn temp_dir(&self) -> PathBuf {
        self.upload_dir.join("tmp")
    }

    /// Reserve a fresh id and its final on-disk path. The disk name is the
    /// id, never anything user-supplied.
    pub fn allocate(&self) -> (Uuid, PathBuf) {
        let id = Uuid::new_v4();
        (id, self.upload_dir.join(id.to_string()))
    }

    /// Index a blob that has been fully persisted at its allocated path.
    /// Before this call the file does not exist as far as the store is
    /// concerned; an interrupted upload leaves at most an orphan blob for
    /// the sweeper.
    pub fn commit(
        &self,
        file_id: Uuid,
        room_key: &str,
        original_name: String,
        mime_type: String,
        size: u64,
    ) -> FileInfo {
        let info = FileInfo {
            file_id,
            room_key: room_key.to_string(),
            original_name,
            mime_type,
            size,
            download_url: download_url(file_id),
            created_at: Utc::now(),
        };
        let stored = StoredFile {
            info: info.clone(),
            path: self.upload_dir.join(file_id.to_string()),
        };
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_id, stored);
        info
    }

    pub fn get(&self, file_id: Uuid) -> Option<StoredFile> {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&file_id)
            .cloned()
    }

    pub fn lookup(&self, file_id: Uuid) -> Result<StoredFile, ErrorCode> {
        self.get(file_id).ok_or(ErrorCode::FileNotFound)
    }

    pub fn room_owns(&self, file_id: Uuid, room_key: &str) -> bool {
        self.get(file_id)
            .map(|f| f.info.room_key == room_key)
            .unwrap_or(false)
    }

    /// Remove the index entry and blob. Idempotent: deleting a missing file
    /// is not an error.
    pub fn delete(&self, file_id: Uuid) -> bool {
        let removed = self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&file_id);
        match removed {
            Some(stored) => {
                let _ = std::fs::remove_file(&stored.path);
                true
            }
            None => false,
        }
    }

    /// Room-destruction cascade: drop every blob the room owns.
    pub fn delete_room_files(&self, room_key: &str) -> Vec<StoredFile> {
        let victims: Vec<StoredFile> = {
            let index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            index
                .values()
                .filter(|f| f.info.room_key == room_key)
                .cloned()
                .collect()
        };
        for stored in &victims {
            self.delete(stored.info.file_id);
        }
        victims
    }

    /// GC pass: delete files past their retention window and return them so
    /// the janitor can notify the owning rooms.
    pub fn sweep_expired(&self) -> Vec<StoredFile> {
        let cutoff = Utc::now() - self.ttl;
        let victims: Vec<StoredFile> = {
            let index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            index
                .values()
                .filter(|f| f.info.created_at < cutoff)
                .cloned()
                .collect()
        };
        for stored in &victims {
            self.delete(stored.info.file_id);
        }
        victims
    }

    /// Startup pass: remove blobs on disk that have no index entry (leftovers
    /// from a previous process, since the index is in-memory).
    pub fn cleanup_orphans(&self) -> usize {
        let known: std::collections::HashSet<PathBuf> = {
            let index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            index.values().map(|f| f.path.clone()).collect()
        };
        let mut removed = 0usize;
        let Ok(entries) = std::fs::read_dir(&self.upload_dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() || known.contains(&path) {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        // tmp/ holds in-flight uploads from this process only; a fresh start
        // can clear it entirely
        if let Ok(entries) = std::fs::read_dir(self.temp_dir()) {
            for entry in entries.flatten() {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn file_count(&self) -> usize {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|f| f.info.size)
            .sum()
    }

    /// Test/ops hook: backdate a file's creation stamp.
    pub fn backdate_created(&self, file_id: Uuid, to: DateTime<Utc>) {
        if let Some(stored) = self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&file_id)
        {
            stored.info.created_at = to;
        }
    }
}

pub fn download_url(file_id: Uuid) -> String {
    format!("/api/files/download/{file_id}")
}
