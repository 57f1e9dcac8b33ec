//! File catalog (spec §4.7): a single mutex-guarded map of published
//! blobs. Entries are immutable once published — an upload either commits
//! whole, after every declared byte has arrived, or leaves no trace at
//! all.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use control::{ClientId, FileId, Registry, ServerError, ServerResult};
use parking_lot::RwLock;

#[derive(Clone)]
pub struct FileEntry {
    pub file_id: FileId,
    pub filename: String,
    pub size: u64,
    pub uploader_id: ClientId,
    pub uploader_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct FileMeta {
    pub file_id: FileId,
    pub filename: String,
    pub size: u64,
    pub uploader_id: ClientId,
    pub uploader_name: String,
}

impl From<&FileEntry> for FileMeta {
    fn from(e: &FileEntry) -> Self {
        FileMeta {
            file_id: e.file_id,
            filename: e.filename.clone(),
            size: e.size,
            uploader_id: e.uploader_id,
            uploader_name: e.uploader_name.clone(),
        }
    }
}

#[derive(Default)]
pub struct Catalog {
    entries: RwLock<HashMap<FileId, FileEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits an upload. `data.len()` must equal `declared_size`; a short
    /// transfer is rejected with `IncompleteTransfer` and the catalog is
    /// left untouched — no file id is consumed for a failed upload.
    pub fn commit_upload(
        &self,
        registry: &Registry,
        uploader_id: ClientId,
        uploader_name: String,
        filename: String,
        declared_size: u64,
        data: Bytes,
    ) -> ServerResult<FileEntry> {
        if data.len() as u64 != declared_size {
            return Err(ServerError::IncompleteTransfer);
        }
        let file_id = registry.next_file_id();
        let entry = FileEntry {
            file_id,
            filename,
            size: declared_size,
            uploader_id,
            uploader_name,
            uploaded_at: Utc::now(),
            data,
        };
        self.entries.write().insert(file_id, entry.clone());
        Ok(entry)
    }

    pub fn get(&self, file_id: FileId) -> Option<FileEntry> {
        self.entries.read().get(&file_id).cloned()
    }

    /// Deletes an entry, authorized only for its original uploader (spec
    /// §4.7).
    pub fn delete(&self, file_id: FileId, requester: ClientId) -> ServerResult<FileEntry> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get(&file_id) else {
            return Err(ServerError::ProtocolError("File not found"));
        };
        if entry.uploader_id != requester {
            return Err(ServerError::PermissionError("Not authorized"));
        }
        Ok(entries.remove(&file_id).expect("checked above"))
    }

    /// Deterministic, id-ordered snapshot used to render the catalog to a
    /// newly admitted participant.
    pub fn snapshot(&self) -> Vec<FileMeta> {
        let entries = self.entries.read();
        let mut out: Vec<FileMeta> = entries.values().map(FileMeta::from).collect();
        out.sort_by_key(|m| m.file_id);
        out
    }
}
