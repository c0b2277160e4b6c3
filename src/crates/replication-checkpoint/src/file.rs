//! Directory-backed document store
//!
//! Each checkpoint document lives in its own pretty-printed JSON file inside
//! the store's directory. Updates are written to a temporary file and renamed
//! over the old one, so a crash leaves either the previous or the new
//! revision on disk, never a torn document.

use crate::document::{CheckpointDocument, CheckpointId, Revision};
use crate::error::StoreError;
use crate::store::{check_revision, DocumentStore, PutResponse};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Checkpoint documents stored as JSON files in one directory
#[derive(Debug)]
pub struct FileDocumentStore {
    name: String,
    dir: PathBuf,
    // serializes read-check-write of puts within this process
    write_lock: Mutex<()>,
}

impl FileDocumentStore {
    /// Open (and create if needed) the store directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            name: dir.display().to_string(),
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the document `id`
    pub fn path_for(&self, id: &CheckpointId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id.as_str())))
    }

    async fn read(&self, path: &Path) -> Result<Option<CheckpointDocument>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Escape an id into a portable file name
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b'.' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointDocument>, StoreError> {
        self.read(&self.path_for(id)).await
    }

    async fn put(&self, doc: &CheckpointDocument) -> Result<PutResponse, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(&doc.id);

        let stored_rev = self.read(&path).await?.and_then(|stored| stored.rev);
        check_revision(&doc.id, stored_rev.as_ref(), doc.rev.as_ref())?;

        let rev = Revision::next_local(stored_rev.as_ref());
        let mut stored = doc.clone();
        stored.rev = Some(rev.clone());

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&stored)?).await?;
        fs::rename(&tmp, &path).await?;

        Ok(PutResponse {
            ok: true,
            id: doc.id.clone(),
            rev,
        })
    }
}
