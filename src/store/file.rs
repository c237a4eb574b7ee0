//! File attachment store
//!
//! Writes each invoice document to `<dir>/<invoice_id>`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{AttachmentStore, StoreResult};

/// Attachment store on the local file system
#[derive(Debug, Clone)]
pub struct FileAttachmentStore {
    dir: PathBuf,
}

impl FileAttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a document for `invoice_id` is stored at
    pub fn path_for(&self, invoice_id: Uuid) -> PathBuf {
        self.dir.join(invoice_id.to_string())
    }
}

#[async_trait]
impl AttachmentStore for FileAttachmentStore {
    async fn save(&self, invoice_id: Uuid, document: &[u8]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(invoice_id);
        tokio::fs::write(&path, document).await?;

        tracing::debug!(
            invoice_id = %invoice_id,
            path = %path.display(),
            bytes = document.len(),
            "Invoice document stored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_writes_file() {
        let dir = std::env::temp_dir().join(format!("invoice_bidder_{}", Uuid::new_v4()));
        let store = FileAttachmentStore::new(&dir);
        let invoice_id = Uuid::new_v4();

        store.save(invoice_id, b"invoice body").await.unwrap();

        let written = tokio::fs::read(store.path_for(invoice_id)).await.unwrap();
        assert_eq!(written, b"invoice body");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
