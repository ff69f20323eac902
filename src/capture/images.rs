//! Storage for captured image bytes
//!
//! Directory structure:
//! ```text
//! <data_dir>/images/
//! └── {subject-id}/
//!     └── {card-id}.png
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image path outside of image store: {0}")]
    ForeignPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, ImageStoreError>;

/// Where captured bytes live. Cards only keep the returned path.
pub trait ImageStore: Send + Sync {
    fn save(&self, subject_id: Uuid, card_id: Uuid, bytes: &[u8]) -> Result<PathBuf>;

    /// Release stored bytes; deleting something already gone is not an error
    fn delete(&self, path: &Path) -> Result<()>;
}

pub struct FileImageStore {
    images_dir: PathBuf,
}

impl FileImageStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            images_dir: data_dir.join("images"),
        }
    }

    pub fn image_path(&self, subject_id: Uuid, card_id: Uuid) -> PathBuf {
        self.images_dir
            .join(subject_id.to_string())
            .join(format!("{}.png", card_id))
    }
}

impl ImageStore for FileImageStore {
    fn save(&self, subject_id: Uuid, card_id: Uuid, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.image_path(subject_id, card_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never expose a partially written file under the final name
        let tmp = path.with_extension("png.partial");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        log::debug!("Saved {} bytes to {:?}", bytes.len(), path);
        Ok(path)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.images_dir) {
            return Err(ImageStoreError::ForeignPath(path.to_path_buf()));
        }
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Drop the subject directory once it is empty
        if let Some(parent) = path.parent() {
            if parent != self.images_dir {
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = FileImageStore::new(temp.path());
        let subject = Uuid::new_v4();
        let card = Uuid::new_v4();

        let path = store.save(subject, card, b"bytes").unwrap();
        assert_eq!(path, store.image_path(subject, card));
        assert_eq!(fs::read(&path).unwrap(), b"bytes");

        store.delete(&path).unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());

        // Already gone
        store.delete(&path).unwrap();
    }

    #[test]
    fn test_delete_keeps_non_empty_subject_dir() {
        let temp = TempDir::new().unwrap();
        let store = FileImageStore::new(temp.path());
        let subject = Uuid::new_v4();

        let first = store.save(subject, Uuid::new_v4(), b"1").unwrap();
        let second = store.save(subject, Uuid::new_v4(), b"2").unwrap();

        store.delete(&first).unwrap();
        assert!(second.exists());
    }

    #[test]
    fn test_refuses_paths_outside_store() {
        let temp = TempDir::new().unwrap();
        let store = FileImageStore::new(temp.path());
        let outside = temp.path().join("notes.txt");
        fs::write(&outside, b"keep me").unwrap();

        assert!(matches!(
            store.delete(&outside),
            Err(ImageStoreError::ForeignPath(_))
        ));
        assert!(outside.exists());
    }
}
