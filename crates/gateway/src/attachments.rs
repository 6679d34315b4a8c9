//! Attachment file sink.
//!
//! The core treats attachment paths as opaque strings; this store does
//! the byte I/O with validation — no traversal, restricted extensions,
//! a size limit. Files live at `<dir>/<thread_id>/<filename>` and are
//! cleaned up per thread.

use std::path::PathBuf;

use tr_domain::{Error, Result};

use crate::runtime::event_store::sanitize_component;

pub struct AttachmentStore {
    dir: PathBuf,
    max_size: u64,
    allowed_extensions: Vec<String>,
}

/// Outcome of a successful upload.
#[derive(Debug)]
pub struct SavedAttachment {
    pub path: String,
    pub size: u64,
}

impl AttachmentStore {
    pub fn new(cfg: &tr_domain::config::AttachmentsConfig) -> Self {
        Self {
            dir: cfg.dir.clone(),
            max_size: cfg.max_size_bytes,
            allowed_extensions: cfg
                .allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Validate and persist one uploaded file.
    pub fn save(&self, thread_id: &str, filename: &str, bytes: &[u8]) -> Result<SavedAttachment> {
        if bytes.len() as u64 > self.max_size {
            return Err(Error::BadRequest(format!(
                "attachment exceeds {} bytes",
                self.max_size
            )));
        }

        let thread = sanitize_component(thread_id)?;
        let name = sanitize_component(filename)?;

        let extension = std::path::Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .ok_or_else(|| Error::BadRequest(format!("{name:?} has no extension")))?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(Error::BadRequest(format!(
                "extension {extension:?} is not allowed"
            )));
        }

        let thread_dir = self.dir.join(&thread);
        std::fs::create_dir_all(&thread_dir)?;
        let path = thread_dir.join(&name);
        std::fs::write(&path, bytes)?;

        Ok(SavedAttachment {
            path: path.to_string_lossy().into_owned(),
            size: bytes.len() as u64,
        })
    }

    /// Remove a thread's attachment directory. Returns how many files
    /// were deleted; a missing directory deletes zero.
    pub fn delete_thread(&self, thread_id: &str) -> Result<usize> {
        let thread = sanitize_component(thread_id)?;
        let thread_dir = self.dir.join(&thread);
        if !thread_dir.exists() {
            return Ok(0);
        }
        let count = std::fs::read_dir(&thread_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0);
        std::fs::remove_dir_all(&thread_dir)?;
        Ok(count)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use tr_domain::config::AttachmentsConfig;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> AttachmentStore {
        AttachmentStore::new(&AttachmentsConfig {
            dir: dir.path().to_path_buf(),
            max_size_bytes: 64,
            allowed_extensions: vec!["txt".into(), "png".into()],
        })
    }

    #[test]
    fn save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let saved = store.save("thread-1", "note.txt", b"hello").unwrap();
        assert_eq!(saved.size, 5);
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"hello");
        assert!(saved.path.contains("thread-1"));
    }

    #[test]
    fn oversized_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let err = store.save("t", "big.txt", &[0u8; 100]).unwrap_err();
        assert_eq!(err.kind(), "bad-request");
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.save("t", "payload.exe", b"x").is_err());
        assert!(store.save("t", "no_extension", b"x").is_err());
    }

    #[test]
    fn traversal_is_neutralized() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let saved = store.save("../../etc", "a.txt", b"x").unwrap();
        // Slashes are stripped; the file stays under the store root.
        assert!(saved.path.starts_with(&dir.path().to_string_lossy().into_owned()));
    }

    #[test]
    fn delete_thread_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save("t1", "a.txt", b"x").unwrap();
        store.save("t1", "b.txt", b"y").unwrap();

        assert_eq!(store.delete_thread("t1").unwrap(), 2);
        assert_eq!(store.delete_thread("t1").unwrap(), 0);
    }
}
