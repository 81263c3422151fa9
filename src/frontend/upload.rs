//! Uploaded artifacts
//!
//! An `Upload` owns one file in the upload directory for the lifetime of one
//! count request. Handlers call `remove` once the reply is in; if the request
//! is abandoned first, dropping the guard removes the file on a blocking thread.

use std::path::{Path, PathBuf};

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Upload {
    path: PathBuf,
    file_name: String,
    removed: bool,
}

impl Upload {
    /// Store `bytes` under a fresh random name that keeps the extension of
    /// `original_name`.
    pub async fn save(dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let mut id = [0u8; 32];
        OsRng.fill_bytes(&mut id);
        let file_name = format!("{}{}", hex::encode(id), extension_of(original_name));
        let path = dir.join(&file_name);

        tokio::fs::write(&path, bytes).await?;
        debug!(file = %file_name, size = bytes.len(), "Stored upload");
        Ok(Self {
            path,
            file_name,
            removed: false,
        })
    }

    /// Delete the stored file now.
    pub async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(file = %self.file_name, "Removed upload"),
            Err(e) => log_remove_error(&self.file_name, &e),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn log_remove_error(file_name: &str, e: &std::io::Error) {
    if e.kind() != std::io::ErrorKind::NotFound {
        warn!(file = %file_name, error = %e, "Failed to remove upload");
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let file_name = std::mem::take(&mut self.file_name);
        let remove = move || match std::fs::remove_file(&path) {
            Ok(()) => debug!(file = %file_name, "Removed abandoned upload"),
            Err(e) => log_remove_error(&file_name, &e),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

/// `.ext` of `name` including the dot, or an empty string.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Whether `name` can only refer to a file directly inside the upload directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}
