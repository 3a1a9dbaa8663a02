use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// One file written by [`OutputStore::write_atomic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    pub file_name: String,
    pub absolute_path: PathBuf,
    pub sha256: String,
    pub byte_size: usize,
}

/// Export directory. Every file lands via a sibling `.partial` file and a
/// rename, so readers see either the previous table or the new one.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub async fn write_atomic(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredOutput> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating output directory {}", self.root.display()))?;

        let target = self.path_for(file_name);
        let partial = self.root.join(format!(".{file_name}.{}.partial", Uuid::new_v4().simple()));

        fs::write(&partial, bytes)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;

        if let Err(err) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err).with_context(|| format!("replacing {}", target.display()));
        }

        let stored = StoredOutput {
            file_name: file_name.to_string(),
            absolute_path: target,
            sha256: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        };
        debug!(file = %stored.file_name, bytes = stored.byte_size, "output stored");
        Ok(stored)
    }
}
