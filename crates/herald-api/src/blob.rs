use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Object storage for chat images, addressed by a flat key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` under `key`, replacing whatever was there.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()>;

    /// Removes `key`. Removing a key that does not exist succeeds.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each blob as a single file at `{dir}/{key}`.
pub struct DiskBlobStore {
    dir: PathBuf,
}

impl DiskBlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            bail!("invalid blob key '{}'", key);
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        // Write next to the target and rename so readers never see half a file.
        // Each put gets its own temp file; concurrent puts race only on the rename.
        let tmp = self
            .dir
            .join(format!(".{}.{:016x}.part", key, rand::random::<u64>()));
        if let Err(e) = write_file(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::rename(&tmp, &path).await?;
        debug!("Stored blob {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}
