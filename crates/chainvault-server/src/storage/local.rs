//! Filesystem object storage

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` below the root, refusing anything that could escape it
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid storage key '{}'", key);
        }
        Ok(self.root.join(relative))
    }

    /// Copy `reader` to `key`. The object appears atomically.
    #[instrument(skip(self, reader))]
    pub async fn put_reader(&self, key: &str, mut reader: Box<dyn Read + Send>) -> Result<u64> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let parent = path
                .parent()
                .context("Storage key has no parent directory")?
                .to_path_buf();
            std::fs::create_dir_all(&parent)?;

            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            let written = std::io::copy(&mut reader, &mut tmp)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .with_context(|| format!("Failed to persist {}", path.display()))?;
            Ok(written)
        })
        .await
        .context("Storage write task panicked")?
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        debug!(bytes = data.len(), key, "Read object");
        Ok(data)
    }

    pub fn open_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(key)?;
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    /// Returns `false` when nothing was stored under `key`
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
