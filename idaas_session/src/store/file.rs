//! A local file credential store

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, sync::Mutex};

use super::{SecureStore, StoreError};
use crate::{BundleUpdate, TokenState};

/// A credential store that keeps the bundle as JSON in a local file
///
/// On unix the file is created readable and writable by the owner only.
/// Updates are read-modify-write, serialized within this process, and land
/// through a rename so a crash never leaves a half-written bundle behind.
///
/// A file that cannot be decoded loads as absent. Partial updates refuse to
/// merge into it, but an update replacing every field overwrites it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Constructs a new file store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Constructs a store keeping `{namespace}.json` inside `dir`
    pub fn in_directory(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", namespace)))
    }

    /// The file backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_bundle(&self) -> Result<Option<TokenState>, StoreError> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn write_bundle(&self, bundle: &TokenState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self.staging_path();
        let data = serde_json::to_string_pretty(bundle)?;

        let written = async {
            Self::write_private(&staging, data.as_bytes()).await?;
            tokio::fs::rename(&staging, &self.path).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl SecureStore for FileStore {
    async fn load(&self) -> Result<Option<TokenState>, StoreError> {
        match self.read_bundle().await {
            Err(StoreError::Serialization(error)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = (&error as &dyn std::error::Error),
                    "stored credential bundle is unreadable; treating it as absent"
                );
                Ok(None)
            }
            result => result,
        }
    }

    async fn save(&self, update: &BundleUpdate) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut bundle = if update.replaces_everything() {
            TokenState::default()
        } else {
            self.read_bundle().await?.unwrap_or_default()
        };
        bundle.apply(update);
        self.write_bundle(&bundle).await?;
        tracing::trace!(path = %self.path.display(), "wrote credential bundle");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
