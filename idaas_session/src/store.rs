//! Durable homes for the credential bundle

use std::{error, io};

use async_trait::async_trait;
use thiserror::Error;

use crate::{BundleUpdate, TokenState};

#[cfg(feature = "file")]
pub mod file;
mod in_memory;
#[cfg(feature = "keyring")]
pub mod keyring;

#[cfg(feature = "file")]
pub use file::FileStore;
pub use in_memory::InMemoryStore;
#[cfg(feature = "keyring")]
pub use self::keyring::KeyringStore;

/// The default namespace under which credentials are stored
pub const DEFAULT_NAMESPACE: &str = "idaas-credentials";

/// An error reading or writing the credential bundle
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be read or written
    #[error("credential storage I/O failed")]
    Io(#[from] io::Error),
    /// The stored bundle could not be encoded or decoded
    #[error("stored credential bundle is not valid")]
    Serialization(#[from] serde_json::Error),
    /// The storage backend reported an error of its own
    #[error("credential storage backend failed")]
    Backend(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A secure, persistent store for a single credential bundle
///
/// Implementations are shared between concurrent session operations, so all
/// methods take `&self`.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Loads the stored bundle, or `None` if nothing has been stored
    async fn load(&self) -> Result<Option<TokenState>, StoreError>;

    /// Merges a partial update into the stored bundle
    ///
    /// Fields the update does not touch keep their stored values.
    async fn save(&self, update: &BundleUpdate) -> Result<(), StoreError>;

    /// Removes the stored bundle entirely
    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SecureStore + ?Sized> SecureStore for std::sync::Arc<S> {
    async fn load(&self) -> Result<Option<TokenState>, StoreError> {
        (**self).load().await
    }

    async fn save(&self, update: &BundleUpdate) -> Result<(), StoreError> {
        (**self).save(update).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}
