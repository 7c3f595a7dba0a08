//! An OS keychain credential store

use std::sync::Arc;

use ::keyring::Entry;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SecureStore, StoreError};
use crate::{BundleUpdate, TokenState};

const ENTRY_USER: &str = "session";

/// A credential store backed by the operating system's keychain
///
/// The whole bundle is kept as one JSON secret under the service name given
/// by the namespace: the macOS Keychain, the Windows Credential Manager or
/// the Linux kernel keyring (the Secret Service with the
/// `keyring-secret-service` feature). Keychain calls block, so they run on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    namespace: String,
    entry: Arc<Entry>,
    write_lock: Arc<Mutex<()>>,
}

impl KeyringStore {
    /// Constructs a store using `namespace` as the keychain service name
    pub fn new(namespace: impl Into<String>) -> Result<Self, StoreError> {
        let namespace = namespace.into();
        let entry = Entry::new(&namespace, ENTRY_USER).map_err(backend)?;

        Ok(Self {
            namespace,
            entry: Arc::new(entry),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The keychain service name the bundle is stored under
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn read_blocking(entry: &Entry) -> Result<Option<TokenState>, StoreError> {
        match entry.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(backend(err)),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let entry = Arc::clone(&self.entry);
        tokio::task::spawn_blocking(move || op(&entry))
            .await
            .map_err(backend)?
    }
}

fn backend<E: std::error::Error + Send + Sync + 'static>(err: E) -> StoreError {
    StoreError::Backend(Box::new(err))
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn load(&self) -> Result<Option<TokenState>, StoreError> {
        self.run(Self::read_blocking).await
    }

    async fn save(&self, update: &BundleUpdate) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let update = update.clone();
        self.run(move |entry| {
            let mut bundle = if update.replaces_everything() {
                TokenState::default()
            } else {
                Self::read_blocking(entry)?.unwrap_or_default()
            };
            bundle.apply(&update);
            let secret = serde_json::to_string(&bundle)?;
            entry.set_password(&secret).map_err(backend)
        })
        .await?;
        tracing::trace!(namespace = %self.namespace, "wrote credential bundle");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.run(|entry| match entry.delete_credential() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(backend(err)),
        })
        .await
    }
}
