//! An in-memory credential store

use std::{
    io,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SecureStore, StoreError};
use crate::{BundleUpdate, TokenState};

/// A process-local credential store
///
/// Nothing survives a restart. Useful for ephemeral sessions and for tests,
/// which can also make every operation fail to exercise storage-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    bundle: Mutex<Option<TokenState>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store already holding `bundle`
    pub fn with_bundle(bundle: TokenState) -> Self {
        Self {
            bundle: Mutex::new(Some(bundle)),
            ..Self::default()
        }
    }

    /// Makes every subsequent operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// The number of successful `save` and `clear` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// A copy of what is currently stored
    pub async fn snapshot(&self) -> Option<TokenState> {
        self.bundle.lock().await.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            Err(io::Error::new(io::ErrorKind::Other, "in-memory store set to fail").into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SecureStore for InMemoryStore {
    async fn load(&self) -> Result<Option<TokenState>, StoreError> {
        self.check()?;
        Ok(self.bundle.lock().await.clone())
    }

    async fn save(&self, update: &BundleUpdate) -> Result<(), StoreError> {
        self.check()?;
        self.bundle
            .lock()
            .await
            .get_or_insert_with(TokenState::default)
            .apply(update);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        *self.bundle.lock().await = None;
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use idaas_clock::UnixTime;

    use super::*;
    use crate::{AccessToken, Patch, RefreshToken};

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = InMemoryStore::new();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_merges_into_existing_bundle() {
        let store = InMemoryStore::with_bundle(TokenState {
            refresh_token: Some(RefreshToken::from_static("r1")),
            refresh_token_expiry: UnixTime(100),
            ..TokenState::default()
        });

        store
            .save(&BundleUpdate {
                access_token: Patch::Set(AccessToken::from_static("a1")),
                access_token_expiry: Some(UnixTime(50)),
                ..BundleUpdate::default()
            })
            .await
            .unwrap();

        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, Some(RefreshToken::from_static("r1")));
        assert_eq!(stored.access_token, Some(AccessToken::from_static("a1")));
        assert_eq!(stored.access_token_expiry, UnixTime(50));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn failing_store_rejects_everything() {
        let store = InMemoryStore::new();
        store.set_failing(true);

        assert!(store.load().await.is_err());
        assert!(store.save(&BundleUpdate::default()).await.is_err());
        assert!(store.clear().await.is_err());
        assert_eq!(store.write_count(), 0);
    }
}
