//! Credential storage
//!
//! The [`CredentialStore`] is the single source of truth for the credentials
//! a session client will use next. It is a thin typed layer over an
//! [`AsyncKeyValueStore`], so any backend that can get, set, and remove
//! string values can hold a session.

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileStore;
pub use in_memory::InMemoryStore;

/// A boxed error returned by a storage backend
pub type BackendError = Box<dyn error::Error + Send + Sync + 'static>;

/// An asynchronous key/value backend for credentials
///
/// Removing a key that is not present must succeed without side effects.
#[async_trait]
pub trait AsyncKeyValueStore: Send + Sync {
    /// Reads the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Removes the value stored under `key`
    async fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// An error reading or writing stored credentials
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed
    #[error("credential storage backend failed")]
    Backend(#[source] BackendError),
    /// Cached user data could not be encoded or decoded
    #[error("cached user data is not valid")]
    UserData(#[from] serde_json::Error),
}

/// The keys under which credentials are persisted
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    /// Key holding the access token
    pub access_token: String,
    /// Key holding the refresh token
    pub refresh_token: String,
    /// Key holding cached user data, encoded as JSON
    pub user_data: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "access_token".to_owned(),
            refresh_token: "refresh_token".to_owned(),
            user_data: "user".to_owned(),
        }
    }
}

/// The credentials currently held by a [`CredentialStore`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialPair {
    /// The access token to attach to the next request
    pub access_token: Option<AccessToken>,
    /// The refresh token used to obtain a new access token
    pub refresh_token: Option<RefreshToken>,
}

impl CredentialPair {
    /// Whether the pair holds no credentials at all
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Typed access to session credentials on top of a key/value backend
///
/// Cloning a credential store is cheap, and all clones share the same backend.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn AsyncKeyValueStore>,
    keys: Arc<StorageKeys>,
}

impl CredentialStore {
    /// Constructs a credential store over the given backend using the default keys
    pub fn new(backend: impl AsyncKeyValueStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            keys: Arc::new(StorageKeys::default()),
        }
    }

    /// Constructs a credential store held only in memory
    pub fn in_memory() -> Self {
        Self::new(InMemoryStore::new())
    }

    /// Replaces the keys under which credentials are persisted
    pub fn with_keys(mut self, keys: StorageKeys) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// The keys under which credentials are persisted
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Reads the current credential pair
    pub async fn get(&self) -> Result<CredentialPair, StoreError> {
        let access_token = self.read(&self.keys.access_token).await?;
        let refresh_token = self.read(&self.keys.refresh_token).await?;

        Ok(CredentialPair {
            access_token: access_token.map(AccessToken::new),
            refresh_token: refresh_token.map(RefreshToken::new),
        })
    }

    /// Reads only the current access token
    pub async fn access_token(&self) -> Result<Option<AccessToken>, StoreError> {
        Ok(self
            .read(&self.keys.access_token)
            .await?
            .map(AccessToken::new))
    }

    /// Stores a new access token, along with a refresh token and user data if provided
    ///
    /// Values that are not provided are left as they were.
    pub async fn set(
        &self,
        access_token: &AccessTokenRef,
        refresh_token: Option<&RefreshTokenRef>,
        user_data: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.write(&self.keys.access_token, access_token.as_str())
            .await?;

        if let Some(refresh_token) = refresh_token {
            self.write(&self.keys.refresh_token, refresh_token.as_str())
                .await?;
        }

        if let Some(user_data) = user_data {
            let encoded = serde_json::to_string(user_data)?;
            self.write(&self.keys.user_data, &encoded).await?;
        }

        tracing::trace!(
            refresh_token_updated = refresh_token.is_some(),
            user_data_updated = user_data.is_some(),
            "stored credentials"
        );

        Ok(())
    }

    /// Reads and decodes the cached user data, if any
    pub async fn user_data<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match self.read(&self.keys.user_data).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Removes every stored credential and the cached user data
    ///
    /// Clearing an empty store does nothing.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for key in [
            &self.keys.access_token,
            &self.keys.refresh_token,
            &self.keys.user_data,
        ] {
            self.backend.remove(key).await.map_err(StoreError::Backend)?;
        }

        tracing::debug!("cleared stored credentials");
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.get(key).await.map_err(StoreError::Backend)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend
            .set(key, value)
            .await
            .map_err(StoreError::Backend)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_session() -> CredentialStore {
        let store = CredentialStore::in_memory();
        store
            .set(
                &AccessToken::from_static("access-1"),
                Some(&*RefreshToken::from_static("refresh-1")),
                Some(&serde_json::json!({ "id": 7, "name": "Ada" })),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let store = store_with_session().await;

        let pair = store.get().await.unwrap();

        assert_eq!(pair.access_token.unwrap().as_str(), "access-1");
        assert_eq!(pair.refresh_token.unwrap().as_str(), "refresh-1");
    }

    #[tokio::test]
    async fn set_without_refresh_token_keeps_the_old_one() {
        let store = store_with_session().await;

        store
            .set(&AccessToken::from_static("access-2"), None, None)
            .await
            .unwrap();

        let pair = store.get().await.unwrap();
        assert_eq!(pair.access_token.unwrap().as_str(), "access-2");
        assert_eq!(pair.refresh_token.unwrap().as_str(), "refresh-1");
    }

    #[tokio::test]
    async fn user_data_round_trips_as_json() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let store = store_with_session().await;

        let user: Option<User> = store.user_data().await.unwrap();

        assert_eq!(
            user,
            Some(User {
                id: 7,
                name: "Ada".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = store_with_session().await;

        store.clear().await.unwrap();

        assert!(store.get().await.unwrap().is_empty());
        assert_eq!(store.user_data::<serde_json::Value>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_on_an_empty_store_is_a_no_op() {
        let store = CredentialStore::in_memory();

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.get().await.unwrap(), CredentialPair::default());
    }

    #[tokio::test]
    async fn custom_keys_are_used_for_persistence() {
        let backend = Arc::new(InMemoryStore::new());
        let store = CredentialStore {
            backend: backend.clone(),
            keys: Arc::new(StorageKeys::default()),
        }
        .with_keys(StorageKeys {
            access_token: "accessToken".to_owned(),
            refresh_token: "refreshToken".to_owned(),
            user_data: "userData".to_owned(),
        });

        store
            .set(&AccessToken::from_static("a"), None, None)
            .await
            .unwrap();

        assert_eq!(backend.get("accessToken").await.unwrap().as_deref(), Some("a"));
        assert_eq!(backend.get("access_token").await.unwrap(), None);
    }
}
