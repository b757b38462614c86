//! An in-memory credential backend

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AsyncKeyValueStore, BackendError};

/// A credential backend that lives only as long as the process
#[derive(Default, Debug)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Constructs a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncKeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.values.lock().remove(key);
        Ok(())
    }
}
