//! A credential backend persisted to a local file
//!
//! Values are kept as a flat JSON object. The file is created with
//! owner-only permissions on Unix.

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, sync::Mutex};

use super::{AsyncKeyValueStore, BackendError};

/// A credential backend that uses a local file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Constructs a new file backend
    ///
    /// The file is not touched until the first write.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn read_values(&self) -> Result<BTreeMap<String, String>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let values = serde_json::from_str(&data)?;
        Ok(values)
    }

    async fn write_values(&self, values: &BTreeMap<String, String>) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(values)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AsyncKeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_values().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_values().await?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(self.write_values(&values).await?)
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_values().await?;
        if values.remove(key).is_some() {
            self.write_values(&values).await?;
        }
        Ok(())
    }
}
