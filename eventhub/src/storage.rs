//! Storage for uploaded payment-proof images.

use crate::{config::StorageConfig, types::TransactionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported image type {0}")]
    UnsupportedType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Persist an image and return the URL it can be fetched from
    async fn store(&self, transaction_id: TransactionId, content_type: Option<&str>, image: Bytes) -> Result<String, StorageError>;

    /// Remove a previously stored image
    async fn remove(&self, url: &str) -> Result<(), StorageError>;
}

pub fn from_config(config: &StorageConfig) -> Arc<dyn ProofStorage> {
    match config {
        StorageConfig::Memory => Arc::new(InMemoryProofStorage::default()),
        StorageConfig::Local {
            directory,
            public_base_url,
        } => Arc::new(LocalProofStorage::new(directory.clone(), public_base_url.clone())),
    }
}

fn extension_for(content_type: Option<&str>) -> Result<&'static str, StorageError> {
    match content_type.unwrap_or("image/jpeg") {
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        other => Err(StorageError::UnsupportedType(other.to_string())),
    }
}

/// Writes images into a local directory served under `public_base_url`
pub struct LocalProofStorage {
    directory: PathBuf,
    public_base_url: String,
}

impl LocalProofStorage {
    pub fn new(directory: PathBuf, public_base_url: String) -> Self {
        Self {
            directory,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProofStorage for LocalProofStorage {
    async fn store(&self, transaction_id: TransactionId, content_type: Option<&str>, image: Bytes) -> Result<String, StorageError> {
        let extension = extension_for(content_type)?;
        let file_name = format!("{transaction_id}-{}.{extension}", Uuid::new_v4().simple());

        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(self.directory.join(&file_name), &image).await?;
        debug!(%transaction_id, file_name, bytes = image.len(), "Stored payment proof");

        Ok(format!("{}/{file_name}", self.public_base_url))
    }

    async fn remove(&self, url: &str) -> Result<(), StorageError> {
        let Some(file_name) = url.rsplit('/').next().filter(|name| !name.is_empty()) else {
            return Ok(());
        };
        match tokio::fs::remove_file(self.directory.join(file_name)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }
}

/// Keeps images in memory; for tests and throwaway dev runs
#[derive(Default, Clone)]
pub struct InMemoryProofStorage {
    images: Arc<Mutex<HashMap<String, Bytes>>>,
}

#[cfg(test)]
impl InMemoryProofStorage {
    pub fn len(&self) -> usize {
        self.images.lock().map(|images| images.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProofStorage for InMemoryProofStorage {
    async fn store(&self, transaction_id: TransactionId, content_type: Option<&str>, image: Bytes) -> Result<String, StorageError> {
        let extension = extension_for(content_type)?;
        let url = format!("memory://payment-proofs/{transaction_id}-{}.{extension}", Uuid::new_v4().simple());
        if let Ok(mut images) = self.images.lock() {
            images.insert(url.clone(), image);
        }
        Ok(url)
    }

    async fn remove(&self, url: &str) -> Result<(), StorageError> {
        if let Ok(mut images) = self.images.lock() {
            images.remove(url);
        }
        Ok(())
    }
}
