use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::services::credentials::AuthError;

pub mod dropbox;
pub mod memory;

pub use dropbox::DropboxStorageService;
pub use memory::InMemoryStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Storage API error at {endpoint} ({status}): {summary}")]
    Api {
        endpoint: &'static str,
        status: u16,
        summary: String,
    },

    #[error("Storage credential unavailable: {0}")]
    Auth(#[from] AuthError),

    #[error("Unexpected response from {endpoint}: {reason}")]
    InvalidResponse {
        endpoint: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Add,
    Overwrite,
}

/// Where and how a finished upload session is materialised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
    pub autorename: bool,
}

impl CommitInfo {
    /// Never overwrite; pick a free name on collision
    pub fn add(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Add,
            autorename: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedFile {
    /// Final path, which differs from the requested one when autorename kicked in
    pub path: String,
    pub size: u64,
}

/// Remote object storage with folder creation and offset-based upload sessions
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Obtains whatever credential the backend needs before the first call
    async fn connect(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn create_container(&self, path: &str) -> Result<String, StorageError>;

    /// Opens a session with the first chunk and returns its id
    async fn session_start(&self, chunk: Bytes) -> Result<String, StorageError>;

    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
    ) -> Result<(), StorageError>;

    /// Writes the trailing bytes and commits the file
    async fn session_finish(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
        commit: &CommitInfo,
    ) -> Result<CommittedFile, StorageError>;
}
