//! Chunked upload of one in-memory payload through a start / append / finish
//! upload session.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::services::credentials::AuthError;
use crate::services::storage::{CommitInfo, CommittedFile, StorageError, StorageService};

/// 8 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Start,
    Append,
    Finish,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Start => "start",
            SessionPhase::Append => "append",
            SessionPhase::Finish => "finish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chunk {phase} failed for {path} at offset {offset}: {source}")]
    ChunkFailed {
        path: String,
        phase: SessionPhase,
        offset: u64,
        #[source]
        source: StorageError,
    },

    #[error("Storage credential unavailable: {0}")]
    Auth(#[from] AuthError),

    #[error("Upload session protocol violated: {0}")]
    Protocol(String),
}

/// Lifecycle of one upload session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Started { session_id: String, offset: u64 },
    Finished { committed: CommittedFile },
}

#[derive(Debug)]
pub enum SessionEvent {
    Started { session_id: String, len: u64 },
    Appended { session_id: String, len: u64 },
    Finished { session_id: String, committed: CommittedFile },
}

/// Session bound to a single destination. The offset always equals the
/// number of bytes the backend has acknowledged.
#[derive(Debug)]
pub struct UploadSession {
    pub destination_path: String,
    state: SessionState,
}

impl UploadSession {
    pub fn new(destination_path: impl Into<String>) -> Self {
        Self {
            destination_path: destination_path.into(),
            state: SessionState::NotStarted,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Session id and offset to send with the next append/finish
    pub fn cursor(&self) -> Result<(String, u64), UploadError> {
        match &self.state {
            SessionState::Started { session_id, offset } => Ok((session_id.clone(), *offset)),
            other => Err(UploadError::Protocol(format!(
                "no open session for {} (state: {:?})",
                self.destination_path, other
            ))),
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<(), UploadError> {
        let current = std::mem::replace(&mut self.state, SessionState::NotStarted);
        let next = match (current, event) {
            (SessionState::NotStarted, SessionEvent::Started { session_id, len }) => {
                SessionState::Started {
                    session_id,
                    offset: len,
                }
            }
            (
                SessionState::Started { session_id, offset },
                SessionEvent::Appended {
                    session_id: acked,
                    len,
                },
            ) if session_id == acked => SessionState::Started {
                session_id,
                offset: offset + len,
            },
            (
                SessionState::Started { session_id, .. },
                SessionEvent::Finished {
                    session_id: acked,
                    committed,
                },
            ) if session_id == acked => SessionState::Finished { committed },
            (current, event) => {
                let message = format!(
                    "{:?} is not valid in state {:?} for {}",
                    event, current, self.destination_path
                );
                self.state = current;
                return Err(UploadError::Protocol(message));
            }
        };
        self.state = next;
        Ok(())
    }

    pub fn into_committed(self) -> Result<CommittedFile, UploadError> {
        match self.state {
            SessionState::Finished { committed } => Ok(committed),
            other => Err(UploadError::Protocol(format!(
                "session for {} ended without commit (state: {:?})",
                self.destination_path, other
            ))),
        }
    }
}

pub struct ChunkedUploader {
    storage: Arc<dyn StorageService>,
    chunk_size: usize,
}

impl ChunkedUploader {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self::with_chunk_size(storage, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(storage: Arc<dyn StorageService>, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Uploads `payload` to `destination_path`, one chunk at a time.
    ///
    /// The first chunk opens the session, middle chunks are appended at the
    /// current offset and the last one is sent with the commit. A payload
    /// that fits in one chunk is committed right after the start call with
    /// an empty finish. Any failed call fails the whole upload.
    pub async fn upload(
        &self,
        destination_path: &str,
        payload: Bytes,
    ) -> Result<CommittedFile, UploadError> {
        if payload.is_empty() {
            return Err(UploadError::InvalidInput(format!(
                "{} has no content",
                destination_path
            )));
        }

        let total = payload.len();
        let commit = CommitInfo::add(destination_path);
        let mut session = UploadSession::new(destination_path);
        let mut offset = 0usize;

        while offset < total {
            let end = (offset + self.chunk_size).min(total);
            let chunk = payload.slice(offset..end);
            let is_last = offset + self.chunk_size >= total;

            if offset == 0 {
                let len = chunk.len() as u64;
                let session_id = self
                    .storage
                    .session_start(chunk)
                    .await
                    .map_err(|e| chunk_error(destination_path, SessionPhase::Start, 0, e))?;
                tracing::debug!(path = destination_path, %session_id, len, "Upload session started");
                session.apply(SessionEvent::Started { session_id, len })?;

                if is_last {
                    self.finish(&mut session, Bytes::new(), &commit).await?;
                }
            } else if !is_last {
                let (session_id, cursor) = session.cursor()?;
                let len = chunk.len() as u64;
                self.storage
                    .session_append(&session_id, cursor, chunk)
                    .await
                    .map_err(|e| chunk_error(destination_path, SessionPhase::Append, cursor, e))?;
                tracing::debug!(path = destination_path, offset = cursor, len, "Chunk appended");
                session.apply(SessionEvent::Appended { session_id, len })?;
            } else {
                self.finish(&mut session, chunk, &commit).await?;
            }

            offset += self.chunk_size;
        }

        let committed = session.into_committed()?;
        tracing::info!(
            path = %committed.path,
            size = committed.size,
            "📦 File committed to storage"
        );
        Ok(committed)
    }

    async fn finish(
        &self,
        session: &mut UploadSession,
        chunk: Bytes,
        commit: &CommitInfo,
    ) -> Result<(), UploadError> {
        let (session_id, cursor) = session.cursor()?;
        let committed = self
            .storage
            .session_finish(&session_id, cursor, chunk, commit)
            .await
            .map_err(|e| chunk_error(&commit.path, SessionPhase::Finish, cursor, e))?;
        session.apply(SessionEvent::Finished {
            session_id,
            committed,
        })
    }
}

fn chunk_error(path: &str, phase: SessionPhase, offset: u64, source: StorageError) -> UploadError {
    tracing::error!(path, %phase, offset, "❌ Upload session call failed: {}", source);
    match source {
        StorageError::Auth(e) => UploadError::Auth(e),
        source => UploadError::ChunkFailed {
            path: path.to_string(),
            phase,
            offset,
            source,
        },
    }
}
