use super::{CommitInfo, CommittedFile, StorageError, StorageService, WriteMode};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One call as observed by [`InMemoryStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    CreateContainer {
        path: String,
    },
    Start {
        session_id: String,
        len: usize,
    },
    Append {
        session_id: String,
        offset: u64,
        len: usize,
    },
    Finish {
        session_id: String,
        offset: u64,
        len: usize,
        path: String,
    },
}

#[derive(Default)]
struct Inner {
    containers: HashSet<String>,
    sessions: HashMap<String, Vec<u8>>,
    files: HashMap<String, Vec<u8>>,
    calls: Vec<StorageCall>,
    failing_paths: Vec<String>,
    fail_containers: bool,
}

/// Process-local storage backend with the same session semantics as the
/// remote one: offsets must match the bytes already received, finishing
/// consumes the session, and `add` commits autorename on collision.
/// Selected with `STORAGE_BACKEND=memory`; also records every call. The
/// `fail_*` hooks are fault injection and are never armed by the service itself.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
    next_session: AtomicU64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: every later container creation fails as a path conflict
    pub fn fail_container_creation(&self) {
        self.lock().fail_containers = true;
    }

    /// Fault injection: finishing any session whose destination contains
    /// `fragment` fails. Used by tests to exercise partial submissions.
    pub fn fail_uploads_matching(&self, fragment: impl Into<String>) {
        self.lock().failing_paths.push(fragment.into());
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.lock().calls.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn has_container(&self, path: &str) -> bool {
        self.lock().containers.contains(path)
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn conflict(endpoint: &'static str, summary: impl Into<String>) -> StorageError {
    StorageError::Api {
        endpoint,
        status: 409,
        summary: summary.into(),
    }
}

fn free_name(files: &HashMap<String, Vec<u8>>, path: &str) -> String {
    if !files.contains_key(path) {
        return path.to_string();
    }
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };
    (1..)
        .map(|n| format!("{}/{} ({}){}", dir, stem, n, ext))
        .find(|candidate| !files.contains_key(candidate))
        .unwrap_or_else(|| path.to_string())
}

#[async_trait]
impl StorageService for InMemoryStorage {
    async fn create_container(&self, path: &str) -> Result<String, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(StorageCall::CreateContainer {
            path: path.to_string(),
        });
        if inner.fail_containers || !inner.containers.insert(path.to_string()) {
            return Err(conflict("files/create_folder_v2", "path/conflict/folder/"));
        }
        Ok(path.to_string())
    }

    async fn session_start(&self, chunk: Bytes) -> Result<String, StorageError> {
        let session_id = format!(
            "mem-session-{}",
            self.next_session.fetch_add(1, Ordering::SeqCst) + 1
        );
        let mut inner = self.lock();
        inner.calls.push(StorageCall::Start {
            session_id: session_id.clone(),
            len: chunk.len(),
        });
        inner.sessions.insert(session_id.clone(), chunk.to_vec());
        Ok(session_id)
    }

    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.calls.push(StorageCall::Append {
            session_id: session_id.to_string(),
            offset,
            len: chunk.len(),
        });
        let buffer = inner.sessions.get_mut(session_id).ok_or_else(|| {
            conflict("files/upload_session/append_v2", "lookup_failed/not_found/")
        })?;
        if buffer.len() as u64 != offset {
            return Err(conflict(
                "files/upload_session/append_v2",
                format!("lookup_failed/incorrect_offset/{}", buffer.len()),
            ));
        }
        buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn session_finish(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
        commit: &CommitInfo,
    ) -> Result<CommittedFile, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(StorageCall::Finish {
            session_id: session_id.to_string(),
            offset,
            len: chunk.len(),
            path: commit.path.clone(),
        });

        if inner
            .failing_paths
            .iter()
            .any(|fragment| commit.path.contains(fragment.as_str()))
        {
            inner.sessions.remove(session_id);
            return Err(conflict(
                "files/upload_session/finish",
                "path/insufficient_space/",
            ));
        }

        let mut buffer = inner.sessions.remove(session_id).ok_or_else(|| {
            conflict("files/upload_session/finish", "lookup_failed/not_found/")
        })?;
        if buffer.len() as u64 != offset {
            return Err(conflict(
                "files/upload_session/finish",
                format!("lookup_failed/incorrect_offset/{}", buffer.len()),
            ));
        }
        buffer.extend_from_slice(&chunk);

        let path = match (commit.mode, commit.autorename) {
            (WriteMode::Overwrite, _) => commit.path.clone(),
            (WriteMode::Add, true) => free_name(&inner.files, &commit.path),
            (WriteMode::Add, false) if inner.files.contains_key(&commit.path) => {
                return Err(conflict("files/upload_session/finish", "path/conflict/file/"));
            }
            (WriteMode::Add, false) => commit.path.clone(),
        };

        let size = buffer.len() as u64;
        inner.files.insert(path.clone(), buffer);
        Ok(CommittedFile { path, size })
    }
}
