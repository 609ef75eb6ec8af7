use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::models::{AttachedFile, Submission, SubmissionForm, SubmissionStatus, UploadTask};
use crate::services::credentials::AuthError;
use crate::services::ids::SubmissionIdGenerator;
use crate::services::notifier::{NotificationError, NotificationMessage, Notifier};
use crate::services::scheduler::{ConcurrencyScheduler, TaskOutcome};
use crate::services::storage::{StorageError, StorageService};
use crate::services::uploader::{ChunkedUploader, UploadError};
use crate::utils::validation::sanitize_filename;

/// Outcome of one file within a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FileReport {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskOutcome> for FileReport {
    fn from(outcome: &TaskOutcome) -> Self {
        match &outcome.result {
            Ok(committed) => Self {
                name: outcome.file_name.clone(),
                ok: true,
                path: Some(committed.path.clone()),
                size: committed.size,
                error: None,
            },
            Err(e) => Self {
                name: outcome.file_name.clone(),
                ok: false,
                path: None,
                size: outcome.size as u64,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug)]
pub struct SubmissionReceipt {
    pub radicado: String,
    pub container_path: String,
    pub files: Vec<FileReport>,
    /// Deliveries that failed after every file was stored
    pub notification_failures: Vec<NotificationError>,
}

impl SubmissionReceipt {
    pub fn notification_warning(&self) -> Option<String> {
        if self.notification_failures.is_empty() {
            return None;
        }
        Some(
            self.notification_failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Storage authentication failed: {source}")]
    Auth {
        radicado: Option<String>,
        #[source]
        source: AuthError,
        /// Per-file outcome when the failure happened during uploads
        files: Vec<FileReport>,
    },

    #[error("Could not create container {path}: {source}")]
    ContainerCreationFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("All {} file uploads failed for {radicado}", .files.len())]
    ChunkUploadFailed {
        radicado: String,
        files: Vec<FileReport>,
    },

    #[error(
        "{} of {} file uploads failed for {radicado}",
        .files.iter().filter(|f| !f.ok).count(),
        .files.len()
    )]
    SchedulingAggregate {
        radicado: String,
        files: Vec<FileReport>,
    },

    #[error("Uploads for {radicado} did not finish within {secs}s")]
    Timeout { radicado: String, secs: u64 },
}

impl SubmissionError {
    /// Pipeline stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            SubmissionError::InvalidInput(_) => "validation",
            SubmissionError::Auth { .. } => "authentication",
            SubmissionError::ContainerCreationFailed { .. } => "container",
            SubmissionError::ChunkUploadFailed { .. }
            | SubmissionError::SchedulingAggregate { .. }
            | SubmissionError::Timeout { .. } => "upload",
        }
    }

    /// Submission id, once a container exists for it
    pub fn radicado(&self) -> Option<&str> {
        match self {
            SubmissionError::Auth { radicado, .. } => radicado.as_deref(),
            SubmissionError::ChunkUploadFailed { radicado, .. }
            | SubmissionError::SchedulingAggregate { radicado, .. }
            | SubmissionError::Timeout { radicado, .. } => Some(radicado),
            SubmissionError::InvalidInput(_) | SubmissionError::ContainerCreationFailed { .. } => {
                None
            }
        }
    }

    pub fn files(&self) -> Option<&[FileReport]> {
        match self {
            SubmissionError::ChunkUploadFailed { files, .. }
            | SubmissionError::SchedulingAggregate { files, .. } => Some(files),
            SubmissionError::Auth { files, .. } if !files.is_empty() => Some(files),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub container_root: String,
    pub admin_email: String,
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            container_root: config.container_root.clone(),
            admin_email: config.mail.admin_email.clone(),
            chunk_size: config.chunk_size,
            max_concurrency: config.max_concurrent_uploads,
            timeout: Duration::from_secs(config.submission_timeout_secs),
        }
    }
}

/// Runs one submission end to end: container, uploads, notifications
pub struct SubmissionOrchestrator {
    storage: Arc<dyn StorageService>,
    notifier: Arc<dyn Notifier>,
    ids: Arc<dyn SubmissionIdGenerator>,
    uploader: ChunkedUploader,
    scheduler: ConcurrencyScheduler,
    settings: OrchestratorSettings,
}

impl SubmissionOrchestrator {
    /// Connects the storage backend (obtaining its first credential) and
    /// returns a ready orchestrator. No submission can be handled before this
    /// succeeds.
    pub async fn initialize(
        settings: OrchestratorSettings,
        storage: Arc<dyn StorageService>,
        notifier: Arc<dyn Notifier>,
        ids: Arc<dyn SubmissionIdGenerator>,
    ) -> Result<Self, SubmissionError> {
        storage.connect().await.map_err(|source| {
            tracing::error!("❌ Storage backend could not be authorized: {}", source);
            SubmissionError::Auth {
                radicado: None,
                source,
                files: Vec::new(),
            }
        })?;

        Ok(Self {
            uploader: ChunkedUploader::with_chunk_size(storage.clone(), settings.chunk_size),
            scheduler: ConcurrencyScheduler::new(settings.max_concurrency),
            storage,
            notifier,
            ids,
            settings,
        })
    }

    pub async fn handle(
        &self,
        form: SubmissionForm,
        files: Vec<AttachedFile>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        if files.is_empty() {
            return Err(SubmissionError::InvalidInput(
                "No se enviaron archivos".to_string(),
            ));
        }
        if let Some(empty) = files.iter().find(|f| f.content.is_empty()) {
            return Err(SubmissionError::InvalidInput(format!(
                "El archivo '{}' está vacío",
                empty.name
            )));
        }

        let mut submission = Submission::new(self.ids.generate(), &self.settings.container_root);
        tracing::info!(
            radicado = %submission.id,
            files = files.len(),
            applicant = %form.applicant_email,
            "📝 Submission received"
        );

        self.storage
            .create_container(&submission.container_path)
            .await
            .map_err(|e| {
                tracing::error!(
                    radicado = %submission.id,
                    path = %submission.container_path,
                    "❌ Container creation failed: {}",
                    e
                );
                match e {
                    StorageError::Auth(source) => SubmissionError::Auth {
                        radicado: None,
                        source,
                        files: Vec::new(),
                    },
                    source => SubmissionError::ContainerCreationFailed {
                        path: submission.container_path.clone(),
                        source,
                    },
                }
            })?;
        submission.advance(SubmissionStatus::ContainerCreated);

        for file in files {
            let name = sanitize_filename(&file.name);
            let destination = submission.destination_for(&name);
            submission
                .files
                .push(UploadTask::new(name, destination, file.content));
        }

        submission.advance(SubmissionStatus::Uploading);
        let tasks = std::mem::take(&mut submission.files);
        let outcomes = tokio::time::timeout(
            self.settings.timeout,
            self.scheduler.run(tasks, &self.uploader),
        )
        .await
        .map_err(|_| {
            tracing::error!(
                radicado = %submission.id,
                timeout = ?self.settings.timeout,
                "⏱️  Submission upload timed out"
            );
            SubmissionError::Timeout {
                radicado: submission.id.clone(),
                secs: self.settings.timeout.as_secs(),
            }
        })?;

        let reports: Vec<FileReport> = outcomes.iter().map(FileReport::from).collect();
        let failed = reports.iter().filter(|r| !r.ok).count();

        if failed > 0 {
            submission.advance(if failed == reports.len() {
                SubmissionStatus::Failed
            } else {
                SubmissionStatus::PartiallyUploaded
            });
            tracing::warn!(
                radicado = %submission.id,
                failed,
                total = reports.len(),
                container = %submission.container_path,
                "⚠️  Submission incomplete; uploaded files are left in the container"
            );

            let auth_failure = outcomes.into_iter().find_map(|o| match o.result {
                Err(UploadError::Auth(e)) => Some(e),
                _ => None,
            });
            return Err(match auth_failure {
                Some(source) => SubmissionError::Auth {
                    radicado: Some(submission.id),
                    source,
                    files: reports,
                },
                None if failed == reports.len() => SubmissionError::ChunkUploadFailed {
                    radicado: submission.id,
                    files: reports,
                },
                None => SubmissionError::SchedulingAggregate {
                    radicado: submission.id,
                    files: reports,
                },
            });
        }
        submission.advance(SubmissionStatus::Uploaded);

        let notification_failures = self.notify(&form, &submission.id).await;
        if notification_failures.is_empty() {
            submission.advance(SubmissionStatus::Notified);
        }

        tracing::info!(radicado = %submission.id, "✅ Submission completed");
        Ok(SubmissionReceipt {
            radicado: submission.id,
            container_path: submission.container_path,
            files: reports,
            notification_failures,
        })
    }

    /// Sends the admin and submitter copies concurrently and waits for both
    async fn notify(&self, form: &SubmissionForm, radicado: &str) -> Vec<NotificationError> {
        let admin = NotificationMessage::admin_copy(&self.settings.admin_email, form, radicado);
        let submitter = NotificationMessage::submitter_copy(form, radicado);

        let (admin_result, submitter_result) =
            tokio::join!(self.notifier.send(&admin), self.notifier.send(&submitter));

        [admin_result, submitter_result]
            .into_iter()
            .filter_map(Result::err)
            .inspect(|e| {
                tracing::warn!(radicado, "⚠️  Notification delivery failed: {}", e);
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::LogNotifier;
    use crate::services::storage::memory::{InMemoryStorage, StorageCall};
    use crate::services::storage::{CommitInfo, CommittedFile};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct FixedIds;

    impl SubmissionIdGenerator for FixedIds {
        fn generate(&self) -> String {
            "ab12cd34".to_string()
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            container_root: "/formularios".to_string(),
            admin_email: "admin@example.com".to_string(),
            chunk_size: 4,
            max_concurrency: 4,
            timeout: Duration::from_secs(30),
        }
    }

    fn form() -> SubmissionForm {
        SubmissionForm {
            applicant_name: "Ana".to_string(),
            applicant_email: "ana@example.com".to_string(),
            applicant_id: "123".to_string(),
            city: "Cali".to_string(),
            subject: "Petición".to_string(),
        }
    }

    fn files(n: usize) -> Vec<AttachedFile> {
        (1..=n)
            .map(|i| AttachedFile::new(format!("doc{}.pdf", i), vec![i as u8; 10]))
            .collect()
    }

    async fn orchestrator(
        storage: Arc<dyn StorageService>,
        notifier: Arc<LogNotifier>,
        settings: OrchestratorSettings,
    ) -> SubmissionOrchestrator {
        SubmissionOrchestrator::initialize(settings, storage, notifier, Arc::new(FixedIds))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_submission_uploads_and_notifies() {
        let storage = Arc::new(InMemoryStorage::new());
        let notifier = Arc::new(LogNotifier::new());
        let orch = orchestrator(storage.clone(), notifier.clone(), settings()).await;

        let receipt = orch.handle(form(), files(3)).await.unwrap();

        assert_eq!(receipt.radicado, "ab12cd34");
        assert_eq!(receipt.container_path, "/formularios/ab12cd34");
        assert!(receipt.files.iter().all(|f| f.ok));
        assert!(receipt.notification_warning().is_none());
        assert!(storage.has_container("/formularios/ab12cd34"));
        assert_eq!(
            storage.file_paths(),
            vec![
                "/formularios/ab12cd34/doc1.pdf",
                "/formularios/ab12cd34/doc2.pdf",
                "/formularios/ab12cd34/doc3.pdf",
            ]
        );
        assert_eq!(
            storage.calls()[0],
            StorageCall::CreateContainer {
                path: "/formularios/ab12cd34".to_string()
            }
        );

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|m| m.recipient == "admin@example.com"));
        assert!(sent.iter().any(|m| m.recipient == "ana@example.com"));
    }

    #[tokio::test]
    async fn test_no_files_is_invalid_input_without_remote_calls() {
        let storage = Arc::new(InMemoryStorage::new());
        let orch = orchestrator(storage.clone(), Arc::new(LogNotifier::new()), settings()).await;

        let err = orch.handle(form(), vec![]).await.unwrap_err();

        assert!(matches!(err, SubmissionError::InvalidInput(_)));
        assert_eq!(err.stage(), "validation");
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_invalid_input_without_remote_calls() {
        let storage = Arc::new(InMemoryStorage::new());
        let orch = orchestrator(storage.clone(), Arc::new(LogNotifier::new()), settings()).await;

        let mut attached = files(2);
        attached.push(AttachedFile::new("vacio.txt", Vec::new()));
        let err = orch.handle(form(), attached).await.unwrap_err();

        assert!(matches!(err, SubmissionError::InvalidInput(ref m) if m.contains("vacio.txt")));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_container_failure_aborts_before_uploads() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_container_creation();
        let notifier = Arc::new(LogNotifier::new());
        let orch = orchestrator(storage.clone(), notifier.clone(), settings()).await;

        let err = orch.handle(form(), files(2)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::ContainerCreationFailed { .. }));
        assert_eq!(err.stage(), "container");
        assert!(err.radicado().is_none());
        assert_eq!(storage.calls().len(), 1);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_one_failed_file_of_five_is_reported_by_name() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_uploads_matching("doc2.pdf");
        let notifier = Arc::new(LogNotifier::new());
        let orch = orchestrator(storage.clone(), notifier.clone(), settings()).await;

        let err = orch.handle(form(), files(5)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::SchedulingAggregate { .. }));
        assert_eq!(err.radicado(), Some("ab12cd34"));
        let reports = err.files().unwrap();
        let failed: Vec<&str> = reports.iter().filter(|f| !f.ok).map(|f| f.name.as_str()).collect();
        let succeeded = reports.iter().filter(|f| f.ok).count();
        assert_eq!(failed, vec!["doc2.pdf"]);
        assert_eq!(succeeded, 4);
        assert!(err.to_string().starts_with("1 of 5"));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_all_files_failing_is_chunk_upload_failure() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_uploads_matching("/formularios/");
        let orch = orchestrator(storage.clone(), Arc::new(LogNotifier::new()), settings()).await;

        let err = orch.handle(form(), files(2)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::ChunkUploadFailed { .. }));
        assert_eq!(err.radicado(), Some("ab12cd34"));
    }

    #[tokio::test]
    async fn test_notification_failure_is_a_warning() {
        let storage = Arc::new(InMemoryStorage::new());
        let notifier = Arc::new(LogNotifier::new());
        notifier.fail_for("ana@example.com");
        let orch = orchestrator(storage.clone(), notifier.clone(), settings()).await;

        let receipt = orch.handle(form(), files(1)).await.unwrap();

        assert!(receipt.files.iter().all(|f| f.ok));
        assert_eq!(receipt.notification_failures.len(), 1);
        assert!(receipt.notification_warning().unwrap().contains("ana@example.com"));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_file_names_are_sanitized_into_the_container() {
        let storage = Arc::new(InMemoryStorage::new());
        let orch = orchestrator(storage.clone(), Arc::new(LogNotifier::new()), settings()).await;

        let attached = vec![
            AttachedFile::new("../../secret.txt", b"abc".to_vec()),
            AttachedFile::new("secret.txt", b"def".to_vec()),
        ];
        let receipt = orch.handle(form(), attached).await.unwrap();

        let mut paths: Vec<String> = receipt.files.iter().filter_map(|f| f.path.clone()).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "/formularios/ab12cd34/secret (1).txt",
                "/formularios/ab12cd34/secret.txt",
            ]
        );
    }

    struct StalledStorage(InMemoryStorage);

    #[async_trait]
    impl StorageService for StalledStorage {
        async fn create_container(&self, path: &str) -> Result<String, StorageError> {
            self.0.create_container(path).await
        }

        async fn session_start(&self, _chunk: Bytes) -> Result<String, StorageError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }

        async fn session_append(
            &self,
            session_id: &str,
            offset: u64,
            chunk: Bytes,
        ) -> Result<(), StorageError> {
            self.0.session_append(session_id, offset, chunk).await
        }

        async fn session_finish(
            &self,
            session_id: &str,
            offset: u64,
            chunk: Bytes,
            commit: &CommitInfo,
        ) -> Result<CommittedFile, StorageError> {
            self.0.session_finish(session_id, offset, chunk, commit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_is_a_single_error() {
        let mut settings = settings();
        settings.timeout = Duration::from_secs(5);
        let orch = orchestrator(
            Arc::new(StalledStorage(InMemoryStorage::new())),
            Arc::new(LogNotifier::new()),
            settings,
        )
        .await;

        let err = orch.handle(form(), files(3)).await.unwrap_err();

        match err {
            SubmissionError::Timeout { radicado, secs } => {
                assert_eq!(radicado, "ab12cd34");
                assert_eq!(secs, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    struct UnauthorizedStorage;

    #[async_trait]
    impl StorageService for UnauthorizedStorage {
        async fn connect(&self) -> Result<(), AuthError> {
            Err(AuthError::MissingAccessToken)
        }

        async fn create_container(&self, _path: &str) -> Result<String, StorageError> {
            panic!("no storage call expected")
        }

        async fn session_start(&self, _chunk: Bytes) -> Result<String, StorageError> {
            panic!("no storage call expected")
        }

        async fn session_append(&self, _: &str, _: u64, _: Bytes) -> Result<(), StorageError> {
            panic!("no storage call expected")
        }

        async fn session_finish(
            &self,
            _: &str,
            _: u64,
            _: Bytes,
            _: &CommitInfo,
        ) -> Result<CommittedFile, StorageError> {
            panic!("no storage call expected")
        }
    }

    #[tokio::test]
    async fn test_initialize_fails_with_auth_error() {
        let result = SubmissionOrchestrator::initialize(
            settings(),
            Arc::new(UnauthorizedStorage),
            Arc::new(LogNotifier::new()),
            Arc::new(FixedIds),
        )
        .await;

        match result {
            Err(err @ SubmissionError::Auth { .. }) => assert_eq!(err.stage(), "authentication"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("initialization should fail"),
        }
    }

    /// Commits through the wrapped store, except that finishing a path
    /// containing `revoked_for` fails on credentials
    struct RevokedMidUpload {
        inner: InMemoryStorage,
        revoked_for: &'static str,
    }

    #[async_trait]
    impl StorageService for RevokedMidUpload {
        async fn create_container(&self, path: &str) -> Result<String, StorageError> {
            self.inner.create_container(path).await
        }

        async fn session_start(&self, chunk: Bytes) -> Result<String, StorageError> {
            self.inner.session_start(chunk).await
        }

        async fn session_append(
            &self,
            session_id: &str,
            offset: u64,
            chunk: Bytes,
        ) -> Result<(), StorageError> {
            self.inner.session_append(session_id, offset, chunk).await
        }

        async fn session_finish(
            &self,
            session_id: &str,
            offset: u64,
            chunk: Bytes,
            commit: &CommitInfo,
        ) -> Result<CommittedFile, StorageError> {
            if commit.path.contains(self.revoked_for) {
                return Err(StorageError::Auth(AuthError::Rejected {
                    status: 400,
                    body: "invalid_grant".to_string(),
                }));
            }
            self.inner.session_finish(session_id, offset, chunk, commit).await
        }
    }

    #[tokio::test]
    async fn test_auth_failure_mid_upload_keeps_file_reports() {
        let storage = Arc::new(RevokedMidUpload {
            inner: InMemoryStorage::new(),
            revoked_for: "doc2.pdf",
        });
        let notifier = Arc::new(LogNotifier::new());
        let orch = orchestrator(storage.clone(), notifier.clone(), settings()).await;

        let err = orch.handle(form(), files(5)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::Auth { .. }));
        assert_eq!(err.stage(), "authentication");
        assert_eq!(err.radicado(), Some("ab12cd34"));
        let reports = err.files().unwrap();
        assert_eq!(reports.len(), 5);
        let failed: Vec<&str> = reports.iter().filter(|f| !f.ok).map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["doc2.pdf"]);
        assert_eq!(storage.inner.file_paths().len(), 4);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_at_startup_has_no_file_reports() {
        let err = SubmissionOrchestrator::initialize(
            settings(),
            Arc::new(UnauthorizedStorage),
            Arc::new(LogNotifier::new()),
            Arc::new(FixedIds),
        )
        .await
        .err()
        .unwrap();

        assert!(err.radicado().is_none());
        assert!(err.files().is_none());
    }
}
