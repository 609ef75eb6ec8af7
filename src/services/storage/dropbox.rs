use super::{CommitInfo, CommittedFile, StorageError, StorageService, WriteMode};
use crate::config::StorageConfig;
use crate::services::credentials::{AuthError, CredentialBroker};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const DROPBOX_API_ARG: &str = "Dropbox-API-Arg";

#[derive(Serialize)]
struct Cursor<'a> {
    session_id: &'a str,
    offset: u64,
}

#[derive(Serialize)]
struct StartArg {
    close: bool,
}

#[derive(Serialize)]
struct AppendArg<'a> {
    cursor: Cursor<'a>,
    close: bool,
}

#[derive(Serialize)]
struct Commit<'a> {
    path: &'a str,
    mode: WriteMode,
    autorename: bool,
    mute: bool,
}

#[derive(Serialize)]
struct FinishArg<'a> {
    cursor: Cursor<'a>,
    commit: Commit<'a>,
}

#[derive(Deserialize)]
struct StartResult {
    session_id: String,
}

#[derive(Deserialize)]
struct FileMetadata {
    path_display: Option<String>,
    size: Option<u64>,
}

#[derive(Deserialize)]
struct FolderMetadata {
    path_display: Option<String>,
}

#[derive(Deserialize)]
struct CreateFolderResult {
    metadata: FolderMetadata,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error_summary: Option<String>,
}

/// Dropbox HTTP API v2 client. Every call is authorised with the broker's
/// current bearer token; a 401 renews the token once and re-issues the call.
pub struct DropboxStorageService {
    http: reqwest::Client,
    api_url: String,
    content_url: String,
    broker: Arc<CredentialBroker>,
}

impl DropboxStorageService {
    pub fn new(
        http: reqwest::Client,
        api_url: String,
        content_url: String,
        broker: Arc<CredentialBroker>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            content_url: content_url.trim_end_matches('/').to_string(),
            broker,
        }
    }

    pub fn from_config(
        http: reqwest::Client,
        config: &StorageConfig,
        broker: Arc<CredentialBroker>,
    ) -> Self {
        Self::new(
            http,
            config.api_url.clone(),
            config.content_url.clone(),
            broker,
        )
    }

    async fn send_authorized<F>(
        &self,
        endpoint: &'static str,
        build: F,
    ) -> Result<reqwest::Response, StorageError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let credential = self.broker.get_token().await?;
        let response = build(&credential.access_token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(endpoint, response).await;
        }

        tracing::warn!(endpoint, "Storage rejected the access token, renewing");
        let renewed = self.broker.refresh_after(&credential).await?;
        let response = build(&renewed.access_token).send().await?;
        check_status(endpoint, response).await
    }

    fn content_request(
        &self,
        route: &str,
        token: &str,
        arg: &str,
        chunk: &Bytes,
    ) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.content_url, route))
            .bearer_auth(token)
            .header(DROPBOX_API_ARG, arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk.clone())
    }
}

async fn check_status(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let summary = serde_json::from_str::<ApiErrorBody>(&text)
        .ok()
        .and_then(|b| b.error_summary)
        .unwrap_or(text);

    Err(StorageError::Api {
        endpoint,
        status: status.as_u16(),
        summary,
    })
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so every
/// non-ASCII character is written as a `\uXXXX` escape (UTF-16 code units).
pub(crate) fn header_safe_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::InvalidResponse {
        endpoint: "Dropbox-API-Arg",
        reason: e.to_string(),
    })?;

    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}

#[async_trait]
impl StorageService for DropboxStorageService {
    async fn connect(&self) -> Result<(), AuthError> {
        self.broker.refresh().await?;
        Ok(())
    }

    async fn create_container(&self, path: &str) -> Result<String, StorageError> {
        const ENDPOINT: &str = "files/create_folder_v2";
        let url = format!("{}/2/{}", self.api_url, ENDPOINT);
        let body = json!({ "path": path, "autorename": false });

        let response = self
            .send_authorized(ENDPOINT, |token| {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        let created: CreateFolderResult =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse {
                    endpoint: ENDPOINT,
                    reason: e.to_string(),
                })?;

        Ok(created
            .metadata
            .path_display
            .unwrap_or_else(|| path.to_string()))
    }

    async fn session_start(&self, chunk: Bytes) -> Result<String, StorageError> {
        const ENDPOINT: &str = "files/upload_session/start";
        let arg = header_safe_json(&StartArg { close: false })?;

        let response = self
            .send_authorized(ENDPOINT, |token| {
                self.content_request("/2/files/upload_session/start", token, &arg, &chunk)
            })
            .await?;

        let started: StartResult =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse {
                    endpoint: ENDPOINT,
                    reason: e.to_string(),
                })?;
        Ok(started.session_id)
    }

    async fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
    ) -> Result<(), StorageError> {
        const ENDPOINT: &str = "files/upload_session/append_v2";
        let arg = header_safe_json(&AppendArg {
            cursor: Cursor { session_id, offset },
            close: false,
        })?;

        self.send_authorized(ENDPOINT, |token| {
            self.content_request("/2/files/upload_session/append_v2", token, &arg, &chunk)
        })
        .await?;
        Ok(())
    }

    async fn session_finish(
        &self,
        session_id: &str,
        offset: u64,
        chunk: Bytes,
        commit: &CommitInfo,
    ) -> Result<CommittedFile, StorageError> {
        const ENDPOINT: &str = "files/upload_session/finish";
        let expected_size = offset + chunk.len() as u64;
        let arg = header_safe_json(&FinishArg {
            cursor: Cursor { session_id, offset },
            commit: Commit {
                path: &commit.path,
                mode: commit.mode,
                autorename: commit.autorename,
                mute: false,
            },
        })?;

        let response = self
            .send_authorized(ENDPOINT, |token| {
                self.content_request("/2/files/upload_session/finish", token, &arg, &chunk)
            })
            .await?;

        let metadata: FileMetadata =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse {
                    endpoint: ENDPOINT,
                    reason: e.to_string(),
                })?;

        Ok(CommittedFile {
            path: metadata
                .path_display
                .unwrap_or_else(|| commit.path.clone()),
            size: metadata.size.unwrap_or(expected_size),
        })
    }
}
