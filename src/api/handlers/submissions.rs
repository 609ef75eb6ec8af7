use crate::api::error::AppError;
use crate::models::{AttachedFile, SubmissionForm};
use crate::services::orchestrator::FileReport;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use serde::Serialize;
use utoipa::ToSchema;

pub const SUCCESS_MESSAGE: &str = "Formulario enviado correctamente";

#[derive(Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub ok: bool,
    pub message: String,
    pub radicado: String,
    pub files: Vec<FileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_warning: Option<String>,
}

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.body_text();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE || err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

async fn read_form(
    multipart: &mut Multipart,
) -> Result<(SubmissionForm, Vec<AttachedFile>), AppError> {
    let mut form = SubmissionForm::default();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "files" || name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content = field.bytes().await.map_err(multipart_error)?;
            // Browsers send an empty part when no file was picked
            if file_name.is_empty() && content.is_empty() {
                continue;
            }
            files.push(AttachedFile::new(file_name, content));
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            if !form.set_field(&name, value) {
                tracing::debug!("Ignoring unknown form field: {}", name);
            }
        }
    }

    if !form.applicant_email.is_empty() && !form.applicant_email.contains('@') {
        tracing::warn!(
            "Applicant email '{}' looks invalid; the acknowledgement may not be delivered",
            form.applicant_email
        );
    }

    Ok((form, files))
}

#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = Multipart, description = "Applicant fields plus one or more `files` parts"),
    responses(
        (status = 200, description = "Submission stored and registered", body = SubmissionResponse),
        (status = 400, description = "No files attached or an attachment is empty"),
        (status = 413, description = "Request body too large"),
        (status = 502, description = "Container creation or file uploads failed"),
        (status = 503, description = "Storage credential unavailable"),
        (status = 504, description = "Uploads did not finish in time")
    ),
    tag = "submissions"
)]
pub async fn submit_form(
    State(state): State<crate::AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmissionResponse>, AppError> {
    let (form, files) = match read_form(&mut multipart).await {
        Ok(parsed) => parsed,
        Err(e) => {
            // Drain the rest so the client sees the response instead of a reset
            tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            return Err(e);
        }
    };

    let receipt = state.orchestrator.handle(form, files).await?;
    let notification_warning = receipt.notification_warning();

    Ok(Json(SubmissionResponse {
        ok: true,
        message: SUCCESS_MESSAGE.to_string(),
        radicado: receipt.radicado,
        files: receipt.files,
        notification_warning,
    }))
}
