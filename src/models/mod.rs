use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Applicant metadata sent alongside the attachments
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubmissionForm {
    pub applicant_name: String,
    pub applicant_email: String,
    pub applicant_id: String,
    pub city: String,
    pub subject: String,
}

impl SubmissionForm {
    /// Assigns a text field by its form name. Accepts the canonical names and
    /// the ones used by the public form (`nombre`, `correo`, ...).
    /// Returns false when the name is not a known field.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "applicant_name" | "nombre" => &mut self.applicant_name,
            "applicant_email" | "correo" => &mut self.applicant_email,
            "applicant_id" | "cedula" => &mut self.applicant_id,
            "city" | "ciudad" => &mut self.city,
            "subject" | "asunto" => &mut self.subject,
            _ => return false,
        };
        *slot = value.trim().to_string();
        true
    }
}

/// One attachment as received from the form
#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub name: String,
    pub content: Bytes,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A single file queued for upload. Immutable once built.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file_name: String,
    pub destination_path: String,
    pub payload: Bytes,
}

impl UploadTask {
    pub fn new(file_name: String, destination_path: String, payload: Bytes) -> Self {
        Self {
            file_name,
            destination_path,
            payload,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Received,
    ContainerCreated,
    Uploading,
    Uploaded,
    PartiallyUploaded,
    Failed,
    Notified,
}

/// Per-request state. Lives only for the duration of one request.
#[derive(Debug)]
pub struct Submission {
    pub id: String,
    pub container_path: String,
    pub files: Vec<UploadTask>,
    pub status: SubmissionStatus,
}

impl Submission {
    pub fn new(id: String, container_root: &str) -> Self {
        let container_path = format!("{}/{}", container_root.trim_end_matches('/'), id);
        Self {
            id,
            container_path,
            files: Vec::new(),
            status: SubmissionStatus::Received,
        }
    }

    pub fn destination_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.container_path, file_name)
    }

    pub fn advance(&mut self, status: SubmissionStatus) {
        tracing::debug!(
            radicado = %self.id,
            from = ?self.status,
            to = ?status,
            "Submission status changed"
        );
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_field_accepts_both_namings() {
        let mut form = SubmissionForm::default();
        assert!(form.set_field("nombre", " Ana ".to_string()));
        assert!(form.set_field("applicant_email", "ana@example.com".to_string()));
        assert!(form.set_field("cedula", "123".to_string()));
        assert!(!form.set_field("unknown", "x".to_string()));
        assert_eq!(form.applicant_name, "Ana");
        assert_eq!(form.applicant_email, "ana@example.com");
        assert_eq!(form.applicant_id, "123");
    }

    #[test]
    fn test_container_and_destination_paths() {
        let submission = Submission::new("a1b2c3d4".to_string(), "/formularios/");
        assert_eq!(submission.container_path, "/formularios/a1b2c3d4");
        assert_eq!(
            submission.destination_for("cv.pdf"),
            "/formularios/a1b2c3d4/cv.pdf"
        );
        assert_eq!(submission.status, SubmissionStatus::Received);
    }
}
