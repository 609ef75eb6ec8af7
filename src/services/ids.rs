use uuid::Uuid;

/// Source of submission ids ("radicados")
pub trait SubmissionIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// First group of a random UUID v4: 8 lowercase hex characters
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidPrefixGenerator;

impl SubmissionIdGenerator for UuidPrefixGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect()
    }
}
