pub mod credentials;
pub mod ids;
pub mod notifier;
pub mod orchestrator;
pub mod scheduler;
pub mod storage;
pub mod uploader;
