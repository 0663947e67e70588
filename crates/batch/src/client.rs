use std::path::Path;

use async_trait::async_trait;

use crate::error::BatchError;
use crate::job::BatchJob;

/// Remote batch processing service.
///
/// The pipeline only needs these four calls; anything that can accept a
/// JSONL file and hand back a results file can stand behind it.
#[async_trait]
pub trait BatchJobClient: Send + Sync {
    /// Upload a batch input file, returning the provider's file id.
    async fn upload(&self, path: &Path) -> Result<String, BatchError>;

    /// Start a job over a previously uploaded file.
    async fn create_job(&self, file_id: &str) -> Result<BatchJob, BatchError>;

    async fn retrieve(&self, job_id: &str) -> Result<BatchJob, BatchError>;

    /// Fetch a file's raw bytes.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, BatchError>;
}
