use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: JobStatus },

    #[error("No recorded batch input {file}")]
    MissingInput { file: String },

    #[error("Batch job {job_id} still not finished after {polls} polls")]
    PollLimit { job_id: String, polls: usize },

    #[error("Batch API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BatchError {
    /// Errors worth asking again for: timeouts, refused connections, rate
    /// limits and server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            BatchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BatchError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BatchError::Io {
            path: path.into(),
            source,
        }
    }
}
