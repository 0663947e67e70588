use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle of a remote batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "validating" | "pending" => JobStatus::Pending,
            "completed" => JobStatus::Completed,
            "failed" | "expired" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            // in_progress, finalizing, cancelling and anything newer
            _ => JobStatus::Running,
        }
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        JobStatus::from(raw.as_str())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// A remote batch job as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    #[serde(rename = "id")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(rename = "input_file_id")]
    pub input_file_ref: String,
    #[serde(rename = "output_file_id", default)]
    pub output_file_ref: Option<String>,
    #[serde(rename = "error_file_id", default)]
    pub error_file_ref: Option<String>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

/// Where a single batch file is in the submit/poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Built { path: PathBuf },
    Uploaded { file_id: String },
    Submitted { job: BatchJob },
    Polling { job: BatchJob, polls: usize },
    Completed { job: BatchJob, output_file_id: String },
    Failed { job_id: String, status: JobStatus },
}

impl SubmissionState {
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionState::Built { .. } => "built",
            SubmissionState::Uploaded { .. } => "uploaded",
            SubmissionState::Submitted { .. } => "submitted",
            SubmissionState::Polling { .. } => "polling",
            SubmissionState::Completed { .. } => "completed",
            SubmissionState::Failed { .. } => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SubmissionState::Completed { .. } | SubmissionState::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_statuses_map_onto_lifecycle() {
        assert_eq!(JobStatus::from("validating"), JobStatus::Pending);
        assert_eq!(JobStatus::from("in_progress"), JobStatus::Running);
        assert_eq!(JobStatus::from("finalizing"), JobStatus::Running);
        assert_eq!(JobStatus::from("cancelling"), JobStatus::Running);
        assert_eq!(JobStatus::from("expired"), JobStatus::Failed);
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_batch_object_deserialises() {
        let raw = r#"{
            "id": "batch_abc",
            "object": "batch",
            "endpoint": "/v1/chat/completions",
            "status": "completed",
            "input_file_id": "file-in",
            "output_file_id": "file-out",
            "error_file_id": null,
            "request_counts": {"total": 2, "completed": 2, "failed": 0}
        }"#;
        let job: BatchJob = serde_json::from_str(raw).unwrap();
        assert_eq!(job.job_id, "batch_abc");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_file_ref.as_deref(), Some("file-out"));
        assert_eq!(job.error_file_ref, None);
        assert_eq!(job.request_counts.unwrap().completed, 2);
    }
}
