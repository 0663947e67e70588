//! Submission and polling of annotation batches against a remote batch API.

pub mod client;
pub mod error;
pub mod job;
pub mod jsonl;
pub mod openai;
pub mod runner;
pub mod workdir;

pub use client::BatchJobClient;
pub use error::BatchError;
pub use job::{BatchJob, JobStatus, RequestCounts, SubmissionState};
pub use openai::OpenAiBatchClient;
pub use runner::{BatchRunner, RunnerConfig};
pub use workdir::{InputStatus, Manifest, WorkDir, WorkDirScan};
