use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::BatchJobClient;
use crate::error::BatchError;
use crate::job::{BatchJob, JobStatus, SubmissionState};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Give up after this many status checks; `None` waits indefinitely
    pub max_polls: Option<usize>,
    /// Consecutive transient status-check failures tolerated before giving up
    pub max_poll_errors: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_polls: None,
            max_poll_errors: 5,
        }
    }
}

/// Drives one batch file through upload, submission and polling.
pub struct BatchRunner {
    client: Arc<dyn BatchJobClient>,
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(client: Arc<dyn BatchJobClient>, config: RunnerConfig) -> Self {
        Self { client, config }
    }

    /// Run the batch in `path` to completion and write its results to `output_path`.
    ///
    /// The output file is only written when the job completes; a failed or
    /// cancelled job is reported as [`BatchError::JobFailed`].
    pub async fn run(&self, path: &Path, output_path: &Path) -> Result<BatchJob, BatchError> {
        self.run_tracked(path, output_path, |_| Ok(())).await
    }

    /// Like [`run`](Self::run), calling `on_submit` as soon as the job exists
    /// so its id can be persisted before polling starts.
    pub async fn run_tracked<F>(
        &self,
        path: &Path,
        output_path: &Path,
        on_submit: F,
    ) -> Result<BatchJob, BatchError>
    where
        F: FnMut(&BatchJob) -> Result<(), BatchError>,
    {
        let state = SubmissionState::Built {
            path: path.to_path_buf(),
        };
        self.drive(state, output_path, on_submit).await
    }

    /// Pick up polling of a job submitted by an earlier run.
    pub async fn resume(&self, job_id: &str, output_path: &Path) -> Result<BatchJob, BatchError> {
        info!(job_id = %job_id, "Resuming submitted batch");
        let mut errors = 0;
        let job = loop {
            match self.client.retrieve(job_id).await {
                Ok(job) => break job,
                Err(e) => self.tolerate(job_id, e, &mut errors).await?,
            }
        };
        self.drive(self.settle(job, 0), output_path, |_| Ok(()))
            .await
    }

    async fn drive<F>(
        &self,
        mut state: SubmissionState,
        output_path: &Path,
        mut on_submit: F,
    ) -> Result<BatchJob, BatchError>
    where
        F: FnMut(&BatchJob) -> Result<(), BatchError>,
    {
        let mut poll_errors = 0;

        loop {
            let next = match state {
                done @ (SubmissionState::Completed { .. } | SubmissionState::Failed { .. }) => done,
                other => self.step(other, &mut poll_errors).await?,
            };
            log_state(&next);
            if let SubmissionState::Submitted { job } = &next {
                on_submit(job)?;
            }

            state = match next {
                SubmissionState::Completed {
                    job,
                    output_file_id,
                } => {
                    let content = self.client.download(&output_file_id).await?;
                    tokio::fs::write(output_path, &content)
                        .await
                        .map_err(|e| BatchError::io(output_path, e))?;
                    info!(
                        job_id = %job.job_id,
                        output = %output_path.display(),
                        lines = content.iter().filter(|b| **b == b'\n').count(),
                        "Batch output saved"
                    );
                    if let Some(error_file) = &job.error_file_ref {
                        warn!(job_id = %job.job_id, error_file = %error_file, "Some requests in the batch failed");
                    }
                    return Ok(job);
                }
                SubmissionState::Failed { job_id, status } => {
                    return Err(BatchError::JobFailed { job_id, status });
                }
                other => other,
            };
        }
    }

    async fn step(
        &self,
        state: SubmissionState,
        poll_errors: &mut usize,
    ) -> Result<SubmissionState, BatchError> {
        let next = match state {
            SubmissionState::Built { path } => SubmissionState::Uploaded {
                file_id: self.client.upload(&path).await?,
            },
            SubmissionState::Uploaded { file_id } => SubmissionState::Submitted {
                job: self.client.create_job(&file_id).await?,
            },
            SubmissionState::Submitted { job } => self.settle(job, 0),
            SubmissionState::Polling { job, polls } => {
                if let Some(max) = self.config.max_polls {
                    if polls >= max {
                        return Err(BatchError::PollLimit {
                            job_id: job.job_id,
                            polls,
                        });
                    }
                }
                sleep(self.config.poll_interval).await;
                match self.client.retrieve(&job.job_id).await {
                    Ok(latest) => {
                        *poll_errors = 0;
                        self.settle(latest, polls + 1)
                    }
                    Err(e) => {
                        self.tolerate(&job.job_id, e, poll_errors).await?;
                        SubmissionState::Polling {
                            job,
                            polls: polls + 1,
                        }
                    }
                }
            }
            done @ (SubmissionState::Completed { .. } | SubmissionState::Failed { .. }) => done,
        };
        Ok(next)
    }

    /// Swallow a transient status-check error unless too many came in a row.
    async fn tolerate(
        &self,
        job_id: &str,
        error: BatchError,
        errors: &mut usize,
    ) -> Result<(), BatchError> {
        *errors += 1;
        if !error.is_transient() || *errors > self.config.max_poll_errors {
            return Err(error);
        }
        warn!(
            job_id = %job_id,
            attempt = *errors,
            max_errors = self.config.max_poll_errors,
            error = %error,
            "Status check failed, will ask again"
        );
        sleep(self.config.poll_interval).await;
        Ok(())
    }

    fn settle(&self, job: BatchJob, polls: usize) -> SubmissionState {
        match job.status {
            JobStatus::Completed => match job.output_file_ref.clone() {
                Some(output_file_id) => SubmissionState::Completed {
                    job,
                    output_file_id,
                },
                // Every request failed; there is nothing to reconcile
                None => SubmissionState::Failed {
                    job_id: job.job_id,
                    status: JobStatus::Completed,
                },
            },
            JobStatus::Failed | JobStatus::Cancelled => SubmissionState::Failed {
                job_id: job.job_id,
                status: job.status,
            },
            JobStatus::Pending | JobStatus::Running => SubmissionState::Polling { job, polls },
        }
    }
}

fn log_state(state: &SubmissionState) {
    match state {
        SubmissionState::Built { path } => info!(path = %path.display(), "Batch built"),
        SubmissionState::Uploaded { file_id } => info!(file_id = %file_id, "Batch uploaded"),
        SubmissionState::Submitted { job } => {
            info!(job_id = %job.job_id, status = %job.status, "Batch submitted")
        }
        SubmissionState::Polling { job, polls } => {
            let (done, total) = job
                .request_counts
                .as_ref()
                .map(|c| (c.completed, c.total))
                .unwrap_or_default();
            info!(
                job_id = %job.job_id,
                status = %job.status,
                polls = polls,
                completed = done,
                total = total,
                "Batch status"
            )
        }
        SubmissionState::Completed { job, .. } => {
            info!(job_id = %job.job_id, "Batch completed")
        }
        SubmissionState::Failed { job_id, status } => {
            warn!(job_id = %job_id, status = %status, "Batch did not complete")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        statuses: Mutex<VecDeque<JobStatus>>,
        downloads: AtomicUsize,
        /// Status checks answered with this HTTP status before any succeeds
        outage: Mutex<VecDeque<u16>>,
        submits: AtomicUsize,
    }

    impl FakeClient {
        fn new(statuses: &[JobStatus]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                downloads: AtomicUsize::new(0),
                outage: Mutex::new(VecDeque::new()),
                submits: AtomicUsize::new(0),
            }
        }

        fn with_outage(self, codes: &[u16]) -> Self {
            *self.outage.lock().unwrap() = codes.iter().copied().collect();
            self
        }

        fn job(&self, status: JobStatus) -> BatchJob {
            BatchJob {
                job_id: "batch_42".to_string(),
                status,
                input_file_ref: "file-in".to_string(),
                output_file_ref: (status == JobStatus::Completed).then(|| "file-out".to_string()),
                error_file_ref: None,
                request_counts: None,
            }
        }

        fn next_status(&self) -> JobStatus {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(JobStatus::Running)
        }
    }

    #[async_trait]
    impl BatchJobClient for FakeClient {
        async fn upload(&self, _path: &Path) -> Result<String, BatchError> {
            Ok("file-in".to_string())
        }

        async fn create_job(&self, _file_id: &str) -> Result<BatchJob, BatchError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(self.job(self.next_status()))
        }

        async fn retrieve(&self, _job_id: &str) -> Result<BatchJob, BatchError> {
            if let Some(status) = self.outage.lock().unwrap().pop_front() {
                return Err(BatchError::Api {
                    status,
                    body: "unavailable".to_string(),
                });
            }
            Ok(self.job(self.next_status()))
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, BatchError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{{\"custom_id\":\"E1\",\"file\":\"{}\"}}\n", file_id).into_bytes())
        }
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::ZERO,
            max_polls: Some(10),
            max_poll_errors: 2,
        }
    }

    #[tokio::test]
    async fn test_completed_job_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("root_batchinput_1.jsonl");
        let output = dir.path().join("root_batch_output_1.jsonl");
        let client = Arc::new(FakeClient::new(&[
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
        ]));

        let runner = BatchRunner::new(client.clone(), config());
        let job = runner.run(&input, &output).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(client.downloads.load(Ordering::SeqCst), 1);
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.contains("file-out"));
    }

    #[tokio::test]
    async fn test_failed_job_reports_id_and_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("root_batchinput_1.jsonl");
        let output = dir.path().join("root_batch_output_1.jsonl");
        let client = Arc::new(FakeClient::new(&[JobStatus::Running, JobStatus::Failed]));

        let runner = BatchRunner::new(client.clone(), config());
        let err = runner.run(&input, &output).await.unwrap_err();

        match err {
            BatchError::JobFailed { job_id, status } => {
                assert_eq!(job_id, "batch_42");
                assert_eq!(status, JobStatus::Failed);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(client.downloads.load(Ordering::SeqCst), 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_poll_limit() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient::new(&[]));
        let runner = BatchRunner::new(
            client,
            RunnerConfig {
                max_polls: Some(3),
                ..config()
            },
        );

        let err = runner
            .run(&dir.path().join("in.jsonl"), &dir.path().join("out.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::PollLimit { polls: 3, .. }));
    }

    #[tokio::test]
    async fn test_transient_status_errors_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        let client = Arc::new(
            FakeClient::new(&[JobStatus::Running, JobStatus::Completed]).with_outage(&[503, 429]),
        );
        let mut submitted = Vec::new();

        let runner = BatchRunner::new(client.clone(), config());
        let job = runner
            .run_tracked(&dir.path().join("in.jsonl"), &output, |job| {
                submitted.push(job.job_id.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(submitted, vec!["batch_42".to_string()]);
        assert!(output.is_file());
    }

    #[tokio::test]
    async fn test_status_errors_give_up_when_persistent_or_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");

        let flaky = Arc::new(FakeClient::new(&[JobStatus::Running]).with_outage(&[503, 503, 503]));
        let err = BatchRunner::new(flaky, config())
            .run(&dir.path().join("in.jsonl"), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Api { status: 503, .. }));

        let denied = Arc::new(FakeClient::new(&[JobStatus::Running]).with_outage(&[401]));
        let err = BatchRunner::new(denied, config())
            .run(&dir.path().join("in.jsonl"), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Api { status: 401, .. }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_resume_polls_without_resubmitting() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jsonl");
        let client = Arc::new(
            FakeClient::new(&[JobStatus::Running, JobStatus::Completed]).with_outage(&[502]),
        );

        let runner = BatchRunner::new(client.clone(), config());
        let job = runner.resume("batch_42", &output).await.unwrap();

        assert_eq!(job.job_id, "batch_42");
        assert_eq!(client.submits.load(Ordering::SeqCst), 0);
        assert_eq!(client.downloads.load(Ordering::SeqCst), 1);
        assert!(output.is_file());
    }
}
