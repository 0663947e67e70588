use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use annotate::{AnnotationTask, ParseOutcome, RequestBuilder, parse_results, partition};
use batch::{BatchError, BatchJobClient, BatchRunner, InputStatus, WorkDir};
use graph::{GraphStore, ReconcileReport, Reconciler, write_unmatched_report};
use ingest::{Record, SourceReader};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::metrics::{Metrics, Stage, TimedOperation};

/// One numbered batch file and whether it still needs submitting.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub number: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub requests: usize,
    pub rebuilt: bool,
    /// Output already downloaded for this exact input
    pub done: bool,
    /// Job submitted by an earlier run and not downloaded yet
    pub job_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: Vec<(usize, String)>,
    pub reconcile: ReconcileReport,
}

pub fn read_records(config: &AppConfig, csvs: &[PathBuf], metrics: &Metrics) -> Result<Vec<Record>> {
    let timer = TimedOperation::start(Stage::Read);
    let reader = SourceReader::new(config.reader_config());
    let report = reader
        .read_all(csvs)
        .context("Failed to read source records")?;
    metrics.record_read(report.records.len(), report.dropped.len());
    timer.finish(metrics);
    Ok(report.records)
}

/// Read sources and write numbered request files into the work dir.
///
/// Existing input files are kept when they still hold the same requests.
pub fn build(
    config: &AppConfig,
    task: AnnotationTask,
    csvs: &[PathBuf],
    metrics: &Metrics,
) -> Result<Vec<BatchPlan>> {
    let records = read_records(config, csvs, metrics)?;

    let timer = TimedOperation::start(Stage::Build);
    let requests = RequestBuilder::new(task, &config.llm.model).build(&records);
    metrics.record_built(requests.len());
    let batches = partition(requests, config.partition());

    let work = WorkDir::open(&config.batching.work_dir, task)?;
    let mut manifest = work.load_manifest()?;
    let mut plans = Vec::with_capacity(batches.len());

    for (index, batch) in batches.iter().enumerate() {
        let number = index + 1;
        let (input, status) = work.prepare_input(&mut manifest, number, batch)?;
        let output = work.output_path(number);
        let rebuilt = status == InputStatus::Written;
        let done = work.output_is_current(&manifest, number);
        if !done && output.is_file() {
            warn!(batch = number, "Output predates the current input; will resubmit");
        }
        info!(
            batch = number,
            requests = batch.len(),
            rebuilt = rebuilt,
            done = done,
            "Prepared batch"
        );
        plans.push(BatchPlan {
            number,
            input,
            output,
            requests: batch.len(),
            rebuilt,
            done,
            job_id: work.pending_job(&manifest, number),
        });
    }
    work.save_manifest(&manifest)?;
    timer.finish(metrics);

    Ok(plans)
}

/// Build, submit, poll, parse and reconcile every pending batch in turn.
///
/// A batch that fails or whose output cannot be read is recorded and the run
/// moves on to the next one. Jobs submitted by an earlier run are polled
/// again rather than resubmitted.
pub async fn run(
    config: &AppConfig,
    task: AnnotationTask,
    csvs: &[PathBuf],
    client: Arc<dyn BatchJobClient>,
    store: Arc<dyn GraphStore>,
    metrics: &Metrics,
) -> Result<RunSummary> {
    let plans = build(config, task, csvs, metrics)?;
    let work = WorkDir::open(&config.batching.work_dir, task)?;
    let mut manifest = work.load_manifest()?;
    let runner = BatchRunner::new(client, config.runner_config());
    let mut reconciler = Reconciler::new(store, config.retry_policy(), config.throttle());
    let mut summary = RunSummary {
        batches: plans.len(),
        ..RunSummary::default()
    };

    for plan in &plans {
        if plan.done {
            info!(batch = plan.number, output = %plan.output.display(), "Output already present, skipping");
            summary.skipped += 1;
            continue;
        }

        let timer = TimedOperation::start(Stage::Submit);
        let outcome = match &plan.job_id {
            Some(job_id) => runner.resume(job_id, &plan.output).await,
            None => {
                runner
                    .run_tracked(&plan.input, &plan.output, |job| {
                        work.record_job(&mut manifest, plan.number, &job.job_id)
                    })
                    .await
            }
        };
        timer.finish(metrics);

        let parsed = match outcome {
            Ok(job) => {
                info!(batch = plan.number, job_id = %job.job_id, "Batch completed");
                parse_outputs(task, std::slice::from_ref(&plan.output), metrics).and_then(|parsed| {
                    work.record_output(&mut manifest, plan.number)?;
                    Ok(parsed)
                })
            }
            Err(e) => {
                if matches!(e, BatchError::JobFailed { .. }) {
                    work.clear_job(&mut manifest, plan.number)?;
                }
                Err(e.into())
            }
        };

        match parsed {
            Ok(parsed) => {
                metrics.record_batch(true);
                summary.completed += 1;
                let report = reconcile_results(&mut reconciler, &parsed, metrics).await;
                summary.reconcile.merge(report);
            }
            Err(e) => {
                metrics.record_batch(false);
                let reason = format!("{:#}", e);
                warn!(batch = plan.number, error = %reason, "Batch failed");
                summary.failed.push((plan.number, reason));
            }
        }
    }

    write_report(config, task, &summary.reconcile)?;
    Ok(summary)
}

/// Parse result files in order. Unreadable files are fatal, bad lines are not.
pub fn parse_outputs(task: AnnotationTask, paths: &[PathBuf], metrics: &Metrics) -> Result<ParseOutcome> {
    let timer = TimedOperation::start(Stage::Parse);
    let mut combined = ParseOutcome::default();

    for path in paths {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let outcome = parse_results(task, BufReader::new(file))
            .with_context(|| format!("Failed to read {}", path.display()))?;
        info!(
            file = %path.display(),
            results = outcome.results.len(),
            skipped = outcome.skipped.len(),
            no_answer = outcome.no_answer.len(),
            "Parsed batch output"
        );
        metrics.record_parse(
            outcome.results.len(),
            outcome.skipped.len(),
            outcome.no_answer.len(),
        );
        combined.results.extend(outcome.results);
        combined.skipped.extend(outcome.skipped);
        combined.no_answer.extend(outcome.no_answer);
    }

    timer.finish(metrics);
    Ok(combined)
}

async fn reconcile_results(
    reconciler: &mut Reconciler,
    parsed: &ParseOutcome,
    metrics: &Metrics,
) -> ReconcileReport {
    let timer = TimedOperation::start(Stage::Reconcile);
    let report = reconciler.reconcile(&parsed.results).await;
    metrics.record_writes(report.updated, report.unmatched.len());
    timer.finish(metrics);
    report
}

/// Output files to reconcile: the given ones, or every output in the work dir
/// that answers its current batch input.
pub fn resolve_outputs(config: &AppConfig, task: AnnotationTask, outputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !outputs.is_empty() {
        return Ok(outputs.to_vec());
    }
    let work = WorkDir::open(&config.batching.work_dir, task)?;
    let manifest = work.load_manifest()?;
    let found = work.current_outputs(&manifest);
    if found.is_empty() {
        anyhow::bail!(
            "No current {}_batch_output_*.jsonl files in {}",
            task,
            work.root().display()
        );
    }
    Ok(found)
}

/// Parse existing output files and upsert their annotations.
pub async fn reconcile(
    config: &AppConfig,
    task: AnnotationTask,
    outputs: &[PathBuf],
    store: Arc<dyn GraphStore>,
    metrics: &Metrics,
) -> Result<ReconcileReport> {
    let paths = resolve_outputs(config, task, outputs)?;
    let parsed = parse_outputs(task, &paths, metrics)?;
    let mut reconciler = Reconciler::new(store, config.retry_policy(), config.throttle());
    let report = reconcile_results(&mut reconciler, &parsed, metrics).await;
    write_report(config, task, &report)?;
    Ok(report)
}

fn write_report(config: &AppConfig, task: AnnotationTask, report: &ReconcileReport) -> Result<()> {
    if report.unmatched.is_empty() && report.failed.is_empty() {
        return Ok(());
    }
    let path = unmatched_path(&config.batching.work_dir, task);
    write_unmatched_report(&path, report)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    warn!(
        unmatched = report.unmatched.len(),
        failed = report.failed.len(),
        report = %path.display(),
        "Some results were not applied"
    );
    Ok(())
}

pub fn unmatched_path(work_dir: &Path, task: AnnotationTask) -> PathBuf {
    work_dir.join(format!("{}_unmatched.txt", task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use batch::{BatchJob, JobStatus};
    use graph::{Label, MemoryStore, NodePattern, PropValue, Props};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers each request with its id's translation. File ids are the
    /// uploaded paths and job ids are `job:<file id>`.
    #[derive(Default)]
    struct EchoClient {
        submits: AtomicUsize,
        /// Batch whose job ends as failed
        fail_batch: Option<usize>,
        /// Batch whose output file is not valid UTF-8
        corrupt_batch: Option<usize>,
        /// Jobs never finish and status checks are refused
        stuck: bool,
    }

    fn batch_of(file_id: &str) -> usize {
        file_id
            .rsplit("_batchinput_")
            .next()
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .and_then(|n| n.parse().ok())
            .unwrap()
    }

    impl EchoClient {
        fn job(&self, file_id: &str) -> BatchJob {
            let status = if self.stuck {
                JobStatus::Running
            } else if Some(batch_of(file_id)) == self.fail_batch {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            BatchJob {
                job_id: format!("job:{}", file_id),
                status,
                input_file_ref: file_id.to_string(),
                output_file_ref: (status == JobStatus::Completed).then(|| file_id.to_string()),
                error_file_ref: None,
                request_counts: None,
            }
        }
    }

    #[async_trait]
    impl BatchJobClient for EchoClient {
        async fn upload(&self, path: &Path) -> Result<String, BatchError> {
            Ok(path.to_string_lossy().into_owned())
        }

        async fn create_job(&self, file_id: &str) -> Result<BatchJob, BatchError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(self.job(file_id))
        }

        async fn retrieve(&self, job_id: &str) -> Result<BatchJob, BatchError> {
            if self.stuck {
                return Err(BatchError::Api {
                    status: 401,
                    body: "invalid key".to_string(),
                });
            }
            Ok(self.job(job_id.trim_start_matches("job:")))
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, BatchError> {
            if Some(batch_of(file_id)) == self.corrupt_batch {
                return Ok(vec![0xff, 0xfe, b'\n']);
            }
            let input = fs::read_to_string(file_id).unwrap();
            let mut out = String::new();
            for line in input.lines() {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                let id = value["custom_id"].as_str().unwrap();
                let content = format!(
                    r#"{{"english":"en-{id}","spanish":"es-{id}","urdu":"ur-{id}","transliteration":"tr-{id}"}}"#
                );
                let envelope = serde_json::json!({
                    "custom_id": id,
                    "response": {"body": {"choices": [{"message": {"content": content}}]}}
                });
                out.push_str(&envelope.to_string());
                out.push('\n');
            }
            Ok(out.into_bytes())
        }
    }

    fn write_words(csv: &Path, words: usize, prefix: &str) {
        let mut body = String::from("entry_id_xml,word,definitions_xml\n");
        for i in 0..words {
            body.push_str(&format!("E{},{}{},definition {}\n", i, prefix, i, i));
        }
        fs::write(csv, body).unwrap();
    }

    fn setup(dir: &Path, words: usize) -> (AppConfig, PathBuf) {
        let csv = dir.join("words.csv");
        write_words(&csv, words, "كلمة");

        let mut config = AppConfig::default();
        config.batching.work_dir = dir.join("work");
        config.batching.batch_size = 2;
        config.llm.poll_secs = 0;
        config.throttle.every = 0;
        config.retry.max_retries = 0;
        (config, csv)
    }

    async fn seeded_store(words: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..words {
            let mut props = Props::new();
            props.insert("entry_id".to_string(), PropValue::Text(format!("E{}", i)));
            store.create_node(Label::Word, &props).await.unwrap();
        }
        store
    }

    fn work_dir(config: &AppConfig) -> WorkDir {
        WorkDir::open(&config.batching.work_dir, AnnotationTask::Translation).unwrap()
    }

    async fn english(store: &MemoryStore, id: &str) -> Option<String> {
        store
            .find_node(&NodePattern::word(id))
            .await
            .unwrap()
            .and_then(|n| n.text("english").map(str::to_string))
    }

    #[test]
    fn test_build_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 5);
        let metrics = Metrics::new();

        let plans = build(&config, AnnotationTask::Translation, &[csv.clone()], &metrics).unwrap();
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.rebuilt && !p.done && p.job_id.is_none()));

        let work = work_dir(&config);
        let mut manifest = work.load_manifest().unwrap();
        fs::write(&plans[0].output, "").unwrap();
        fs::write(&plans[1].output, "").unwrap();
        work.record_output(&mut manifest, 1).unwrap();

        let again = build(&config, AnnotationTask::Translation, &[csv], &metrics).unwrap();
        assert!(again.iter().all(|p| !p.rebuilt));
        assert!(again[0].done);
        // An output nobody recorded does not count as done
        assert!(!again[1].done);
    }

    #[tokio::test]
    async fn test_run_reconciles_and_survives_failed_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 5);
        let metrics = Metrics::new();
        let store = seeded_store(5).await;
        let client = Arc::new(EchoClient {
            fail_batch: Some(2),
            ..EchoClient::default()
        });

        let summary = run(
            &config,
            AnnotationTask::Translation,
            &[csv],
            client,
            store.clone(),
            &metrics,
        )
        .await
        .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 2);
        assert_eq!(summary.reconcile.updated, 3);
        assert_eq!(metrics.batches_failed(), 1);

        assert_eq!(english(&store, "E4").await.as_deref(), Some("en-E4"));
        // Batch 2 (E2, E3) failed and left no output behind
        assert_eq!(english(&store, "E2").await, None);
        assert!(!work_dir(&config).output_path(2).exists());
        assert!(work_dir(&config).load_manifest().unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_output_fails_only_its_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 4);
        let metrics = Metrics::new();
        let store = seeded_store(4).await;
        let client = Arc::new(EchoClient {
            corrupt_batch: Some(1),
            ..EchoClient::default()
        });

        let summary = run(
            &config,
            AnnotationTask::Translation,
            &[csv.clone()],
            client,
            store.clone(),
            &metrics,
        )
        .await
        .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 1);
        assert_eq!(summary.reconcile.updated, 2);
        assert_eq!(metrics.batches_failed(), 1);
        assert_eq!(english(&store, "E0").await, None);
        assert_eq!(english(&store, "E3").await.as_deref(), Some("en-E3"));

        // The bad download is not trusted; the job is fetched again next time
        let plans = build(&config, AnnotationTask::Translation, &[csv], &metrics).unwrap();
        assert!(!plans[0].done);
        assert!(plans[0].job_id.is_some());
        assert!(plans[1].done);
    }

    #[tokio::test]
    async fn test_rerun_resumes_submitted_job() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 2);
        let metrics = Metrics::new();
        let store = seeded_store(2).await;

        let stuck = Arc::new(EchoClient {
            stuck: true,
            ..EchoClient::default()
        });
        let first = run(
            &config,
            AnnotationTask::Translation,
            &[csv.clone()],
            stuck.clone(),
            store.clone(),
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(first.failed.len(), 1);
        assert_eq!(stuck.submits.load(Ordering::SeqCst), 1);
        let recorded = work_dir(&config).load_manifest().unwrap();
        assert_eq!(recorded.jobs.len(), 1);

        let healthy = Arc::new(EchoClient::default());
        let second = run(
            &config,
            AnnotationTask::Translation,
            &[csv],
            healthy.clone(),
            store.clone(),
            &metrics,
        )
        .await
        .unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(healthy.submits.load(Ordering::SeqCst), 0);
        assert_eq!(english(&store, "E1").await.as_deref(), Some("en-E1"));
        assert!(work_dir(&config).load_manifest().unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_writes_unmatched_report() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 3);
        let metrics = Metrics::new();
        // Run against an empty graph so nothing matches
        run(
            &config,
            AnnotationTask::Translation,
            &[csv],
            Arc::new(EchoClient::default()),
            Arc::new(MemoryStore::new()),
            &metrics,
        )
        .await
        .unwrap();

        let store = seeded_store(1).await;
        let report = reconcile(&config, AnnotationTask::Translation, &[], store, &metrics)
            .await
            .unwrap();
        assert_eq!(report.results, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unmatched, vec!["E1".to_string(), "E2".to_string()]);

        let written = fs::read_to_string(unmatched_path(
            &config.batching.work_dir,
            AnnotationTask::Translation,
        ))
        .unwrap();
        assert_eq!(written, "E1\nE2\n");
    }

    #[tokio::test]
    async fn test_reconcile_skips_outputs_of_rebuilt_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let (config, csv) = setup(dir.path(), 4);
        let metrics = Metrics::new();
        run(
            &config,
            AnnotationTask::Translation,
            &[csv.clone()],
            Arc::new(EchoClient::default()),
            Arc::new(MemoryStore::new()),
            &metrics,
        )
        .await
        .unwrap();

        // Only the second batch's words change, so only input 2 is rebuilt
        let mut body = String::from("entry_id_xml,word,definitions_xml\n");
        body.push_str("E0,كلمة0,definition 0\nE1,كلمة1,definition 1\n");
        body.push_str("E2,باب2,definition 2\nE3,باب3,definition 3\n");
        fs::write(&csv, body).unwrap();
        let plans = build(&config, AnnotationTask::Translation, &[csv], &metrics).unwrap();
        assert!(!plans[0].rebuilt);
        assert!(plans[1].rebuilt);

        let resolved = resolve_outputs(&config, AnnotationTask::Translation, &[]).unwrap();
        assert_eq!(resolved, vec![work_dir(&config).output_path(1)]);

        let report = reconcile(&config, AnnotationTask::Translation, &[], seeded_store(4).await, &metrics)
            .await
            .unwrap();
        assert_eq!(report.results, 2);
    }
}
