use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use annotate::AnnotationResult;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::store::{GraphStore, NodePattern, PropValue, Props};
use crate::throttle::Throttle;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub results: usize,
    pub updated: usize,
    /// Correlation ids with no matching Word
    pub unmatched: Vec<String>,
    /// Correlation id and error for writes that failed after retries
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn merge(&mut self, other: ReconcileReport) {
        self.results += other.results;
        self.updated += other.updated;
        self.unmatched.extend(other.unmatched);
        self.failed.extend(other.failed);
    }
}

/// Writes parsed annotations onto their Word nodes.
pub struct Reconciler {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl Reconciler {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            store,
            retry,
            throttle,
        }
    }

    /// Upsert each result onto the Word whose `entry_id` equals its
    /// correlation id. Only the answered fields are set, so running the same
    /// results again leaves the graph unchanged.
    pub async fn reconcile(&mut self, results: &[AnnotationResult]) -> ReconcileReport {
        let mut report = ReconcileReport {
            results: results.len(),
            ..ReconcileReport::default()
        };

        for result in results {
            let pattern = NodePattern::word(&result.correlation_id);
            let props: Props = result
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), PropValue::Text(v.clone())))
                .collect();

            let outcome = self
                .retry
                .retry("reconcile_word", || self.store.set_properties(&pattern, &props))
                .await;

            match outcome {
                Ok(0) => {
                    warn!(correlation_id = %result.correlation_id, "No Word with this entry_id");
                    report.unmatched.push(result.correlation_id.clone());
                }
                Ok(matched) => {
                    debug!(
                        correlation_id = %result.correlation_id,
                        matched = matched,
                        fields = props.len(),
                        "Word updated"
                    );
                    report.updated += 1;
                }
                Err(e) => {
                    warn!(correlation_id = %result.correlation_id, error = %e, "Word update failed");
                    report.failed.push((result.correlation_id.clone(), e.to_string()));
                }
            }

            self.throttle.tick().await;
        }

        info!(
            results = report.results,
            updated = report.updated,
            unmatched = report.unmatched.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );
        report
    }
}

/// One unmatched or failed correlation id per line.
pub fn write_unmatched_report(path: &Path, report: &ReconcileReport) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for id in &report.unmatched {
        writeln!(writer, "{}", id)?;
    }
    for (id, reason) in &report.failed {
        writeln!(writer, "{}\t{}", id, reason)?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::props;
    use crate::store::Label;
    use annotate::{AnnotationTask, Fields};

    fn result(id: &str, fields: &[(&str, &str)]) -> AnnotationResult {
        AnnotationResult {
            correlation_id: id.to_string(),
            task: AnnotationTask::Translation,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Fields>(),
        }
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (id, word) in [("E1", "كتاب"), ("E2", "قلم")] {
            store
                .create_node(
                    Label::Word,
                    &props! { "entry_id" => id, "arabic" => word, "english" => "old" },
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_sets_only_answered_fields() {
        let store = seeded().await;
        let mut reconciler =
            Reconciler::new(store.clone(), RetryPolicy::none(), Throttle::disabled());

        let report = reconciler
            .reconcile(&[
                result("E1", &[("english", "book"), ("spanish", "libro")]),
                result("E9", &[("english", "ghost")]),
            ])
            .await;

        assert_eq!(report.updated, 1);
        assert_eq!(report.unmatched, vec!["E9".to_string()]);
        let e1 = store.find_node(&NodePattern::word("E1")).await.unwrap().unwrap();
        assert_eq!(e1.text("english"), Some("book"));
        assert_eq!(e1.text("spanish"), Some("libro"));
        assert_eq!(e1.text("arabic"), Some("كتاب"));
        let e2 = store.find_node(&NodePattern::word("E2")).await.unwrap().unwrap();
        assert_eq!(e2.text("english"), Some("old"));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = seeded().await;
        let results = vec![
            result("E1", &[("english", "book")]),
            result("E2", &[("english", "pen"), ("urdu", "قلم")]),
        ];
        let mut reconciler =
            Reconciler::new(store.clone(), RetryPolicy::none(), Throttle::new(1, 0));

        reconciler.reconcile(&results).await;
        let once = store.nodes();
        let report = reconciler.reconcile(&results).await;

        assert_eq!(store.nodes(), once);
        assert_eq!(once.len(), 2);
        assert_eq!(report.updated, 2);
    }

    #[test]
    fn test_unmatched_report_lists_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unmatched.txt");
        let report = ReconcileReport {
            results: 3,
            updated: 1,
            unmatched: vec!["E8".to_string(), "E9".to_string()],
            failed: vec![("E7".to_string(), "timeout".to_string())],
        };
        write_unmatched_report(&path, &report).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "E8\nE9\nE7\ttimeout\n");
    }
}
