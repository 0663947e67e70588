use std::collections::BTreeMap;
use std::sync::Arc;

use ingest::SemWordRow;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::props;
use crate::retry::RetryPolicy;
use crate::store::{GraphStore, Label, NodePattern, PropValue, Props, Rel};
use crate::throttle::Throttle;

/// Root id a word belongs to. Derived words (`root_lang` set) point at a
/// parent row whose `root` is the id.
pub fn resolve_sem_id(row: &SemWordRow, rows: &BTreeMap<i64, SemWordRow>) -> Option<i64> {
    if row.root_lang.trim().is_empty() {
        return row.root.trim().parse().ok();
    }
    let parent_id: i64 = row.root.trim().parse().ok()?;
    let parent = rows.get(&parent_id)?;
    parent.root.trim().parse().ok()
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct WordIngestReport {
    pub processed: usize,
    pub created: usize,
    pub duplicates: usize,
    pub resolve_failures: Vec<i64>,
    /// Word ids whose root is not in the graph
    pub missing_roots: Vec<i64>,
    pub errors: Vec<(i64, String)>,
}

enum WordOutcome {
    Created,
    Duplicate,
    MissingRoot,
}

/// Creates Word nodes from `sem_word.csv` and links them to their roots.
pub struct WordIngestor {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    throttle: Throttle,
    create_missing: bool,
}

impl WordIngestor {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            store,
            retry,
            throttle,
            create_missing: false,
        }
    }

    /// Merge a bare Root keyed by `sem_id` when none exists.
    pub fn create_missing(mut self, create: bool) -> Self {
        self.create_missing = create;
        self
    }

    pub async fn ingest(
        &mut self,
        rows: &BTreeMap<i64, SemWordRow>,
        limit: Option<usize>,
    ) -> WordIngestReport {
        let mut report = WordIngestReport::default();
        let total = limit.unwrap_or(rows.len()).min(rows.len());

        for row in rows.values().take(total) {
            report.processed += 1;

            let Some(sem_id) = resolve_sem_id(row, rows) else {
                warn!(word_id = row.id, root = %row.root, "Could not resolve sem_id");
                report.resolve_failures.push(row.id);
                continue;
            };
            if row.word.trim().is_empty() {
                report.errors.push((row.id, "empty word text".to_string()));
                continue;
            }

            match self.ingest_row(row, sem_id).await {
                Ok(WordOutcome::Created) => report.created += 1,
                Ok(WordOutcome::Duplicate) => report.duplicates += 1,
                Ok(WordOutcome::MissingRoot) => report.missing_roots.push(row.id),
                Err(e) => {
                    warn!(word_id = row.id, error = %e, "Word row failed");
                    report.errors.push((row.id, e.to_string()));
                }
            }

            if self.throttle.tick().await {
                info!(processed = report.processed, total = total, "Word batch complete");
            }
        }

        info!(
            processed = report.processed,
            created = report.created,
            duplicates = report.duplicates,
            resolve_failures = report.resolve_failures.len(),
            missing_roots = report.missing_roots.len(),
            errors = report.errors.len(),
            "Word ingestion finished"
        );
        report
    }

    async fn ingest_row(&self, row: &SemWordRow, sem_id: i64) -> Result<WordOutcome, StoreError> {
        let store = &self.store;
        let root_pattern = NodePattern::new(Label::Root, props! { "sem_id" => sem_id });

        let root_id = if self.create_missing {
            let empty = Props::new();
            let (id, created) = self
                .retry
                .retry("merge_root", || store.merge_node(&root_pattern, &empty))
                .await?;
            if created {
                info!(sem_id, "Created placeholder root");
            }
            id
        } else {
            match self
                .retry
                .retry("find_root", || store.find_node(&root_pattern))
                .await?
            {
                Some(node) => node.id,
                None => {
                    warn!(word_id = row.id, sem_id, "Root not in graph");
                    return Ok(WordOutcome::MissingRoot);
                }
            }
        };

        let word = row.word.trim();
        let mut key = props! { "word" => word };
        if let Some(lang) = parse_int(&row.lang) {
            key.insert("lang".to_string(), PropValue::Int(lang));
        }

        // Duplicate: same word and language already under a root with this sem_id
        let word_pattern = NodePattern::new(Label::Word, key.clone());
        let existing = self
            .retry
            .retry("find_word", || {
                store.find_linked(&word_pattern, Rel::BelongsToSemiticRoot, &root_pattern)
            })
            .await?;
        if existing.is_some() {
            debug!(word = word, sem_id, "Duplicate word skipped");
            return Ok(WordOutcome::Duplicate);
        }

        let mut props = key;
        if let Some(category) = parse_int(&row.category) {
            props.insert("category".to_string(), PropValue::Int(category));
        }
        props.extend(props! {
            "concept" => row.concept.as_str(),
            "meaning" => row.meaning.as_str(),
            "sem_word_id" => row.id,
        });

        self.retry
            .retry("create_word", || {
                store.create_linked(Label::Word, &props, Rel::BelongsToSemiticRoot, &root_id)
            })
            .await?;

        info!(word = word, lang = %row.lang, sem_id, "Word created");
        Ok(WordOutcome::Created)
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::memory::testing::FaultyStore;

    fn word(id: i64, lang: &str, root: &str, text: &str, root_lang: &str) -> SemWordRow {
        SemWordRow {
            id,
            category: "0".to_string(),
            lang: lang.to_string(),
            root: root.to_string(),
            word: text.to_string(),
            concept: "peace".to_string(),
            meaning: "peace".to_string(),
            root_lang: root_lang.to_string(),
        }
    }

    fn rows(list: Vec<SemWordRow>) -> BTreeMap<i64, SemWordRow> {
        list.into_iter().map(|r| (r.id, r)).collect()
    }

    #[test]
    fn test_resolve_direct_and_derived() {
        let rows = rows(vec![
            word(10, "1", "5", "سلام", ""),
            word(11, "2", "10", "שלום", "1"),
            word(12, "2", "99", "x", "1"),
            word(13, "1", "", "y", ""),
        ]);
        assert_eq!(resolve_sem_id(&rows[&10], &rows), Some(5));
        assert_eq!(resolve_sem_id(&rows[&11], &rows), Some(5));
        assert_eq!(resolve_sem_id(&rows[&12], &rows), None);
        assert_eq!(resolve_sem_id(&rows[&13], &rows), None);
    }

    #[tokio::test]
    async fn test_words_link_to_root_and_skip_duplicates() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_node(Label::Root, &props! { "arabic" => "س-ل-م", "sem_id" => 5i64 })
            .await
            .unwrap();
        let rows = rows(vec![
            word(10, "1", "5", "سلام", ""),
            word(11, "2", "10", "שלום", "1"),
            word(12, "1", "8", "قلم", ""),
        ]);

        let mut ingestor = WordIngestor::new(store.clone(), RetryPolicy::none(), Throttle::disabled());
        let first = ingestor.ingest(&rows, None).await;
        assert_eq!(first.created, 2);
        assert_eq!(first.missing_roots, vec![12]);
        assert_eq!(store.edge_count(), 2);

        let second = ingestor.ingest(&rows, None).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(store.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_link_leaves_no_word_behind() {
        let store = Arc::new(FaultyStore::new().reject_links(1));
        store
            .create_node(Label::Root, &props! { "arabic" => "س-ل-م", "sem_id" => 5i64 })
            .await
            .unwrap();
        let rows = rows(vec![word(10, "1", "5", "سلام", "")]);
        let mut ingestor = WordIngestor::new(store.clone(), RetryPolicy::none(), Throttle::disabled());

        let first = ingestor.ingest(&rows, None).await;
        assert_eq!(first.created, 0);
        assert_eq!(first.errors.len(), 1);

        let second = ingestor.ingest(&rows, None).await;
        assert_eq!(second.created, 1);

        let words = NodePattern::new(Label::Word, props! { "word" => "سلام" });
        assert_eq!(store.count(&words).await.unwrap(), 1);
        assert_eq!(store.inner.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_found_among_many_same_spelling_words() {
        let store = Arc::new(MemoryStore::new());
        let target = store
            .create_node(Label::Root, &props! { "sem_id" => 5i64 })
            .await
            .unwrap();
        for sem_id in 100..250i64 {
            let other = store
                .create_node(Label::Root, &props! { "sem_id" => sem_id })
                .await
                .unwrap();
            store
                .create_linked(
                    Label::Word,
                    &props! { "word" => "عين", "lang" => 1i64 },
                    Rel::BelongsToSemiticRoot,
                    &other,
                )
                .await
                .unwrap();
        }
        store
            .create_linked(
                Label::Word,
                &props! { "word" => "عين", "lang" => 1i64 },
                Rel::BelongsToSemiticRoot,
                &target,
            )
            .await
            .unwrap();

        let rows = rows(vec![word(10, "1", "5", "عين", "")]);
        let mut ingestor = WordIngestor::new(store.clone(), RetryPolicy::none(), Throttle::disabled());
        let report = ingestor.ingest(&rows, None).await;

        assert_eq!(report.duplicates, 1);
        assert_eq!(report.created, 0);
    }

    #[tokio::test]
    async fn test_missing_root_is_merged_when_allowed() {
        let store = Arc::new(MemoryStore::new());
        let rows = rows(vec![word(12, "1", "8", "قلم", "")]);

        let mut ingestor = WordIngestor::new(store.clone(), RetryPolicy::none(), Throttle::disabled())
            .create_missing(true);
        let report = ingestor.ingest(&rows, None).await;

        assert_eq!(report.created, 1);
        let root = NodePattern::new(Label::Root, props! { "sem_id" => 8i64 });
        assert_eq!(store.count(&root).await.unwrap(), 1);
    }
}
