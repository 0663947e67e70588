use std::collections::HashSet;
use std::sync::Arc;

use annotate::strip_diacritics;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::props;
use crate::retry::RetryPolicy;
use crate::store::{GraphStore, Label, Node, NodeId, NodePattern, Rel};
use crate::throttle::Throttle;

/// Marker set on every CorpusItem the linker has handled.
pub const LINK_STATUS: &str = "link_status";

#[derive(Debug, Default, Clone, Serialize)]
pub struct CorpusLinkReport {
    pub batches: usize,
    /// Linked to a Word that already existed
    pub matched: usize,
    /// Linked to a Word generated under its root
    pub created: usize,
    /// Item id and reason
    pub failed: Vec<(i64, String)>,
    pub errors: Vec<(i64, String)>,
}

enum LinkOutcome {
    Matched,
    Created,
    Failed(&'static str),
}

impl LinkOutcome {
    fn status(&self) -> &'static str {
        match self {
            LinkOutcome::Matched => "linked",
            LinkOutcome::Created => "created",
            LinkOutcome::Failed(_) => "failed",
        }
    }
}

/// Links corpus items to the Word their lemma names under their root.
pub struct CorpusLinker {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    throttle: Throttle,
    create_missing: bool,
}

impl CorpusLinker {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            store,
            retry,
            throttle,
            create_missing: true,
        }
    }

    /// Generate a Word under the root when no existing Word matches.
    pub fn create_missing(mut self, create: bool) -> Self {
        self.create_missing = create;
        self
    }

    pub async fn run(&mut self, corpus_id: i64, batch_size: usize) -> Result<CorpusLinkReport, StoreError> {
        let mut report = CorpusLinkReport::default();
        let pending = NodePattern::new(Label::CorpusItem, props! { "corpus_id" => corpus_id });
        let store = self.store.clone();

        // Errored items stay unmarked so a later run retries them; this run
        // fetches past them instead.
        let mut errored: HashSet<NodeId> = HashSet::new();

        loop {
            let limit = batch_size.max(1) + errored.len();
            let items: Vec<Node> = self
                .retry
                .retry("find_unlinked", || store.find_nodes(&pending, &[LINK_STATUS], limit))
                .await?
                .into_iter()
                .filter(|item| !errored.contains(&item.id))
                .collect();
            if items.is_empty() {
                break;
            }
            report.batches += 1;
            info!(batch = report.batches, items = items.len(), "Linking corpus items");

            for item in &items {
                let item_id = item.int("item_id").unwrap_or(-1);
                match self.link_item(item).await {
                    Ok(outcome) => {
                        let mut marker = props! { LINK_STATUS => outcome.status() };
                        if let LinkOutcome::Failed(reason) = outcome {
                            marker.insert("link_failed_reason".to_string(), reason.into());
                        }
                        self.retry
                            .retry("mark_item", || store.set_node(&item.id, &marker))
                            .await?;
                        match outcome {
                            LinkOutcome::Matched => report.matched += 1,
                            LinkOutcome::Created => report.created += 1,
                            LinkOutcome::Failed(reason) => {
                                warn!(item_id, reason, "Corpus item not linked");
                                report.failed.push((item_id, reason.to_string()));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(item_id, error = %e, "Corpus item failed");
                        report.errors.push((item_id, e.to_string()));
                        errored.insert(item.id.clone());
                    }
                }
                self.throttle.tick().await;
            }
        }

        info!(
            batches = report.batches,
            matched = report.matched,
            created = report.created,
            failed = report.failed.len(),
            errors = report.errors.len(),
            "Corpus linking finished"
        );
        Ok(report)
    }

    async fn link_item(&self, item: &Node) -> Result<LinkOutcome, StoreError> {
        let store = &self.store;
        let Some(lemma) = item.text("lemma").filter(|l| !l.trim().is_empty()) else {
            return Ok(LinkOutcome::Failed("null_lemma"));
        };
        let Some(root_text) = item.text("root").filter(|r| !r.trim().is_empty()) else {
            return Ok(LinkOutcome::Failed("null_root"));
        };

        let root_pattern = NodePattern::root_by_text(root_text);
        let Some(root) = self
            .retry
            .retry("find_root", || store.find_node(&root_pattern))
            .await?
        else {
            return Ok(LinkOutcome::Failed("root_not_found"));
        };

        let bare = strip_diacritics(lemma);
        let word_pattern =
            NodePattern::new(Label::Word, props! { "arabic_no_diacritics" => bare.as_str() });

        let existing = self
            .retry
            .retry("find_word", || store.find_related(&root.id, Rel::HasWord, &word_pattern))
            .await?;

        let (word_id, outcome) = match existing.into_iter().next() {
            Some(word) => (word.id, LinkOutcome::Matched),
            None if self.create_missing => {
                let on_create = props! {
                    "arabic" => lemma,
                    "generated" => true,
                    "node_type" => "Word",
                    "type" => "word",
                };
                let (id, _) = self
                    .retry
                    .retry("create_word", || {
                        store.merge_related(&root.id, Rel::HasWord, &word_pattern, &on_create)
                    })
                    .await?;
                (id, LinkOutcome::Created)
            }
            None => return Ok(LinkOutcome::Failed("word_not_found")),
        };

        self.retry
            .retry("link_item", || store.merge_edge(&item.id, Rel::HasWord, &word_id))
            .await?;
        debug!(lemma = lemma, root = root_text, word = %word_id, "Corpus item linked");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::memory::testing::FaultyStore;

    async fn corpus() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let root = store
            .create_node(Label::Root, &props! { "arabic" => "ك-ت-ب", "n_root" => "كتب" })
            .await
            .unwrap();
        let word = store
            .create_node(Label::Word, &props! { "arabic" => "كِتَاب", "arabic_no_diacritics" => "كتاب" })
            .await
            .unwrap();
        store.merge_edge(&root, Rel::HasWord, &word).await.unwrap();

        let items = [
            props! { "item_id" => 1i64, "corpus_id" => 2i64, "lemma" => "كِتَابٌ", "root" => "كتب" },
            props! { "item_id" => 2i64, "corpus_id" => 2i64, "lemma" => "كَاتِب", "root" => "ك-ت-ب" },
            props! { "item_id" => 3i64, "corpus_id" => 2i64, "root" => "ك-ت-ب" },
            props! { "item_id" => 4i64, "corpus_id" => 2i64, "lemma" => "سَلَام", "root" => "س-ل-م" },
            props! { "item_id" => 5i64, "corpus_id" => 9i64, "lemma" => "كتاب", "root" => "كتب" },
        ];
        for item in items {
            store.create_node(Label::CorpusItem, &item).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_links_matches_creates_and_marks_failures() {
        let store = corpus().await;
        let mut linker = CorpusLinker::new(store.clone(), RetryPolicy::none(), Throttle::disabled());

        let report = linker.run(2, 2).await.unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.created, 1);
        assert_eq!(
            report.failed,
            vec![(3, "null_lemma".to_string()), (4, "root_not_found".to_string())]
        );
        assert_eq!(report.batches, 2);

        // Item in another corpus untouched
        let other = store.find_node(&NodePattern::corpus_item(5, 9)).await.unwrap().unwrap();
        assert_eq!(other.text(LINK_STATUS), None);

        let generated = NodePattern::new(Label::Word, props! { "arabic_no_diacritics" => "كاتب" });
        let word = store.find_node(&generated).await.unwrap().unwrap();
        assert_eq!(word.props.get("generated"), Some(&true.into()));
    }

    #[tokio::test]
    async fn test_rerun_finds_nothing_left() {
        let store = corpus().await;
        let mut linker = CorpusLinker::new(store.clone(), RetryPolicy::none(), Throttle::disabled())
            .create_missing(false);

        let first = linker.run(2, 50).await.unwrap();
        assert_eq!(first.failed.len(), 3);
        let edges = store.edge_count();

        let second = linker.run(2, 50).await.unwrap();
        assert_eq!(second.batches, 0);
        assert_eq!(store.edge_count(), edges);
    }

    #[tokio::test]
    async fn test_erroring_item_does_not_block_later_items() {
        let store = Arc::new(FaultyStore::new().poison("ب-د-ل"));
        let root = store
            .create_node(Label::Root, &props! { "arabic" => "ك-ت-ب", "n_root" => "كتب" })
            .await
            .unwrap();
        let word = store
            .create_node(Label::Word, &props! { "arabic_no_diacritics" => "كتاب" })
            .await
            .unwrap();
        store.merge_edge(&root, Rel::HasWord, &word).await.unwrap();
        for (item_id, lemma, root_text) in [(1i64, "بدل", "ب-د-ل"), (2, "كتاب", "كتب"), (3, "كتاب", "ك-ت-ب")] {
            store
                .create_node(
                    Label::CorpusItem,
                    &props! { "item_id" => item_id, "corpus_id" => 2i64, "lemma" => lemma, "root" => root_text },
                )
                .await
                .unwrap();
        }
        let mut linker = CorpusLinker::new(store.clone(), RetryPolicy::none(), Throttle::disabled());

        let report = linker.run(2, 1).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, 1);
        assert_eq!(report.matched, 2);

        // The errored item is left for the next run
        let first = store.inner.find_node(&NodePattern::corpus_item(1, 2)).await.unwrap().unwrap();
        assert_eq!(first.text(LINK_STATUS), None);
        let third = store.inner.find_node(&NodePattern::corpus_item(3, 2)).await.unwrap().unwrap();
        assert_eq!(third.text(LINK_STATUS), Some("linked"));
    }
}
