use std::fmt;
use std::sync::Arc;

use ingest::{Alphabet, SemRootRow};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::props;
use crate::retry::RetryPolicy;
use crate::store::{GraphStore, Label, NodePattern, Props};
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RootType {
    Triliteral,
    Quadriliteral,
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootType::Triliteral => f.write_str("Triliteral"),
            RootType::Quadriliteral => f.write_str("Quadriliteral"),
        }
    }
}

/// A root spelled out from its radical ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedRoot {
    pub letters: Vec<String>,
    pub translit: Vec<String>,
    /// Letters joined with `-`, e.g. `س-ل-م`
    pub arabic: String,
    pub english: String,
    pub root_type: RootType,
}

impl ReconstructedRoot {
    /// Properties of a freshly created Root node.
    pub fn node_props(&self) -> Props {
        let mut props = props! {
            "arabic" => self.arabic.as_str(),
            "n_root" => self.arabic.as_str(),
            "english" => self.english.as_str(),
            "node_type" => "Root",
            "root_type" => self.root_type.to_string(),
        };
        for (i, letter) in self.letters.iter().enumerate() {
            props.insert(format!("r{}", i + 1), letter.as_str().into());
        }
        props
    }
}

/// Spell a root from alphabet positions. Unknown ids render as `?<id>`.
pub fn reconstruct_root(
    alphabet: &Alphabet,
    r1: usize,
    r2: usize,
    r3: usize,
    r4: Option<usize>,
) -> ReconstructedRoot {
    let ids: Vec<usize> = [Some(r1), Some(r2), Some(r3), r4].into_iter().flatten().collect();
    let letters: Vec<String> = ids
        .iter()
        .map(|&id| {
            alphabet
                .letter(id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("?{}", id))
        })
        .collect();
    let translit: Vec<String> = ids
        .iter()
        .map(|&id| {
            alphabet
                .transliteration(id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("?{}", id))
        })
        .collect();

    ReconstructedRoot {
        arabic: letters.join("-"),
        english: translit.join("-"),
        root_type: if r4.is_some() {
            RootType::Quadriliteral
        } else {
            RootType::Triliteral
        },
        letters,
        translit,
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RootIngestReport {
    pub processed: usize,
    pub updated: usize,
    pub created: usize,
    /// Already carried the same `sem_id`
    pub skipped: usize,
    /// `sem_id`s with no Root in the graph and creation disabled
    pub unmatched: Vec<i64>,
    pub errors: Vec<(i64, String)>,
}

enum RootOutcome {
    Skipped,
    Updated,
    Created,
    Unmatched,
}

/// Attaches `sem_root.csv` ids and concepts to Root nodes.
pub struct RootIngestor {
    store: Arc<dyn GraphStore>,
    alphabet: Alphabet,
    retry: RetryPolicy,
    throttle: Throttle,
    create_missing: bool,
}

impl RootIngestor {
    pub fn new(
        store: Arc<dyn GraphStore>,
        alphabet: Alphabet,
        retry: RetryPolicy,
        throttle: Throttle,
    ) -> Self {
        Self {
            store,
            alphabet,
            retry,
            throttle,
            create_missing: false,
        }
    }

    pub fn create_missing(mut self, create: bool) -> Self {
        self.create_missing = create;
        self
    }

    pub async fn ingest(&mut self, rows: &[SemRootRow], limit: Option<usize>) -> RootIngestReport {
        let mut report = RootIngestReport::default();
        let rows = &rows[..limit.unwrap_or(rows.len()).min(rows.len())];

        for row in rows {
            report.processed += 1;
            match self.ingest_row(row).await {
                Ok(RootOutcome::Skipped) => report.skipped += 1,
                Ok(RootOutcome::Updated) => report.updated += 1,
                Ok(RootOutcome::Created) => report.created += 1,
                Ok(RootOutcome::Unmatched) => report.unmatched.push(row.id),
                Err(e) => {
                    warn!(sem_id = row.id, error = %e, "Root row failed");
                    report.errors.push((row.id, e.to_string()));
                }
            }

            if self.throttle.tick().await {
                info!(processed = report.processed, total = rows.len(), "Root batch complete");
            }
        }

        info!(
            processed = report.processed,
            updated = report.updated,
            created = report.created,
            skipped = report.skipped,
            unmatched = report.unmatched.len(),
            errors = report.errors.len(),
            "Root ingestion finished"
        );
        report
    }

    async fn ingest_row(&self, row: &SemRootRow) -> Result<RootOutcome, StoreError> {
        let root = reconstruct_root(&self.alphabet, row.rad1, row.rad2, row.rad3, row.rad4);
        let pattern = NodePattern::root(&root.arabic);
        let store = &self.store;

        let existing = self
            .retry
            .retry("find_root", || store.find_node(&pattern))
            .await?;

        match existing {
            Some(node) if node.int("sem_id") == Some(row.id) => {
                debug!(root = %root.arabic, sem_id = row.id, "Root already has this sem_id");
                Ok(RootOutcome::Skipped)
            }
            Some(node) => {
                if let Some(previous) = node.int("sem_id") {
                    info!(root = %root.arabic, from = previous, to = row.id, "Replacing sem_id");
                }
                let update = props! { "sem_id" => row.id, "concept" => row.concept.as_str() };
                self.retry
                    .retry("update_root", || store.set_node(&node.id, &update))
                    .await?;
                info!(root = %root.arabic, sem_id = row.id, concept = %row.concept, "Root updated");
                Ok(RootOutcome::Updated)
            }
            None if self.create_missing => {
                let mut props = root.node_props();
                props.extend(props! { "sem_id" => row.id, "concept" => row.concept.as_str() });
                self.retry
                    .retry("create_root", || store.create_node(Label::Root, &props))
                    .await?;
                info!(root = %root.arabic, sem_id = row.id, root_type = %root.root_type, "Root created");
                Ok(RootOutcome::Created)
            }
            None => {
                warn!(root = %root.arabic, sem_id = row.id, "Root not in graph");
                Ok(RootOutcome::Unmatched)
            }
        }
    }
}
