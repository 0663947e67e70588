use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ReaderError;
use crate::reader::DroppedRow;

/// One row of `sem_root.csv`: radical ids into the Arabic alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SemRootRow {
    pub id: i64,
    pub rad1: usize,
    pub rad2: usize,
    pub rad3: usize,
    #[serde(default)]
    pub rad4: Option<usize>,
    #[serde(default)]
    pub concept: String,
}

/// One row of `sem_word.csv`.
///
/// When `root_lang` is set, `root` names a parent row rather than a root id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SemWordRow {
    pub id: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub root_lang: String,
}

const WORD_COLUMNS: &[&str] = &[
    "id", "category", "lang", "root", "word", "concept", "meaning", "root_lang",
];
const ROOT_COLUMNS: &[&str] = &["id", "rad1", "rad2", "rad3", "rad4", "concept"];

fn open(path: &Path, required: &[&str]) -> Result<csv::Reader<std::fs::File>, ReaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| ReaderError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let headers = reader.headers().map_err(|source| ReaderError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    // Exports from spreadsheet tools often start with a BOM
    let present: Vec<&str> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}'))
        .collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|c| !present.contains(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ReaderError::Schema {
            path: path.to_path_buf(),
            missing,
        });
    }
    let cleaned = csv::StringRecord::from(present);
    reader.set_headers(cleaned);
    Ok(reader)
}

fn read_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    required: &[&str],
) -> Result<(Vec<T>, Vec<DroppedRow>), ReaderError> {
    let mut reader = open(path, required)?;
    let mut rows = Vec::new();
    let mut dropped = Vec::new();

    for row in reader.deserialize::<T>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                let line = e.position().map_or(0, |pos| pos.line());
                warn!(path = %path.display(), line, error = %e, "Skipping invalid row");
                dropped.push(DroppedRow {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        path = %path.display(),
        rows = rows.len(),
        dropped = dropped.len(),
        "Loaded rows"
    );
    Ok((rows, dropped))
}

pub fn read_sem_roots(path: &Path) -> Result<(Vec<SemRootRow>, Vec<DroppedRow>), ReaderError> {
    read_rows(path, ROOT_COLUMNS)
}

/// Word rows keyed by their id; parent lookups need random access.
pub fn read_sem_words(
    path: &Path,
) -> Result<(BTreeMap<i64, SemWordRow>, Vec<DroppedRow>), ReaderError> {
    let (rows, dropped) = read_rows::<SemWordRow>(path, WORD_COLUMNS)?;
    Ok((rows.into_iter().map(|r| (r.id, r)).collect(), dropped))
}
