use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ReaderError;
use crate::record::{Record, truncate_with_ellipsis};

/// Which columns of a CSV source make up a [`Record`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub id_column: String,
    pub text_column: String,
    pub context_column: Option<String>,
    pub max_context_chars: Option<usize>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            id_column: "entry_id_xml".to_string(),
            text_column: "word".to_string(),
            context_column: Some("definitions_xml".to_string()),
            max_context_chars: Some(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    /// 1-based line number in the source file (header is line 1)
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ReadReport {
    pub records: Vec<Record>,
    pub dropped: Vec<DroppedRow>,
}

pub struct SourceReader {
    config: ReaderConfig,
}

impl SourceReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Read one CSV source into an ordered list of records.
    pub fn read(&self, path: &Path) -> Result<ReadReport, ReaderError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| csv_error(path, source))?;

        let headers = reader
            .headers()
            .map_err(|source| csv_error(path, source))?
            .clone();
        let columns = self.resolve_columns(path, &headers)?;

        let mut report = ReadReport::default();
        for row in reader.records() {
            let row = row.map_err(|source| csv_error(path, source))?;
            let line = record_line(&row);

            let id = row.get(columns.id).unwrap_or("").trim();
            let text = row.get(columns.text).unwrap_or("").trim();

            if id.is_empty() {
                report.dropped.push(drop_row(line, format!("empty '{}'", self.config.id_column)));
                continue;
            }
            if text.is_empty() {
                report.dropped.push(drop_row(line, format!("empty '{}'", self.config.text_column)));
                continue;
            }

            let context = columns
                .context
                .and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| match self.config.max_context_chars {
                    Some(max) => truncate_with_ellipsis(c, max),
                    None => c.to_string(),
                });

            report
                .records
                .push(Record::new(id.to_string(), text.to_string(), context));
        }

        for dropped in &report.dropped {
            warn!(file = %path.display(), line = dropped.line, reason = %dropped.reason, "Dropped row");
        }
        info!(
            file = %path.display(),
            records = report.records.len(),
            dropped = report.dropped.len(),
            "Read source file"
        );

        Ok(report)
    }

    /// Read several sources in order, concatenating their records.
    pub fn read_all(&self, paths: &[PathBuf]) -> Result<ReadReport, ReaderError> {
        let mut combined = ReadReport::default();
        for path in paths {
            let report = self.read(path)?;
            combined.records.extend(report.records);
            combined.dropped.extend(report.dropped);
        }
        Ok(combined)
    }

    fn resolve_columns(
        &self,
        path: &Path,
        headers: &csv::StringRecord,
    ) -> Result<Columns, ReaderError> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        debug!(file = %path.display(), columns = ?positions.keys().collect::<Vec<_>>(), "CSV header");

        let mut required = vec![&self.config.id_column, &self.config.text_column];
        if let Some(context) = &self.config.context_column {
            required.push(context);
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|name| !positions.contains_key(name.as_str()))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReaderError::Schema {
                path: path.to_path_buf(),
                missing,
            });
        }

        Ok(Columns {
            id: positions[self.config.id_column.as_str()],
            text: positions[self.config.text_column.as_str()],
            context: self
                .config
                .context_column
                .as_ref()
                .map(|name| positions[name.as_str()]),
        })
    }
}

struct Columns {
    id: usize,
    text: usize,
    context: Option<usize>,
}

fn drop_row(line: u64, reason: String) -> DroppedRow {
    DroppedRow { line, reason }
}

/// Line a record starts on. Quoted fields may span several lines.
pub(crate) fn record_line(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |pos| pos.line())
}

fn csv_error(path: &Path, source: csv::Error) -> ReaderError {
    ReaderError::Csv {
        path: path.to_path_buf(),
        source,
    }
}
