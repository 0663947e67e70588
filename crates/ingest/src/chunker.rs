use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ReaderError;
use crate::reader::record_line;

pub struct ChunkerConfig {
    pub rows_per_chunk: usize,
    /// Columns that must be present and non-empty for a row to be kept
    pub required_columns: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            rows_per_chunk: 10_000,
            required_columns: vec!["word".to_string(), "definitions_xml".to_string()],
        }
    }
}

#[derive(Debug, Default)]
pub struct ChunkReport {
    pub chunk_files: Vec<PathBuf>,
    pub rows_written: usize,
    pub invalid_rows: usize,
    pub invalid_log: Option<PathBuf>,
}

/// Splits a large CSV into fixed-size chunk files, each repeating the header.
pub struct CsvChunker {
    config: ChunkerConfig,
}

impl CsvChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Write `<prefix>_1.csv`, `<prefix>_2.csv`, ... and log rejected rows to
    /// `<prefix>_invalid_rows.log`.
    pub fn split(&self, input: &Path, prefix: &Path) -> Result<ChunkReport, ReaderError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(input)
            .map_err(|source| csv_error(input, source))?;
        let headers = reader
            .headers()
            .map_err(|source| csv_error(input, source))?
            .clone();

        let missing: Vec<String> = self
            .config
            .required_columns
            .iter()
            .filter(|name| !headers.iter().any(|h| h.trim() == name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ReaderError::Schema {
                path: input.to_path_buf(),
                missing,
            });
        }
        let required: Vec<(usize, &str)> = self
            .config
            .required_columns
            .iter()
            .filter_map(|name| {
                headers
                    .iter()
                    .position(|h| h.trim() == name.as_str())
                    .map(|i| (i, name.as_str()))
            })
            .collect();

        let mut report = ChunkReport::default();
        let mut invalid = Vec::new();
        let mut chunk: Vec<csv::StringRecord> = Vec::new();

        for row in reader.records() {
            let row = row.map_err(|source| csv_error(input, source))?;
            let line = record_line(&row);

            if row.len() != headers.len() {
                invalid.push(format!(
                    "Line {}: Row length does not match headers | Row: {:?}",
                    line,
                    row.iter().collect::<Vec<_>>()
                ));
                continue;
            }
            if let Some((_, name)) = required
                .iter()
                .find(|(i, _)| row.get(*i).map_or(true, |v| v.trim().is_empty()))
            {
                invalid.push(format!(
                    "Line {}: Missing '{}' value | Row: {:?}",
                    line,
                    name,
                    row.iter().collect::<Vec<_>>()
                ));
                continue;
            }

            chunk.push(row);
            if chunk.len() == self.config.rows_per_chunk {
                self.flush(prefix, &headers, &mut chunk, &mut report)?;
            }
        }
        if !chunk.is_empty() {
            self.flush(prefix, &headers, &mut chunk, &mut report)?;
        }

        report.invalid_rows = invalid.len();
        if !invalid.is_empty() {
            let log_path = with_suffix(prefix, "_invalid_rows.log");
            let mut file =
                std::fs::File::create(&log_path).map_err(|source| io_error(&log_path, source))?;
            for entry in &invalid {
                writeln!(file, "{}", entry).map_err(|source| io_error(&log_path, source))?;
            }
            info!(path = %log_path.display(), count = invalid.len(), "Logged invalid rows");
            report.invalid_log = Some(log_path);
        }

        Ok(report)
    }

    fn flush(
        &self,
        prefix: &Path,
        headers: &csv::StringRecord,
        chunk: &mut Vec<csv::StringRecord>,
        report: &mut ChunkReport,
    ) -> Result<(), ReaderError> {
        let path = with_suffix(prefix, &format!("_{}.csv", report.chunk_files.len() + 1));
        let mut writer = csv::Writer::from_path(&path).map_err(|source| csv_error(&path, source))?;
        writer
            .write_record(headers)
            .map_err(|source| csv_error(&path, source))?;
        for row in chunk.iter() {
            writer
                .write_record(row)
                .map_err(|source| csv_error(&path, source))?;
        }
        writer.flush().map_err(|source| io_error(&path, source))?;

        info!(path = %path.display(), rows = chunk.len(), "Created chunk file");
        report.rows_written += chunk.len();
        report.chunk_files.push(path);
        chunk.clear();
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn csv_error(path: &Path, source: csv::Error) -> ReaderError {
    ReaderError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ReaderError {
    ReaderError::Io {
        path: path.to_path_buf(),
        source,
    }
}
