use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use annotate::{AnnotationResult, AnnotationTask};
use ingest::Record;
use tracing::info;

/// Write parsed annotations joined back to their source records as CSV.
///
/// Rows keep source order; records without a result are left out. Returns
/// the number of rows written.
pub fn write_csv(
    path: &Path,
    task: AnnotationTask,
    records: &[Record],
    results: &[AnnotationResult],
) -> Result<usize> {
    let by_id: HashMap<&str, &AnnotationResult> = results
        .iter()
        .map(|r| (r.correlation_id.as_str(), r))
        .collect();
    let properties = task.schema().properties();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["entry_id_xml", "word"];
    header.extend(properties.iter().copied());
    writer.write_record(&header)?;

    let mut written = 0;
    for record in records {
        let Some(result) = by_id.get(record.correlation_id.as_str()) else {
            continue;
        };
        let mut row = vec![record.correlation_id.as_str(), record.primary_text.as_str()];
        row.extend(
            properties
                .iter()
                .map(|p| result.fields.get(*p).map(String::as_str).unwrap_or("")),
        );
        writer.write_record(&row)?;
        written += 1;
    }
    writer.flush()?;

    info!(
        rows = written,
        without_result = records.len() - written,
        path = %path.display(),
        "Exported annotations"
    );
    Ok(written)
}
