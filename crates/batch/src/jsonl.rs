use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use annotate::AnnotationRequest;

use crate::error::BatchError;

/// Serialise requests as JSONL, one batch line per request.
///
/// Non-ASCII text is written as-is, not `\u` escaped.
pub fn render_requests(requests: &[AnnotationRequest]) -> Result<Vec<u8>, BatchError> {
    let mut buf = Vec::new();
    for request in requests {
        serde_json::to_writer(&mut buf, &request.to_batch_line())?;
        buf.push(b'\n');
    }
    Ok(buf)
}

pub fn write_requests(path: &Path, requests: &[AnnotationRequest]) -> Result<usize, BatchError> {
    let bytes = render_requests(requests)?;
    let file = File::create(path).map_err(|e| BatchError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&bytes)
        .and_then(|_| writer.flush())
        .map_err(|e| BatchError::io(path, e))?;
    Ok(requests.len())
}
