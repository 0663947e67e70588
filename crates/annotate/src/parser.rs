use std::io::BufRead;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::schema::AnnotationResult;
use crate::task::AnnotationTask;

#[derive(Deserialize)]
struct ResultEnvelope {
    custom_id: String,
    response: Option<ResponseEnvelope>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    body: Option<ResponseBody>,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

/// A result line that produced no annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number in the output file
    pub line: usize,
    pub correlation_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub results: Vec<AnnotationResult>,
    pub skipped: Vec<SkippedLine>,
    /// Records the model explicitly declined to answer
    pub no_answer: Vec<String>,
}

impl ParseOutcome {
    pub fn lines_seen(&self) -> usize {
        self.results.len() + self.skipped.len() + self.no_answer.len()
    }
}

/// Parse one line of a batch output file into an annotation.
pub fn parse_result_line(task: AnnotationTask, line: &str) -> Result<AnnotationResult, ParseError> {
    let envelope: ResultEnvelope = serde_json::from_str(line)?;
    let correlation_id = envelope.custom_id;

    let content = envelope
        .response
        .and_then(|r| r.body)
        .and_then(|b| b.choices.into_iter().next())
        .and_then(|c| c.message.content)
        .ok_or_else(|| ParseError::MissingContent(envelope.error.map(|e| e.to_string())))?;

    let fields = task.schema().validate(&correlation_id, &content)?;
    task.cross_check(&fields)?;

    Ok(AnnotationResult {
        correlation_id,
        task,
        fields,
    })
}

/// Best effort recovery of the id from a line that failed to parse.
fn correlation_id_of(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("custom_id")?.as_str().map(str::to_string)
}

/// Parse a whole output file. Bad lines are skipped and recorded, never fatal.
pub fn parse_results<R: BufRead>(
    task: AnnotationTask,
    reader: R,
) -> Result<ParseOutcome, std::io::Error> {
    let mut outcome = ParseOutcome::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;

        match parse_result_line(task, &line) {
            Ok(result) => outcome.results.push(result),
            Err(ParseError::NoAnswer) => {
                if let Some(id) = correlation_id_of(&line) {
                    debug!(line = line_no, correlation_id = %id, "Model gave no answer");
                    outcome.no_answer.push(id);
                }
            }
            Err(e) => {
                let correlation_id = correlation_id_of(&line);
                warn!(
                    line = line_no,
                    correlation_id = correlation_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Skipping result line"
                );
                outcome.skipped.push(SkippedLine {
                    line: line_no,
                    correlation_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}
