use ingest::Record;
use serde::{Deserialize, Serialize};

use crate::prompt;
use crate::task::AnnotationTask;

pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One unit of work in a batch, one-to-one with a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRequest {
    pub correlation_id: String,
    pub prompt_payload: Vec<ChatMessage>,
    pub target_model: String,
}

/// Wire form of a request: one line of the batch input file.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: BatchLineBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchLineBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl AnnotationRequest {
    pub fn to_batch_line(&self) -> BatchLine {
        BatchLine {
            custom_id: self.correlation_id.clone(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_URL.to_string(),
            body: BatchLineBody {
                model: self.target_model.clone(),
                messages: self.prompt_payload.clone(),
            },
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(self)
    }
}

/// Estimate token count (rough: 1.3 tokens per word) over every message
pub fn estimate_tokens(request: &AnnotationRequest) -> usize {
    let word_count: usize = request
        .prompt_payload
        .iter()
        .map(|m| m.content.split_whitespace().count())
        .sum();
    (word_count as f64 * 1.3) as usize
}

pub struct RequestBuilder {
    task: AnnotationTask,
    model: String,
}

impl RequestBuilder {
    pub fn new(task: AnnotationTask, model: impl Into<String>) -> Self {
        Self {
            task,
            model: model.into(),
        }
    }

    /// One request per record, correlated by the record's own identifier.
    pub fn build(&self, records: &[Record]) -> Vec<AnnotationRequest> {
        let system = prompt::system_prompt(self.task);
        records
            .iter()
            .map(|record| AnnotationRequest {
                correlation_id: record.correlation_id.clone(),
                prompt_payload: vec![
                    ChatMessage::system(system),
                    ChatMessage::user(prompt::user_prompt(self.task, record)),
                ],
                target_model: self.model.clone(),
            })
            .collect()
    }
}
