use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::BatchJobClient;
use crate::error::BatchError;
use crate::job::BatchJob;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

/// Batch API client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiBatchClient {
    base_url: String,
    api_key: String,
    description: String,
    client: Client,
}

impl OpenAiBatchClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            description: "lexigraph annotation batch".to_string(),
            client: Client::new(),
        }
    }

    /// Description attached to every job as metadata.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BatchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BatchError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BatchJobClient for OpenAiBatchClient {
    async fn upload(&self, path: &Path) -> Result<String, BatchError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BatchError::io(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch.jsonl".to_string());

        debug!(file = %file_name, bytes = bytes.len(), "Uploading batch input");
        let form = Form::new()
            .text("purpose", "batch")
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = Self::check(response).await?.json().await?;

        info!(file_id = %file.id, "Batch input uploaded");
        Ok(file.id)
    }

    async fn create_job(&self, file_id: &str) -> Result<BatchJob, BatchError> {
        let body = serde_json::json!({
            "input_file_id": file_id,
            "endpoint": annotate::request::CHAT_COMPLETIONS_URL,
            "completion_window": "24h",
            "metadata": { "description": self.description },
        });

        let response = self
            .client
            .post(self.url("batches"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let job: BatchJob = Self::check(response).await?.json().await?;

        info!(job_id = %job.job_id, status = %job.status, "Batch job created");
        Ok(job)
    }

    async fn retrieve(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        let response = self
            .client
            .get(self.url(&format!("batches/{}", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, BatchError> {
        let response = self
            .client
            .get(self.url(&format!("files/{}/content", file_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let client = OpenAiBatchClient::new("https://api.openai.com/v1/", "sk-test");
        assert_eq!(client.url("batches"), "https://api.openai.com/v1/batches");
        assert_eq!(
            client.url("files/file-1/content"),
            "https://api.openai.com/v1/files/file-1/content"
        );
    }
}
