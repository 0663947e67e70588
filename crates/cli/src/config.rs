use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use annotate::Partition;
use batch::RunnerConfig;
use graph::{RetryPolicy, Throttle};
use ingest::ReaderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub batching: BatchingConfig,
    pub throttle: ThrottleConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub poll_secs: u64,
    pub max_polls: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    pub work_dir: PathBuf,
    /// Requests per batch file
    pub batch_size: usize,
    /// Token ceiling per batch file; takes precedence over `batch_size`
    pub max_tokens: Option<usize>,
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub every: usize,
    pub pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub delay_ms: u64,
}

/// Which external services a command talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs {
    pub llm: bool,
    pub graph: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                base_url: batch::openai::DEFAULT_BASE_URL.to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                poll_secs: 60,
                max_polls: None,
            },
            graph: GraphConfig {
                uri: None,
                user: None,
                password: None,
            },
            batching: BatchingConfig {
                work_dir: PathBuf::from("batches"),
                batch_size: 1000,
                max_tokens: None,
                max_context_chars: 300,
            },
            throttle: ThrottleConfig {
                every: 100,
                pause_ms: 2000,
            },
            retry: RetryConfig {
                max_retries: 3,
                delay_ms: 2000,
            },
        }
    }
}

impl AppConfig {
    /// Fail before any network call if a needed credential is absent.
    pub fn validate(&self, needs: Needs) -> Result<()> {
        let mut missing = Vec::new();
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());

        if needs.llm {
            if blank(&self.llm.api_key) {
                missing.push("OPENAI_API_KEY");
            }
            if self.llm.base_url.trim().is_empty() {
                missing.push("OPENAI_BASE_URL");
            }
        }
        if needs.graph {
            if blank(&self.graph.uri) {
                missing.push("NEO4J_URI");
            }
            if blank(&self.graph.user) {
                missing.push("NEO4J_USER");
            }
            if blank(&self.graph.password) {
                missing.push("NEO4J_PASS");
            }
        }
        if !missing.is_empty() {
            bail!("Missing required credentials: {}", missing.join(", "));
        }

        if self.batching.batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        if self.batching.max_tokens == Some(0) {
            bail!("--max-tokens must be at least 1");
        }
        Ok(())
    }

    pub fn partition(&self) -> Partition {
        match self.batching.max_tokens {
            Some(max) => Partition::TokenBudget(max),
            None => Partition::Fixed(self.batching.batch_size),
        }
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            max_context_chars: Some(self.batching.max_context_chars),
            ..ReaderConfig::default()
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_secs(self.llm.poll_secs),
            max_polls: self.llm.max_polls,
            ..RunnerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_retries, self.retry.delay_ms)
    }

    pub fn throttle(&self) -> Throttle {
        Throttle::new(self.throttle.every, self.throttle.pause_ms)
    }
}
