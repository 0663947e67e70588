//! Request construction and result parsing for batch annotation jobs.

pub mod error;
pub mod normalizer;
pub mod parser;
pub mod partition;
pub mod prompt;
pub mod request;
pub mod schema;
pub mod task;

pub use error::ParseError;
pub use normalizer::{same_word, strip_diacritics};
pub use parser::{ParseOutcome, SkippedLine, parse_result_line, parse_results};
pub use partition::{Partition, partition};
pub use request::{AnnotationRequest, BatchLine, ChatMessage, RequestBuilder, estimate_tokens};
pub use schema::{AnnotationResult, Fields, OutputSchema};
pub use task::AnnotationTask;
