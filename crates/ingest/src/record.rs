use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// One input unit to be annotated.
///
/// Built once by the reader and never mutated afterwards; every later stage
/// refers back to it through `correlation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub correlation_id: String,
    pub primary_text: String,
    pub context: Option<String>,
}

impl Record {
    pub fn new(correlation_id: String, primary_text: String, context: Option<String>) -> Self {
        Self {
            correlation_id,
            primary_text,
            context,
        }
    }

    /// Estimate token count (rough: 1.3 tokens per word)
    pub fn estimated_tokens(&self) -> usize {
        let mut word_count = self.primary_text.split_whitespace().count();
        if let Some(context) = &self.context {
            word_count += context.split_whitespace().count();
        }
        (word_count as f64 * 1.3) as usize
    }
}

/// Cap `text` at `max_chars` grapheme clusters, appending `...` when cut.
///
/// Counting graphemes keeps an Arabic letter together with its harakat, so the
/// same input always truncates to the same output.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let mut graphemes = text.grapheme_indices(true);
    match graphemes.nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
