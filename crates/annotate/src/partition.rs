use crate::request::AnnotationRequest;

/// How requests are grouped into batch files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// At most this many requests per batch
    Fixed(usize),
    /// Estimated tokens per batch stay at or under this ceiling
    TokenBudget(usize),
}

/// Split requests into ordered batches according to `policy`.
///
/// Under a token budget a request that alone exceeds the ceiling is placed in
/// a batch of its own rather than dropped.
pub fn partition(requests: Vec<AnnotationRequest>, policy: Partition) -> Vec<Vec<AnnotationRequest>> {
    let mut batches = Vec::new();
    let mut current: Vec<AnnotationRequest> = Vec::new();
    let mut current_tokens = 0;

    for request in requests {
        let full = match policy {
            Partition::Fixed(size) => current.len() >= size.max(1),
            Partition::TokenBudget(ceiling) => {
                current_tokens + request.estimated_tokens() > ceiling
            }
        };
        if full && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current_tokens += request.estimated_tokens();
        current.push(request);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ChatMessage;

    fn request(id: &str, words: usize) -> AnnotationRequest {
        AnnotationRequest {
            correlation_id: id.to_string(),
            prompt_payload: vec![ChatMessage::user(vec!["w"; words].join(" "))],
            target_model: "m".to_string(),
        }
    }

    fn ids(batch: &[AnnotationRequest]) -> Vec<&str> {
        batch.iter().map(|r| r.correlation_id.as_str()).collect()
    }

    #[test]
    fn test_fixed_partition() {
        let requests = (0..5).map(|i| request(&format!("E{}", i), 1)).collect();
        let batches = partition(requests, Partition::Fixed(2));
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[2]), vec!["E4"]);
    }

    #[test]
    fn test_token_budget_never_exceeded() {
        // 10 words -> 13 tokens each
        let requests = (0..7).map(|i| request(&format!("E{}", i), 10)).collect();
        let batches = partition(requests, Partition::TokenBudget(40));

        assert_eq!(batches.len(), 3);
        for batch in &batches {
            let total: usize = batch.iter().map(|r| r.estimated_tokens()).sum();
            assert!(total <= 40);
        }
        let flattened: Vec<&str> = batches.iter().flat_map(|b| ids(b)).collect();
        assert_eq!(flattened, vec!["E0", "E1", "E2", "E3", "E4", "E5", "E6"]);
    }

    #[test]
    fn test_oversized_request_sits_alone() {
        let requests = vec![request("A", 5), request("BIG", 100), request("C", 5)];
        let batches = partition(requests, Partition::TokenBudget(20));

        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[1]), vec!["BIG"]);
    }
}
