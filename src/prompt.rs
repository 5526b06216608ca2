/// Fixed system instruction sent with every completion request.
pub const SYSTEM_PROMPT: &str = "you are a helpful assistant";

/// Upper bound on injected reference text. Whole chunks are dropped from the
/// tail of the list once the cap is reached; a chunk is never split.
pub const MAX_CONTEXT_CHARS: usize = 12_000;

/// Merge the retrieved chunks and the user's question into the instruction
/// string sent as the user message. Deterministic: the same inputs always
/// produce byte-identical output.
pub fn compose(question: &str, chunks: &[String]) -> String {
    let mut context = String::new();
    let mut used = 0usize;
    for chunk in chunks {
        let chunk_chars = chunk.chars().count();
        if used + chunk_chars > MAX_CONTEXT_CHARS {
            break;
        }
        if !context.is_empty() {
            context.push('\n');
        }
        context.push_str(chunk);
        used += chunk_chars;
    }

    let mut prompt = String::new();
    prompt.push_str(
        "You are a helpful AI assistant, skilled at answering questions from \
         reference material supplied to you. Below is supporting material \
         retrieved from the knowledge base for the user's question:\n",
    );
    prompt.push_str("=== Supporting material ===\n");
    prompt.push_str(&context);
    prompt.push_str("\n=== Original question ===\n");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nIf the supporting material is relevant to the question, answer \
         strictly from it. If it is unrelated, answer the question directly.",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_is_deterministic() {
        let chunks = vec!["alpha".to_string(), "beta".to_string()];
        let a = compose("what is alpha?", &chunks);
        let b = compose("what is alpha?", &chunks);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compose_contains_question_and_chunks_in_order() {
        let chunks = vec!["first chunk".to_string(), "second chunk".to_string()];
        let prompt = compose("the question", &chunks);

        assert!(prompt.contains("the question"));
        let first = prompt.find("first chunk").unwrap();
        let second = prompt.find("second chunk").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_compose_with_no_chunks_still_asks_the_question() {
        let prompt = compose("standalone question", &[]);
        assert!(prompt.contains("standalone question"));
        assert!(prompt.contains("=== Supporting material ==="));
    }

    #[test]
    fn test_context_cap_drops_whole_tail_chunks() {
        let big = "x".repeat(MAX_CONTEXT_CHARS - 10);
        let chunks = vec![big.clone(), "tail chunk that cannot fit".to_string()];
        let prompt = compose("q", &chunks);

        assert!(prompt.contains(&big));
        assert!(!prompt.contains("tail chunk that cannot fit"));
    }

    #[test]
    fn test_context_cap_never_splits_a_chunk() {
        let oversized = "y".repeat(MAX_CONTEXT_CHARS + 1);
        let prompt = compose("q", &[oversized]);
        // The chunk does not fit at all, so no part of it may appear.
        assert!(!prompt.contains("yyyy"));
    }
}
