//! Prompt text and context assembly for grounded answers.

use crate::models::ScoredChunk;

/// Instructions sent as the system turn. `{context}` is replaced with the
/// formatted retrieval results.
pub const SYSTEM_PROMPT: &str = "You are an enterprise knowledge assistant.\n\
Use ONLY the following context to answer the question.\n\
If the answer is not in the context, say you don't know.\n\
\n\
<context>\n\
{context}\n\
</context>\n\
\n\
Answer clearly and cite sources if possible.";

/// Separator placed between context passages.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Join retrieved chunks into a single context block, each passage prefixed
/// with its attribution.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|sc| format!("[Source: {}]\n{}", sc.chunk.attribution(), sc.chunk.text.trim()))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn system_prompt(context: &str) -> String {
    SYSTEM_PROMPT.replace("{context}", context)
}

pub fn user_prompt(question: &str) -> String {
    format!("Question: {}", question.trim())
}
