//! Answer generator trait and prompt construction.
//!
//! The pipeline numbers retrieved chunks `[1]..[N]`, renders them into a
//! context block, and sends a two-message conversation (fixed system
//! instruction + user message) to an [`AnswerGenerator`]. Remote backends
//! live in the app crate; [`FakeGenerator`] is the deterministic test
//! variant.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{ChatMessage, ContextEntry, Role};

/// Instruction sent as the system message of every answer request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question using ONLY the provided context. \
If the answer cannot be found in the context, say you don't know. \
Be concise and include inline citations like [1], [2] matching the sources.";

/// Maximum characters of each chunk included in the context block.
pub const CONTEXT_CHARS_PER_ENTRY: usize = 1200;

/// Separator placed between numbered context blocks.
pub const CONTEXT_DIVIDER: &str = "\n---\n";

/// Prefix of every [`FakeGenerator`] answer.
pub const FAKE_ANSWER_PREFIX: &str = "(fake) Based on context, I think: ";

/// Characters of the last user message echoed by [`FakeGenerator`].
const FAKE_ECHO_CHARS: usize = 100;

/// Turns an ordered conversation into a natural-language answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Provider name reported to callers (e.g. `"openai"`).
    fn name(&self) -> &str;
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Deterministic generator for tests: echoes a prefix of the last user
/// message behind [`FAKE_ANSWER_PREFIX`].
pub struct FakeGenerator;

#[async_trait]
impl AnswerGenerator for FakeGenerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| anyhow!("conversation has no user message"))?;
        let echoed: String = last_user.content.chars().take(FAKE_ECHO_CHARS).collect();
        Ok(format!("{}{}", FAKE_ANSWER_PREFIX, echoed))
    }
}

/// Renders numbered context entries.
///
/// Each block is a `[N] file (page P)` header followed by the first
/// [`CONTEXT_CHARS_PER_ENTRY`] characters of the chunk; blocks are joined
/// by [`CONTEXT_DIVIDER`].
pub fn build_context_block(entries: &[ContextEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let page = entry
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let snippet: String = entry.text.chars().take(CONTEXT_CHARS_PER_ENTRY).collect();
            format!(
                "[{}] {} (page {})\n{}\n",
                entry.citation_index, entry.file_name, page, snippet
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DIVIDER)
}

/// Builds the system + user conversation for a query.
pub fn build_messages(query: &str, entries: &[ContextEntry]) -> Vec<ChatMessage> {
    let context = build_context_block(entries);
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}\nAnswer concisely with citations.",
            context, query
        )),
    ]
}

/// Flattens a conversation into one prompt for single-text backends:
/// each message becomes `ROLE: content`, joined by newlines.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
