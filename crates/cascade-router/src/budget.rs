//! Approximate token accounting and context truncation.
//!
//! Counting is vendor-agnostic: a fixed framing cost per message, roughly four
//! characters per text token, and a flat cost per media part. The estimate is
//! monotonic and deterministic, which is all truncation needs to converge.

use cascade_core::{ContentPart, Message, MessageContent, Role};
use thiserror::Error;
use tracing::{info, warn};

/// Framing tokens charged per message (role markers, separators).
pub const MESSAGE_OVERHEAD: usize = 4;

/// Characters per estimated text token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat cost of one media part.
pub const MEDIA_PART_TOKENS: usize = 85;

/// Raised when no truncation can satisfy the budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    /// The leading system message alone is larger than the budget.
    #[error("system prompt needs {needed} tokens, budget is {budget}")]
    SystemPromptTooLarge {
        /// Tokens the system message costs.
        needed: usize,
        /// The budget that was requested.
        budget: usize,
    },
}

fn text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimated cost of a single message.
pub fn message_tokens(message: &Message) -> usize {
    let content = match &message.content {
        MessageContent::Text(text) => text_tokens(text),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text_tokens(text),
                ContentPart::ImageUrl { .. } => MEDIA_PART_TOKENS,
            })
            .sum(),
    };
    MESSAGE_OVERHEAD + content
}

/// Estimated cost of a message sequence.
pub fn count(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

/// Drops the oldest conversational messages until the sequence fits `budget`.
///
/// A leading system message is always kept. The rest is scanned newest first
/// and retained until the first message that would overflow; everything older
/// is dropped whole. Relative order is preserved. A sequence that already fits
/// is returned unchanged, which makes the operation idempotent.
///
/// Only an oversized system prompt is an error. When even the newest message
/// does not fit, the result is the system message alone, or empty.
pub fn truncate(messages: &[Message], budget: usize) -> Result<Vec<Message>, BudgetError> {
    let total = count(messages);
    if total <= budget {
        return Ok(messages.to_vec());
    }

    warn!(tokens = total, budget, "Context overflow, truncating");

    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };

    let mut used = system.map_or(0, message_tokens);
    if used > budget {
        return Err(BudgetError::SystemPromptTooLarge {
            needed: used,
            budget,
        });
    }

    let mut kept = 0;
    for message in rest.iter().rev() {
        let cost = message_tokens(message);
        if used + cost > budget {
            break;
        }
        used += cost;
        kept += 1;
    }

    let tail = &rest[rest.len() - kept..];
    let mut result = Vec::with_capacity(kept + 1);
    result.extend(system.cloned());
    result.extend_from_slice(tail);

    info!(
        tokens = used,
        dropped = rest.len() - kept,
        "Context truncated"
    );
    Ok(result)
}
