//! Context-window assembly.
//!
//! The outbound message list is one system turn followed by the unfolded
//! turns. Anything before the fold boundary reaches the model only through
//! the summary embedded in the system turn, so the list grows with unfolded
//! turns and not with conversation length.

use quill_core::conversation::Conversation;
use quill_core::messages::Turn;
use quill_core::persona::PersonaContext;

use crate::prompt::PromptBuilder;

/// `[system] ++ turns[fold_boundary..]`. Length is always `1 + unfolded_count`.
pub fn build_context(
    conversation: &Conversation,
    persona: &PersonaContext,
    action_hint: Option<&str>,
    prompts: &dyn PromptBuilder,
) -> Vec<Turn> {
    let system = prompts.build_system_prompt(
        &persona.background,
        &persona.protagonist,
        conversation.summary(),
        action_hint,
    );

    let unfolded = conversation.unfolded_turns();
    let mut turns = Vec::with_capacity(1 + unfolded.len());
    turns.push(Turn::system(system));
    turns.extend_from_slice(unfolded);
    turns
}

/// Estimate token count for text content.
/// Approximation: chars / 4.
pub fn estimate_text_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Per-message overhead plus content estimate, summed.
pub fn estimate_context_tokens(turns: &[Turn]) -> u32 {
    turns
        .iter()
        .map(|t| 4 + estimate_text_tokens(&t.content))
        .sum()
}
