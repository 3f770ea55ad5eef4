//! System prompt construction.

/// Produces the system turn's text. Must be pure: it is called once per
/// context build and its output is never cached.
pub trait PromptBuilder: Send + Sync {
    fn build_system_prompt(
        &self,
        background: &str,
        protagonist: &str,
        summary: &str,
        action_hint: Option<&str>,
    ) -> String;
}

pub const STORY_SO_FAR_OPEN: &str = "<story_so_far>";
pub const STORY_SO_FAR_CLOSE: &str = "</story_so_far>";

const BASE_DIRECTIVE: &str = "You are a co-writer continuing an interactive story with the user. \
Stay consistent with the established world and characters. Write vivid prose, \
advance the scene, and end each reply at a point where the user can act.";

/// Sectioned plain-text prompt. The summary, when present, is wrapped in
/// `<story_so_far>` tags.
#[derive(Clone, Debug, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build_system_prompt(
        &self,
        background: &str,
        protagonist: &str,
        summary: &str,
        action_hint: Option<&str>,
    ) -> String {
        let mut sections = vec![BASE_DIRECTIVE.to_string()];

        if !background.trim().is_empty() {
            sections.push(format!("## Background\n{}", background.trim()));
        }
        if !protagonist.trim().is_empty() {
            sections.push(format!("## Protagonist\n{}", protagonist.trim()));
        }
        if !summary.trim().is_empty() {
            sections.push(format!(
                "## Current state\n{STORY_SO_FAR_OPEN}\n{}\n{STORY_SO_FAR_CLOSE}",
                summary.trim()
            ));
        }
        if let Some(hint) = action_hint.map(str::trim).filter(|h| !h.is_empty()) {
            sections.push(format!("## Direction for the next reply\n{hint}"));
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_persona_and_summary() {
        let prompt = DefaultPromptBuilder.build_system_prompt(
            "A drowned city.",
            "Ines, a diver.",
            "Ines found the bell tower.",
            None,
        );
        assert!(prompt.contains("## Background\nA drowned city."));
        assert!(prompt.contains("## Protagonist\nInes, a diver."));
        assert!(prompt.contains("<story_so_far>\nInes found the bell tower.\n</story_so_far>"));
        assert!(!prompt.contains("Direction"));
    }

    #[test]
    fn empty_summary_has_no_state_block() {
        let prompt = DefaultPromptBuilder.build_system_prompt("bg", "hero", "  ", None);
        assert!(!prompt.contains(STORY_SO_FAR_OPEN));
    }

    #[test]
    fn action_hint_is_appended() {
        let prompt = DefaultPromptBuilder.build_system_prompt("", "", "", Some(" a storm rolls in "));
        assert!(prompt.ends_with("## Direction for the next reply\na storm rolls in"));
        assert!(!prompt.contains("## Background"));
    }

    #[test]
    fn deterministic() {
        let a = DefaultPromptBuilder.build_system_prompt("b", "p", "s", Some("h"));
        let b = DefaultPromptBuilder.build_system_prompt("b", "p", "s", Some("h"));
        assert_eq!(a, b);
    }
}
