//! Voice shortcuts
//!
//! Spoken-style trigger phrases at the start of a message pick an agent
//! explicitly, e.g. "debug this: panic in main" goes straight to the
//! debugging agent.

use crate::agents::profile::{
    ARCHITECTURE, DEBUGGING, DOCUMENTATION, RESEARCH, TESTING,
};
use crate::types::OrchestrationMode;

/// A trigger phrase and what it selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceShortcut {
    pub phrase: &'static str,
    pub agent_id: &'static str,
    pub mode: Option<OrchestrationMode>,
}

/// Longer phrases come first so "write tests for" wins over shorter prefixes
pub const VOICE_SHORTCUTS: &[VoiceShortcut] = &[
    VoiceShortcut { phrase: "write tests for", agent_id: TESTING, mode: None },
    VoiceShortcut { phrase: "document this", agent_id: DOCUMENTATION, mode: None },
    VoiceShortcut { phrase: "debug this", agent_id: DEBUGGING, mode: None },
    VoiceShortcut {
        phrase: "brainstorm",
        agent_id: RESEARCH,
        mode: Some(OrchestrationMode::MultiAgent),
    },
    VoiceShortcut { phrase: "research", agent_id: RESEARCH, mode: None },
    VoiceShortcut { phrase: "explain", agent_id: DOCUMENTATION, mode: None },
    VoiceShortcut { phrase: "design", agent_id: ARCHITECTURE, mode: None },
];

/// Result of matching a shortcut against user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutMatch {
    pub agent_id: &'static str,
    pub mode: Option<OrchestrationMode>,
    /// Message to forward, with the trigger phrase removed
    pub message: String,
}

/// Match a trigger phrase at the start of `input` (case-insensitive, whole
/// words only). Returns `None` when no shortcut applies.
pub fn match_shortcut(input: &str) -> Option<ShortcutMatch> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    VOICE_SHORTCUTS.iter().find_map(|shortcut| {
        let rest = lower.strip_prefix(shortcut.phrase)?;
        if rest.chars().next().is_some_and(|c| c.is_alphanumeric()) {
            return None;
        }

        // Lowercasing can change byte lengths, so cut the original by chars
        let phrase_chars = shortcut.phrase.chars().count();
        let remainder: String = trimmed.chars().skip(phrase_chars).collect();
        let remainder = remainder
            .trim_start_matches(|c: char| c == ':' || c == ',' || c == '-' || c.is_whitespace())
            .trim();

        let message = if remainder.is_empty() {
            trimmed.to_string()
        } else {
            remainder.to_string()
        };

        Some(ShortcutMatch {
            agent_id: shortcut.agent_id,
            mode: shortcut.mode,
            message,
        })
    })
}
