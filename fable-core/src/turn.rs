//! Turns of the visible story and classification of player input.

use serde::{Deserialize, Serialize};

use crate::settings::Language;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Narrator,
    Player,
}

/// One entry of the visible story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn narrator(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Narrator,
            text: text.into(),
        }
    }

    pub fn player(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Player,
            text: text.into(),
        }
    }

    pub fn is_narrator(&self) -> bool {
        self.role == TurnRole::Narrator
    }
}

/// How a player input is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// A request for a character report. Does not advance the story.
    Meta,
    /// Anything else. Advances the story and the event counter.
    World,
}

impl ActionKind {
    /// Classify a player input.
    ///
    /// The input is trimmed and lowercased, then compared against the report
    /// keywords of every supported language, so a player can ask for
    /// "status" in a Russian game and still get a report.
    pub fn classify(action: &str) -> Self {
        let normalized = action.trim().to_lowercase();
        let is_meta = Language::all()
            .iter()
            .flat_map(|language| language.meta_keywords())
            .any(|keyword| *keyword == normalized);

        if is_meta {
            ActionKind::Meta
        } else {
            ActionKind::World
        }
    }

    pub fn is_meta(self) -> bool {
        self == ActionKind::Meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_keywords_are_classified() {
        for input in ["status", "  Inventory ", "HEALTH", "Статус", "инвентарь", "здоровье"] {
            assert_eq!(ActionKind::classify(input), ActionKind::Meta, "{input}");
        }
    }

    #[test]
    fn test_other_inputs_advance_the_world() {
        for input in ["look around", "check status", "status?", "inventory please", ""] {
            assert_eq!(ActionKind::classify(input), ActionKind::World, "{input}");
        }
    }

    #[test]
    fn test_turn_serializes_lowercase_role() {
        let json = serde_json::to_string(&Turn::player("hi")).unwrap();
        assert_eq!(json, r#"{"role":"player","text":"hi"}"#);
    }
}
