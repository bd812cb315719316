//! Setup parameters chosen by the player before the adventure starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::counter::DEFAULT_EVENT_TIMER;

/// Language the narrator writes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl Language {
    pub fn all() -> [Language; 2] {
        [Language::En, Language::Ru]
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    /// Inputs that ask for a character report instead of advancing the story.
    pub fn meta_keywords(self) -> &'static [&'static str] {
        match self {
            Language::En => &["status", "inventory", "health"],
            Language::Ru => &["статус", "инвентарь", "здоровье"],
        }
    }

    /// The input that requests a full character report.
    pub fn status_command(self) -> &'static str {
        self.meta_keywords()[0]
    }

    /// Instruction appended to an action when the event countdown runs out.
    pub fn random_event_directive(self) -> &'static str {
        match self {
            Language::En => "[SYSTEM MESSAGE: The random event counter has reached zero. Make a roll for a random event according to the rules.]",
            Language::Ru => "[СИСТЕМНОЕ СООБЩЕНИЕ: Счетчик случайных событий достиг нуля. Сделай бросок на случайное событие согласно правилам.]",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ru" | "russian" => Ok(Language::Ru),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// Game difficulty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Normal,
    Hardcore,
}

impl Difficulty {
    pub fn name(self, language: Language) -> &'static str {
        match (self, language) {
            (Difficulty::Normal, Language::En) => "Normal",
            (Difficulty::Hardcore, Language::En) => "Hardcore",
            (Difficulty::Normal, Language::Ru) => "Обычная",
            (Difficulty::Hardcore, Language::Ru) => "Хардкор",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Difficulty::Normal),
            "hardcore" | "hard" => Ok(Difficulty::Hardcore),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Everything the narrator needs to set up a new adventure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    /// Where the story takes place.
    pub setting: String,

    /// Who the player character is.
    pub description: String,

    #[serde(default)]
    pub difficulty: Difficulty,

    /// Requested narrative style; empty means the narrator's default.
    #[serde(default)]
    pub narrative_style: String,

    /// World-advancing actions between random events.
    #[serde(default = "default_event_timer")]
    pub event_timer: u32,

    #[serde(default)]
    pub language: Language,
}

fn default_event_timer() -> u32 {
    DEFAULT_EVENT_TIMER
}

impl GameSettings {
    /// Create settings with a setting and character description.
    pub fn new(setting: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            description: description.into(),
            difficulty: Difficulty::Normal,
            narrative_style: String::new(),
            event_timer: DEFAULT_EVENT_TIMER,
            language: Language::En,
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_narrative_style(mut self, style: impl Into<String>) -> Self {
        self.narrative_style = style.into();
        self
    }

    /// Set the random event timer (at least 1).
    pub fn with_event_timer(mut self, turns: u32) -> Self {
        self.event_timer = turns.max(1);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = GameSettings::new("A kingdom in the clouds", "An old wizard")
            .with_difficulty(Difficulty::Hardcore)
            .with_narrative_style("Ironic")
            .with_event_timer(0)
            .with_language(Language::Ru);

        assert_eq!(settings.difficulty, Difficulty::Hardcore);
        assert_eq!(settings.narrative_style, "Ironic");
        assert_eq!(settings.event_timer, 1);
        assert_eq!(settings.language, Language::Ru);
    }

    #[test]
    fn test_settings_defaults_when_deserializing() {
        let settings: GameSettings =
            serde_json::from_str(r#"{"setting":"Swamp","description":"A frog"}"#).unwrap();
        assert_eq!(settings.event_timer, DEFAULT_EVENT_TIMER);
        assert_eq!(settings.language, Language::En);
        assert_eq!(settings.difficulty, Difficulty::Normal);
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("RU".parse::<Language>().unwrap(), Language::Ru);
        assert_eq!("english".parse::<Language>().unwrap(), Language::En);
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn test_status_command_is_a_meta_keyword() {
        for language in Language::all() {
            assert!(language.meta_keywords().contains(&language.status_command()));
        }
    }
}
