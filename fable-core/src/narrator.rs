//! The narrative collaborator: the language model that tells the story.
//!
//! The session only talks to the [`Narrator`] trait. [`ClaudeNarrator`] is the
//! production binding over the `claude` crate; tests use
//! [`MockNarrator`](crate::testing::MockNarrator).

use std::pin::Pin;

use async_trait::async_trait;
use claude::{Claude, Message, Request, StreamEvent};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::{GameSettings, Language};

/// Errors from the narrator.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("Claude API error: {0}")]
    Client(#[from] claude::Error),

    #[error("Narration stream failed: {0}")]
    Stream(String),

    #[error("Saved transcript is not usable: {0}")]
    InvalidTranscript(String),

    #[error("No story is in progress")]
    NotStarted,
}

/// Text fragments of one response, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, NarratorError>> + Send>>;

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Model,
}

/// One message of the conversation with the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
}

/// The conversation as the narrator sees it.
///
/// Unlike the visible turns this keeps the exact text that was sent,
/// including random event directives, and the raw responses with their
/// game data blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            entries: Vec::new(),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            role: TranscriptRole::User,
            text: text.into(),
        });
    }

    pub fn push_model(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            role: TranscriptRole::Model,
            text: text.into(),
        });
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, action: impl Into<String>, response: impl Into<String>) {
        self.push_user(action);
        self.push_model(response);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to API messages, ending with an optional new user message.
    fn to_messages(&self, next: Option<&str>) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .entries
            .iter()
            .map(|entry| match entry.role {
                TranscriptRole::User => Message::user(entry.text.clone()),
                TranscriptRole::Model => Message::assistant(entry.text.clone()),
            })
            .collect();
        if let Some(text) = next {
            messages.push(Message::user(text));
        }
        messages
    }
}

/// The operations the session needs from a narrator.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Set up a new adventure and return the opening response.
    async fn start_session(
        &self,
        settings: &GameSettings,
    ) -> Result<(Transcript, String), NarratorError>;

    /// Send an action and stream the response.
    ///
    /// The transcript is not modified; the caller records the exchange once
    /// the stream has completed.
    async fn continue_session(
        &self,
        transcript: &Transcript,
        action: &str,
    ) -> Result<FragmentStream, NarratorError>;

    /// Ask an out-of-band question about the current story.
    async fn ask(&self, transcript: &Transcript, question: &str) -> Result<String, NarratorError>;

    /// Convert a transcript to its saved form.
    fn serialize_transcript(
        &self,
        transcript: &Transcript,
    ) -> Result<serde_json::Value, NarratorError> {
        serde_json::to_value(transcript).map_err(|e| NarratorError::InvalidTranscript(e.to_string()))
    }

    /// Rebuild a transcript from the form produced by `serialize_transcript`.
    fn rehydrate_session(&self, saved: serde_json::Value) -> Result<Transcript, NarratorError> {
        serde_json::from_value(saved).map_err(|e| NarratorError::InvalidTranscript(e.to_string()))
    }
}

/// Configuration for [`ClaudeNarrator`].
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// The model to use; the client default when unset.
    pub model: Option<String>,

    /// Maximum tokens for responses.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: Some(0.8),
        }
    }
}

impl NarratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Narrator backed by the Claude Messages API.
pub struct ClaudeNarrator {
    client: Claude,
    config: NarratorConfig,
}

impl ClaudeNarrator {
    pub fn new(client: Claude) -> Self {
        Self::with_config(client, NarratorConfig::default())
    }

    pub fn with_config(client: Claude, config: NarratorConfig) -> Self {
        Self { client, config }
    }

    /// Create a narrator from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, NarratorError> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    fn request(&self, transcript: &Transcript, next: &str) -> Request {
        let mut request =
            Request::new(transcript.to_messages(Some(next))).with_max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(system) = &transcript.system {
            request = request.with_system(system.clone());
        }
        request
    }
}

#[async_trait]
impl Narrator for ClaudeNarrator {
    async fn start_session(
        &self,
        settings: &GameSettings,
    ) -> Result<(Transcript, String), NarratorError> {
        let mut transcript = Transcript::with_system(system_prompt(settings.language));
        let setup = setup_prompt(settings);

        tracing::info!(language = %settings.language, "starting narration");
        let response = self.client.complete(self.request(&transcript, &setup)).await?;

        transcript.record_exchange(setup, response.text.clone());
        Ok((transcript, response.text))
    }

    async fn continue_session(
        &self,
        transcript: &Transcript,
        action: &str,
    ) -> Result<FragmentStream, NarratorError> {
        if transcript.is_empty() {
            return Err(NarratorError::NotStarted);
        }

        let events = self.client.stream(self.request(transcript, action)).await?;
        let fragments = events.filter_map(|event| async move {
            match event {
                Ok(StreamEvent::TextDelta { text, .. }) => Some(Ok(text)),
                Ok(StreamEvent::Error { message }) => Some(Err(NarratorError::Stream(message))),
                Ok(_) => None,
                Err(e) => Some(Err(NarratorError::Client(e))),
            }
        });
        Ok(Box::pin(fragments))
    }

    async fn ask(&self, transcript: &Transcript, question: &str) -> Result<String, NarratorError> {
        if transcript.is_empty() {
            return Err(NarratorError::NotStarted);
        }
        let response = self.client.complete(self.request(transcript, question)).await?;
        Ok(response.text)
    }
}

/// Response format and rules for the narrator.
pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::En => include_str!("prompts/system_en.txt"),
        Language::Ru => include_str!("prompts/system_ru.txt"),
    }
}

/// The opening message describing the adventure to set up.
pub fn setup_prompt(settings: &GameSettings) -> String {
    let language = settings.language;
    let difficulty = settings.difficulty.name(language);
    match language {
        Language::En => {
            let style = if settings.narrative_style.trim().is_empty() {
                "Standard GM style"
            } else {
                settings.narrative_style.as_str()
            };
            format!(
                "## GAME SETTINGS\n\
                 - Setting: {}\n\
                 - Character description: {}\n\
                 - Difficulty: {difficulty}\n\
                 - Narrative style: {style}\n\n\
                 Create the character sheet, include it in the game data block, \
                 and begin the adventure with turn 1.",
                settings.setting, settings.description
            )
        }
        Language::Ru => {
            let style = if settings.narrative_style.trim().is_empty() {
                "Стандартный стиль ГМ"
            } else {
                settings.narrative_style.as_str()
            };
            format!(
                "## НАСТРОЙКИ ИГРЫ\n\
                 - Сеттинг: {}\n\
                 - Описание персонажа: {}\n\
                 - Сложность: {difficulty}\n\
                 - Стиль повествования: {style}\n\n\
                 Создай лист персонажа, включи его в блок игровых данных \
                 и начни приключение с хода 1.",
                settings.setting, settings.description
            )
        }
    }
}

/// An out-of-character question to the game master.
pub fn game_master_prompt(language: Language, question: &str) -> String {
    match language {
        Language::En => format!(
            "[OUT OF CHARACTER] The player steps outside the story and asks the Game Master \
             directly. Answer as the Game Master: explain rules, clarify what happened or \
             give advice. Do not advance the story and do not add a game data block.\n\n\
             Question: {question}"
        ),
        Language::Ru => format!(
            "[ВНЕ ИГРЫ] Игрок выходит из истории и обращается напрямую к Гейм-мастеру. \
             Ответь как Гейм-мастер: объясни правила, уточни произошедшее или дай совет. \
             Не продолжай историю и не добавляй блок игровых данных.\n\n\
             Вопрос: {question}"
        ),
    }
}

/// A request for a flavorful description of an inventory item.
pub fn item_prompt(settings: &GameSettings, item: &str) -> String {
    match settings.language {
        Language::En => format!(
            "[OUT OF CHARACTER] The player inspects an item from their inventory.\n\
             Setting: {}\nCharacter: {}\nItem: {item}\n\n\
             Describe its appearance in 2-3 sentences, hint at its origin or purpose and \
             mention any obvious use. Keep the story's tone. Reply with the description only.",
            settings.setting, settings.description
        ),
        Language::Ru => format!(
            "[ВНЕ ИГРЫ] Игрок осматривает предмет из своего инвентаря.\n\
             Сеттинг: {}\nПерсонаж: {}\nПредмет: {item}\n\n\
             Опиши его внешний вид в 2-3 предложениях, намекни на происхождение или \
             назначение и упомяни очевидные функции. Сохраняй стиль истории. \
             Отвечай только описанием.",
            settings.setting, settings.description
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange_appends_user_then_model() {
        let mut transcript = Transcript::new();
        transcript.record_exchange("look", "You see a door.");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries[0].role, TranscriptRole::User);
        assert_eq!(transcript.entries[1].text, "You see a door.");
    }

    #[test]
    fn test_transcript_messages_alternate_roles() {
        let mut transcript = Transcript::with_system("rules");
        transcript.record_exchange("setup", "opening");
        let messages = transcript.to_messages(Some("open the door"));

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::user("setup"));
        assert_eq!(messages[1], Message::assistant("opening"));
        assert_eq!(messages[2], Message::user("open the door"));
    }

    #[test]
    fn test_config_defaults() {
        let config = NarratorConfig::default();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.temperature, Some(0.8));
        assert!(config.model.is_none());
    }

    #[test]
    fn test_request_carries_config_and_system() {
        let narrator = ClaudeNarrator::with_config(
            Claude::new("test-key"),
            NarratorConfig::default()
                .with_model("claude-test")
                .with_max_tokens(512),
        );
        let mut transcript = Transcript::with_system("rules");
        transcript.record_exchange("setup", "opening");

        let request = narrator.request(&transcript, "wait");
        assert_eq!(request.model.as_deref(), Some("claude-test"));
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.system.as_deref(), Some("rules"));
        assert_eq!(request.messages.len(), 3);
    }

    #[test]
    fn test_setup_prompt_lists_settings() {
        let settings = GameSettings::new("Sunken city", "A diver").with_narrative_style("Noir");
        let prompt = setup_prompt(&settings);
        assert!(prompt.contains("Setting: Sunken city"));
        assert!(prompt.contains("Character description: A diver"));
        assert!(prompt.contains("Narrative style: Noir"));

        let ru = setup_prompt(&settings.with_language(Language::Ru));
        assert!(ru.contains("Сеттинг: Sunken city"));
        assert!(ru.contains("Стиль повествования: Noir"));
    }

    #[test]
    fn test_system_prompt_describes_gamedata() {
        for language in Language::all() {
            assert!(system_prompt(language).contains("<gamedata>"));
        }
    }

    #[test]
    fn test_transcript_rehydrates_from_its_serialized_form() {
        let narrator = ClaudeNarrator::new(Claude::new("test-key"));
        let mut transcript = Transcript::with_system("rules");
        transcript.record_exchange("setup", "opening");

        let saved = narrator.serialize_transcript(&transcript).unwrap();
        assert_eq!(narrator.rehydrate_session(saved).unwrap(), transcript);
        assert!(matches!(
            narrator.rehydrate_session(serde_json::json!(42)),
            Err(NarratorError::InvalidTranscript(_))
        ));
    }

    #[tokio::test]
    async fn test_continue_without_start_is_rejected() {
        let narrator = ClaudeNarrator::new(Claude::new("test-key"));
        let result = narrator.continue_session(&Transcript::new(), "look").await;
        assert!(matches!(result, Err(NarratorError::NotStarted)));
    }
}
