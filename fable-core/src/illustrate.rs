//! Fire-and-forget illustrations: NPC portraits, scene pictures and the map.
//!
//! Image generation never blocks a turn. Each request runs as its own tokio
//! task in a join set; the session collects finished
//! results whenever it is asked to and applies them as overlays keyed by NPC
//! name or turn index.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};

use crate::settings::{GameSettings, Language};

/// Handle to a generated image (URL, data URI or file path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from an illustrator.
#[derive(Debug, Error)]
pub enum IllustrationError {
    #[error("Image generation is disabled")]
    Disabled,

    #[error("Image generation failed: {0}")]
    Failed(String),
}

/// What an image depicts, and therefore where its result lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSubject {
    /// Portrait of the NPC with this exact name.
    Portrait(String),
    /// Illustration of the narrator turn at this index.
    Scene(usize),
    /// Map of the setting.
    Map,
}

/// A request for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePrompt {
    pub subject: ImageSubject,
    pub prompt: String,
}

impl ImagePrompt {
    pub fn portrait(name: &str, description: &str, language: Language) -> Self {
        let prompt = match language {
            Language::En => format!(
                "Create a character portrait in a fantasy art style for an RPG. \
                 Character: {name}. Description: {description}. \
                 Style: realistic, detailed, focus on the face and character."
            ),
            Language::Ru => format!(
                "Создай портрет персонажа в стиле фэнтези-арта для RPG. \
                 Персонаж: {name}. Описание: {description}. \
                 Стиль: реалистичный, детальный, фокус на лице и характере."
            ),
        };
        Self {
            subject: ImageSubject::Portrait(name.to_string()),
            prompt,
        }
    }

    pub fn scene(turn_index: usize, narrative: &str, language: Language) -> Self {
        let prompt = match language {
            Language::En => format!(
                "Create a vivid, atmospheric illustration in a digital painting style \
                 that shows the following scene: {narrative}. Focus on the environment \
                 and character actions, avoid text in the image."
            ),
            Language::Ru => format!(
                "Создай яркую, атмосферную иллюстрацию в стиле цифровой живописи, \
                 которая показывает следующую сцену: {narrative}. Сконцентрируйся на \
                 окружении и действиях персонажа, избегай текста на изображении."
            ),
        };
        Self {
            subject: ImageSubject::Scene(turn_index),
            prompt,
        }
    }

    pub fn map(settings: &GameSettings) -> Self {
        let setting = &settings.setting;
        let prompt = match settings.language {
            Language::En => format!(
                "Draw a hand-drawn fantasy world map on aged parchment for this setting: \
                 {setting}. Top-down view, regions, roads and landmarks, no modern elements."
            ),
            Language::Ru => format!(
                "Нарисуй карту мира в стиле фэнтези на старом пергаменте для этого сеттинга: \
                 {setting}. Вид сверху, регионы, дороги и ориентиры, без современных элементов."
            ),
        };
        Self {
            subject: ImageSubject::Map,
            prompt,
        }
    }
}

/// An image generation backend.
#[async_trait]
pub trait Illustrator: Send + Sync {
    /// Generate one image.
    async fn generate(&self, prompt: &ImagePrompt) -> Result<AssetRef, IllustrationError>;

    /// Whether requests should be sent at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Illustrator for games played without pictures.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIllustrator;

#[async_trait]
impl Illustrator for DisabledIllustrator {
    async fn generate(&self, _prompt: &ImagePrompt) -> Result<AssetRef, IllustrationError> {
        Err(IllustrationError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// A finished image request.
#[derive(Debug)]
pub struct ImageUpdate {
    pub subject: ImageSubject,
    pub result: Result<AssetRef, IllustrationError>,
}

/// Spawns image requests and collects their results.
///
/// Dropping the queue aborts the requests still running.
pub(crate) struct ImageQueue {
    illustrator: Arc<dyn Illustrator>,
    tasks: JoinSet<ImageUpdate>,
}

impl ImageQueue {
    pub(crate) fn new(illustrator: Arc<dyn Illustrator>) -> Self {
        Self {
            illustrator,
            tasks: JoinSet::new(),
        }
    }

    pub(crate) fn illustrator(&self) -> Arc<dyn Illustrator> {
        Arc::clone(&self.illustrator)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.illustrator.is_enabled()
    }

    /// Start generating an image in the background.
    ///
    /// Returns false when illustrations are disabled and nothing was spawned.
    pub(crate) fn request(&mut self, prompt: ImagePrompt) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let illustrator = Arc::clone(&self.illustrator);
        tracing::debug!(subject = ?prompt.subject, "image requested");

        self.tasks.spawn(async move {
            let result = illustrator.generate(&prompt).await;
            ImageUpdate {
                subject: prompt.subject,
                result,
            }
        });
        true
    }

    /// Requests that have not been collected yet.
    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Results that are already available, without waiting.
    pub(crate) fn drain(&mut self) -> Vec<ImageUpdate> {
        let mut updates = Vec::new();
        while let Some(joined) = self.tasks.try_join_next() {
            collect(joined, &mut updates);
        }
        updates
    }

    /// Wait for every outstanding request to finish.
    ///
    /// A request whose task panicked is logged and produces no update.
    pub(crate) async fn settle(&mut self) -> Vec<ImageUpdate> {
        let mut updates = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            collect(joined, &mut updates);
        }
        updates
    }
}

fn collect(joined: Result<ImageUpdate, JoinError>, updates: &mut Vec<ImageUpdate>) {
    match joined {
        Ok(update) => updates.push(update),
        Err(e) => tracing::warn!(error = %e, "image task did not finish"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Illustrator for Echo {
        async fn generate(&self, prompt: &ImagePrompt) -> Result<AssetRef, IllustrationError> {
            Ok(AssetRef::new(format!("img:{:?}", prompt.subject)))
        }
    }

    #[test]
    fn test_prompts_are_localized() {
        let en = ImagePrompt::portrait("Vera", "A smith", Language::En);
        let ru = ImagePrompt::portrait("Vera", "A smith", Language::Ru);
        assert!(en.prompt.contains("Character: Vera"));
        assert!(ru.prompt.contains("Персонаж: Vera"));
        assert_eq!(en.subject, ImageSubject::Portrait("Vera".to_string()));
    }

    #[test]
    fn test_scene_prompt_carries_turn_index() {
        let prompt = ImagePrompt::scene(4, "A dark cave", Language::En);
        assert_eq!(prompt.subject, ImageSubject::Scene(4));
        assert!(prompt.prompt.contains("A dark cave"));
    }

    #[tokio::test]
    async fn test_disabled_queue_spawns_nothing() {
        let mut queue = ImageQueue::new(Arc::new(DisabledIllustrator));
        assert!(!queue.request(ImagePrompt::scene(0, "x", Language::En)));
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.settle().await.is_empty());
    }

    struct Broken;

    #[async_trait]
    impl Illustrator for Broken {
        async fn generate(&self, _prompt: &ImagePrompt) -> Result<AssetRef, IllustrationError> {
            panic!("backend crashed");
        }
    }

    #[tokio::test]
    async fn test_settle_survives_panicking_backend() {
        let mut queue = ImageQueue::new(Arc::new(Broken));
        queue.request(ImagePrompt::map(&GameSettings::new("Ruins", "Scout")));

        let updates = tokio::time::timeout(std::time::Duration::from_secs(5), queue.settle())
            .await
            .expect("settle hung on a panicked task");
        assert!(updates.is_empty());
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_settle_collects_every_result() {
        let mut queue = ImageQueue::new(Arc::new(Echo));
        queue.request(ImagePrompt::scene(0, "x", Language::En));
        queue.request(ImagePrompt::portrait("Vera", "smith", Language::En));

        let updates = queue.settle().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(queue.in_flight(), 0);
        assert!(updates.iter().all(|u| u.result.is_ok()));
    }
}
