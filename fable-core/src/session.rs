//! GameSession - the primary public API for playing a story.
//!
//! The session owns every piece of game state: the visible turns, the
//! character sheet, the journal, the NPC roster, the random event counter and
//! the narrator transcript. Nothing else mutates them. One action is in flight
//! at a time; `&mut self` on every mutating call enforces that.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::counter::{CounterTick, EventCounter};
use crate::extract::{self, Extraction};
use crate::illustrate::{AssetRef, ImagePrompt, ImageQueue, ImageSubject, ImageUpdate, Illustrator};
use crate::narrator::{self, Narrator, NarratorError, Transcript};
use crate::persist::{self, PersistError, SaveStore, SavedSession, SAVE_VERSION};
use crate::settings::{GameSettings, Language};
use crate::state::{CharacterStatus, Journal, NpcIntro, NpcRoster};
use crate::stream::{self, Delivery};
use crate::turn::{ActionKind, Turn};

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Narrator error: {0}")]
    Narrator(#[from] NarratorError),

    #[error("Action is empty")]
    EmptyAction,

    #[error("Save error: {0}")]
    Persist(#[from] PersistError),
}

/// What a completed action changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub kind: ActionKind,

    /// Text shown for the narrator turn.
    pub narrative: String,

    /// Journal note added this turn.
    pub journal_entry: Option<String>,

    /// Names of NPCs met for the first time.
    pub new_npcs: Vec<String>,

    /// Whether the character sheet was updated.
    pub status_updated: bool,

    /// Whether a random event directive was sent with the action.
    pub random_event: bool,
}

/// The current scene illustration and the turn it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SceneImage {
    turn_index: usize,
    image: AssetRef,
}

/// A story in progress.
pub struct GameSession {
    narrator: Arc<dyn Narrator>,
    images: ImageQueue,
    settings: GameSettings,
    turns: Vec<Turn>,
    status: CharacterStatus,
    counter: EventCounter,
    journal: Journal,
    npcs: NpcRoster,
    transcript: Transcript,
    scene: Option<SceneImage>,
    map: Option<AssetRef>,
}

impl GameSession {
    /// Start a new adventure.
    pub async fn start(
        narrator: Arc<dyn Narrator>,
        illustrator: Arc<dyn Illustrator>,
        settings: GameSettings,
    ) -> Result<Self, SessionError> {
        let (transcript, opening) = narrator.start_session(&settings).await?;

        let mut session = Self {
            narrator,
            images: ImageQueue::new(illustrator),
            counter: EventCounter::new(settings.event_timer),
            settings,
            turns: Vec::new(),
            status: CharacterStatus::default(),
            journal: Journal::new(),
            npcs: NpcRoster::new(),
            transcript,
            scene: None,
            map: None,
        };

        let mut extraction = extract::parse(&opening);
        session.turns.push(Turn::narrator(extraction.narrative.clone()));
        session.apply_world_blocks(&mut extraction);
        session.request_scene(0);
        session.images.request(ImagePrompt::map(&session.settings));

        tracing::info!(
            setting = %session.settings.setting,
            npcs = session.npcs.len(),
            "adventure started"
        );
        Ok(session)
    }

    /// Submit a player action and wait for the full response.
    pub async fn submit_action(&mut self, action: &str) -> Result<TurnOutcome, SessionError> {
        self.submit_action_streaming(action, |_| {}).await
    }

    /// Submit a player action, passing narrative fragments to `on_fragment`
    /// as they arrive.
    ///
    /// Fragments are only delivered for world-advancing actions; status
    /// reports are buffered so raw markup never reaches the player.
    pub async fn submit_action_streaming<F>(
        &mut self,
        action: &str,
        on_fragment: F,
    ) -> Result<TurnOutcome, SessionError>
    where
        F: FnMut(&str),
    {
        let action = action.trim();
        if action.is_empty() {
            return Err(SessionError::EmptyAction);
        }

        let kind = ActionKind::classify(action);
        let counter_before = self.counter;
        let mut dispatched = action.to_string();
        let mut random_event = false;

        if !kind.is_meta() {
            if let CounterTick::Triggered = self.counter.advance() {
                random_event = true;
                dispatched.push_str("\n\n");
                dispatched.push_str(self.settings.language.random_event_directive());
            }
        }

        self.turns.push(Turn::player(action));
        self.turns.push(Turn::narrator(""));
        let placeholder = self.turns.len() - 1;

        let raw = match self
            .stream_response(kind, &dispatched, placeholder, on_fragment)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.turns.truncate(placeholder - 1);
                self.counter = counter_before;
                tracing::warn!(error = %e, "action failed; turn rolled back");
                return Err(e.into());
            }
        };

        self.transcript.record_exchange(dispatched, raw.as_str());
        let mut extraction = extract::parse(&raw);
        let mut outcome = TurnOutcome {
            kind,
            narrative: extraction.narrative.clone(),
            journal_entry: None,
            new_npcs: Vec::new(),
            status_updated: false,
            random_event,
        };
        self.turns[placeholder].text = outcome.narrative.clone();

        match kind {
            ActionKind::Meta => {
                let update = extraction
                    .take_status()
                    .or_else(|| extract::parse_plain_status(&extraction.narrative));
                if let Some(update) = update {
                    self.status.apply_status(update);
                    outcome.status_updated = true;
                }
            }
            ActionKind::World => {
                let applied = self.apply_world_blocks(&mut extraction);
                outcome.journal_entry = applied.journal_entry;
                outcome.new_npcs = applied.new_npcs;
                outcome.status_updated = applied.status_updated;
                self.request_scene(placeholder);
            }
        }

        tracing::info!(
            turn = placeholder,
            kind = ?kind,
            random_event,
            remaining = self.counter.remaining(),
            "turn completed"
        );
        Ok(outcome)
    }

    /// Use an inventory item, e.g. `use_item("Throw", "Torch")`.
    pub async fn use_item(&mut self, action: &str, item: &str) -> Result<TurnOutcome, SessionError> {
        self.submit_action(&format!("{} {}", action.trim(), item.trim()))
            .await
    }

    /// Ask the narrator for a full character report in the story's language.
    ///
    /// This is a meta query: the event counter does not move.
    pub async fn refresh_status(&mut self) -> Result<TurnOutcome, SessionError> {
        let command = self.settings.language.status_command();
        self.submit_action(command).await
    }

    /// Ask the game master an out-of-character question.
    ///
    /// The story, the counter and the transcript are left untouched.
    pub async fn contact_game_master(&self, question: &str) -> Result<String, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyAction);
        }
        let prompt = narrator::game_master_prompt(self.settings.language, question);
        let reply = self.narrator.ask(&self.transcript, &prompt).await?;
        Ok(extract::parse(&reply).narrative)
    }

    /// Get a short description of an inventory item.
    pub async fn describe_item(&self, item: &str) -> Result<String, SessionError> {
        let item = item.trim();
        if item.is_empty() {
            return Err(SessionError::EmptyAction);
        }
        let prompt = narrator::item_prompt(&self.settings, item);
        let reply = self.narrator.ask(&self.transcript, &prompt).await?;
        Ok(extract::parse(&reply).narrative)
    }

    /// Apply illustrations that have finished since the last call.
    ///
    /// Returns the number of results processed.
    pub fn apply_image_updates(&mut self) -> usize {
        let updates = self.images.drain();
        let count = updates.len();
        for update in updates {
            self.apply_image(update);
        }
        count
    }

    /// Wait for all outstanding illustrations and apply them.
    pub async fn wait_for_images(&mut self) -> usize {
        let updates = self.images.settle().await;
        let count = updates.len();
        for update in updates {
            self.apply_image(update);
        }
        count
    }

    /// Illustrations requested but not yet applied.
    pub fn pending_images(&self) -> usize {
        self.images.in_flight()
    }

    /// Throw the current story away and start a new one.
    ///
    /// When starting fails the current story is kept.
    pub async fn restart(&mut self, settings: GameSettings) -> Result<(), SessionError> {
        let fresh =
            Self::start(Arc::clone(&self.narrator), self.images.illustrator(), settings).await?;
        *self = fresh;
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Capture the whole session as a save document.
    pub fn snapshot(&self) -> Result<SavedSession, SessionError> {
        let transcript = self.narrator.serialize_transcript(&self.transcript)?;
        let npcs = self
            .npcs
            .iter()
            .cloned()
            .map(|mut npc| {
                npc.portrait_pending = false;
                npc
            })
            .collect();

        Ok(SavedSession {
            version: SAVE_VERSION,
            saved_at: persist::now_rfc3339(),
            turns: self.turns.clone(),
            status: self.status.clone(),
            counter: Some(self.counter),
            journal: self.journal.clone(),
            npcs,
            settings: Some(self.settings.clone()),
            language: self.settings.language,
            transcript,
            map_image: self.map.clone(),
        })
    }

    /// Rebuild a session from a save document.
    ///
    /// The transcript is rehydrated before anything else is built, so a bad
    /// save produces an error and no session. Must be called from within a
    /// tokio runtime when illustrations are enabled.
    pub fn restore(
        narrator: Arc<dyn Narrator>,
        illustrator: Arc<dyn Illustrator>,
        saved: SavedSession,
    ) -> Result<Self, SessionError> {
        let counter = saved.event_counter();
        let transcript = narrator.rehydrate_session(saved.transcript)?;
        let settings = saved.settings.unwrap_or_else(|| {
            GameSettings::new(String::new(), String::new()).with_language(saved.language)
        });

        let mut npcs = NpcRoster::from_saved(saved.npcs);
        npcs.clear_pending();

        let mut session = Self {
            narrator,
            images: ImageQueue::new(illustrator),
            settings,
            turns: saved.turns,
            status: saved.status,
            counter,
            journal: saved.journal,
            npcs,
            transcript,
            scene: None,
            map: saved.map_image,
        };

        if let Some(index) = session.turns.iter().rposition(Turn::is_narrator) {
            session.request_scene(index);
        }

        tracing::info!(turns = session.turns.len(), "session restored");
        Ok(session)
    }

    /// Write the session into the storage slot.
    pub async fn save(&self, store: &SaveStore) -> Result<PathBuf, SessionError> {
        Ok(store.save(&self.snapshot()?).await?)
    }

    /// Write the session to a standalone file.
    pub async fn export(
        &self,
        store: &SaveStore,
        path: Option<&Path>,
    ) -> Result<PathBuf, SessionError> {
        Ok(store.export(&self.snapshot()?, path).await?)
    }

    /// Replace this session with the one in the storage slot.
    ///
    /// On any error the current session is left as it was.
    pub async fn load(&mut self, store: &SaveStore) -> Result<(), SessionError> {
        let saved = store.load().await?;
        self.replace_with(saved)
    }

    /// Replace this session with the one in a save file.
    ///
    /// On any error the current session is left as it was.
    pub async fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let saved = SavedSession::load_json(path).await?;
        self.replace_with(saved)
    }

    fn replace_with(&mut self, saved: SavedSession) -> Result<(), SessionError> {
        let restored = Self::restore(Arc::clone(&self.narrator), self.images.illustrator(), saved)?;
        *self = restored;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn status(&self) -> &CharacterStatus {
        &self.status
    }

    pub fn counter(&self) -> &EventCounter {
        &self.counter
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn npcs(&self) -> &NpcRoster {
        &self.npcs
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn language(&self) -> Language {
        self.settings.language
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The latest scene illustration.
    pub fn scene(&self) -> Option<&AssetRef> {
        self.scene.as_ref().map(|s| &s.image)
    }

    /// Index of the turn the scene illustration belongs to.
    pub fn scene_turn(&self) -> Option<usize> {
        self.scene.as_ref().map(|s| s.turn_index)
    }

    pub fn map(&self) -> Option<&AssetRef> {
        self.map.as_ref()
    }

    /// Text of the most recent narrator turn.
    pub fn last_narration(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.is_narrator())
            .map(|t| t.text.as_str())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn stream_response<F>(
        &mut self,
        kind: ActionKind,
        dispatched: &str,
        placeholder: usize,
        mut on_fragment: F,
    ) -> Result<String, NarratorError>
    where
        F: FnMut(&str),
    {
        let fragments = self
            .narrator
            .continue_session(&self.transcript, dispatched)
            .await?;
        let delivery = if kind.is_meta() {
            Delivery::Buffered
        } else {
            Delivery::Live
        };

        let turn = &mut self.turns[placeholder];
        stream::ingest(fragments, delivery, |fragment| {
            turn.text.push_str(fragment);
            on_fragment(fragment);
        })
        .await
    }

    /// Reconcile the blocks of a world-advancing response.
    fn apply_world_blocks(&mut self, extraction: &mut Extraction) -> AppliedBlocks {
        let mut applied = AppliedBlocks::default();

        if let Some(note) = extraction.journal() {
            self.journal.append(note);
            applied.journal_entry = Some(note.to_string());
        }

        let intros: Vec<NpcIntro> = extraction.npcs().cloned().collect();
        applied.new_npcs = self.introduce_npcs(intros);

        if let Some(update) = extraction.take_status() {
            self.status.apply_status(update);
            applied.status_updated = true;
        }

        applied
    }

    fn introduce_npcs(&mut self, intros: Vec<NpcIntro>) -> Vec<String> {
        let added = self.npcs.add_npcs_if_new(intros);
        let language = self.settings.language;

        for name in &added {
            let Some(npc) = self.npcs.get_mut(name) else {
                continue;
            };
            let prompt = ImagePrompt::portrait(&npc.name, &npc.description, language);
            if self.images.request(prompt) {
                npc.portrait_pending = true;
            }
        }

        if !added.is_empty() {
            tracing::debug!(npcs = ?added, "npcs introduced");
        }
        added
    }

    fn request_scene(&mut self, turn_index: usize) {
        let Some(turn) = self.turns.get(turn_index) else {
            return;
        };
        if turn.text.trim().is_empty() {
            return;
        }
        let prompt = ImagePrompt::scene(turn_index, &turn.text, self.settings.language);
        self.images.request(prompt);
    }

    fn apply_image(&mut self, update: ImageUpdate) {
        let ImageUpdate { subject, result } = update;
        match subject {
            ImageSubject::Portrait(name) => {
                let Some(npc) = self.npcs.get_mut(&name) else {
                    return;
                };
                npc.portrait_pending = false;
                match result {
                    Ok(image) => npc.portrait = Some(image),
                    Err(e) => tracing::warn!(npc = %name, error = %e, "portrait failed"),
                }
            }
            ImageSubject::Scene(turn_index) => match result {
                Ok(image) => {
                    let newer = self
                        .scene
                        .as_ref()
                        .map_or(true, |current| current.turn_index <= turn_index);
                    if newer {
                        self.scene = Some(SceneImage { turn_index, image });
                    } else {
                        tracing::debug!(turn_index, "stale scene image dropped");
                    }
                }
                Err(e) => tracing::warn!(turn_index, error = %e, "scene illustration failed"),
            },
            ImageSubject::Map => match result {
                Ok(image) => self.map = Some(image),
                Err(e) => tracing::warn!(error = %e, "map illustration failed"),
            },
        }
    }
}

/// What `apply_world_blocks` changed.
#[derive(Debug, Default)]
struct AppliedBlocks {
    journal_entry: Option<String>,
    new_npcs: Vec<String>,
    status_updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::illustrate::IllustrationError;
    use crate::testing::TestHarness;

    const OPENING: &str = r#"You arrive at the gate.
<gamedata><npcs><npc name="Guard" description="Bored, armored" /></npcs></gamedata>"#;

    fn scene(turn_index: usize) -> ImageUpdate {
        ImageUpdate {
            subject: ImageSubject::Scene(turn_index),
            result: Ok(AssetRef::new(format!("scene-{turn_index}"))),
        }
    }

    #[tokio::test]
    async fn test_older_scene_never_replaces_newer() {
        let mut harness = TestHarness::start(OPENING).await;
        harness.session.wait_for_images().await;

        harness.session.apply_image(scene(5));
        harness.session.apply_image(scene(2));
        assert_eq!(harness.session.scene_turn(), Some(5));
        assert_eq!(harness.session.scene().map(AssetRef::as_str), Some("scene-5"));

        harness.session.apply_image(scene(7));
        assert_eq!(harness.session.scene_turn(), Some(7));
    }

    #[tokio::test]
    async fn test_failed_portrait_clears_pending() {
        let mut harness = TestHarness::start(OPENING).await;
        harness.session.wait_for_images().await;
        harness.session.npcs.get_mut("Guard").unwrap().portrait_pending = true;

        harness.session.apply_image(ImageUpdate {
            subject: ImageSubject::Portrait("Guard".to_string()),
            result: Err(IllustrationError::Failed("timeout".to_string())),
        });

        let guard = harness.session.npcs().get("Guard").unwrap();
        assert!(!guard.portrait_pending);
        assert!(guard.portrait.is_some());
    }

    #[tokio::test]
    async fn test_portrait_for_unknown_npc_is_ignored() {
        let mut harness = TestHarness::start(OPENING).await;
        harness.session.apply_image(ImageUpdate {
            subject: ImageSubject::Portrait("Nobody".to_string()),
            result: Ok(AssetRef::new("x")),
        });
        assert!(!harness.session.npcs().contains("Nobody"));
    }

    #[tokio::test]
    async fn test_snapshot_clears_pending_portraits() {
        let harness = TestHarness::start(OPENING).await;
        assert!(harness.session.npcs().get("Guard").unwrap().portrait_pending);

        let saved = harness.session.snapshot().unwrap();
        assert!(saved.npcs.iter().all(|npc| !npc.portrait_pending));
    }
}
