//! Session persistence for save/load functionality.
//!
//! A save is a single pretty-printed JSON document holding the visible turns,
//! the derived state and the narrator transcript. Saves live either in the
//! storage slot managed by [`SaveStore`] or in standalone export files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::counter::{EventCounter, DEFAULT_EVENT_TIMER};
use crate::illustrate::AssetRef;
use crate::settings::{GameSettings, Language};
use crate::state::{CharacterStatus, Journal, Npc};
use crate::turn::Turn;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("No saved game found")]
    NoSave,
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// Top-level fields a save cannot be restored without.
const REQUIRED_FIELDS: &[&str] = &["version", "turns", "transcript"];

/// File name of the storage slot.
pub const SLOT_FILE: &str = "fable-save.json";

/// A saved session with all state needed to resume play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created (RFC 3339).
    #[serde(default)]
    pub saved_at: String,

    pub turns: Vec<Turn>,

    #[serde(default)]
    pub status: CharacterStatus,

    #[serde(default)]
    pub counter: Option<EventCounter>,

    #[serde(default)]
    pub journal: Journal,

    #[serde(default)]
    pub npcs: Vec<Npc>,

    #[serde(default)]
    pub settings: Option<GameSettings>,

    #[serde(default)]
    pub language: Language,

    /// The narrator transcript in the narrator's own serialized form.
    pub transcript: serde_json::Value,

    #[serde(default)]
    pub map_image: Option<AssetRef>,
}

impl SavedSession {
    /// The saved counter, or a fresh one from the saved timer setting.
    pub fn event_counter(&self) -> EventCounter {
        self.counter.unwrap_or_else(|| {
            let timer = self
                .settings
                .as_ref()
                .map_or(DEFAULT_EVENT_TIMER, |s| s.event_timer);
            EventCounter::new(timer)
        })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a save document.
    ///
    /// Required fields are checked before anything else, so a document from
    /// another program is reported by the field it lacks.
    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        for field in REQUIRED_FIELDS {
            if value.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(PersistError::MissingField(*field));
            }
        }

        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found,
            });
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = self.to_json()?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }
}

/// Current time for the `saved_at` field.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The directory that holds the storage slot and default exports.
#[derive(Debug, Clone)]
pub struct SaveStore {
    dir: PathBuf,
}

impl Default for SaveStore {
    fn default() -> Self {
        Self::new("saves")
    }
}

impl SaveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the storage slot.
    pub fn slot_path(&self) -> PathBuf {
        self.dir.join(SLOT_FILE)
    }

    /// Whether the storage slot holds a save.
    pub async fn has_save(&self) -> bool {
        fs::try_exists(self.slot_path()).await.unwrap_or(false)
    }

    /// Write a save into the storage slot, replacing the previous one.
    pub async fn save(&self, saved: &SavedSession) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.slot_path();
        saved.save_json(&path).await?;
        tracing::info!(path = %path.display(), turns = saved.turns.len(), "game saved");
        Ok(path)
    }

    /// Read the storage slot.
    ///
    /// A slot that cannot be parsed is moved aside to `<slot>.corrupt` so that
    /// it stops being offered for loading.
    pub async fn load(&self) -> Result<SavedSession, PersistError> {
        let path = self.slot_path();
        if !self.has_save().await {
            return Err(PersistError::NoSave);
        }

        let content = fs::read_to_string(&path).await?;
        match SavedSession::from_json(&content) {
            Ok(saved) => Ok(saved),
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                match fs::rename(&path, &aside).await {
                    Ok(()) => {
                        tracing::warn!(error = %e, path = %path.display(), "unreadable save moved aside");
                    }
                    Err(rename) => {
                        tracing::warn!(
                            error = %e,
                            rename_error = %rename,
                            path = %path.display(),
                            "unreadable save could not be moved aside"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Write a standalone save file.
    ///
    /// Without an explicit path the file goes into the store directory as
    /// `fable-save-<timestamp>.json`.
    pub async fn export(
        &self,
        saved: &SavedSession,
        path: Option<&Path>,
    ) -> Result<PathBuf, PersistError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                fs::create_dir_all(&self.dir).await?;
                self.dir.join(export_file_name())
            }
        };
        saved.save_json(&path).await?;
        tracing::info!(path = %path.display(), "game exported");
        Ok(path)
    }
}

/// Default name for an exported save.
pub fn export_file_name() -> String {
    format!(
        "fable-save-{}.json",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SavedSession {
        SavedSession {
            version: SAVE_VERSION,
            saved_at: now_rfc3339(),
            turns: vec![Turn::narrator("You wake up."), Turn::player("look")],
            status: CharacterStatus::default(),
            counter: Some(EventCounter::restore(2, 3)),
            journal: Journal::new(),
            npcs: Vec::new(),
            settings: Some(GameSettings::new("Moor", "A shepherd")),
            language: Language::En,
            transcript: serde_json::json!({"entries": []}),
            map_image: None,
        }
    }

    #[test]
    fn test_missing_required_field_is_named() {
        for field in REQUIRED_FIELDS {
            let mut value = serde_json::to_value(sample()).unwrap();
            value.as_object_mut().unwrap().remove(*field);
            let err = SavedSession::from_json(&value.to_string()).unwrap_err();
            assert!(matches!(err, PersistError::MissingField(f) if f == *field));
        }
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["version"] = serde_json::json!(7);
        let err = SavedSession::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            PersistError::VersionMismatch {
                expected: 1,
                found: 7
            }
        ));
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"version":1,"turns":[],"transcript":{"entries":[]}}"#;
        let saved = SavedSession::from_json(json).unwrap();
        assert!(saved.npcs.is_empty());
        assert_eq!(saved.language, Language::En);
        assert_eq!(saved.event_counter(), EventCounter::new(DEFAULT_EVENT_TIMER));
    }

    #[test]
    fn test_counter_falls_back_to_timer_setting() {
        let mut saved = sample();
        saved.counter = None;
        saved.settings = Some(GameSettings::new("a", "b").with_event_timer(5));
        assert_eq!(saved.event_counter(), EventCounter::new(5));
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SaveStore::new(dir.path().join("saves"));
        assert!(!store.has_save().await);
        assert!(matches!(store.load().await, Err(PersistError::NoSave)));

        let saved = sample();
        store.save(&saved).await.unwrap();
        assert!(store.has_save().await);
        assert_eq!(store.load().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_corrupt_slot_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let store = SaveStore::new(dir.path());
        tokio::fs::write(store.slot_path(), "{ not json").await.unwrap();

        assert!(matches!(store.load().await, Err(PersistError::Json(_))));
        assert!(!store.has_save().await);
        assert!(dir.path().join("fable-save.json.corrupt").exists());
    }

    #[tokio::test]
    async fn test_corrupt_slot_reports_parse_error_when_move_fails() {
        let dir = TempDir::new().unwrap();
        let store = SaveStore::new(dir.path());
        tokio::fs::write(store.slot_path(), r#"{"version":1,"transcript":[]}"#)
            .await
            .unwrap();
        // A non-empty directory in the way makes the rename fail.
        let blocker = dir.path().join("fable-save.json.corrupt");
        tokio::fs::create_dir(&blocker).await.unwrap();
        tokio::fs::write(blocker.join("keep"), "x").await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(PersistError::MissingField("turns"))
        ));
        assert!(store.has_save().await);
    }

    #[tokio::test]
    async fn test_export_uses_timestamped_name() {
        let dir = TempDir::new().unwrap();
        let store = SaveStore::new(dir.path());
        let path = store.export(&sample(), None).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("fable-save-") && name.ends_with(".json"));
        assert!(SavedSession::load_json(&path).await.is_ok());
    }
}
