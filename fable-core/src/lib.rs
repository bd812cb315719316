//! Turn engine for AI-narrated interactive fiction.
//!
//! This crate provides:
//! - Extraction of structured game data embedded in narrator prose
//! - A character sheet, journal and NPC roster kept in sync with the story
//! - A random event countdown that status queries never disturb
//! - Streaming turns with rollback when the narrator fails mid-response
//! - Session save/load
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fable_core::{ClaudeNarrator, DisabledIllustrator, GameSession, GameSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = Arc::new(ClaudeNarrator::from_env()?);
//!     let settings = GameSettings::new("A drowned city", "A salvage diver");
//!
//!     let mut session = GameSession::start(narrator, Arc::new(DisabledIllustrator), settings).await?;
//!
//!     let outcome = session.submit_action("I dive toward the bell tower").await?;
//!     println!("{}", outcome.narrative);
//!
//!     session.save(&fable_core::SaveStore::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod counter;
pub mod extract;
pub mod illustrate;
pub mod narrator;
pub mod persist;
pub mod session;
pub mod settings;
pub mod state;
pub mod stream;
pub mod testing;
pub mod turn;

// Primary public API
pub use counter::{CounterTick, EventCounter};
pub use extract::{Extraction, StructuredBlock};
pub use illustrate::{AssetRef, DisabledIllustrator, IllustrationError, Illustrator, ImagePrompt};
pub use narrator::{ClaudeNarrator, Narrator, NarratorConfig, NarratorError, Transcript};
pub use persist::{PersistError, SaveStore, SavedSession};
pub use session::{GameSession, SessionError, TurnOutcome};
pub use settings::{Difficulty, GameSettings, Language};
pub use state::{CharacterStatus, InventoryItem, Journal, Npc, NpcRoster, StatusUpdate};
pub use testing::{MockIllustrator, MockNarrator, MockResponse, TestHarness};
pub use turn::{ActionKind, Turn, TurnRole};
