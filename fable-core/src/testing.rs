//! Testing utilities for the turn engine.
//!
//! This module provides tools for integration testing:
//! - `MockNarrator` for deterministic narration without API calls
//! - `MockIllustrator` for instant, recorded image requests
//! - `TestHarness` for scripted game scenarios

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::illustrate::{AssetRef, IllustrationError, Illustrator, ImagePrompt, ImageSubject};
use crate::narrator::{FragmentStream, Narrator, NarratorError, Transcript};
use crate::session::{GameSession, SessionError, TurnOutcome};
use crate::settings::GameSettings;

/// A scripted response from the mock narrator.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Fragments to stream, in order.
    pub fragments: Vec<String>,
    /// Fail the stream after the fragments instead of finishing it.
    pub fail: bool,
}

impl MockResponse {
    /// A response streamed as a single fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![text.into()],
            fail: false,
        }
    }

    /// A response streamed as several fragments.
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail: false,
        }
    }

    /// A stream that yields these fragments and then fails.
    pub fn failing_after<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail: true,
            ..Self::fragments(fragments)
        }
    }
}

#[derive(Default)]
struct MockState {
    opening: String,
    responses: VecDeque<MockResponse>,
    answers: VecDeque<String>,
    dispatched: Vec<String>,
    questions: Vec<String>,
    fail_next_start: bool,
}

/// A narrator that returns scripted responses.
///
/// Every action it receives is recorded, including any random event
/// directive appended to it.
pub struct MockNarrator {
    state: Mutex<MockState>,
}

impl MockNarrator {
    /// Create a mock whose adventures open with `opening`.
    pub fn new(opening: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState {
                opening: opening.into(),
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a response to the queue.
    pub fn queue_response(&self, response: MockResponse) {
        self.state().responses.push_back(response);
    }

    /// Add an answer for `ask`.
    pub fn queue_answer(&self, answer: impl Into<String>) {
        self.state().answers.push_back(answer.into());
    }

    /// Change the opening used by later `start_session` calls.
    pub fn set_opening(&self, opening: impl Into<String>) {
        self.state().opening = opening.into();
    }

    /// Make the next `start_session` call fail.
    pub fn fail_next_start(&self) {
        self.state().fail_next_start = true;
    }

    /// Every action text sent through `continue_session`, in order.
    pub fn dispatched(&self) -> Vec<String> {
        self.state().dispatched.clone()
    }

    /// Every question sent through `ask`, in order.
    pub fn questions(&self) -> Vec<String> {
        self.state().questions.clone()
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    async fn start_session(
        &self,
        settings: &GameSettings,
    ) -> Result<(Transcript, String), NarratorError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_start) {
            return Err(NarratorError::Stream("scripted start failure".to_string()));
        }

        let mut transcript = Transcript::with_system("mock rules");
        transcript.record_exchange(format!("setup: {}", settings.setting), state.opening.clone());
        Ok((transcript, state.opening.clone()))
    }

    async fn continue_session(
        &self,
        _transcript: &Transcript,
        action: &str,
    ) -> Result<FragmentStream, NarratorError> {
        let mut state = self.state();
        state.dispatched.push(action.to_string());
        let response = state
            .responses
            .pop_front()
            .unwrap_or_else(|| MockResponse::text("The narrator has no more scripted responses."));

        let mut items: Vec<Result<String, NarratorError>> =
            response.fragments.into_iter().map(Ok).collect();
        if response.fail {
            items.push(Err(NarratorError::Stream("scripted stream failure".to_string())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn ask(&self, _transcript: &Transcript, question: &str) -> Result<String, NarratorError> {
        let mut state = self.state();
        state.questions.push(question.to_string());
        Ok(state
            .answers
            .pop_front()
            .unwrap_or_else(|| "The game master shrugs.".to_string()))
    }
}

/// An illustrator that answers instantly with predictable references.
#[derive(Default)]
pub struct MockIllustrator {
    prompts: Mutex<Vec<ImagePrompt>>,
    fail: bool,
}

impl MockIllustrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An illustrator whose every request fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<ImagePrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The reference produced for a subject.
    pub fn asset_for(subject: &ImageSubject) -> AssetRef {
        match subject {
            ImageSubject::Portrait(name) => AssetRef::new(format!("mock://portrait/{name}")),
            ImageSubject::Scene(index) => AssetRef::new(format!("mock://scene/{index}")),
            ImageSubject::Map => AssetRef::new("mock://map"),
        }
    }
}

#[async_trait]
impl Illustrator for MockIllustrator {
    async fn generate(&self, prompt: &ImagePrompt) -> Result<AssetRef, IllustrationError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());
        if self.fail {
            return Err(IllustrationError::Failed("scripted failure".to_string()));
        }
        Ok(Self::asset_for(&prompt.subject))
    }
}

/// Test harness for running game scenarios.
pub struct TestHarness {
    /// The mock narrator, shared with the session.
    pub narrator: Arc<MockNarrator>,
    /// The mock illustrator, shared with the session.
    pub illustrator: Arc<MockIllustrator>,
    /// The session under test.
    pub session: GameSession,
}

impl TestHarness {
    /// Settings used when a test does not care.
    pub fn default_settings() -> GameSettings {
        GameSettings::new("Test Realm", "Test Hero")
    }

    /// Start a session that opens with `opening`.
    pub async fn start(opening: &str) -> Self {
        Self::with_settings(opening, Self::default_settings()).await
    }

    /// Start a session with custom settings.
    pub async fn with_settings(opening: &str, settings: GameSettings) -> Self {
        Self::with_illustrator(opening, settings, MockIllustrator::new()).await
    }

    /// Start a session with a specific illustrator.
    pub async fn with_illustrator(
        opening: &str,
        settings: GameSettings,
        illustrator: MockIllustrator,
    ) -> Self {
        let narrator = Arc::new(MockNarrator::new(opening));
        let illustrator = Arc::new(illustrator);
        let session = match GameSession::start(narrator.clone(), illustrator.clone(), settings).await
        {
            Ok(session) => session,
            Err(e) => panic!("mock session failed to start: {e}"),
        };

        Self {
            narrator,
            illustrator,
            session,
        }
    }

    /// Queue a single-fragment response.
    pub fn expect_text(&self, text: impl Into<String>) -> &Self {
        self.narrator.queue_response(MockResponse::text(text));
        self
    }

    /// Queue a scripted response.
    pub fn expect_response(&self, response: MockResponse) -> &Self {
        self.narrator.queue_response(response);
        self
    }

    /// Send player input and get the outcome.
    pub async fn input(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.session.submit_action(text).await
    }

    /// Actions left before the next random event.
    pub fn remaining(&self) -> u32 {
        self.session.counter().remaining()
    }

    /// A character attribute by name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.session.status().attribute(key)
    }

    /// Every action text the narrator received.
    pub fn dispatched(&self) -> Vec<String> {
        self.narrator.dispatched()
    }
}
