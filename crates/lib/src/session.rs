//! Conversation mode for generated replies.
//!
//! In single-shot mode every prompt is sent alone. In shared-chat mode one history is kept
//! for the whole process (not per user). The history lock is held only to snapshot and to
//! append, never across the model call, so concurrent messages do not wait on each other.

use crate::dispatch::compose_prompt;
use crate::llm::{Content, GeminiError, TextGenerator};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    /// Fresh prompt per message; no state between requests.
    #[default]
    SingleShot,
    /// One process-wide history shared by every user.
    SharedChat,
}

/// Process-wide chat history, bounded to the most recent turns.
///
/// Stored user turns hold the raw user text; the persona is added only to the turn being sent.
pub struct SharedChat {
    history: Mutex<Vec<Content>>,
    max_turns: usize,
}

impl SharedChat {
    pub fn new(max_turns: usize) -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            max_turns: max_turns.max(1),
        }
    }

    /// Send `user_text` (with the persona) after a snapshot of the stored history.
    /// The exchange is appended only when the model answers.
    pub async fn send(
        &self,
        generator: &dyn TextGenerator,
        persona: &str,
        user_text: &str,
    ) -> Result<String, GeminiError> {
        let mut contents = self.history.lock().await.clone();
        contents.push(Content::user(compose_prompt(persona, user_text)));
        let reply = generator.generate(&contents).await?;

        let mut history = self.history.lock().await;
        history.push(Content::user(user_text));
        history.push(Content::model(reply.clone()));
        let keep = self.max_turns * 2;
        if history.len() > keep {
            let excess = history.len() - keep;
            history.drain(..excess);
        }
        Ok(reply)
    }

    pub async fn len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// How the dispatcher talks to the generator.
pub enum Conversation {
    SingleShot,
    Shared(SharedChat),
}

impl Conversation {
    pub fn new(mode: SessionMode, max_turns: usize) -> Self {
        match mode {
            SessionMode::SingleShot => Conversation::SingleShot,
            SessionMode::SharedChat => Conversation::Shared(SharedChat::new(max_turns)),
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            Conversation::SingleShot => SessionMode::SingleShot,
            Conversation::Shared(_) => SessionMode::SharedChat,
        }
    }

    pub async fn send(
        &self,
        generator: &dyn TextGenerator,
        persona: &str,
        user_text: &str,
    ) -> Result<String, GeminiError> {
        match self {
            Conversation::SingleShot => {
                let prompt = compose_prompt(persona, user_text);
                generator.generate(&[Content::user(prompt)]).await
            }
            Conversation::Shared(chat) => chat.send(generator, persona, user_text).await,
        }
    }
}
