use tokio::sync::watch;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::gateway::ModelGateway;
use crate::interpreter::{interpret_reply, ReplyAction};
use crate::media::{self, watermark};
use crate::models::{ChatMessage, Submission, SubmitOutcome};
use crate::speech::VoiceIo;
use crate::store::history_store::HistoryStore;

const MAX_MESSAGE_LENGTH: usize = 8000;
const HISTORY_WINDOW: usize = 10;

/// Appended in place of a reply when the model call fails; never spoken.
const GLITCH_REPLY: &str =
    "I faced a temporary glitch, but my power remains absolute. Please try again.";

/// Drives one submission end to end: optimistic user append, model call,
/// reply routing, optional image generation plus watermark, store updates
/// and playback. `Idle → Sending → Idle` per submission, with the `Sending`
/// flag published on a watch channel for the shell's composing indicator.
pub struct ConversationService<G: ModelGateway> {
    store: HistoryStore,
    gateway: G,
    voice: VoiceIo,
    composing: watch::Sender<bool>,
}

impl<G: ModelGateway> ConversationService<G> {
    pub fn new(store: HistoryStore, gateway: G, voice: VoiceIo) -> Self {
        let (composing, _) = watch::channel(false);
        Self { store, gateway, voice, composing }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Subscribes to the composing indicator. `true` while a submission's
    /// remote exchange is in flight.
    pub fn composing(&self) -> watch::Receiver<bool> {
        self.composing.subscribe()
    }

    /// Handles one user submission. An empty submission is a no-op; an
    /// accepted one appends the user message before any remote call is made
    /// and always leaves the composing flag cleared, whatever the outcome.
    pub async fn submit(&self, submission: Submission) -> Result<Option<SubmitOutcome>, AppError> {
        if submission.is_empty() {
            return Ok(None);
        }
        if submission.text.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: submission.text.len(),
            });
        }

        let user_message = self
            .store
            .append(ChatMessage::user(submission.text, submission.image))
            .await?;

        self.composing.send_replace(true);
        let exchanged = self.run_exchange(&user_message).await;
        self.composing.send_replace(false);

        let assistant_message = match exchanged {
            Ok(reply) => reply,
            Err(err) if err.is_service() => {
                error!("Model exchange failed: {err}");
                let glitch = self.store.append(ChatMessage::assistant(GLITCH_REPLY.to_string())).await?;
                Some(glitch)
            }
            Err(err) => return Err(err),
        };

        Ok(Some(SubmitOutcome { user_message, assistant_message }))
    }

    /// Clears the conversation and its persisted copy.
    pub async fn reset(&self) -> Result<(), AppError> {
        self.store.clear().await
    }

    async fn run_exchange(&self, user_message: &ChatMessage) -> Result<Option<ChatMessage>, AppError> {
        let history = self.store.window(HISTORY_WINDOW, &user_message.id).await;
        let raw = self
            .gateway
            .generate_reply(&user_message.content, &history, user_message.image.as_deref())
            .await?;

        match interpret_reply(&raw) {
            ReplyAction::Say(text) => {
                let message = self.store.append(ChatMessage::assistant(text)).await?;
                self.voice.speak(&message.content);
                Ok(Some(message))
            }
            ReplyAction::GenerateImage(image_prompt) => {
                let Some(raster) = self.gateway.generate_image(&image_prompt).await? else {
                    warn!("Image model produced nothing for prompt: {image_prompt}");
                    return Ok(None);
                };
                let caption = format!("Master, here is the image for: \"{image_prompt}\"");
                let message = self
                    .store
                    .append(ChatMessage::assistant_with_image(caption, watermark_data_uri(&raster)))
                    .await?;
                self.voice.speak(&message.content);
                Ok(Some(message))
            }
        }
    }
}

fn watermark_data_uri(uri: &str) -> String {
    match media::decode_data_uri(uri) {
        Some(bytes) => media::encode_data_uri("image/png", &watermark::apply(&bytes)),
        None => uri.to_string(),
    }
}
