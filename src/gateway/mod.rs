use reqwest::Client;
use serde_json::{json, Value};
use tracing::error;

use crate::errors::AppError;
use crate::media;
use crate::models::HistoryTurn;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEXT_MODEL: &str = "gemini-3-flash-preview";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const TEMPERATURE: f64 = 0.9;
const ERROR_BODY_MAX_CHARS: usize = 300;

const PREAMBLE: &str = "You are MK AI, an ultra-advanced AI smarter than ChatGPT and Gemini. \
                        You are witty, powerful, and intelligent. \
                        You perfectly understand English, Hindi, and Hinglish. \
                        Handle broken or casual language with ease. \
                        If a user asks for an image, respond with \"GENERATING_IMAGE: [improved prompt]\". \
                        Otherwise, provide a human-like, deep response. \
                        Your creator is Mohtashim Khan.";

/// The two calls the orchestrator needs from the hosted model. Implemented
/// by [`GeminiService`]; tests script their own implementation. Callers
/// stay generic over the gateway, so no boxed futures are needed.
#[allow(async_fn_in_trait)]
pub trait ModelGateway: Send + Sync {
    /// One chat turn: replays `history` as context, sends `prompt` as the
    /// final user turn with the optional inline image attached to it, and
    /// returns the raw reply text (possibly empty).
    async fn generate_reply(
        &self,
        prompt: &str,
        history: &[HistoryTurn],
        attached_image: Option<&str>,
    ) -> Result<String, AppError>;

    /// One image generation from a bare prompt. `Ok(None)` means the call
    /// succeeded but produced no image part, which is a valid outcome,
    /// distinct from a transport failure.
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>, AppError>;
}

/// Stateless adapter for the hosted generative-language service. A fresh
/// request is built per call; conversation state lives in the store.
#[derive(Clone)]
pub struct GeminiService {
    client: Client,
    api_base: String,
    api_key: String,
}

impl GeminiService {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.api_base)
    }

    async fn post_generate(&self, model: &str, payload: &Value) -> Result<Value, AppError> {
        let response = self
            .client
            .post(self.endpoint_for_model(model))
            .query(&[("key", self.api_key.as_str())])
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Request to model {model} failed: {e}");
                AppError::service(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(AppError::service)?;
        if !status.is_success() {
            error!("Model {model} returned {status}: {}", truncate(&body, ERROR_BODY_MAX_CHARS));
            return Err(AppError::Service {
                message: format!("{status}: {}", truncate(&body, ERROR_BODY_MAX_CHARS)),
            });
        }
        serde_json::from_str(&body).map_err(AppError::service)
    }
}

impl ModelGateway for GeminiService {
    async fn generate_reply(
        &self,
        prompt: &str,
        history: &[HistoryTurn],
        attached_image: Option<&str>,
    ) -> Result<String, AppError> {
        let payload = build_reply_payload(prompt, history, attached_image);
        let response = self.post_generate(TEXT_MODEL, &payload).await?;
        Ok(extract_text(&response))
    }

    async fn generate_image(&self, prompt: &str) -> Result<Option<String>, AppError> {
        let payload = build_image_payload(prompt);
        let response = self.post_generate(IMAGE_MODEL, &payload).await?;
        Ok(extract_inline_image(&response))
    }
}

/// Builds the `generateContent` payload for a chat turn. History turns are
/// role-mapped for the wire; the attached image, when present, becomes an
/// extra part on the final user turn only.
fn build_reply_payload(prompt: &str, history: &[HistoryTurn], attached_image: Option<&str>) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.wire_label(),
                "parts": [{ "text": turn.content }],
            })
        })
        .collect();

    let mut parts = vec![json!({ "text": prompt })];
    if let Some(uri) = attached_image {
        let (mime, data) = media::split_data_uri(uri);
        parts.push(json!({
            "inlineData": { "mimeType": mime, "data": data },
        }));
    }
    contents.push(json!({ "role": "user", "parts": parts }));

    json!({
        "contents": contents,
        "systemInstruction": { "parts": [{ "text": PREAMBLE }] },
        "generationConfig": { "temperature": TEMPERATURE },
    })
}

fn build_image_payload(prompt: &str) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    })
}

/// Concatenated text parts of the first candidate; empty when the response
/// carries no text.
fn extract_text(response: &Value) -> String {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// First inline image payload of the first candidate, as a displayable
/// `data:` URI. Tolerates both key spellings the service has used.
fn extract_inline_image(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)?;

    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Some(format!("data:{mime};base64,{data}"));
    }
    None
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let head: String = value.chars().take(max_chars).collect();
    format!("{head}…")
}
