mod errors;
mod gateway;
mod interpreter;
mod media;
mod models;
mod service;
mod speech;
mod store;

use std::io::Write as _;
use std::path::PathBuf;

use tokio::io::AsyncBufReadExt as _;
use tracing::info;

use crate::errors::AppError;
use crate::gateway::GeminiService;
use crate::models::{ChatMessage, Role, Submission};
use crate::service::conversation_service::ConversationService;
use crate::speech::{CaptureState, DisabledSpeech, VoiceIo};
use crate::store::history_store::HistoryStore;

const SUGGESTED_PROMPTS: [&str; 4] = [
    "Generate a lion with a crown",
    "Explain quantum physics in Hinglish",
    "Analyze this image for me",
    "What is your source code?",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mk_ai=info".into()),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let api_key = std::env::var("GEMINI_API_KEY")
        .expect("GEMINI_API_KEY must be set (copy .env.example to .env)");
    let api_base = std::env::var("GEMINI_API_BASE").ok();
    let history_path = std::env::var("MK_HISTORY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_history_path());

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let store = HistoryStore::load(&history_path).await?;
    let gateway = GeminiService::new(&api_key, api_base.as_deref());
    let (voice, mut transcripts) = VoiceIo::new(Box::new(DisabledSpeech));
    let service = ConversationService::new(store, gateway, voice.clone());

    info!("Conversation history at {}", history_path.display());

    // Composing indicator, driven by the orchestrator's watch channel.
    let mut composing = service.composing();
    tokio::spawn(async move {
        while composing.changed().await.is_ok() {
            if *composing.borrow() {
                println!("MK AI is thinking...");
            }
        }
    });

    // ── Restore & greet ───────────────────────────────────────────────────────
    if service.store().len().await == 0 {
        println!("MK AI: ask me anything, attach images, or speak your mind.");
        println!("Try one of:");
        for prompt in SUGGESTED_PROMPTS {
            println!("  \"{prompt}\"");
        }
    } else {
        for message in service.store().all().await {
            render(&message);
        }
    }
    println!("Commands: /attach <path>, /save, /listen, /clear, /quit");

    // ── REPL ──────────────────────────────────────────────────────────────────
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut attachment: Option<String> = None;

    loop {
        prompt_marker(attachment.is_some());
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if let Some(path) = line.strip_prefix("/attach ") {
                    match read_attachment(path.trim()).await {
                        Ok(uri) => {
                            attachment = Some(uri);
                            println!("Attached. It rides along with your next message.");
                        }
                        Err(e) => println!("{e}"),
                    }
                    continue;
                }
                match line.as_str() {
                    "/quit" | "/exit" => break,
                    "/clear" => {
                        service.reset().await?;
                        println!("Memory cleared.");
                    }
                    "/listen" => {
                        if voice.capture_state() == CaptureState::Capturing {
                            voice.stop_capture();
                        } else {
                            voice.start_capture();
                            println!("Listening...");
                        }
                    }
                    "/save" => save_generated(&service).await,
                    _ => {
                        let submission = Submission { text: line, image: attachment.take() };
                        send(&service, submission).await;
                    }
                }
            }
            Some(transcript) = transcripts.recv() => {
                println!("(heard) {}", transcript.text);
                send(&service, Submission::text(transcript.text)).await;
            }
        }
    }

    Ok(())
}

fn default_history_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mk-ai")
        .join("history.json")
}

async fn send(service: &ConversationService<GeminiService>, submission: Submission) {
    match service.submit(submission).await {
        Ok(Some(outcome)) => {
            render(&outcome.user_message);
            if let Some(reply) = outcome.assistant_message {
                render(&reply);
            }
        }
        Ok(None) => {}
        Err(e) => println!("error: {e}"),
    }
}

fn render(message: &ChatMessage) {
    let stamp = message.timestamp.with_timezone(&chrono::Local).format("%H:%M");
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "mk",
    };
    println!("[{stamp}] {label}: {}", message.content);
    if message.image.is_some() {
        println!("        (with attached image)");
    }
    if message.generated_image.is_some() {
        println!("        (generated image attached; /save to export)");
    }
}

fn prompt_marker(has_attachment: bool) {
    let mut out = std::io::stdout();
    let _ = if has_attachment {
        write!(out, "you (+img)> ")
    } else {
        write!(out, "you> ")
    };
    let _ = out.flush();
}

async fn read_attachment(path: &str) -> Result<String, AppError> {
    let path = PathBuf::from(path);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::AttachmentUnreadable { path: path.clone(), source: e })?;
    Ok(crate::media::encode_data_uri(crate::media::mime_for_path(&path), &bytes))
}

async fn save_generated(service: &ConversationService<GeminiService>) {
    let Some(message) = service.store().last_generated_image().await else {
        println!("No generated image to save yet.");
        return;
    };
    let uri = message.generated_image.as_deref().unwrap_or_default();
    let Some(bytes) = crate::media::decode_data_uri(uri) else {
        println!("Stored image could not be decoded.");
        return;
    };
    let file_name = format!("MK_AI_Generated_{}.png", message.timestamp_millis());
    match tokio::fs::write(&file_name, bytes).await {
        Ok(()) => println!("Saved {file_name}"),
        Err(e) => println!("Failed to save {file_name}: {e}"),
    }
}
