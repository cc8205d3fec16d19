use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{ChatMessage, HistoryTurn};

/// Append-only conversation log, persisted as a single JSON document on the
/// client device. Every mutation is flushed before it returns; a missing
/// file on load means an empty history.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    path: PathBuf,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
}

impl HistoryStore {
    /// Opens the store, reading the persisted conversation once.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let messages: Vec<ChatMessage> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                error!("History file {} is corrupt: {e}", path.display());
                AppError::HistoryCorrupt { path: path.clone(), source: e }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!("Failed to read history {}: {e}", path.display());
                return Err(AppError::HistoryRead { path, source: e });
            }
        };
        debug!("Loaded {} persisted message(s) from {}", messages.len(), path.display());
        Ok(Self { path, messages: Arc::new(Mutex::new(messages)) })
    }

    pub async fn append(&self, message: ChatMessage) -> Result<ChatMessage, AppError> {
        let mut messages = self.messages.lock().await;
        messages.push(message.clone());
        self.flush(&messages).await?;
        Ok(message)
    }

    /// Clears the conversation and removes the persisted copy.
    pub async fn clear(&self) -> Result<(), AppError> {
        let mut messages = self.messages.lock().await;
        messages.clear();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Failed to remove history {}: {e}", self.path.display());
                Err(AppError::HistoryWrite { path: self.path.clone(), source: e })
            }
        }
    }

    pub async fn all(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// The most recent `limit` turns preceding the message with `exclude_id`,
    /// projected to `{role, content}` pairs for model context. Recomputed per
    /// call, never persisted.
    pub async fn window(&self, limit: usize, exclude_id: &str) -> Vec<HistoryTurn> {
        let messages = self.messages.lock().await;
        let turns: Vec<HistoryTurn> = messages
            .iter()
            .filter(|m| m.id != exclude_id)
            .map(HistoryTurn::from)
            .collect();
        let skip = turns.len().saturating_sub(limit);
        turns.into_iter().skip(skip).collect()
    }

    /// Latest assistant message carrying a generated image, if any.
    pub async fn last_generated_image(&self) -> Option<ChatMessage> {
        self.messages
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.generated_image.is_some())
            .cloned()
    }

    async fn flush(&self, messages: &[ChatMessage]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::HistoryWrite { path: self.path.clone(), source: e }
                })?;
            }
        }
        let json = serde_json::to_vec_pretty(messages)
            .map_err(|e| AppError::HistoryWrite { path: self.path.clone(), source: e.into() })?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            error!("Failed to write history {}: {e}", self.path.display());
            AppError::HistoryWrite { path: self.path.clone(), source: e }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn history_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("history.json")
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(history_path(&dir)).await.unwrap();
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn append_flushes_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);

        let store = HistoryStore::load(&path).await.unwrap();
        store.append(ChatMessage::user("hello".into(), None)).await.unwrap();
        store.append(ChatMessage::assistant("Hi there!".into())).await.unwrap();
        assert!(path.exists());

        let reloaded = HistoryStore::load(&path).await.unwrap();
        let messages = reloaded.all().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn clear_empties_store_and_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);

        let store = HistoryStore::load(&path).await.unwrap();
        store.append(ChatMessage::user("hello".into(), None)).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(!path.exists());

        // Clearing an already-cleared store is a no-op.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_not_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = history_path(&dir);
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = HistoryStore::load(&path).await.unwrap_err();
        assert!(matches!(err, AppError::HistoryCorrupt { .. }));
    }

    #[tokio::test]
    async fn window_caps_length_and_excludes_current_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(history_path(&dir)).await.unwrap();

        for i in 0..12 {
            store.append(ChatMessage::user(format!("m{i}"), None)).await.unwrap();
        }
        let current = store.append(ChatMessage::user("current".into(), None)).await.unwrap();

        let window = store.window(10, &current.id).await;
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().unwrap().content, "m2");
        assert_eq!(window.last().unwrap().content, "m11");
        assert!(window.iter().all(|t| t.content != "current"));
    }

    #[tokio::test]
    async fn window_projects_out_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(history_path(&dir)).await.unwrap();
        store
            .append(ChatMessage::user("look".into(), Some("data:image/jpeg;base64,AA==".into())))
            .await
            .unwrap();

        let window = store.window(10, "none").await;
        assert_eq!(window, vec![HistoryTurn { role: Role::User, content: "look".into() }]);
    }

    #[tokio::test]
    async fn last_generated_image_finds_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(history_path(&dir)).await.unwrap();
        assert!(store.last_generated_image().await.is_none());

        store
            .append(ChatMessage::assistant_with_image("first".into(), "data:,a".into()))
            .await
            .unwrap();
        store.append(ChatMessage::assistant("plain".into())).await.unwrap();
        store
            .append(ChatMessage::assistant_with_image("second".into(), "data:,b".into()))
            .await
            .unwrap();

        let found = store.last_generated_image().await.unwrap();
        assert_eq!(found.content, "second");
    }
}
