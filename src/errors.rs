use std::path::PathBuf;

use thiserror::Error;

/// Top-level application error.
///
/// Every remote-model failure surfaces as the single [`AppError::Service`]
/// variant; callers do not branch on sub-causes. Watermark degradation and
/// an image call that produces no image are not errors and have no variant.
#[derive(Debug, Error)]
pub enum AppError {
    // ── History storage errors ───────────────────────────────────────────────
    #[error("Failed to read history file {path}: {source}")]
    HistoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history file {path}: {source}")]
    HistoryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("History file {path} is not valid JSON: {source}")]
    HistoryCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── AI service errors ────────────────────────────────────────────────────
    #[error("AI service request failed: {message}")]
    Service { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── Attachment errors ────────────────────────────────────────────────────
    #[error("Failed to read attachment {path}: {source}")]
    AttachmentUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[allow(dead_code)]
impl AppError {
    pub fn service(cause: impl std::fmt::Display) -> Self {
        AppError::Service { message: cause.to_string() }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AppError::Service { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            AppError::HistoryRead { .. }
                | AppError::HistoryWrite { .. }
                | AppError::HistoryCorrupt { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::FieldTooLong { .. })
    }
}
