//! Seams to the messaging transport.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Opaque identity of the externally-owned status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The surface already showed this text.
    Unchanged,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("edit rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SurfaceEditor: Send + Sync {
    /// Replaces the text of `surface` and re-attaches the control keyboard.
    async fn edit_status(&self, surface: SurfaceId, text: &str) -> Result<EditOutcome, SurfaceError>;
}

/// Delivers the outcome of one user action back to that user.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, text: &str) -> Result<()>;
}
