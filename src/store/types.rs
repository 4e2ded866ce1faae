use crate::entry::{FeedbackEntry, NewFeedback};
use crate::error::StoreError;
use async_trait::async_trait;

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Most recent rows, newest first, at most `limit` of them.
    async fn recent(&self, limit: usize) -> Result<Vec<FeedbackEntry>, StoreError>;
    /// Inserts one row and returns it as stored.
    async fn insert(&self, feedback: NewFeedback) -> Result<FeedbackEntry, StoreError>;
}
