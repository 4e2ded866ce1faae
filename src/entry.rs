use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;
pub const MAX_COMMENT_CHARS: usize = 500;
pub const MAX_NAME_CHARS: usize = 60;
pub const ANONYMOUS: &str = "Anonymous";

/// Column list requested on every read and insert.
pub const COLUMNS: &str = "id,name,rating,comment,created_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: i64,
    #[serde(rename = "name")]
    pub author: String,
    #[serde(rename = "rating")]
    pub score: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn has_valid_score(&self) -> bool {
        (MIN_SCORE..=MAX_SCORE).contains(&self.score)
    }
}

/// Insert payload. The store fills in `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFeedback {
    pub name: String,
    pub rating: u8,
    pub comment: String,
}

impl NewFeedback {
    /// Trims and checks user input before anything is sent to the store.
    pub fn validate(author: &str, score: u8, comment: &str) -> Result<Self, ValidationError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(ValidationError::EmptyComment);
        }
        if comment.chars().count() > MAX_COMMENT_CHARS {
            return Err(ValidationError::CommentTooLong {
                max: MAX_COMMENT_CHARS,
            });
        }

        let author = author.trim();
        if author.chars().count() > MAX_NAME_CHARS {
            return Err(ValidationError::NameTooLong {
                max: MAX_NAME_CHARS,
            });
        }

        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange(score));
        }

        Ok(Self {
            name: if author.is_empty() {
                ANONYMOUS.to_string()
            } else {
                author.to_string()
            },
            rating: score,
            comment: comment.to_string(),
        })
    }
}

/// Editable form state; reset after a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackForm {
    pub name: String,
    pub rating: u8,
    pub comment: String,
}

impl Default for FeedbackForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            rating: MAX_SCORE,
            comment: String::new(),
        }
    }
}

impl FeedbackForm {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
