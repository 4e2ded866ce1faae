use thiserror::Error;

pub const UNCONFIGURED_MESSAGE: &str =
    "Supabase is not configured yet. Add environment variables to enable cloud ratings.";
pub const LIVE_FEED_MESSAGE: &str = "Live updates are unavailable right now.";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Store returned no row for the insert")]
    EmptyResponse,
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    #[error("Realtime connection failed: {0}")]
    Realtime(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("comment is empty")]
    EmptyComment,
    #[error("comment is longer than {max} characters")]
    CommentTooLong { max: usize },
    #[error("name is longer than {max} characters")]
    NameTooLong { max: usize },
    #[error("score {0} is outside 1..=5")]
    ScoreOutOfRange(u8),
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback store is not configured")]
    NotConfigured,
    #[error("Failed to load ratings: {0}")]
    Load(#[source] StoreError),
    #[error("Failed to submit rating: {0}")]
    Submit(#[source] StoreError),
    #[error("Invalid rating: {0}")]
    Validation(#[from] ValidationError),
}

impl FeedbackError {
    /// Text shown next to the roster when this error is surfaced.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured => {
                "Supabase is not configured yet. Ratings cannot be submitted.".to_string()
            }
            Self::Load(_) => {
                "Unable to load ratings right now. Please try again in a moment.".to_string()
            }
            Self::Submit(_) => "Unable to submit your rating right now. Please try again.".to_string(),
            Self::Validation(ValidationError::EmptyComment) => {
                "Please add your comment before submitting your rating.".to_string()
            }
            Self::Validation(ValidationError::CommentTooLong { max }) => {
                format!("Please keep your comment to {} characters or fewer.", max)
            }
            Self::Validation(ValidationError::NameTooLong { max }) => {
                format!("Please keep your name to {} characters or fewer.", max)
            }
            Self::Validation(ValidationError::ScoreOutOfRange(_)) => {
                "Please pick a rating between 1 and 5 stars.".to_string()
            }
        }
    }
}
