pub mod config;
pub mod entry;
pub mod error;
pub mod realtime;
pub mod render;
pub mod roster;
pub mod store;

pub use entry::{FeedbackEntry, FeedbackForm, NewFeedback};
pub use error::{FeedbackError, StoreError, ValidationError};
pub use roster::{RosterService, RosterSnapshot, average_score, merge};
