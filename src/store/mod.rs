mod rest;
mod types;

use crate::config::Config;
pub use rest::RestStore;
use std::sync::Arc;
use tracing::{info, warn};
pub use types::FeedbackStore;

/// Checks the store precondition once. `None` means every network path stays off.
pub fn create_store(config: &Config) -> Option<Arc<dyn FeedbackStore>> {
    let Some(credentials) = config.credentials() else {
        warn!("Store URL or key missing, ratings are unavailable");
        return None;
    };

    match RestStore::new(&credentials, &config.table, config.timeout_secs) {
        Ok(store) => {
            info!("Feedback store configured ({})", credentials.url);
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!("Failed to create feedback store: {}", e);
            None
        }
    }
}
