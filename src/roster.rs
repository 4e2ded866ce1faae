use crate::entry::{FeedbackEntry, FeedbackForm, NewFeedback};
use crate::error::{FeedbackError, LIVE_FEED_MESSAGE, UNCONFIGURED_MESSAGE};
use crate::realtime::FeedEvent;
use crate::store::FeedbackStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drops any entry sharing `incoming.id`, prepends `incoming` and re-sorts
/// newest first. The sort is stable, so on equal timestamps `incoming` leads.
pub fn merge(existing: Vec<FeedbackEntry>, incoming: FeedbackEntry) -> Vec<FeedbackEntry> {
    let id = incoming.id;
    let mut merged = Vec::with_capacity(existing.len() + 1);
    merged.push(incoming);
    merged.extend(existing.into_iter().filter(|e| e.id != id));
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Mean score rounded to one decimal, `None` for an empty roster.
pub fn average_score(entries: &[FeedbackEntry]) -> Option<f64> {
    if entries.is_empty() {
        return None;
    }
    let total: u32 = entries.iter().map(|e| u32::from(e.score)).sum();
    let mean = f64::from(total) / entries.len() as f64;
    round_to_tenth(mean)
}

/// Rounds the exact binary value of `value` half-up to one decimal, so 1.15
/// (stored as 1.1499...) gives 1.1 while an exact 4.25 gives 4.3.
fn round_to_tenth(value: f64) -> Option<f64> {
    // Scores are at least 1, so 60 places hold every digit of the f64 exactly.
    let exact = format!("{:.60}", value);
    let (whole, fraction) = exact.split_once('.')?;
    let whole: u32 = whole.parse().ok()?;
    let mut digits = fraction.bytes().map(|d| u32::from(d - b'0'));
    let tenths = digits.next()?;
    let carry = u32::from(digits.next().is_some_and(|d| d >= 5));
    Some(f64::from(whole * 10 + tenths + carry) / 10.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterSnapshot {
    pub entries: Vec<FeedbackEntry>,
    pub average: Option<f64>,
    pub loading: bool,
    pub submitting: bool,
    pub message: Option<String>,
    pub configured: bool,
}

/// Single owner of the roster. Every mutation publishes a fresh snapshot.
pub struct RosterService {
    store: Option<Arc<dyn FeedbackStore>>,
    limit: usize,
    entries: Vec<FeedbackEntry>,
    loading: bool,
    submitting: bool,
    message: Option<String>,
    feed_closed: bool,
    notify: watch::Sender<RosterSnapshot>,
}

impl RosterService {
    pub fn new(store: Option<Arc<dyn FeedbackStore>>, limit: usize) -> Self {
        let configured = store.is_some();
        let message = (!configured).then(|| UNCONFIGURED_MESSAGE.to_string());
        let initial = RosterSnapshot {
            entries: Vec::new(),
            average: None,
            loading: configured,
            submitting: false,
            message: message.clone(),
            configured,
        };
        let (notify, _) = watch::channel(initial);

        Self {
            store,
            limit,
            entries: Vec::new(),
            loading: configured,
            submitting: false,
            message,
            feed_closed: false,
            notify,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn average_score(&self) -> Option<f64> {
        average_score(&self.entries)
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            entries: self.entries.clone(),
            average: self.average_score(),
            loading: self.loading,
            submitting: self.submitting,
            message: self.current_message(),
            configured: self.is_configured(),
        }
    }

    /// The last operation's message wins; a dead live feed shows otherwise.
    fn current_message(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.feed_closed.then(|| LIVE_FEED_MESSAGE.to_string()))
    }

    /// Receiver that is marked changed after every roster mutation.
    pub fn watch(&self) -> watch::Receiver<RosterSnapshot> {
        self.notify.subscribe()
    }

    fn publish(&self) {
        self.notify.send_replace(self.snapshot());
    }

    fn set_message(&mut self, message: Option<String>) {
        self.message = message;
        self.publish();
    }

    pub async fn load_initial(&mut self) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        let Some(store) = self.store.clone() else {
            return Err(FeedbackError::NotConfigured);
        };

        self.loading = true;
        self.publish();

        let result = store.recent(self.limit).await;
        self.loading = false;

        match result {
            Ok(rows) => {
                let total = rows.len();
                let mut rows: Vec<FeedbackEntry> =
                    rows.into_iter().filter(|e| e.has_valid_score()).collect();
                if rows.len() != total {
                    warn!("Dropped {} ratings with out-of-range scores", total - rows.len());
                }
                rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                info!("Loaded {} ratings", rows.len());
                self.entries = rows.clone();
                self.set_message(None);
                Ok(rows)
            }
            Err(e) => {
                let err = FeedbackError::Load(e);
                warn!("{}", err);
                self.set_message(Some(err.user_message()));
                Err(err)
            }
        }
    }

    pub async fn submit(
        &mut self,
        author: &str,
        score: u8,
        comment: &str,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let Some(store) = self.store.clone() else {
            let err = FeedbackError::NotConfigured;
            self.set_message(Some(err.user_message()));
            return Err(err);
        };

        let payload = match NewFeedback::validate(author, score, comment) {
            Ok(payload) => payload,
            Err(e) => {
                let err = FeedbackError::from(e);
                self.set_message(Some(err.user_message()));
                return Err(err);
            }
        };

        self.submitting = true;
        self.message = None;
        self.publish();

        let result = store.insert(payload).await;
        self.submitting = false;

        match result {
            Ok(entry) => {
                info!("Rating {} submitted", entry.id);
                self.entries = merge(std::mem::take(&mut self.entries), entry.clone());
                self.publish();
                Ok(entry)
            }
            Err(e) => {
                let err = FeedbackError::Submit(e);
                warn!("{}", err);
                self.set_message(Some(err.user_message()));
                Err(err)
            }
        }
    }

    /// Submits the form and clears it, but only when the store accepted the row.
    pub async fn submit_form(
        &mut self,
        form: &mut FeedbackForm,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let entry = self.submit(&form.name, form.rating, &form.comment).await?;
        form.reset();
        Ok(entry)
    }

    /// Applies a row pushed by the live feed. Malformed rows never reach the roster.
    pub fn on_remote_insert(&mut self, record: serde_json::Value) {
        if record.get("id").and_then(serde_json::Value::as_i64).is_none() {
            debug!("Ignoring live insert without an integer id");
            return;
        }

        let entry: FeedbackEntry = match serde_json::from_value(record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring undecodable live insert: {}", e);
                return;
            }
        };

        if !entry.has_valid_score() {
            warn!("Ignoring live insert {} with score {}", entry.id, entry.score);
            return;
        }

        debug!("Live insert {}", entry.id);
        self.entries = merge(std::mem::take(&mut self.entries), entry);
        self.publish();
    }

    /// Records that the live feed stopped. The roster keeps what it has.
    pub fn on_feed_closed(&mut self, reason: &str) {
        warn!("Live feed closed: {}", reason);
        self.feed_closed = true;
        self.publish();
    }

    pub fn apply_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Insert(record) => self.on_remote_insert(record),
            FeedEvent::Closed(reason) => self.on_feed_closed(&reason),
        }
    }
}
