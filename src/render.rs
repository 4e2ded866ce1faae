use crate::entry::MAX_SCORE;
use crate::roster::RosterSnapshot;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use iana_time_zone::get_timezone;

pub const LOADING_TEXT: &str = "Loading ratings...";
pub const EMPTY_TEXT: &str = "No feedback yet. Be the first to leave a rating.";
pub const NO_RATINGS_TEXT: &str = "No ratings yet";
pub const UNCONFIGURED_BANNER: &str =
    "Add Supabase environment variables to enable live cloud ratings.";

/// Host timezone, falling back to UTC when it cannot be resolved.
pub fn local_timezone() -> Tz {
    get_timezone()
        .ok()
        .and_then(|name| name.parse().ok())
        .unwrap_or(Tz::UTC)
}

pub fn stars(score: u8) -> String {
    let filled = score.min(MAX_SCORE) as usize;
    format!(
        "{}{}",
        "★".repeat(filled),
        "☆".repeat(MAX_SCORE as usize - filled)
    )
}

pub fn format_timestamp(at: &DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz)
        .format("%b %-d, %Y, %-I:%M %p")
        .to_string()
}

pub fn summary(snapshot: &RosterSnapshot) -> String {
    match snapshot.average {
        Some(avg) => format!("Average: {:.1} / 5 ({})", avg, snapshot.entries.len()),
        None => NO_RATINGS_TEXT.to_string(),
    }
}

pub fn render(snapshot: &RosterSnapshot, tz: Tz) -> String {
    let mut out = String::new();

    if !snapshot.configured {
        out.push_str(&format!("* {}\n", UNCONFIGURED_BANNER));
    }

    if let Some(message) = &snapshot.message {
        out.push_str(&format!("! {}\n\n", message));
    }

    out.push_str(&format!("Recent Feedback  [{}]\n\n", summary(snapshot)));

    if snapshot.loading {
        out.push_str(LOADING_TEXT);
        out.push('\n');
        return out;
    }

    if snapshot.entries.is_empty() {
        out.push_str(EMPTY_TEXT);
        out.push('\n');
        return out;
    }

    for entry in &snapshot.entries {
        out.push_str(&format!("{}  {}\n", entry.author, stars(entry.score)));
        out.push_str(&format!("  {}\n", entry.comment));
        out.push_str(&format!(
            "  {}\n\n",
            format_timestamp(&entry.created_at, tz).to_uppercase()
        ));
    }

    out
}
