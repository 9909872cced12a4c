//! Elapsed-age labels for node and pod tables

use chrono::{DateTime, Utc};

/// Format the time elapsed since `timestamp` as `"<H>h<M>m"`.
pub fn format_age(timestamp: &DateTime<Utc>) -> String {
    format_age_at(timestamp, &Utc::now())
}

/// Format the time elapsed between `timestamp` and `now` as `"<H>h<M>m"`.
///
/// Hours and minutes are truncated. Future timestamps render as `0h0m`.
pub fn format_age_at(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(*timestamp);
    if duration.num_seconds() <= 0 {
        return "0h0m".to_string();
    }

    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;
    format!("{}h{}m", hours, minutes)
}
