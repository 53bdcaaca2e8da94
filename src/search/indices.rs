//! Date range to physical index names

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Index names covering `[from, to]`, one per day, oldest first, without duplicates.
///
/// Coarser patterns (weekly, monthly) collapse naturally because consecutive days
/// render to the same name. The pattern must have been checked with
/// [`validate_index_pattern`](crate::search::config::validate_index_pattern).
pub fn resolve_indices(from: DateTime<Utc>, to: DateTime<Utc>, pattern: &str) -> Vec<String> {
    if from > to {
        return Vec::new();
    }

    let mut indices: Vec<String> = Vec::new();
    let last = to.date_naive();
    let mut day = from.date_naive();

    while day <= last {
        let name = index_name(day, pattern);
        if indices.last() != Some(&name) {
            indices.push(name);
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    indices
}

/// Index holding documents for the given day
pub fn index_name(day: NaiveDate, pattern: &str) -> String {
    day.format(pattern).to_string()
}

/// Indices for the `days` days ending at `now`
pub fn recent_indices(now: DateTime<Utc>, days: i64, pattern: &str) -> Vec<String> {
    resolve_indices(now - Duration::days(days), now, pattern)
}
