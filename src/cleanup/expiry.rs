use chrono::{DateTime, Utc};

use crate::config::Retention;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Expired,
    Retained,
    /// The creation time is missing or unreadable. Never deleted.
    Unknown,
}

/// ISO 8601 extended form with a colon-less offset (`+0000`), which RFC 3339
/// rejects. `%z` also takes `+00:00`, `%.f` makes the fraction optional.
const ISO_8601_COMPACT_OFFSET: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, ISO_8601_COMPACT_OFFSET))
        .ok()
        .map(|created| created.with_timezone(&Utc))
}

/// Whether a tag created at `created_at` is older than `now - retention`.
///
/// Timestamps must carry an offset: RFC 3339, or ISO 8601 with a `+hhmm`
/// offset. A naive timestamp is [`Expiry::Unknown`] rather than guessed to
/// be UTC.
pub fn is_expired(created_at: Option<&str>, retention: &Retention, now: DateTime<Utc>) -> Expiry {
    let created = match created_at.and_then(parse_timestamp) {
        Some(created) => created,
        None => return Expiry::Unknown,
    };

    match now.checked_sub_signed(retention.as_duration()) {
        Some(threshold) if created < threshold => Expiry::Expired,
        _ => Expiry::Retained,
    }
}
