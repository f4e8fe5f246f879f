use chrono::{SecondsFormat, Utc};

/// Current wall-clock time as an ISO-8601 / RFC 3339 UTC string, the format
/// used for note timestamps, operation records and the last-sync marker.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
