use time::OffsetDateTime;

pub mod health;
pub mod room;
pub mod validation;
pub mod ws;

/// Current wall-clock time as Unix milliseconds, used for server-side timestamps.
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
