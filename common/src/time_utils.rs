use std::time::Instant;
use time::OffsetDateTime;

pub fn utc_now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Whole milliseconds elapsed since `start`, as carried in wire results.
pub fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

pub fn elapsed_ns(start: Instant) -> i64 {
    start.elapsed().as_nanos() as i64
}
