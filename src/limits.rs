use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_NOTES_LEN: usize = 2048;

/// Upper bound on a single time slot's capacity.
pub const MAX_SLOT_CAPACITY: u32 = 10_000;
pub const MAX_RESOURCE_CAPACITY: u32 = 10_000;

pub const MAX_SLOTS_PER_RESOURCE: usize = 100_000;
pub const MAX_OPERATING_HOURS_ENTRIES: usize = 64;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single slot may not span more than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;
/// Availability and conflict queries are capped at roughly one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Longest request line accepted by the JSON-lines protocol.
pub const MAX_LINE_LEN: usize = 64 * 1024;
