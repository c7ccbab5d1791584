use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{BookingError, Engine};

fn validate_instants(start: Ms, end: Ms) -> Result<(), BookingError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::validation("timestamp out of range"));
    }
    Ok(())
}

/// Time slot window: `end` strictly after `start`, bounded length.
pub(crate) fn validate_slot_span(start: Ms, end: Ms) -> Result<Span, BookingError> {
    let span = Span::checked(start, end)
        .ok_or_else(|| BookingError::validation("end_time must be after start_time"))?;
    validate_instants(start, end)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::validation("time slot too long"));
    }
    Ok(span)
}

/// Query window for availability and conflict checks.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, BookingError> {
    let span = Span::checked(start, end)
        .ok_or_else(|| BookingError::validation("end of window must be after its start"))?;
    validate_instants(start, end)?;
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(BookingError::validation("query window too wide"));
    }
    Ok(span)
}

/// Ids of active bookings whose window overlaps `window` (half-open: touching is not overlapping).
pub fn overlapping_active<'a>(bookings: impl IntoIterator<Item = &'a Booking>, window: &Span) -> Vec<Ulid> {
    bookings
        .into_iter()
        .filter(|b| b.is_active() && b.span.overlaps(window))
        .map(|b| b.id)
        .collect()
}

/// Outcome of an advisory overlap check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub conflicting: Vec<Ulid>,
}

impl ConflictReport {
    fn from_ids(mut conflicting: Vec<Ulid>) -> Self {
        conflicting.sort();
        Self { has_conflicts: !conflicting.is_empty(), conflicting }
    }

    /// Turn a positive report into `ConflictDetected`.
    pub fn ensure_clear(self) -> Result<(), BookingError> {
        if self.has_conflicts {
            return Err(BookingError::ConflictDetected { conflicting: self.conflicting });
        }
        Ok(())
    }
}

impl Engine {
    /// Does any active booking on `resource_id` overlap `[start_time, end_time)`?
    ///
    /// Read-only and advisory: a clear report does not reserve anything, only
    /// `create_booking` admits bookings.
    pub async fn check_conflicts(
        &self,
        resource_id: Ulid,
        start_time: Ms,
        end_time: Ms,
    ) -> Result<ConflictReport, BookingError> {
        let window = validate_window(start_time, end_time)?;
        let Some(slot_ids) = self
            .store
            .read_resource(&resource_id, |row| {
                row.slots_overlapping(&window).map(|e| e.id).collect::<Vec<_>>()
            })
            .await?
        else {
            return Ok(ConflictReport::default());
        };

        let mut conflicting = Vec::new();
        for slot_id in slot_ids {
            if let Some(ids) = self
                .store
                .read_slot(&slot_id, |row| overlapping_active(&row.bookings, &window))
                .await?
            {
                conflicting.extend(ids);
            }
        }
        Ok(ConflictReport::from_ids(conflicting))
    }
}
