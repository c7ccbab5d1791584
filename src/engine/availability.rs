use ulid::Ulid;

use crate::model::*;

use super::conflict::validate_window;
use super::{BookingError, Engine};

/// A slot is offered when its cached flag is set AND the live active count
/// is below capacity. The count is the authority; the flag can lag.
pub fn is_bookable(slot: &TimeSlot, active: u32) -> bool {
    slot.is_available && active < slot.capacity
}

impl Engine {
    /// Bookable slots of `resource_id` lying entirely inside `[start_date, end_date]`,
    /// ordered by start time (ties by id). An unknown resource yields an empty list.
    pub async fn get_availability(
        &self,
        resource_id: Ulid,
        start_date: Ms,
        end_date: Ms,
    ) -> Result<Vec<TimeSlot>, BookingError> {
        validate_window(start_date, end_date)?;
        let Some(slot_ids) = self
            .store
            .read_resource(&resource_id, |row| {
                row.slots_within(start_date, end_date)
                    .map(|e| e.id)
                    .collect::<Vec<_>>()
            })
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut open = Vec::with_capacity(slot_ids.len());
        for slot_id in slot_ids {
            let offered = self
                .store
                .read_slot(&slot_id, |row| {
                    is_bookable(&row.slot, row.active_count()).then(|| row.slot.clone())
                })
                .await?
                .flatten();
            open.extend(offered);
        }
        Ok(open)
    }
}
