use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CANCELLED, BOOKINGS_CREATED, BOOKINGS_REJECTED};

use super::conflict::validate_slot_span;
use super::{BookingError, Engine, EntityKind};

fn check_len(field: &str, value: &str, max: usize) -> Result<(), BookingError> {
    if value.len() > max {
        return Err(BookingError::validation(format!("{field} too long")));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), BookingError> {
    if name.trim().is_empty() {
        return Err(BookingError::validation("name must not be empty"));
    }
    check_len("name", name, MAX_NAME_LEN)
}

fn check_resource_capacity(capacity: u32) -> Result<(), BookingError> {
    if capacity == 0 || capacity > MAX_RESOURCE_CAPACITY {
        return Err(BookingError::validation(format!(
            "capacity must be between 1 and {MAX_RESOURCE_CAPACITY}"
        )));
    }
    Ok(())
}

fn check_hours(hours: &OperatingHours) -> Result<(), BookingError> {
    if hours.days.len() > MAX_OPERATING_HOURS_ENTRIES {
        return Err(BookingError::validation("too many operating hours entries"));
    }
    if let Some(bad) = hours.days.iter().find(|d| !d.is_well_formed()) {
        return Err(BookingError::validation(format!(
            "malformed operating hours for weekday {}",
            bad.weekday
        )));
    }
    Ok(())
}

fn check_optional_text(field: &str, value: &Option<String>) -> Result<(), BookingError> {
    match value {
        Some(text) => check_len(field, text, MAX_TEXT_LEN),
        None => Ok(()),
    }
}

impl Engine {
    // ── Booking state machine ────────────────────────────────

    /// Admit a booking on `time_slot_id` if the slot belongs to `resource_id`,
    /// is flagged available and still has capacity.
    ///
    /// The slot row stays write-locked from the first read through the log
    /// append, so the count-then-insert is atomic against every other
    /// create or cancel on the same slot.
    pub async fn create_booking(
        &self,
        user_id: Ulid,
        resource_id: Ulid,
        time_slot_id: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, BookingError> {
        let result = self.admit_booking(user_id, resource_id, time_slot_id, notes).await;
        match &result {
            Ok(_) => metrics::counter!(BOOKINGS_CREATED).increment(1),
            Err(e) => {
                metrics::counter!(BOOKINGS_REJECTED, "reason" => e.kind().as_str()).increment(1);
                debug!(parent: &self.log, %time_slot_id, %user_id, kind = e.kind().as_str(), "booking rejected");
            }
        }
        result
    }

    async fn admit_booking(
        &self,
        user_id: Ulid,
        resource_id: Ulid,
        time_slot_id: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, BookingError> {
        if let Some(text) = &notes {
            check_len("notes", text, MAX_NOTES_LEN)?;
        }
        let unavailable = || BookingError::NotFoundOrUnavailable { time_slot_id };

        let mut txn = self
            .store
            .begin_slot(time_slot_id)
            .await?
            .ok_or_else(unavailable)?;

        let (slot, active) = {
            let row = txn.row();
            (row.slot.clone(), row.active_count())
        };
        if slot.resource_id != resource_id {
            return Err(unavailable());
        }
        // A full slot reports capacity even though its flag is already down.
        if active >= slot.capacity {
            return Err(BookingError::CapacityExceeded { time_slot_id, capacity: slot.capacity });
        }
        if !slot.is_available {
            return Err(unavailable());
        }

        let now = now_ms();
        let booking = Booking {
            id: self.next_id(),
            user_id,
            resource_id,
            time_slot_id,
            span: slot.span,
            status: BookingStatus::Confirmed,
            notes,
            total_amount: slot.price,
            created_at: now,
            updated_at: now,
        };
        let booking_id = booking.id;
        txn.stage(Event::BookingCreated { booking });

        let full = active + 1 >= slot.capacity;
        if full {
            txn.stage(Event::TimeSlotAvailabilitySet { id: time_slot_id, is_available: false });
        }
        txn.commit().await?;

        info!(
            parent: &self.log,
            %booking_id,
            %time_slot_id,
            %user_id,
            active = active + 1,
            capacity = slot.capacity,
            full,
            "booking created"
        );
        self.get_booking(booking_id).await
    }

    /// Cancel a booking owned by `user_id` and reopen its slot if it drops below capacity.
    /// A booking that does not exist and one owned by someone else are both `NotFound`.
    /// Cancelling an already-cancelled booking returns it unchanged.
    pub async fn cancel_booking(&self, booking_id: Ulid, user_id: Ulid) -> Result<Booking, BookingError> {
        let not_found = || BookingError::not_found(EntityKind::Booking, booking_id);

        let slot_id = self.store.slot_of_booking(&booking_id).ok_or_else(not_found)?;
        let mut txn = self.store.begin_slot(slot_id).await?.ok_or_else(not_found)?;

        let (booking, capacity, active, flag) = {
            let row = txn.row();
            let booking = row
                .booking(booking_id)
                .filter(|b| b.user_id == user_id)
                .cloned()
                .ok_or_else(not_found)?;
            (booking, row.slot.capacity, row.active_count(), row.slot.is_available)
        };
        if !booking.is_active() {
            debug!(parent: &self.log, %booking_id, "booking already cancelled");
            return Ok(booking);
        }

        let now = now_ms();
        txn.stage(Event::BookingCancelled { id: booking_id, time_slot_id: slot_id, at: now });
        let remaining = active - 1;
        let reopened = remaining < capacity && !flag;
        if reopened {
            txn.stage(Event::TimeSlotAvailabilitySet { id: slot_id, is_available: true });
        }
        txn.commit().await?;

        metrics::counter!(BOOKINGS_CANCELLED).increment(1);
        info!(parent: &self.log, %booking_id, time_slot_id = %slot_id, remaining, reopened, "booking cancelled");

        Ok(Booking { status: BookingStatus::Cancelled, updated_at: now, ..booking })
    }

    // ── Time slots ───────────────────────────────────────────

    pub async fn create_time_slot(
        &self,
        resource_id: Ulid,
        start_time: Ms,
        end_time: Ms,
        capacity: u32,
        price: Option<Cents>,
    ) -> Result<TimeSlot, BookingError> {
        let span = validate_slot_span(start_time, end_time)?;
        if capacity == 0 || capacity > MAX_SLOT_CAPACITY {
            return Err(BookingError::validation(format!(
                "capacity must be between 1 and {MAX_SLOT_CAPACITY}"
            )));
        }

        let mut txn = self
            .store
            .begin_resource(resource_id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Resource, resource_id))?;
        if txn.row().slots.len() >= MAX_SLOTS_PER_RESOURCE {
            return Err(BookingError::validation("too many time slots on resource"));
        }

        let slot = TimeSlot {
            id: self.next_id(),
            resource_id,
            span,
            capacity,
            is_available: true,
            price,
            created_at: now_ms(),
        };
        txn.add_slot(slot.clone()).await?;
        info!(parent: &self.log, time_slot_id = %slot.id, %resource_id, capacity, "time slot created");
        Ok(slot)
    }

    /// Administrative override of the cached availability flag.
    pub async fn set_time_slot_availability(&self, id: Ulid, is_available: bool) -> Result<TimeSlot, BookingError> {
        let mut txn = self
            .store
            .begin_slot(id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::TimeSlot, id))?;
        let mut slot = txn.row().slot.clone();
        if slot.is_available != is_available {
            txn.stage(Event::TimeSlotAvailabilitySet { id, is_available });
        }
        txn.commit().await?;
        slot.is_available = is_available;
        info!(parent: &self.log, time_slot_id = %id, is_available, "availability set");
        Ok(slot)
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(&self, new: NewUser) -> Result<User, BookingError> {
        let email = new.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(BookingError::validation("email must be a valid address"));
        }
        check_len("email", &email, MAX_EMAIL_LEN)?;
        check_name(&new.name)?;
        if let Some(phone) = &new.phone {
            check_len("phone", phone, MAX_NAME_LEN)?;
        }

        let user = User {
            id: self.next_id(),
            email,
            name: new.name,
            role: new.role,
            phone: new.phone,
            created_at: now_ms(),
        };
        self.store.insert_user(user.clone()).await?;
        info!(parent: &self.log, user_id = %user.id, role = ?user.role, "user registered");
        Ok(user)
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(&self, new: NewResource) -> Result<Resource, BookingError> {
        check_name(&new.name)?;
        check_resource_capacity(new.capacity)?;
        check_optional_text("description", &new.description)?;
        check_optional_text("location", &new.location)?;
        check_hours(&new.operating_hours)?;

        let now = now_ms();
        let resource = Resource {
            id: self.next_id(),
            name: new.name,
            category: new.category,
            description: new.description,
            location: new.location,
            capacity: new.capacity,
            operating_hours: new.operating_hours,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_resource(resource.clone()).await?;
        info!(parent: &self.log, resource_id = %resource.id, category = %resource.category, "resource created");
        Ok(resource)
    }

    /// Apply a patch. Already-issued time slots keep their own capacity.
    pub async fn update_resource(&self, id: Ulid, patch: ResourcePatch) -> Result<Resource, BookingError> {
        if let Some(name) = &patch.name {
            check_name(name)?;
        }
        if let Some(capacity) = patch.capacity {
            check_resource_capacity(capacity)?;
        }
        check_optional_text("description", &patch.description)?;
        check_optional_text("location", &patch.location)?;
        if let Some(hours) = &patch.operating_hours {
            check_hours(hours)?;
        }

        let mut txn = self
            .store
            .begin_resource(id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Resource, id))?;
        let resource = txn.update(patch, now_ms()).await?;
        info!(parent: &self.log, resource_id = %id, "resource updated");
        Ok(resource)
    }

    /// Delete a resource together with its time slots and their bookings.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), BookingError> {
        let txn = self
            .store
            .begin_resource(id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Resource, id))?;
        let slots_removed = txn.delete().await?;
        info!(parent: &self.log, resource_id = %id, slots_removed, "resource deleted");
        Ok(())
    }
}
