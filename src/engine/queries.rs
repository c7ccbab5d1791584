use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::{BookingError, Engine, EntityKind};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, BookingError> {
        self.store
            .booking(&id)
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Booking, id))
    }

    /// Every booking of `user_id`, newest first. Empty when the user has none.
    pub async fn list_user_bookings(&self, user_id: Ulid) -> Result<Vec<Booking>, BookingError> {
        let ids = self.store.user_booking_ids(&user_id);
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            bookings.extend(self.store.booking(&id).await?);
        }
        bookings.sort_by_key(|b| Reverse((b.created_at, b.id)));
        Ok(bookings)
    }

    pub async fn get_user(&self, id: Ulid) -> Result<User, BookingError> {
        self.store
            .user(&id)
            .ok_or_else(|| BookingError::not_found(EntityKind::User, id))
    }

    pub async fn get_time_slot(&self, id: Ulid) -> Result<TimeSlot, BookingError> {
        self.store
            .read_slot(&id, |row| row.slot.clone())
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::TimeSlot, id))
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, BookingError> {
        self.store
            .read_resource(&id, |row| row.resource.clone())
            .await?
            .ok_or_else(|| BookingError::not_found(EntityKind::Resource, id))
    }

    /// All resources newest first, or those of one category ordered by name.
    pub async fn list_resources(&self, category: Option<ResourceCategory>) -> Result<Vec<Resource>, BookingError> {
        let mut resources = Vec::new();
        for id in self.store.resource_ids() {
            let found = self
                .store
                .read_resource(&id, |row| row.resource.clone())
                .await?
                .filter(|r| category.is_none_or(|c| r.category == c));
            resources.extend(found);
        }
        match category {
            None => resources.sort_by_key(|r| Reverse((r.created_at, r.id))),
            Some(_) => resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        }
        Ok(resources)
    }
}
