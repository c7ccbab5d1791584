use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Plain fold of the event log into final entity state.
///
/// Used on startup to rebuild the store and by the log writer to compact
/// the log down to one record per live entity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub users: HashMap<Ulid, User>,
    pub resources: HashMap<Ulid, Resource>,
    pub slots: HashMap<Ulid, TimeSlot>,
    pub bookings: HashMap<Ulid, Booking>,
}

impl Snapshot {
    pub fn fold(events: impl IntoIterator<Item = Event>) -> Self {
        let mut snapshot = Self::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }

    pub fn apply(&mut self, event: Event) {
        match event {
            Event::UserRegistered { user } => {
                self.users.insert(user.id, user);
            }
            Event::ResourceCreated { resource } => {
                self.resources.insert(resource.id, resource);
            }
            Event::ResourceUpdated { id, patch, updated_at } => {
                if let Some(resource) = self.resources.get_mut(&id) {
                    patch.apply_to(resource);
                    resource.updated_at = updated_at;
                }
            }
            Event::ResourceDeleted { id } => {
                self.resources.remove(&id);
                self.slots.retain(|_, slot| slot.resource_id != id);
                self.bookings.retain(|_, booking| booking.resource_id != id);
            }
            Event::TimeSlotCreated { slot } => {
                self.slots.insert(slot.id, slot);
            }
            Event::TimeSlotAvailabilitySet { id, is_available } => {
                if let Some(slot) = self.slots.get_mut(&id) {
                    slot.is_available = is_available;
                }
            }
            Event::BookingCreated { booking } => {
                self.bookings.insert(booking.id, booking);
            }
            Event::BookingCancelled { id, at, .. } => {
                if let Some(booking) = self.bookings.get_mut(&id) {
                    booking.status = BookingStatus::Cancelled;
                    booking.updated_at = at;
                }
            }
        }
    }

    /// Minimal event sequence that folds back into this snapshot.
    /// Parents precede children; within a table, entities are in id (creation) order.
    pub fn into_events(self) -> Vec<Event> {
        let Snapshot { users, resources, slots, bookings } = self;
        let mut events = Vec::with_capacity(users.len() + resources.len() + slots.len() + bookings.len());

        let mut users: Vec<User> = users.into_values().collect();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserRegistered { user }));

        let mut resources: Vec<Resource> = resources.into_values().collect();
        resources.sort_by_key(|r| r.id);
        events.extend(resources.into_iter().map(|resource| Event::ResourceCreated { resource }));

        let mut slots: Vec<TimeSlot> = slots.into_values().collect();
        slots.sort_by_key(|s| s.id);
        events.extend(slots.into_iter().map(|slot| Event::TimeSlotCreated { slot }));

        let mut bookings: Vec<Booking> = bookings.into_values().collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        events
    }
}
