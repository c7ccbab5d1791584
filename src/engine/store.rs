use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::LOCK_WAIT_SECONDS;
use crate::snapshot::Snapshot;

use super::WalHandle;
use super::error::{ConstraintViolation, StoreError};

pub(crate) type SharedSlot = Arc<RwLock<SlotRow>>;
pub(crate) type SharedResource = Arc<RwLock<ResourceRow>>;

/// A time slot together with every booking that references it. Holding the
/// row's write lock serialises all changes to the slot's active-booking set.
#[derive(Debug)]
pub(crate) struct SlotRow {
    pub slot: TimeSlot,
    pub bookings: Vec<Booking>,
    /// Set when the owning resource is deleted while a waiter still holds the Arc.
    pub deleted: bool,
}

impl SlotRow {
    fn new(slot: TimeSlot) -> Self {
        Self { slot, bookings: Vec::new(), deleted: false }
    }

    pub fn active_count(&self) -> u32 {
        self.bookings.iter().filter(|b| b.is_active()).count() as u32
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => self.bookings.push(booking.clone()),
            Event::BookingCancelled { id, at, .. } => {
                if let Some(b) = self.bookings.iter_mut().find(|b| b.id == *id) {
                    b.status = BookingStatus::Cancelled;
                    b.updated_at = *at;
                }
            }
            Event::TimeSlotAvailabilitySet { is_available, .. } => {
                self.slot.is_available = *is_available;
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotEntry {
    pub span: Span,
    pub id: Ulid,
}

/// A resource and its slot index, kept sorted by `(start, id)`.
#[derive(Debug)]
pub(crate) struct ResourceRow {
    pub resource: Resource,
    pub slots: Vec<SlotEntry>,
    pub deleted: bool,
}

impl ResourceRow {
    fn new(resource: Resource) -> Self {
        Self { resource, slots: Vec::new(), deleted: false }
    }

    fn insert_slot(&mut self, span: Span, id: Ulid) {
        let pos = self
            .slots
            .partition_point(|e| (e.span.start, e.id) < (span.start, id));
        self.slots.insert(pos, SlotEntry { span, id });
    }

    /// Slots whose span overlaps `query`.
    pub fn slots_overlapping(&self, query: &Span) -> impl Iterator<Item = &SlotEntry> {
        // Everything at index >= right_bound starts at or after query.end and can't overlap.
        let right_bound = self.slots.partition_point(|e| e.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// Slots lying entirely inside `[from, to]`, in `(start, id)` order.
    pub fn slots_within(&self, from: Ms, to: Ms) -> impl Iterator<Item = &SlotEntry> {
        let left = self.slots.partition_point(|e| e.span.start < from);
        let right = self.slots.partition_point(|e| e.span.start < to).max(left);
        self.slots[left..right].iter().filter(move |e| e.span.end <= to)
    }
}

/// In-memory tables plus the log handle. Every write goes to the log first and
/// touches memory only once the frame is durable.
pub(crate) struct EntityStore {
    users: DashMap<Ulid, User>,
    emails: DashMap<String, Ulid>,
    resources: DashMap<Ulid, SharedResource>,
    slots: DashMap<Ulid, SharedSlot>,
    booking_to_slot: DashMap<Ulid, Ulid>,
    user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Serialises email-uniqueness check and insert.
    user_gate: Mutex<()>,
    wal: WalHandle,
    lock_timeout: Duration,
    log: tracing::Span,
}

impl EntityStore {
    pub fn from_snapshot(snapshot: Snapshot, wal: WalHandle, lock_timeout: Duration, log: tracing::Span) -> Self {
        let Snapshot { users, resources, slots, bookings } = snapshot;
        let store = Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            resources: DashMap::new(),
            slots: DashMap::new(),
            booking_to_slot: DashMap::new(),
            user_bookings: DashMap::new(),
            user_gate: Mutex::new(()),
            wal,
            lock_timeout,
            log,
        };

        for (id, user) in users {
            store.emails.insert(user.email.clone(), id);
            store.users.insert(id, user);
        }

        let mut resource_rows: std::collections::HashMap<Ulid, ResourceRow> = resources
            .into_iter()
            .map(|(id, r)| (id, ResourceRow::new(r)))
            .collect();
        let mut slot_rows: std::collections::HashMap<Ulid, SlotRow> = std::collections::HashMap::new();
        for (id, slot) in slots {
            let Some(parent) = resource_rows.get_mut(&slot.resource_id) else {
                continue;
            };
            parent.insert_slot(slot.span, id);
            slot_rows.insert(id, SlotRow::new(slot));
        }

        let mut bookings: Vec<Booking> = bookings.into_values().collect();
        bookings.sort_by_key(|b| b.id);
        for booking in bookings {
            let Some(row) = slot_rows.get_mut(&booking.time_slot_id) else {
                continue;
            };
            store.booking_to_slot.insert(booking.id, booking.time_slot_id);
            store.user_bookings.entry(booking.user_id).or_default().push(booking.id);
            row.bookings.push(booking);
        }

        for (id, row) in resource_rows {
            store.resources.insert(id, Arc::new(RwLock::new(row)));
        }
        for (id, row) in slot_rows {
            store.slots.insert(id, Arc::new(RwLock::new(row)));
        }
        store
    }

    // ── Locking ──────────────────────────────────────────────

    async fn lock_write<T>(&self, cell: Arc<RwLock<T>>) -> Result<OwnedRwLockWriteGuard<T>, StoreError> {
        let started = Instant::now();
        let guard = tokio::time::timeout(self.lock_timeout, cell.write_owned())
            .await
            .map_err(|_| self.lock_timed_out())?;
        metrics::histogram!(LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    async fn with_read<T, R>(&self, cell: &RwLock<T>, f: impl FnOnce(&T) -> R) -> Result<R, StoreError> {
        let guard = tokio::time::timeout(self.lock_timeout, cell.read())
            .await
            .map_err(|_| self.lock_timed_out())?;
        Ok(f(&guard))
    }

    fn lock_timed_out(&self) -> StoreError {
        warn!(parent: &self.log, waited = ?self.lock_timeout, "row lock wait timed out");
        StoreError::LockTimeout(self.lock_timeout)
    }

    /// Durably append one transaction, logging any failure under the engine span.
    async fn append(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let result = self.wal.append(events).await;
        match &result {
            Err(StoreError::Io(e)) => error!(parent: &self.log, error = %e, "log write failed"),
            Err(StoreError::WriterUnavailable) => error!(parent: &self.log, "log writer is gone"),
            _ => {}
        }
        result
    }

    fn slot_cell(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    fn resource_cell(&self, id: &Ulid) -> Option<SharedResource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    // ── Transactions ─────────────────────────────────────────

    /// Write-lock a slot row. `None` if the slot does not exist (or was
    /// cascade-deleted while we waited).
    pub async fn begin_slot(&self, id: Ulid) -> Result<Option<SlotTxn<'_>>, StoreError> {
        let Some(cell) = self.slot_cell(&id) else {
            return Ok(None);
        };
        let row = self.lock_write(cell).await?;
        if row.deleted {
            return Ok(None);
        }
        Ok(Some(SlotTxn { store: self, row, staged: Vec::new() }))
    }

    pub async fn begin_resource(&self, id: Ulid) -> Result<Option<ResourceTxn<'_>>, StoreError> {
        let Some(cell) = self.resource_cell(&id) else {
            return Ok(None);
        };
        let row = self.lock_write(cell).await?;
        if row.deleted {
            return Ok(None);
        }
        Ok(Some(ResourceTxn { store: self, row }))
    }

    pub async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let _gate = tokio::time::timeout(self.lock_timeout, self.user_gate.lock())
            .await
            .map_err(|_| self.lock_timed_out())?;
        if self.emails.contains_key(&user.email) {
            return Err(ConstraintViolation::UniqueKey { table: "users", column: "email" }.into());
        }
        self.append(vec![Event::UserRegistered { user: user.clone() }]).await?;
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
        Ok(())
    }

    pub async fn insert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        self.append(vec![Event::ResourceCreated { resource: resource.clone() }]).await?;
        self.resources
            .insert(resource.id, Arc::new(RwLock::new(ResourceRow::new(resource))));
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_exists(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn user_booking_ids(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.user_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn slot_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_slot.get(booking_id).map(|e| *e.value())
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        self.resources.iter().map(|e| *e.key()).collect()
    }

    /// Run `f` against a live slot row under its read lock.
    pub async fn read_slot<R>(&self, id: &Ulid, f: impl FnOnce(&SlotRow) -> R) -> Result<Option<R>, StoreError> {
        let Some(cell) = self.slot_cell(id) else {
            return Ok(None);
        };
        self.with_read(&cell, |row| (!row.deleted).then(|| f(row))).await
    }

    /// Run `f` against a live resource row under its read lock.
    pub async fn read_resource<R>(
        &self,
        id: &Ulid,
        f: impl FnOnce(&ResourceRow) -> R,
    ) -> Result<Option<R>, StoreError> {
        let Some(cell) = self.resource_cell(id) else {
            return Ok(None);
        };
        self.with_read(&cell, |row| (!row.deleted).then(|| f(row))).await
    }

    pub async fn booking(&self, id: &Ulid) -> Result<Option<Booking>, StoreError> {
        let Some(slot_id) = self.slot_of_booking(id) else {
            return Ok(None);
        };
        Ok(self
            .read_slot(&slot_id, |row| row.booking(*id).cloned())
            .await?
            .flatten())
    }

    // ── Constraint checks ────────────────────────────────────

    fn check_booking(&self, row: &SlotRow, booking: &Booking) -> Result<(), ConstraintViolation> {
        if booking.time_slot_id != row.slot.id {
            return Err(ConstraintViolation::ForeignKey {
                table: "bookings",
                column: "time_slot_id",
                references: "time_slots",
            });
        }
        if booking.resource_id != row.slot.resource_id {
            return Err(ConstraintViolation::ForeignKey {
                table: "bookings",
                column: "resource_id",
                references: "resources",
            });
        }
        if !self.user_exists(&booking.user_id) {
            return Err(ConstraintViolation::ForeignKey {
                table: "bookings",
                column: "user_id",
                references: "users",
            });
        }
        Ok(())
    }
}

/// An open write transaction on one time slot.
///
/// Events are staged, then `commit` writes them as a single log frame and
/// applies them while the row lock is still held. Dropping the transaction
/// without committing discards the staged events.
pub(crate) struct SlotTxn<'a> {
    store: &'a EntityStore,
    row: OwnedRwLockWriteGuard<SlotRow>,
    staged: Vec<Event>,
}

impl SlotTxn<'_> {
    pub fn row(&self) -> &SlotRow {
        &self.row
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        for event in &self.staged {
            if let Event::BookingCreated { booking } = event {
                self.store.check_booking(&self.row, booking)?;
            }
        }

        self.store.append(self.staged.clone()).await?;

        for event in &self.staged {
            self.row.apply(event);
            if let Event::BookingCreated { booking } = event {
                self.store.booking_to_slot.insert(booking.id, booking.time_slot_id);
                self.store
                    .user_bookings
                    .entry(booking.user_id)
                    .or_default()
                    .push(booking.id);
            }
        }
        Ok(())
    }
}

/// An open write transaction on one resource and its slot index.
pub(crate) struct ResourceTxn<'a> {
    store: &'a EntityStore,
    row: OwnedRwLockWriteGuard<ResourceRow>,
}

impl ResourceTxn<'_> {
    pub fn row(&self) -> &ResourceRow {
        &self.row
    }

    pub async fn add_slot(&mut self, slot: TimeSlot) -> Result<(), StoreError> {
        if slot.span.start >= slot.span.end {
            return Err(ConstraintViolation::Check { table: "time_slots", name: "valid_time_range" }.into());
        }
        if slot.resource_id != self.row.resource.id {
            return Err(ConstraintViolation::ForeignKey {
                table: "time_slots",
                column: "resource_id",
                references: "resources",
            }
            .into());
        }

        self.store.append(vec![Event::TimeSlotCreated { slot: slot.clone() }]).await?;
        self.row.insert_slot(slot.span, slot.id);
        self.store
            .slots
            .insert(slot.id, Arc::new(RwLock::new(SlotRow::new(slot))));
        Ok(())
    }

    pub async fn update(&mut self, patch: ResourcePatch, at: Ms) -> Result<Resource, StoreError> {
        let id = self.row.resource.id;
        self.store
            .append(vec![Event::ResourceUpdated { id, patch: patch.clone(), updated_at: at }])
            .await?;
        patch.apply_to(&mut self.row.resource);
        self.row.resource.updated_at = at;
        Ok(self.row.resource.clone())
    }

    /// Delete the resource, its slots and their bookings. Slot rows are locked
    /// in index order after the resource row. Returns the number of slots removed.
    pub async fn delete(mut self) -> Result<usize, StoreError> {
        let id = self.row.resource.id;
        let mut slot_rows = Vec::with_capacity(self.row.slots.len());
        for entry in &self.row.slots {
            if let Some(cell) = self.store.slot_cell(&entry.id) {
                slot_rows.push(self.store.lock_write(cell).await?);
            }
        }

        self.store.append(vec![Event::ResourceDeleted { id }]).await?;

        for row in slot_rows.iter_mut() {
            row.deleted = true;
            for booking in &row.bookings {
                self.store.booking_to_slot.remove(&booking.id);
                if let Some(mut ids) = self.store.user_bookings.get_mut(&booking.user_id) {
                    ids.retain(|b| *b != booking.id);
                }
            }
            self.store.slots.remove(&row.slot.id);
        }
        let removed = slot_rows.len();
        self.row.deleted = true;
        self.row.slots.clear();
        self.store.resources.remove(&id);
        Ok(removed)
    }
}
