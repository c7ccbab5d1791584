use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

/// Money in minor units (cents).
pub type Cents = u64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Provider,
    #[default]
    Customer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub created_at: Ms,
}

/// Registration request; the id and timestamp are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub phone: Option<String>,
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Doctor,
    Court,
    Facility,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Doctor => "doctor",
            ResourceCategory::Court => "court",
            ResourceCategory::Facility => "facility",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opening window for one weekday, in minutes since local midnight.
/// `weekday` is 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyHours {
    pub weekday: u8,
    pub open_minute: u16,
    pub close_minute: u16,
}

impl DailyHours {
    pub fn is_well_formed(&self) -> bool {
        self.weekday <= 6 && self.open_minute < self.close_minute && self.close_minute <= 1440
    }
}

/// Structured operating-hours description. Informational only: slots are
/// issued explicitly and are never validated against these hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub days: Vec<DailyHours>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub category: ResourceCategory,
    pub description: Option<String>,
    pub location: Option<String>,
    /// Max concurrent bookings a single slot of this resource may support.
    pub capacity: u32,
    pub operating_hours: OperatingHours,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub category: ResourceCategory,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub capacity: u32,
    #[serde(default)]
    pub operating_hours: OperatingHours,
}

/// Fields an administrator may change on a resource. `None` leaves the field as is;
/// an empty `description` or `location` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub category: Option<ResourceCategory>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub operating_hours: Option<OperatingHours>,
}

impl ResourcePatch {
    pub fn apply_to(&self, resource: &mut Resource) {
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(category) = self.category {
            resource.category = category;
        }
        if let Some(description) = &self.description {
            resource.description = non_empty(description);
        }
        if let Some(location) = &self.location {
            resource.location = non_empty(location);
        }
        if let Some(capacity) = self.capacity {
            resource.capacity = capacity;
        }
        if let Some(hours) = &self.operating_hours {
            resource.operating_hours = hours.clone();
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

// ── Time slots ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub capacity: u32,
    /// Cached "at least one more booking may be accepted". The authoritative
    /// answer is `active bookings < capacity`.
    pub is_available: bool,
    pub price: Option<Cents>,
    pub created_at: Ms,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings count against capacity; cancelled ones are inert.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub resource_id: Ulid,
    pub time_slot_id: Ulid,
    /// Copy of the slot's window, used by conflict detection.
    pub span: Span,
    pub status: BookingStatus,
    pub notes: Option<String>,
    /// Slot price at creation time; never recomputed.
    pub total_amount: Option<Cents>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Log record contents. One committed transaction is written as a `Vec<Event>` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    ResourceCreated {
        resource: Resource,
    },
    ResourceUpdated {
        id: Ulid,
        patch: ResourcePatch,
        updated_at: Ms,
    },
    ResourceDeleted {
        id: Ulid,
    },
    TimeSlotCreated {
        slot: TimeSlot,
    },
    TimeSlotAvailabilitySet {
        id: Ulid,
        is_available: bool,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        time_slot_id: Ulid,
        at: Ms,
    },
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}
