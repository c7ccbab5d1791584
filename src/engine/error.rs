use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Resource,
    TimeSlot,
    Booking,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::Resource => "resource",
            EntityKind::TimeSlot => "time slot",
            EntityKind::Booking => "booking",
        })
    }
}

/// Store-level integrity failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    #[error("duplicate value for unique key {table}.{column}")]
    UniqueKey {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table}.{column} references a missing {references} row")]
    ForeignKey {
        table: &'static str,
        column: &'static str,
        references: &'static str,
    },
    #[error("check constraint {name} violated on {table}")]
    Check {
        table: &'static str,
        name: &'static str,
    },
}

/// Failures raised by the entity store. Never returned from the engine as-is:
/// `BookingError::from` classifies them. The store logs the detail under the
/// engine span before the conversion drops it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    #[error("timed out after {0:?} waiting for a row lock")]
    LockTimeout(Duration),
    #[error("log writer is unavailable")]
    WriterUnavailable,
    #[error("log write failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    LockTimeout,
    WriterUnavailable,
    Io,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            // Times out before anything is staged.
            TransientReason::LockTimeout => {
                "temporary contention; nothing was applied and the operation may be retried"
            }
            // The frame may already be on disk.
            TransientReason::WriterUnavailable | TransientReason::Io => {
                "temporary storage failure; the outcome is unknown, check the current state before retrying"
            }
        })
    }
}

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unavailable,
    CapacityExceeded,
    ConflictDetected,
    ConstraintViolation,
    TransientStore,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::ConflictDetected => "conflict_detected",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::TransientStore => "transient_store_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: Ulid },
    #[error("time slot {time_slot_id} does not exist for this resource or is not available")]
    NotFoundOrUnavailable { time_slot_id: Ulid },
    #[error("time slot {time_slot_id} is at full capacity ({capacity})")]
    CapacityExceeded { time_slot_id: Ulid, capacity: u32 },
    #[error("proposed window overlaps {} active booking(s)", .conflicting.len())]
    ConflictDetected { conflicting: Vec<Ulid> },
    #[error("integrity constraint violated: {0}")]
    Constraint(ConstraintViolation),
    #[error("{0}")]
    Transient(TransientReason),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) => ErrorKind::Validation,
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::NotFoundOrUnavailable { .. } => ErrorKind::Unavailable,
            BookingError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            BookingError::ConflictDetected { .. } => ErrorKind::ConflictDetected,
            BookingError::Constraint(_) => ErrorKind::ConstraintViolation,
            BookingError::Transient(_) => ErrorKind::TransientStore,
        }
    }

    /// Only transient store failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Transient(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        BookingError::Validation(msg.into())
    }

    pub(crate) fn not_found(entity: EntityKind, id: Ulid) -> Self {
        BookingError::NotFound { entity, id }
    }
}

impl From<ConstraintViolation> for BookingError {
    fn from(violation: ConstraintViolation) -> Self {
        BookingError::Constraint(violation)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(violation) => BookingError::Constraint(violation),
            StoreError::LockTimeout(_) => BookingError::Transient(TransientReason::LockTimeout),
            StoreError::WriterUnavailable => BookingError::Transient(TransientReason::WriterUnavailable),
            StoreError::Io(_) => BookingError::Transient(TransientReason::Io),
        }
    }
}
