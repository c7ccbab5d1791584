//! Newline-delimited JSON request/response messages.
//!
//! A request line is a JSON object tagged by `op`:
//! `{"op":"create_booking","user_id":"...","resource_id":"...","time_slot_id":"..."}`.
//! Every request gets exactly one response line: `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"kind":"capacity_exceeded","message":"..."}}`.

use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;

use crate::engine::{BookingError, Engine, ErrorKind};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Health,
    RegisterUser(NewUser),
    GetUser {
        id: Ulid,
    },
    CreateResource(NewResource),
    UpdateResource {
        id: Ulid,
        #[serde(default)]
        patch: ResourcePatch,
    },
    DeleteResource {
        id: Ulid,
    },
    ListResources {
        #[serde(default)]
        category: Option<ResourceCategory>,
    },
    GetResource {
        id: Ulid,
    },
    CreateTimeSlot {
        resource_id: Ulid,
        start_time: Ms,
        end_time: Ms,
        capacity: u32,
        #[serde(default)]
        price: Option<Cents>,
    },
    SetTimeSlotAvailability {
        id: Ulid,
        is_available: bool,
    },
    GetTimeSlot {
        id: Ulid,
    },
    GetAvailability {
        resource_id: Ulid,
        start_date: Ms,
        end_date: Ms,
    },
    CreateBooking {
        user_id: Ulid,
        resource_id: Ulid,
        time_slot_id: Ulid,
        #[serde(default)]
        notes: Option<String>,
    },
    CancelBooking {
        booking_id: Ulid,
        user_id: Ulid,
    },
    CheckConflicts {
        resource_id: Ulid,
        start_time: Ms,
        end_time: Ms,
    },
    ListUserBookings {
        user_id: Ulid,
    },
    GetBooking {
        id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self { ok: true, data: Some(value), error: None },
            Err(e) => Self::failure(ErrorKind::Validation, format!("unencodable response: {e}")),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody { kind: kind.as_str().to_string(), message: message.into() }),
        }
    }

    pub fn from_error(err: &BookingError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    /// Error kind string, if this is a failure.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":{"kind":"validation_error","message":"unencodable response"}}"#.into())
    }
}

fn reply<T: Serialize>(result: Result<T, BookingError>) -> Response {
    match result {
        Ok(value) => Response::success(value),
        Err(e) => Response::from_error(&e),
    }
}

/// Parse one request line. A malformed line becomes a ready-made validation error response.
pub fn parse_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line)
        .map_err(|e| Response::failure(ErrorKind::Validation, format!("malformed request: {e}")))
}

/// Execute a request against the engine.
pub async fn dispatch(engine: &Engine, req: Request) -> Response {
    match req {
        Request::Health => Response::success(json!({ "status": "ok" })),
        Request::RegisterUser(new) => reply(engine.register_user(new).await),
        Request::GetUser { id } => reply(engine.get_user(id).await),
        Request::CreateResource(new) => reply(engine.create_resource(new).await),
        Request::UpdateResource { id, patch } => reply(engine.update_resource(id, patch).await),
        Request::DeleteResource { id } => {
            reply(engine.delete_resource(id).await.map(|()| json!({ "deleted": id })))
        }
        Request::ListResources { category } => reply(engine.list_resources(category).await),
        Request::GetResource { id } => reply(engine.get_resource(id).await),
        Request::CreateTimeSlot { resource_id, start_time, end_time, capacity, price } => reply(
            engine
                .create_time_slot(resource_id, start_time, end_time, capacity, price)
                .await,
        ),
        Request::SetTimeSlotAvailability { id, is_available } => {
            reply(engine.set_time_slot_availability(id, is_available).await)
        }
        Request::GetTimeSlot { id } => reply(engine.get_time_slot(id).await),
        Request::GetAvailability { resource_id, start_date, end_date } => {
            reply(engine.get_availability(resource_id, start_date, end_date).await)
        }
        Request::CreateBooking { user_id, resource_id, time_slot_id, notes } => reply(
            engine
                .create_booking(user_id, resource_id, time_slot_id, notes)
                .await,
        ),
        Request::CancelBooking { booking_id, user_id } => {
            reply(engine.cancel_booking(booking_id, user_id).await)
        }
        Request::CheckConflicts { resource_id, start_time, end_time } => {
            reply(engine.check_conflicts(resource_id, start_time, end_time).await)
        }
        Request::ListUserBookings { user_id } => reply(engine.list_user_bookings(user_id).await),
        Request::GetBooking { id } => reply(engine.get_booking(id).await),
    }
}
