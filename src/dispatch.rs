use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// A request from the conversational front end, tagged by `intent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    Book(NewBooking),
    /// Free rooms for the range, or whether one room is free when `roomId` is given.
    CheckAvailability {
        start: String,
        end: String,
        #[serde(default)]
        room_id: Option<String>,
    },
    RoomSchedule {
        room_id: String,
        start: String,
        end: String,
    },
    Cancel {
        booking_id: String,
    },
    Update {
        booking_id: String,
        patch: Map<String, Value>,
    },
    TodayCheckins,
    GetBooking {
        booking_id: String,
    },
    ListRooms,
}

/// Map a Command variant to a short label for metrics and logs.
pub fn intent_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Book(_) => "book",
        Command::CheckAvailability { .. } => "check_availability",
        Command::RoomSchedule { .. } => "room_schedule",
        Command::Cancel { .. } => "cancel",
        Command::Update { .. } => "update",
        Command::TodayCheckins => "today_checkins",
        Command::GetBooking { .. } => "get_booking",
        Command::ListRooms => "list_rooms",
    }
}

/// The `result` payload of a successful reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Booked {
        #[serde(rename = "bookingId")]
        booking_id: String,
    },
    Rooms {
        rooms: Vec<Room>,
    },
    RoomFree {
        #[serde(rename = "roomId")]
        room_id: String,
        available: bool,
    },
    Schedule(RoomSchedule),
    Cancelled {
        cancelled: bool,
    },
    Updated {
        updated: bool,
    },
    Checkins {
        date: Day,
        bookings: Vec<Booking>,
    },
    Booking(Booking),
}

/// One reply line. Errors carry machine codes only; wording is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        result: Outcome,
    },
    Error {
        kind: &'static str,
        code: &'static str,
        subject: Option<String>,
    },
}

impl Reply {
    pub fn from_error(e: &EngineError) -> Self {
        Reply::Error {
            kind: e.kind(),
            code: e.code(),
            subject: e.subject(),
        }
    }

    /// The request line was not a valid command.
    pub fn malformed(code: &'static str) -> Self {
        Reply::Error {
            kind: "validation",
            code,
            subject: None,
        }
    }
}

/// Run one command against the engine. `today` is the server's local date.
pub async fn execute(engine: &Engine, cmd: Command, today: Day) -> Result<Outcome, EngineError> {
    match cmd {
        Command::Book(input) => {
            let booking_id = engine.create_booking(&input).await?;
            Ok(Outcome::Booked { booking_id })
        }
        Command::CheckAvailability {
            start,
            end,
            room_id: Some(room_id),
        } => {
            let available = engine.is_range_free(&room_id, &start, &end).await?;
            let room = engine.get_room(&room_id).await?;
            Ok(Outcome::RoomFree {
                room_id: room.id,
                available,
            })
        }
        Command::CheckAvailability {
            start,
            end,
            room_id: None,
        } => {
            let rooms = engine.list_available_rooms(&start, &end).await?;
            Ok(Outcome::Rooms { rooms })
        }
        Command::RoomSchedule { room_id, start, end } => {
            Ok(Outcome::Schedule(engine.room_schedule(&room_id, &start, &end).await?))
        }
        Command::Cancel { booking_id } => {
            let cancelled = engine.cancel_booking(&booking_id).await?;
            Ok(Outcome::Cancelled { cancelled })
        }
        Command::Update { booking_id, patch } => {
            let patch = BookingPatch::from_json(&patch)?;
            let updated = engine.update_booking(&booking_id, &patch).await?;
            Ok(Outcome::Updated { updated })
        }
        Command::TodayCheckins => {
            let bookings = engine.checkins_on(today).await?;
            Ok(Outcome::Checkins { date: today, bookings })
        }
        Command::GetBooking { booking_id } => Ok(Outcome::Booking(engine.get_booking(&booking_id).await?)),
        Command::ListRooms => Ok(Outcome::Rooms {
            rooms: engine.list_rooms().await?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::ValidationError;

    fn parse(v: Value) -> Command {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn commands_use_intent_tag_and_camel_case() {
        assert_eq!(
            parse(json!({"intent": "check_availability", "start": "2024-12-25", "end": "2024-12-27"})),
            Command::CheckAvailability {
                start: "2024-12-25".into(),
                end: "2024-12-27".into(),
                room_id: None,
            }
        );
        assert_eq!(
            parse(json!({"intent": "cancel", "bookingId": "b1"})),
            Command::Cancel { booking_id: "b1".into() }
        );
        assert_eq!(parse(json!({"intent": "list_rooms"})), Command::ListRooms);

        let Command::Book(input) = parse(json!({"intent": "book", "roomId": "101", "price": 5})) else {
            panic!("expected book");
        };
        assert_eq!(input.room_id.as_deref(), Some("101"));
        assert_eq!(input.price, Some(5));
    }

    #[test]
    fn unknown_intent_is_rejected() {
        assert!(serde_json::from_value::<Command>(json!({"intent": "delete_everything"})).is_err());
        assert!(serde_json::from_value::<Command>(json!({"bookingId": "b1"})).is_err());
    }

    #[test]
    fn replies_serialize_with_status_tag() {
        let ok = Reply::Ok {
            result: Outcome::Booked { booking_id: "b1".into() },
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "ok", "result": {"bookingId": "b1"}})
        );

        let err = Reply::from_error(&EngineError::from(ValidationError::MissingField("phone")));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"status": "error", "kind": "validation", "code": "missing_field", "subject": "phone"})
        );
    }
}
