use futures::FutureExt;
use tracing::info;
use ulid::Ulid;

use crate::ledger::{Collection, Document, FieldValue};
use crate::model::*;

use super::availability::active_overlap_filters;
use super::conflict::{check_no_overlap, validate_room};
use super::{ConflictReason, Engine, EngineError, Entity, ValidationError};

fn room_status_fields(status: RoomStatus) -> Document {
    let mut changes = Document::new();
    changes.insert(fields::STATUS.into(), status.as_str().into());
    changes
}

impl Engine {
    /// Create a room if its id is not taken yet.
    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        self.run_transaction("create_room", |tx| {
            let room = room.clone();
            async move {
                if tx.get(Collection::Rooms, &room.id).await?.is_some() {
                    return Err(EngineError::Conflict(ConflictReason::RoomExists(room.id)));
                }
                tx.set(Collection::Rooms, room.id.clone(), room.to_document());
                Ok::<_, EngineError>(())
            }
            .boxed()
        })
        .await?;
        info!("room {} created", room.id);
        Ok(())
    }

    /// Book a room and mark it booked, atomically. Returns the new booking id.
    ///
    /// Only a room whose cached status is `available` can be booked; the
    /// status flips back when the booking is cancelled.
    pub async fn create_booking(&self, input: &NewBooking) -> Result<String, EngineError> {
        let draft = input.validate()?;
        let booking_id = Ulid::new().to_string();

        self.run_transaction("create_booking", |tx| {
            let draft = draft.clone();
            let booking_id = booking_id.clone();
            async move {
                let snapshot = tx
                    .get(Collection::Rooms, &draft.room_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(Entity::Room(draft.room_id.clone())))?;
                let room = Room::from_snapshot(&snapshot)?;
                if room.status != RoomStatus::Available {
                    return Err(EngineError::Conflict(ConflictReason::RoomBooked(room.id)));
                }
                tx.set(Collection::Bookings, booking_id, draft.to_document());
                tx.update(Collection::Rooms, room.id, room_status_fields(RoomStatus::Booked));
                Ok::<_, EngineError>(())
            }
            .boxed()
        })
        .await?;

        info!(
            "booking {booking_id} confirmed: room {} {}..{}",
            draft.room_id, draft.stay.start, draft.stay.end
        );
        Ok(booking_id)
    }

    /// Cancel a booking and release its room. Returns `false` if it was
    /// already cancelled, in which case nothing is written.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<bool, EngineError> {
        let room_id = self.get_booking(booking_id).await?.room_id;

        let cancelled = self
            .run_transaction("cancel_booking", |tx| {
                let booking_id = booking_id.to_string();
                let room_id = room_id.clone();
                async move {
                    let snapshot = tx
                        .get(Collection::Bookings, &booking_id)
                        .await?
                        .ok_or_else(|| EngineError::NotFound(Entity::Booking(booking_id.clone())))?;
                    if Booking::from_snapshot(&snapshot)?.status == BookingStatus::Cancelled {
                        return Ok(false);
                    }
                    let mut changes = Document::new();
                    changes.insert(fields::STATUS.into(), BookingStatus::Cancelled.as_str().into());
                    changes.insert(fields::CANCELLED_AT.into(), FieldValue::ServerTimestamp);
                    tx.update(Collection::Bookings, booking_id, changes);
                    tx.update(Collection::Rooms, room_id, room_status_fields(RoomStatus::Available));
                    Ok::<_, EngineError>(true)
                }
                .boxed()
            })
            .await?;

        if cancelled {
            info!("booking {booking_id} cancelled, room {room_id} released");
        }
        Ok(cancelled)
    }

    /// Apply a partial edit to a booking's non-status fields.
    ///
    /// A date change on an active booking is re-checked against the room's
    /// other active bookings; the room and every booking consulted are part of
    /// the transaction's read set.
    pub async fn update_booking(&self, booking_id: &str, patch: &BookingPatch) -> Result<bool, EngineError> {
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }

        self.run_transaction("update_booking", |tx| {
            let booking_id = booking_id.to_string();
            let patch = patch.clone();
            async move {
                let snapshot = tx
                    .get(Collection::Bookings, &booking_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(Entity::Booking(booking_id.clone())))?;
                let current = Booking::from_snapshot(&snapshot)?;
                let next = patch.apply(&current);
                let range = DateRange::new(next.check_in, next.check_out)?;

                if patch.changes_dates() && current.status.is_active() {
                    tx.get(Collection::Rooms, &current.room_id).await?;
                    let others = tx
                        .query(Collection::Bookings, &active_overlap_filters(&current.room_id, &range))
                        .await?
                        .iter()
                        .map(Booking::from_snapshot)
                        .collect::<Result<Vec<_>, _>>()?;
                    check_no_overlap(&others, &range, Some(&current.id))?;
                }

                tx.update(Collection::Bookings, booking_id, patch.to_fields());
                Ok::<_, EngineError>(true)
            }
            .boxed()
        })
        .await?;

        info!("booking {booking_id} updated");
        Ok(true)
    }
}
