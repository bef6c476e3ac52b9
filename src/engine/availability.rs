use futures::{StreamExt, TryStreamExt, stream};

use crate::ledger::{Collection, Filter};
use crate::limits::AVAILABILITY_FAN_OUT;
use crate::model::*;

use super::{Engine, EngineError};

/// Store filters selecting the active bookings of `room_id` whose stay
/// touches `range` under the non-strict overlap test:
/// `checkOut >= range.start AND checkIn <= range.end`.
pub(super) fn active_overlap_filters(room_id: &str, range: &DateRange) -> Vec<Filter> {
    vec![
        Filter::eq(fields::ROOM_ID, room_id),
        Filter::any_of(fields::STATUS, BookingStatus::active_values()),
        Filter::ge(fields::CHECK_OUT, range.start),
        Filter::le(fields::CHECK_IN, range.end),
    ]
}

impl Engine {
    pub(super) async fn active_bookings_touching(
        &self,
        room_id: &str,
        range: &DateRange,
    ) -> Result<Vec<Booking>, EngineError> {
        let hits = self
            .store
            .query(Collection::Bookings, &active_overlap_filters(room_id, range))
            .await?;
        Ok(hits
            .iter()
            .map(Booking::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Whether `room_id` has no active booking touching `[start, end]`.
    /// Room existence is not checked.
    pub async fn is_range_free(&self, room_id: &str, start: &str, end: &str) -> Result<bool, EngineError> {
        let range = DateRange::parse(start, end)?;
        self.room_is_free(room_id, &range).await
    }

    pub async fn room_is_free(&self, room_id: &str, range: &DateRange) -> Result<bool, EngineError> {
        Ok(self.active_bookings_touching(room_id, range).await?.is_empty())
    }

    /// Every room free for `[start, end]`, in room-id order. The cached room
    /// status is ignored; only bookings decide.
    pub async fn list_available_rooms(&self, start: &str, end: &str) -> Result<Vec<Room>, EngineError> {
        let range = DateRange::parse(start, end)?;
        let rooms = self.list_rooms().await?;
        let checked: Vec<Option<Room>> = stream::iter(rooms)
            .map(|room| async move {
                let free = self.room_is_free(&room.id, &range).await?;
                Ok::<_, EngineError>(free.then_some(room))
            })
            .buffered(AVAILABILITY_FAN_OUT)
            .try_collect()
            .await?;
        Ok(checked.into_iter().flatten().collect())
    }

    /// Active bookings of one room touching `[start, end]`.
    pub async fn room_schedule(&self, room_id: &str, start: &str, end: &str) -> Result<RoomSchedule, EngineError> {
        let range = DateRange::parse(start, end)?;
        let room = self.get_room(room_id).await?;
        let bookings: Vec<ScheduleEntry> = self
            .active_bookings_touching(&room.id, &range)
            .await?
            .into_iter()
            .map(|b| ScheduleEntry {
                check_in: b.check_in,
                check_out: b.check_out,
                status: b.status,
            })
            .collect();
        Ok(RoomSchedule {
            room_id: room.id,
            available: bookings.is_empty(),
            bookings,
        })
    }
}
