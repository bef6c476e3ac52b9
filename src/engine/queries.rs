use crate::ledger::{Collection, Filter};
use crate::model::*;

use super::{Engine, EngineError, Entity};

impl Engine {
    pub async fn get_room(&self, id: &str) -> Result<Room, EngineError> {
        let snapshot = self
            .store
            .get(Collection::Rooms, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(Entity::Room(id.to_string())))?;
        Ok(Room::from_snapshot(&snapshot)?)
    }

    pub async fn get_booking(&self, id: &str) -> Result<Booking, EngineError> {
        let snapshot = self
            .store
            .get(Collection::Bookings, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(Entity::Booking(id.to_string())))?;
        Ok(Booking::from_snapshot(&snapshot)?)
    }

    /// All rooms in id order.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        let snapshots = self.store.query(Collection::Rooms, &[]).await?;
        Ok(snapshots
            .iter()
            .map(Room::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Active bookings arriving on `day`.
    pub async fn checkins_on(&self, day: Day) -> Result<Vec<Booking>, EngineError> {
        let filters = [
            Filter::eq(fields::CHECK_IN, day),
            Filter::any_of(fields::STATUS, BookingStatus::active_values()),
        ];
        let snapshots = self.store.query(Collection::Bookings, &filters).await?;
        Ok(snapshots
            .iter()
            .map(Booking::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
