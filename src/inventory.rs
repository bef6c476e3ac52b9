use std::io;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::{ConflictReason, Engine, EngineError};
use crate::model::{Room, RoomStatus};

/// A room as listed in a seed file. Seeded rooms always start `available`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomSeed {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: String,
    pub capacity: u32,
}

impl RoomSeed {
    fn new(id: &str, room_type: &str, capacity: u32) -> Self {
        Self {
            id: id.into(),
            name: format!("Room {id}"),
            room_type: room_type.into(),
            capacity,
        }
    }

    pub fn into_room(self) -> Room {
        Room {
            id: self.id,
            name: self.name,
            room_type: self.room_type,
            capacity: self.capacity,
            status: RoomStatus::Available,
        }
    }
}

/// The hostel's built-in room list.
pub fn default_rooms() -> Vec<RoomSeed> {
    vec![
        RoomSeed::new("101", "Family", 4),
        RoomSeed::new("102", "Single", 1),
        RoomSeed::new("103", "Deluxe Double", 2),
        RoomSeed::new("201", "Deluxe Queen", 2),
        RoomSeed::new("202", "Single", 1),
        RoomSeed::new("203", "Deluxe Double", 2),
        RoomSeed::new("301", "Standard Double", 2),
        RoomSeed::new("302", "Standard Double", 2),
    ]
}

/// Read a JSON array of [`RoomSeed`]s.
pub fn load_seed_file(path: &Path) -> io::Result<Vec<RoomSeed>> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Create every room that does not exist yet. Existing rooms are left as
/// they are, bookings and status included. Returns how many were created.
pub async fn seed(engine: &Engine, rooms: Vec<RoomSeed>) -> Result<usize, EngineError> {
    let mut created = 0;
    for seed in rooms {
        let id = seed.id.clone();
        match engine.create_room(seed.into_room()).await {
            Ok(()) => created += 1,
            Err(EngineError::Conflict(ConflictReason::RoomExists(_))) => {
                debug!("seed: room {id} already present");
            }
            Err(e) => return Err(e),
        }
    }
    info!("seeded {created} new rooms");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::MemoryLedger;

    #[tokio::test]
    async fn seeding_twice_keeps_existing_rooms() {
        let engine = Engine::new(Arc::new(MemoryLedger::ephemeral()));
        assert_eq!(seed(&engine, default_rooms()).await.unwrap(), 8);

        let booking = crate::model::NewBooking {
            room_id: Some("101".into()),
            guest_name: Some("A".into()),
            phone: Some("0900000000".into()),
            check_in: Some("2024-12-25".into()),
            check_out: Some("2024-12-27".into()),
            price: Some(1),
            deposit: Some(0),
            notes: None,
        };
        engine.create_booking(&booking).await.unwrap();

        assert_eq!(seed(&engine, default_rooms()).await.unwrap(), 0);
        assert_eq!(engine.get_room("101").await.unwrap().status, RoomStatus::Booked);
        let ids: Vec<String> = engine.list_rooms().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["101", "102", "103", "201", "202", "203", "301", "302"]);
    }

    #[test]
    fn seed_file_uses_type_key() {
        let dir = std::env::temp_dir().join("hostel_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rooms.json");
        std::fs::write(&path, r#"[{"id":"401","name":"Attic","type":"Dorm","capacity":6}]"#).unwrap();

        let rooms = load_seed_file(&path).unwrap();
        assert_eq!(rooms, vec![RoomSeed {
            id: "401".into(),
            name: "Attic".into(),
            room_type: "Dorm".into(),
            capacity: 6,
        }]);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(load_seed_file(&path).unwrap_err().kind(), io::ErrorKind::InvalidData);
        let _ = std::fs::remove_file(&path);
    }
}
