use crate::limits::*;
use crate::model::*;

use super::{ConflictReason, EngineError, ValidationError};

/// The first active booking other than `exclude` whose stay touches `range`.
pub(super) fn find_overlap<'a>(
    bookings: &'a [Booking],
    range: &DateRange,
    exclude: Option<&str>,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.status.is_active() && Some(b.id.as_str()) != exclude && b.range().touches(range)
    })
}

pub(super) fn check_no_overlap(
    bookings: &[Booking],
    range: &DateRange,
    exclude: Option<&str>,
) -> Result<(), EngineError> {
    match find_overlap(bookings, range, exclude) {
        Some(hit) => Err(EngineError::Conflict(ConflictReason::Overlap {
            booking_id: hit.id.clone(),
        })),
        None => Ok(()),
    }
}

/// Seeded rooms must carry a usable id, bounded text and a positive capacity.
pub(super) fn validate_room(room: &Room) -> Result<(), ValidationError> {
    if room.id.trim().is_empty() {
        return Err(ValidationError::MissingField("id"));
    }
    if room.id.len() > MAX_ROOM_ID_LEN {
        return Err(ValidationError::TooLong { field: "id", max: MAX_ROOM_ID_LEN });
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong { field: fields::NAME, max: MAX_NAME_LEN });
    }
    if room.room_type.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong { field: fields::TYPE, max: MAX_NAME_LEN });
    }
    if room.capacity == 0 {
        return Err(ValidationError::InvalidField {
            field: fields::CAPACITY,
            expected: "positive integer",
        });
    }
    Ok(())
}
