use crate::ledger::StoreError;
use crate::model::Day;

/// Malformed or missing input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    InvalidDate { field: &'static str, value: String },
    /// `start` is not strictly before `end`.
    EmptyRange { start: Day, end: Day },
    InvalidField { field: &'static str, expected: &'static str },
    TooLong { field: &'static str, max: usize },
    AmountTooLarge { field: &'static str, max: u64 },
    UnknownField(String),
    EmptyPatch,
}

impl ValidationError {
    /// Stable machine code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidDate { .. } => "invalid_date",
            ValidationError::EmptyRange { .. } => "empty_range",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::TooLong { .. } => "too_long",
            ValidationError::AmountTooLarge { .. } => "amount_too_large",
            ValidationError::UnknownField(_) => "unknown_field",
            ValidationError::EmptyPatch => "empty_patch",
        }
    }

    /// The offending field, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField(f)
            | ValidationError::InvalidDate { field: f, .. }
            | ValidationError::InvalidField { field: f, .. }
            | ValidationError::TooLong { field: f, .. }
            | ValidationError::AmountTooLarge { field: f, .. } => Some(*f),
            ValidationError::UnknownField(f) => Some(f.as_str()),
            ValidationError::EmptyRange { .. } | ValidationError::EmptyPatch => None,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "missing required field {field}"),
            ValidationError::InvalidDate { field, value } => {
                write!(f, "{field}: {value:?} is not a YYYY-MM-DD date")
            }
            ValidationError::EmptyRange { start, end } => {
                write!(f, "range [{start}, {end}] does not end after it starts")
            }
            ValidationError::InvalidField { field, expected } => {
                write!(f, "{field}: expected {expected}")
            }
            ValidationError::TooLong { field, max } => {
                write!(f, "{field}: longer than {max} bytes")
            }
            ValidationError::AmountTooLarge { field, max } => {
                write!(f, "{field}: larger than {max}")
            }
            ValidationError::UnknownField(field) => write!(f, "field {field} cannot be updated"),
            ValidationError::EmptyPatch => write!(f, "update has no fields"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Room(String),
    Booking(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The room's cached status is not `available`.
    RoomBooked(String),
    /// A date edit would collide with another active booking.
    Overlap { booking_id: String },
    /// The transaction kept losing to concurrent writers.
    Contention { attempts: u32 },
    /// Seeding a room id that is already in the inventory.
    RoomExists(String),
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    NotFound(Entity),
    Conflict(ConflictReason),
    Store(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Store(_) => "store",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(v) => v.code(),
            EngineError::NotFound(Entity::Room(_)) => "room",
            EngineError::NotFound(Entity::Booking(_)) => "booking",
            EngineError::Conflict(ConflictReason::RoomBooked(_)) => "room_booked",
            EngineError::Conflict(ConflictReason::Overlap { .. }) => "overlap",
            EngineError::Conflict(ConflictReason::Contention { .. }) => "contention",
            EngineError::Conflict(ConflictReason::RoomExists(_)) => "room_exists",
            EngineError::Store(StoreError::Aborted) => "aborted",
            EngineError::Store(StoreError::MissingDocument { .. }) => "missing_document",
            EngineError::Store(StoreError::ReadAfterWrite) => "read_after_write",
            EngineError::Store(StoreError::Corrupt { .. }) => "corrupt",
            EngineError::Store(StoreError::Wal(_)) => "wal",
        }
    }

    /// The id or field the failure is about.
    pub fn subject(&self) -> Option<String> {
        match self {
            EngineError::Validation(v) => v.field().map(str::to_string),
            EngineError::NotFound(Entity::Room(id) | Entity::Booking(id)) => Some(id.clone()),
            EngineError::Conflict(ConflictReason::RoomBooked(id))
            | EngineError::Conflict(ConflictReason::RoomExists(id))
            | EngineError::Conflict(ConflictReason::Overlap { booking_id: id }) => Some(id.clone()),
            EngineError::Conflict(ConflictReason::Contention { .. }) => None,
            EngineError::Store(StoreError::MissingDocument { id, .. })
            | EngineError::Store(StoreError::Corrupt { id, .. }) => Some(id.clone()),
            EngineError::Store(_) => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "invalid input: {e}"),
            EngineError::NotFound(Entity::Room(id)) => write!(f, "room not found: {id}"),
            EngineError::NotFound(Entity::Booking(id)) => write!(f, "booking not found: {id}"),
            EngineError::Conflict(ConflictReason::RoomBooked(id)) => {
                write!(f, "room {id} is already booked")
            }
            EngineError::Conflict(ConflictReason::Overlap { booking_id }) => {
                write!(f, "dates overlap booking {booking_id}")
            }
            EngineError::Conflict(ConflictReason::Contention { attempts }) => {
                write!(f, "transaction lost to concurrent writers {attempts} times")
            }
            EngineError::Conflict(ConflictReason::RoomExists(id)) => {
                write!(f, "room {id} already exists")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
