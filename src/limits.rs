// Hard caps on request inputs. Kept in one place so the wire layer and the
// engine agree on them.

pub const MAX_ROOM_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2048;

/// Largest accepted `price`/`deposit`. Amounts are stored as signed 64-bit
/// integers in the ledger.
pub const MAX_AMOUNT: u64 = 1_000_000_000_000_000;

/// Upper bound on how many rooms `list_available_rooms` checks at once.
pub const AVAILABILITY_FAN_OUT: usize = 8;

/// Longest request line accepted by the wire endpoint.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub const MAX_TX_ATTEMPTS: u32 = 16;

/// Largest encoded commit the WAL writes or replays. A commit carries a few
/// documents, each bounded by the request line length.
pub const MAX_WAL_RECORD_LEN: usize = 4 * MAX_LINE_LEN;
