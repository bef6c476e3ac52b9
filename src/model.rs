use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::ValidationError;
use crate::ledger::{Collection, Document, FieldValue, Snapshot, StoreError};
use crate::limits::*;

/// Unix milliseconds.
pub type Ms = i64;

/// Document field names, shared by the codecs and the query filters.
pub mod fields {
    pub const ROOM_ID: &str = "roomId";
    pub const GUEST_NAME: &str = "guestName";
    pub const PHONE: &str = "phone";
    pub const CHECK_IN: &str = "checkIn";
    pub const CHECK_OUT: &str = "checkOut";
    pub const PRICE: &str = "price";
    pub const DEPOSIT: &str = "deposit";
    pub const STATUS: &str = "status";
    pub const CREATED_AT: &str = "createdAt";
    pub const CANCELLED_AT: &str = "cancelledAt";
    pub const NOTES: &str = "notes";

    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const CAPACITY: &str = "capacity";
}

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A calendar day. Crosses every boundary as ISO `YYYY-MM-DD`; the stored
/// string form sorts the same way as the dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Day(NaiveDate);

impl Day {
    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ValidationError> {
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(Day)
            .map_err(|_| ValidationError::InvalidDate {
                field,
                value: raw.to_string(),
            })
    }

    /// The server's local calendar day.
    pub fn today() -> Self {
        Day(chrono::Local::now().date_naive())
    }

    pub fn iso(&self) -> String {
        self.0.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl TryFrom<String> for Day {
    type Error = chrono::ParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map(Day)
    }
}

impl From<Day> for String {
    fn from(day: Day) -> Self {
        day.iso()
    }
}

impl From<Day> for FieldValue {
    fn from(day: Day) -> Self {
        FieldValue::Str(day.iso())
    }
}

/// Inclusive pair of days `start ..= end` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::EmptyRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a query window given as `start`/`end`.
    pub fn parse(start: &str, end: &str) -> Result<Self, ValidationError> {
        Self::new(Day::parse("start", start)?, Day::parse("end", end)?)
    }

    /// Parse a stay given as `checkIn`/`checkOut`.
    pub fn parse_stay(check_in: &str, check_out: &str) -> Result<Self, ValidationError> {
        Self::new(
            Day::parse(fields::CHECK_IN, check_in)?,
            Day::parse(fields::CHECK_OUT, check_out)?,
        )
    }

    /// Non-strict overlap: two ranges sharing a boundary day conflict, so a
    /// checkout and a check-in on the same day collide.
    pub fn touches(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Booked,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(RoomStatus::Available),
            "booked" => Some(RoomStatus::Booked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold a room.
    pub const ACTIVE: [BookingStatus; 2] = [BookingStatus::Confirmed, BookingStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn active_values() -> Vec<FieldValue> {
        Self::ACTIVE.iter().map(|s| s.as_str().into()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: String,
    pub capacity: u32,
    pub status: RoomStatus,
}

impl Room {
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::NAME.into(), self.name.as_str().into());
        doc.insert(fields::TYPE.into(), self.room_type.as_str().into());
        doc.insert(fields::CAPACITY.into(), FieldValue::Int(i64::from(self.capacity)));
        doc.insert(fields::STATUS.into(), self.status.as_str().into());
        doc
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StoreError> {
        let doc = DocReader::new(Collection::Rooms, snapshot);
        let capacity = doc.int(fields::CAPACITY)?;
        let status = doc.str(fields::STATUS)?;
        Ok(Room {
            id: snapshot.id.clone(),
            name: doc.str(fields::NAME)?.to_string(),
            room_type: doc.str(fields::TYPE)?.to_string(),
            capacity: u32::try_from(capacity)
                .map_err(|_| doc.corrupt(format!("capacity {capacity} out of range")))?,
            status: RoomStatus::parse(status)
                .ok_or_else(|| doc.corrupt(format!("unknown room status {status:?}")))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub room_id: String,
    pub guest_name: String,
    pub phone: String,
    pub check_in: Day,
    pub check_out: Day,
    pub price: u64,
    pub deposit: u64,
    pub status: BookingStatus,
    pub created_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.check_in,
            end: self.check_out,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::ROOM_ID.into(), self.room_id.as_str().into());
        doc.insert(fields::GUEST_NAME.into(), self.guest_name.as_str().into());
        doc.insert(fields::PHONE.into(), self.phone.as_str().into());
        doc.insert(fields::CHECK_IN.into(), self.check_in.into());
        doc.insert(fields::CHECK_OUT.into(), self.check_out.into());
        doc.insert(fields::PRICE.into(), amount_value(self.price));
        doc.insert(fields::DEPOSIT.into(), amount_value(self.deposit));
        doc.insert(fields::STATUS.into(), self.status.as_str().into());
        if let Some(at) = self.created_at {
            doc.insert(fields::CREATED_AT.into(), FieldValue::Timestamp(at));
        }
        if let Some(at) = self.cancelled_at {
            doc.insert(fields::CANCELLED_AT.into(), FieldValue::Timestamp(at));
        }
        if let Some(notes) = &self.notes {
            doc.insert(fields::NOTES.into(), notes.as_str().into());
        }
        doc
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StoreError> {
        let doc = DocReader::new(Collection::Bookings, snapshot);
        let status = doc.str(fields::STATUS)?;
        Ok(Booking {
            id: snapshot.id.clone(),
            room_id: doc.str(fields::ROOM_ID)?.to_string(),
            guest_name: doc.str(fields::GUEST_NAME)?.to_string(),
            phone: doc.str(fields::PHONE)?.to_string(),
            check_in: doc.day(fields::CHECK_IN)?,
            check_out: doc.day(fields::CHECK_OUT)?,
            price: doc.amount(fields::PRICE)?,
            deposit: doc.amount(fields::DEPOSIT)?,
            status: BookingStatus::parse(status)
                .ok_or_else(|| doc.corrupt(format!("unknown booking status {status:?}")))?,
            created_at: doc.opt_timestamp(fields::CREATED_AT)?,
            cancelled_at: doc.opt_timestamp(fields::CANCELLED_AT)?,
            notes: doc.opt_str(fields::NOTES)?.map(str::to_string),
        })
    }
}

fn amount_value(amount: u64) -> FieldValue {
    // Inputs are capped at MAX_AMOUNT, well inside i64.
    FieldValue::Int(i64::try_from(amount).unwrap_or(i64::MAX))
}

/// Typed field access over a stored document; anything unexpected is
/// reported as [`StoreError::Corrupt`].
struct DocReader<'a> {
    collection: Collection,
    snapshot: &'a Snapshot,
}

impl<'a> DocReader<'a> {
    fn new(collection: Collection, snapshot: &'a Snapshot) -> Self {
        Self { collection, snapshot }
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            collection: self.collection,
            id: self.snapshot.id.clone(),
            reason,
        }
    }

    fn str(&self, field: &str) -> Result<&'a str, StoreError> {
        match self.snapshot.data.get(field) {
            Some(FieldValue::Str(s)) => Ok(s),
            Some(other) => Err(self.corrupt(format!("{field}: expected string, got {other:?}"))),
            None => Err(self.corrupt(format!("{field}: missing"))),
        }
    }

    fn opt_str(&self, field: &str) -> Result<Option<&'a str>, StoreError> {
        match self.snapshot.data.get(field) {
            Some(FieldValue::Str(s)) => Ok(Some(s)),
            Some(FieldValue::Null) | None => Ok(None),
            Some(other) => Err(self.corrupt(format!("{field}: expected string, got {other:?}"))),
        }
    }

    fn int(&self, field: &str) -> Result<i64, StoreError> {
        match self.snapshot.data.get(field) {
            Some(FieldValue::Int(n)) => Ok(*n),
            Some(other) => Err(self.corrupt(format!("{field}: expected integer, got {other:?}"))),
            None => Err(self.corrupt(format!("{field}: missing"))),
        }
    }

    fn amount(&self, field: &str) -> Result<u64, StoreError> {
        let n = self.int(field)?;
        u64::try_from(n).map_err(|_| self.corrupt(format!("{field}: negative amount {n}")))
    }

    fn day(&self, field: &str) -> Result<Day, StoreError> {
        let raw = self.str(field)?;
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(Day)
            .map_err(|_| self.corrupt(format!("{field}: bad date {raw:?}")))
    }

    fn opt_timestamp(&self, field: &str) -> Result<Option<Ms>, StoreError> {
        match self.snapshot.data.get(field) {
            Some(FieldValue::Timestamp(ms)) => Ok(Some(*ms)),
            Some(FieldValue::Null) | None => Ok(None),
            Some(other) => Err(self.corrupt(format!("{field}: expected timestamp, got {other:?}"))),
        }
    }
}

// ── Inputs ───────────────────────────────────────────────────────

/// Booking request as handed over by the dialog layer. Every field is
/// optional here so that a missing one surfaces as a validation error
/// rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub room_id: Option<String>,
    pub guest_name: Option<String>,
    pub phone: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub price: Option<u64>,
    pub deposit: Option<u64>,
    pub notes: Option<String>,
}

impl NewBooking {
    pub fn validate(&self) -> Result<BookingDraft, ValidationError> {
        let room_id = required(fields::ROOM_ID, &self.room_id)?;
        let guest_name = required(fields::GUEST_NAME, &self.guest_name)?;
        let phone = required(fields::PHONE, &self.phone)?;
        let check_in = required(fields::CHECK_IN, &self.check_in)?;
        let check_out = required(fields::CHECK_OUT, &self.check_out)?;
        let price = self.price.ok_or(ValidationError::MissingField(fields::PRICE))?;
        let deposit = self.deposit.ok_or(ValidationError::MissingField(fields::DEPOSIT))?;

        check_len(fields::ROOM_ID, room_id, MAX_ROOM_ID_LEN)?;
        check_len(fields::GUEST_NAME, guest_name, MAX_NAME_LEN)?;
        check_len(fields::PHONE, phone, MAX_PHONE_LEN)?;
        check_amount(fields::PRICE, price)?;
        check_amount(fields::DEPOSIT, deposit)?;
        if let Some(notes) = &self.notes {
            check_len(fields::NOTES, notes, MAX_NOTES_LEN)?;
        }

        Ok(BookingDraft {
            room_id: room_id.to_string(),
            guest_name: guest_name.to_string(),
            phone: phone.to_string(),
            stay: DateRange::parse_stay(check_in, check_out)?,
            price,
            deposit,
            notes: self.notes.clone(),
        })
    }
}

/// A validated booking about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub room_id: String,
    pub guest_name: String,
    pub phone: String,
    pub stay: DateRange,
    pub price: u64,
    pub deposit: u64,
    pub notes: Option<String>,
}

impl BookingDraft {
    /// The document for a freshly confirmed booking; `createdAt` is set by the store.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::ROOM_ID.into(), self.room_id.as_str().into());
        doc.insert(fields::GUEST_NAME.into(), self.guest_name.as_str().into());
        doc.insert(fields::PHONE.into(), self.phone.as_str().into());
        doc.insert(fields::CHECK_IN.into(), self.stay.start.into());
        doc.insert(fields::CHECK_OUT.into(), self.stay.end.into());
        doc.insert(fields::PRICE.into(), amount_value(self.price));
        doc.insert(fields::DEPOSIT.into(), amount_value(self.deposit));
        doc.insert(fields::STATUS.into(), BookingStatus::Confirmed.as_str().into());
        doc.insert(fields::CREATED_AT.into(), FieldValue::ServerTimestamp);
        if let Some(notes) = &self.notes {
            doc.insert(fields::NOTES.into(), notes.as_str().into());
        }
        doc
    }
}

/// Partial edit of a booking's non-status fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub guest_name: Option<String>,
    pub phone: Option<String>,
    pub check_in: Option<Day>,
    pub check_out: Option<Day>,
    pub price: Option<u64>,
    pub deposit: Option<u64>,
    pub notes: Option<String>,
}

impl BookingPatch {
    pub const EDITABLE: [&'static str; 7] = [
        fields::GUEST_NAME,
        fields::PHONE,
        fields::CHECK_IN,
        fields::CHECK_OUT,
        fields::PRICE,
        fields::DEPOSIT,
        fields::NOTES,
    ];

    /// Build a patch from raw JSON fields. Any key outside
    /// [`Self::EDITABLE`] rejects the whole patch.
    pub fn from_json(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        let mut patch = BookingPatch::default();
        for (key, value) in raw {
            match key.as_str() {
                fields::GUEST_NAME => {
                    patch.guest_name = Some(json_text(fields::GUEST_NAME, value, MAX_NAME_LEN)?)
                }
                fields::PHONE => patch.phone = Some(json_text(fields::PHONE, value, MAX_PHONE_LEN)?),
                fields::CHECK_IN => patch.check_in = Some(json_day(fields::CHECK_IN, value)?),
                fields::CHECK_OUT => patch.check_out = Some(json_day(fields::CHECK_OUT, value)?),
                fields::PRICE => patch.price = Some(json_amount(fields::PRICE, value)?),
                fields::DEPOSIT => patch.deposit = Some(json_amount(fields::DEPOSIT, value)?),
                fields::NOTES => patch.notes = Some(json_notes(value)?),
                other => return Err(ValidationError::UnknownField(other.to_string())),
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == BookingPatch::default()
    }

    pub fn changes_dates(&self) -> bool {
        self.check_in.is_some() || self.check_out.is_some()
    }

    /// The booking as it would look after the patch.
    pub fn apply(&self, booking: &Booking) -> Booking {
        let mut next = booking.clone();
        if let Some(v) = &self.guest_name {
            next.guest_name = v.clone();
        }
        if let Some(v) = &self.phone {
            next.phone = v.clone();
        }
        if let Some(v) = self.check_in {
            next.check_in = v;
        }
        if let Some(v) = self.check_out {
            next.check_out = v;
        }
        if let Some(v) = self.price {
            next.price = v;
        }
        if let Some(v) = self.deposit {
            next.deposit = v;
        }
        if let Some(v) = &self.notes {
            next.notes = Some(v.clone());
        }
        next
    }

    pub fn to_fields(&self) -> Document {
        let mut doc = Document::new();
        if let Some(v) = &self.guest_name {
            doc.insert(fields::GUEST_NAME.into(), v.as_str().into());
        }
        if let Some(v) = &self.phone {
            doc.insert(fields::PHONE.into(), v.as_str().into());
        }
        if let Some(v) = self.check_in {
            doc.insert(fields::CHECK_IN.into(), v.into());
        }
        if let Some(v) = self.check_out {
            doc.insert(fields::CHECK_OUT.into(), v.into());
        }
        if let Some(v) = self.price {
            doc.insert(fields::PRICE.into(), amount_value(v));
        }
        if let Some(v) = self.deposit {
            doc.insert(fields::DEPOSIT.into(), amount_value(v));
        }
        if let Some(v) = &self.notes {
            doc.insert(fields::NOTES.into(), v.as_str().into());
        }
        doc
    }
}

/// Blank strings count as missing.
fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn check_amount(field: &'static str, amount: u64) -> Result<(), ValidationError> {
    if amount > MAX_AMOUNT {
        return Err(ValidationError::AmountTooLarge { field, max: MAX_AMOUNT });
    }
    Ok(())
}

fn json_text(field: &'static str, value: &Value, max: usize) -> Result<String, ValidationError> {
    let text = value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::InvalidField {
            field,
            expected: "non-empty string",
        })?;
    check_len(field, text, max)?;
    Ok(text.to_string())
}

fn json_notes(value: &Value) -> Result<String, ValidationError> {
    let notes = value.as_str().ok_or(ValidationError::InvalidField {
        field: fields::NOTES,
        expected: "string",
    })?;
    check_len(fields::NOTES, notes, MAX_NOTES_LEN)?;
    Ok(notes.to_string())
}

fn json_day(field: &'static str, value: &Value) -> Result<Day, ValidationError> {
    let raw = value.as_str().ok_or(ValidationError::InvalidField {
        field,
        expected: "YYYY-MM-DD string",
    })?;
    Day::parse(field, raw)
}

fn json_amount(field: &'static str, value: &Value) -> Result<u64, ValidationError> {
    let amount = value.as_u64().ok_or(ValidationError::InvalidField {
        field,
        expected: "non-negative integer",
    })?;
    check_amount(field, amount)?;
    Ok(amount)
}

// ── Views ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub check_in: Day,
    pub check_out: Day,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSchedule {
    pub room_id: String,
    pub available: bool,
    pub bookings: Vec<ScheduleEntry>,
}
