mod memory;
mod wal;

pub use memory::MemoryLedger;
pub use wal::Wal;
#[cfg(test)]
pub(crate) use wal::Fault;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Ms;

/// The two collections the ledger holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Rooms,
    Bookings,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Rooms => "rooms",
            Collection::Bookings => "bookings",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Int(i64),
    Str(String),
    /// Unix milliseconds.
    Timestamp(Ms),
    /// Write-only sentinel, replaced by the commit time when the write lands.
    ServerTimestamp,
}

impl FieldValue {
    /// Ordering between two values of the same kind. Values of different kinds
    /// are incomparable, so range filters never match across kinds.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Some(Ordering::Equal),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

pub type Document = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ge,
    Le,
    In,
}

/// `(field, operator, value)` query predicate. `In` matches against `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub values: Vec<FieldValue>,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<FieldValue>) -> Self {
        Self { field: field.to_string(), op: Op::Eq, values: vec![value.into()] }
    }

    pub fn ge(field: &str, value: impl Into<FieldValue>) -> Self {
        Self { field: field.to_string(), op: Op::Ge, values: vec![value.into()] }
    }

    pub fn le(field: &str, value: impl Into<FieldValue>) -> Self {
        Self { field: field.to_string(), op: Op::Le, values: vec![value.into()] }
    }

    pub fn any_of(field: &str, values: Vec<FieldValue>) -> Self {
        Self { field: field.to_string(), op: Op::In, values }
    }

    /// Documents missing the field never match.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            Op::In => self.values.iter().any(|v| v == actual),
            op => {
                let Some(expected) = self.values.first() else {
                    return false;
                };
                match (op, actual.compare(expected)) {
                    (Op::Eq, Some(ord)) => ord == Ordering::Equal,
                    (Op::Ge, Some(ord)) => ord != Ordering::Less,
                    (Op::Le, Some(ord)) => ord != Ordering::Greater,
                    _ => false,
                }
            }
        }
    }
}

/// A document as read from the store, with the version a transaction must
/// still observe at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub version: u64,
    pub data: Document,
}

/// What a transaction saw when it read a document. `version: None` means the
/// document was absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStamp {
    pub collection: Collection,
    pub id: String,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Create or fully replace a document.
    Set {
        collection: Collection,
        id: String,
        data: Document,
    },
    /// Merge fields into an existing document.
    Update {
        collection: Collection,
        id: String,
        fields: Document,
    },
}

impl Mutation {
    pub fn target(&self) -> (Collection, &str) {
        match self {
            Mutation::Set { collection, id, .. } | Mutation::Update { collection, id, .. } => {
                (*collection, id)
            }
        }
    }

    fn payload_mut(&mut self) -> &mut Document {
        match self {
            Mutation::Set { data, .. } => data,
            Mutation::Update { fields, .. } => fields,
        }
    }

    pub(crate) fn resolve_server_timestamps(&mut self, now: Ms) {
        for value in self.payload_mut().values_mut() {
            if *value == FieldValue::ServerTimestamp {
                *value = FieldValue::Timestamp(now);
            }
        }
    }
}

/// One committed transaction: the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub committed_at: Ms,
    pub writes: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A document read by the transaction changed before commit.
    Aborted,
    /// `update` aimed at a document that does not exist.
    MissingDocument { collection: Collection, id: String },
    /// Transactions must do all reads before the first write.
    ReadAfterWrite,
    /// A stored document could not be decoded into its model type.
    Corrupt {
        collection: Collection,
        id: String,
        reason: String,
    },
    Wal(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Aborted)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Aborted => write!(f, "transaction aborted by a concurrent write"),
            StoreError::MissingDocument { collection, id } => {
                write!(f, "cannot update missing document {collection}/{id}")
            }
            StoreError::ReadAfterWrite => write!(f, "transaction read after write"),
            StoreError::Corrupt { collection, id, reason } => {
                write!(f, "corrupt document {collection}/{id}: {reason}")
            }
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Transactional document store the booking core is written against.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Latest committed state of one document.
    ///
    /// Only the single document is read atomically. Outside a transaction,
    /// two `get`s may straddle a commit and see, for example, a confirmed
    /// booking while its room is still `available`. Callers that need a
    /// consistent pair read both through a [`Transaction`].
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// All documents matching every filter, ordered by id.
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<Vec<Snapshot>, StoreError>;

    /// Apply `writes` atomically iff every read stamp still holds.
    /// Fails with [`StoreError::Aborted`] otherwise, leaving the store untouched.
    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<Mutation>) -> Result<(), StoreError>;
}

/// Read-then-write unit of work. Reads are recorded with their versions,
/// writes are buffered until [`Transaction::commit`].
pub struct Transaction {
    store: Arc<dyn LedgerStore>,
    reads: Vec<ReadStamp>,
    writes: Vec<Mutation>,
}

impl Transaction {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub async fn get(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        let snapshot = self.store.get(collection, id).await?;
        self.reads.push(ReadStamp {
            collection,
            id: id.to_string(),
            version: snapshot.as_ref().map(|s| s.version),
        });
        Ok(snapshot)
    }

    /// Query inside the transaction. Every hit is stamped, so a concurrent
    /// change to any of them aborts the commit.
    pub async fn query(
        &mut self,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<Vec<Snapshot>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        let hits = self.store.query(collection, filters).await?;
        self.reads.extend(hits.iter().map(|s| ReadStamp {
            collection,
            id: s.id.clone(),
            version: Some(s.version),
        }));
        Ok(hits)
    }

    pub fn set(&mut self, collection: Collection, id: impl Into<String>, data: Document) {
        self.writes.push(Mutation::Set {
            collection,
            id: id.into(),
            data,
        });
    }

    pub fn update(&mut self, collection: Collection, id: impl Into<String>, fields: Document) {
        self.writes.push(Mutation::Update {
            collection,
            id: id.into(),
            fields,
        });
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.store.commit(self.reads, self.writes).await
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, FieldValue)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn string_range_filters_follow_iso_dates() {
        let d = doc(&[("checkIn", "2024-12-25".into())]);
        assert!(Filter::le("checkIn", "2024-12-27").matches(&d));
        assert!(Filter::le("checkIn", "2024-12-25").matches(&d));
        assert!(!Filter::le("checkIn", "2024-12-24").matches(&d));
        assert!(Filter::ge("checkIn", "2024-12-25").matches(&d));
        assert!(!Filter::ge("checkIn", "2025-01-01").matches(&d));
    }

    #[test]
    fn missing_field_never_matches() {
        let d = doc(&[("status", "confirmed".into())]);
        assert!(!Filter::eq("roomId", "101").matches(&d));
        assert!(!Filter::ge("checkOut", "2024-01-01").matches(&d));
    }

    #[test]
    fn in_filter_matches_any_listed_value() {
        let f = Filter::any_of("status", vec!["confirmed".into(), "pending".into()]);
        assert!(f.matches(&doc(&[("status", "pending".into())])));
        assert!(!f.matches(&doc(&[("status", "cancelled".into())])));
    }

    #[test]
    fn mixed_kinds_are_incomparable() {
        let d = doc(&[("price", FieldValue::Int(10))]);
        assert!(!Filter::eq("price", "10").matches(&d));
        assert!(Filter::ge("price", 5i64).matches(&d));
    }

    #[test]
    fn server_timestamp_resolved_in_place() {
        let mut m = Mutation::Update {
            collection: Collection::Bookings,
            id: "b1".into(),
            fields: doc(&[
                ("cancelledAt", FieldValue::ServerTimestamp),
                ("status", "cancelled".into()),
            ]),
        };
        m.resolve_server_timestamps(42);
        let Mutation::Update { fields, .. } = m else { unreachable!() };
        assert_eq!(fields["cancelledAt"], FieldValue::Timestamp(42));
        assert_eq!(fields["status"], FieldValue::Str("cancelled".into()));
    }
}
