use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    now_ms, Collection, CommitRecord, Document, Filter, LedgerStore, Mutation, ReadStamp,
    Snapshot, StoreError, Wal,
};

#[derive(Debug, Clone)]
struct Stored {
    version: u64,
    data: Document,
}

/// In-memory document store with optimistic transactions.
///
/// Commits are serialised behind the WAL mutex: read stamps are validated,
/// the commit is appended and fsynced, then applied. Documents are only ever
/// visible once their commit is durable.
pub struct MemoryLedger {
    rooms: DashMap<String, Stored>,
    bookings: DashMap<String, Stored>,
    /// `None` for an ephemeral ledger. Held for the whole commit.
    wal: Mutex<Option<Wal>>,
}

impl MemoryLedger {
    /// A ledger that keeps nothing on disk.
    pub fn ephemeral() -> Self {
        Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            wal: Mutex::new(None),
        }
    }

    /// Open the ledger backed by the WAL at `path`, replaying what is there.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let ledger = Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            wal: Mutex::new(Some(wal)),
        };
        for record in &records {
            for write in &record.writes {
                ledger.apply(write);
            }
        }
        info!(
            "ledger replayed {} commits from {}: {} rooms, {} bookings",
            records.len(),
            path.display(),
            ledger.rooms.len(),
            ledger.bookings.len()
        );
        Ok(ledger)
    }

    fn docs(&self, collection: Collection) -> &DashMap<String, Stored> {
        match collection {
            Collection::Rooms => &self.rooms,
            Collection::Bookings => &self.bookings,
        }
    }

    pub fn document_count(&self, collection: Collection) -> usize {
        self.docs(collection).len()
    }

    /// Apply a resolved write. Caller holds the WAL mutex (or is replaying).
    fn apply(&self, write: &Mutation) {
        match write {
            Mutation::Set { collection, id, data } => {
                self.docs(*collection)
                    .entry(id.clone())
                    .and_modify(|stored| {
                        stored.version += 1;
                        stored.data = data.clone();
                    })
                    .or_insert_with(|| Stored {
                        version: 1,
                        data: data.clone(),
                    });
            }
            Mutation::Update { collection, id, fields } => {
                if let Some(mut stored) = self.docs(*collection).get_mut(id) {
                    stored.version += 1;
                    stored
                        .data
                        .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
    }

    /// Every `Update` must target a document that exists now or is created
    /// earlier in the same batch.
    fn check_update_targets(&self, writes: &[Mutation]) -> Result<(), StoreError> {
        for (i, write) in writes.iter().enumerate() {
            if let Mutation::Update { collection, id, .. } = write {
                let created_in_batch = writes[..i].iter().any(|w| {
                    matches!(w, Mutation::Set { .. }) && w.target() == (*collection, id.as_str())
                });
                if !created_in_batch && !self.docs(*collection).contains_key(id) {
                    return Err(StoreError::MissingDocument {
                        collection: *collection,
                        id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The current state as one `Set` per live document, rooms first.
    fn snapshot_records(&self) -> Vec<CommitRecord> {
        let now = now_ms();
        let mut records = Vec::new();
        for collection in [Collection::Rooms, Collection::Bookings] {
            let mut entries: Vec<(String, Document)> = self
                .docs(collection)
                .iter()
                .map(|e| (e.key().clone(), e.value().data.clone()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (id, data) in entries {
                records.push(CommitRecord {
                    committed_at: now,
                    writes: vec![Mutation::Set { collection, id, data }],
                });
            }
        }
        records
    }

    /// Rewrite the WAL with only what is needed to rebuild the current state.
    /// No commits can land while this runs.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut guard = self.wal.lock().await;
        let Some(wal) = guard.as_mut() else {
            return Ok(());
        };
        let records = self.snapshot_records();
        Wal::write_compact_file(wal.path(), &records)
            .and_then(|()| wal.swap_compact_file())
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!("WAL compacted to {} records", records.len());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn inject_wal_fault(&self, fault: Option<super::Fault>) {
        if let Some(wal) = self.wal.lock().await.as_mut() {
            wal.inject_fault(fault);
        }
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal
            .lock()
            .await
            .as_ref()
            .map_or(0, |wal| wal.appends_since_compact())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.docs(collection).get(id).map(|stored| Snapshot {
            id: id.to_string(),
            version: stored.version,
            data: stored.data.clone(),
        }))
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<Vec<Snapshot>, StoreError> {
        let mut hits: Vec<Snapshot> = self
            .docs(collection)
            .iter()
            .filter(|e| filters.iter().all(|f| f.matches(&e.value().data)))
            .map(|e| Snapshot {
                id: e.key().clone(),
                version: e.value().version,
                data: e.value().data.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn commit(&self, reads: Vec<ReadStamp>, mut writes: Vec<Mutation>) -> Result<(), StoreError> {
        let mut wal = self.wal.lock().await;

        for stamp in &reads {
            let current = self
                .docs(stamp.collection)
                .get(&stamp.id)
                .map(|stored| stored.version);
            if current != stamp.version {
                debug!(
                    "commit aborted: {}/{} moved from {:?} to {:?}",
                    stamp.collection, stamp.id, stamp.version, current
                );
                return Err(StoreError::Aborted);
            }
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.check_update_targets(&writes)?;

        let now = now_ms();
        for write in &mut writes {
            write.resolve_server_timestamps(now);
        }
        let record = CommitRecord {
            committed_at: now,
            writes,
        };

        if let Some(wal) = wal.as_mut() {
            let started = Instant::now();
            wal.append(&record)
                .map_err(|e| StoreError::Wal(e.to_string()))?;
            metrics::histogram!(crate::observability::WAL_COMMIT_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        for write in &record.writes {
            self.apply(write);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::ledger::{Fault, FieldValue, Transaction};

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hostel_test_ledger");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn room(status: &str) -> Document {
        let mut d = Document::new();
        d.insert("name".into(), "Room".into());
        d.insert("status".into(), status.into());
        d
    }

    fn status_of(snapshot: &Snapshot) -> &FieldValue {
        &snapshot.data["status"]
    }

    #[tokio::test]
    async fn set_then_get_bumps_version() {
        let ledger = MemoryLedger::ephemeral();
        let write = |status: &str| Mutation::Set {
            collection: Collection::Rooms,
            id: "101".into(),
            data: room(status),
        };
        ledger.commit(vec![], vec![write("available")]).await.unwrap();
        let first = ledger.get(Collection::Rooms, "101").await.unwrap().unwrap();
        assert_eq!(first.version, 1);

        ledger.commit(vec![], vec![write("booked")]).await.unwrap();
        let second = ledger.get(Collection::Rooms, "101").await.unwrap().unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(status_of(&second), &FieldValue::Str("booked".into()));
    }

    #[tokio::test]
    async fn stale_read_aborts_and_changes_nothing() {
        let ledger: Arc<MemoryLedger> = Arc::new(MemoryLedger::ephemeral());
        ledger
            .commit(vec![], vec![Mutation::Set {
                collection: Collection::Rooms,
                id: "101".into(),
                data: room("available"),
            }])
            .await
            .unwrap();

        let mut tx = Transaction::new(ledger.clone());
        tx.get(Collection::Rooms, "101").await.unwrap();

        // A concurrent writer lands first.
        let mut other = Transaction::new(ledger.clone());
        other.get(Collection::Rooms, "101").await.unwrap();
        other.update(Collection::Rooms, "101", room("booked"));
        other.commit().await.unwrap();

        let mut booking = Document::new();
        booking.insert("roomId".into(), "101".into());
        tx.set(Collection::Bookings, "b1", booking);
        tx.update(Collection::Rooms, "101", room("booked"));
        assert_eq!(tx.commit().await, Err(StoreError::Aborted));
        assert_eq!(ledger.document_count(Collection::Bookings), 0);
    }

    #[tokio::test]
    async fn absent_read_conflicts_with_concurrent_create() {
        let ledger: Arc<MemoryLedger> = Arc::new(MemoryLedger::ephemeral());
        let mut tx = Transaction::new(ledger.clone());
        assert!(tx.get(Collection::Rooms, "101").await.unwrap().is_none());

        ledger
            .commit(vec![], vec![Mutation::Set {
                collection: Collection::Rooms,
                id: "101".into(),
                data: room("available"),
            }])
            .await
            .unwrap();

        tx.set(Collection::Rooms, "101", room("booked"));
        assert_eq!(tx.commit().await, Err(StoreError::Aborted));
    }

    #[tokio::test]
    async fn update_of_missing_document_rejected() {
        let ledger = MemoryLedger::ephemeral();
        let result = ledger
            .commit(vec![], vec![Mutation::Update {
                collection: Collection::Bookings,
                id: "nope".into(),
                fields: room("cancelled"),
            }])
            .await;
        assert!(matches!(result, Err(StoreError::MissingDocument { .. })));
    }

    #[tokio::test]
    async fn read_after_write_rejected() {
        let ledger: Arc<MemoryLedger> = Arc::new(MemoryLedger::ephemeral());
        let mut tx = Transaction::new(ledger.clone());
        tx.set(Collection::Rooms, "101", room("available"));
        assert_eq!(
            tx.get(Collection::Rooms, "101").await,
            Err(StoreError::ReadAfterWrite)
        );
    }

    #[tokio::test]
    async fn query_applies_all_filters_in_id_order() {
        let ledger = MemoryLedger::ephemeral();
        let writes = ["103", "101", "102"]
            .iter()
            .map(|id| Mutation::Set {
                collection: Collection::Rooms,
                id: id.to_string(),
                data: room(if *id == "102" { "booked" } else { "available" }),
            })
            .collect();
        ledger.commit(vec![], writes).await.unwrap();

        let hits = ledger
            .query(Collection::Rooms, &[Filter::eq("status", "available")])
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "103"]);
    }

    #[tokio::test]
    async fn wal_replay_and_compaction_preserve_state() {
        let path = test_wal_path("replay_compact.wal");
        {
            let ledger = MemoryLedger::open(&path).unwrap();
            for status in ["available", "booked", "available", "booked"] {
                ledger
                    .commit(vec![], vec![Mutation::Set {
                        collection: Collection::Rooms,
                        id: "101".into(),
                        data: room(status),
                    }])
                    .await
                    .unwrap();
            }
            let mut fields = Document::new();
            fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
            ledger
                .commit(vec![], vec![Mutation::Update {
                    collection: Collection::Rooms,
                    id: "101".into(),
                    fields,
                }])
                .await
                .unwrap();
            assert_eq!(ledger.appends_since_compact().await, 5);
            ledger.compact().await.unwrap();
            assert_eq!(ledger.appends_since_compact().await, 0);
        }

        let reopened = MemoryLedger::open(&path).unwrap();
        let snap = reopened.get(Collection::Rooms, "101").await.unwrap().unwrap();
        assert_eq!(status_of(&snap), &FieldValue::Str("booked".into()));
        assert!(matches!(snap.data["createdAt"], FieldValue::Timestamp(_)));
        let _ = std::fs::remove_file(&path);
    }

    fn booking_set(id: &str, room_id: &str) -> Mutation {
        let mut data = Document::new();
        data.insert("roomId".into(), room_id.into());
        data.insert("status".into(), "confirmed".into());
        Mutation::Set {
            collection: Collection::Bookings,
            id: id.into(),
            data,
        }
    }

    #[tokio::test]
    async fn failed_wal_append_is_not_replayed() {
        let path = test_wal_path("failed_append.wal");
        {
            let ledger = MemoryLedger::open(&path).unwrap();
            ledger.commit(vec![], vec![booking_set("b0", "101")]).await.unwrap();

            ledger.inject_wal_fault(Some(Fault::FailedSync)).await;
            let failed = ledger.commit(vec![], vec![booking_set("failed", "101")]).await;
            assert!(matches!(failed, Err(StoreError::Wal(_))));
            assert!(ledger.get(Collection::Bookings, "failed").await.unwrap().is_none());

            ledger.inject_wal_fault(Some(Fault::TornWrite)).await;
            let torn = ledger.commit(vec![], vec![booking_set("torn", "101")]).await;
            assert!(matches!(torn, Err(StoreError::Wal(_))));

            ledger.commit(vec![], vec![booking_set("ok", "102")]).await.unwrap();
        }

        let reopened = MemoryLedger::open(&path).unwrap();
        assert!(reopened.get(Collection::Bookings, "failed").await.unwrap().is_none());
        assert!(reopened.get(Collection::Bookings, "torn").await.unwrap().is_none());
        assert!(reopened.get(Collection::Bookings, "b0").await.unwrap().is_some());
        assert!(reopened.get(Collection::Bookings, "ok").await.unwrap().is_some());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn poisoned_wal_refuses_commits_until_compacted() {
        let path = test_wal_path("poisoned.wal");
        {
            let ledger = MemoryLedger::open(&path).unwrap();
            ledger.commit(vec![], vec![booking_set("b0", "101")]).await.unwrap();

            ledger.inject_wal_fault(Some(Fault::StuckRollback)).await;
            assert!(ledger.commit(vec![], vec![booking_set("stuck", "101")]).await.is_err());
            ledger.inject_wal_fault(None).await;

            let refused = ledger.commit(vec![], vec![booking_set("later", "102")]).await;
            assert!(matches!(refused, Err(StoreError::Wal(_))));
            assert_eq!(ledger.document_count(Collection::Bookings), 1);

            ledger.compact().await.unwrap();
            ledger.commit(vec![], vec![booking_set("after", "102")]).await.unwrap();
        }

        let reopened = MemoryLedger::open(&path).unwrap();
        assert!(reopened.get(Collection::Bookings, "stuck").await.unwrap().is_none());
        assert!(reopened.get(Collection::Bookings, "after").await.unwrap().is_some());
        assert_eq!(reopened.document_count(Collection::Bookings), 2);
        let _ = std::fs::remove_file(&path);
    }
}
