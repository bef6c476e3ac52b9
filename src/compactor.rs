use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ledger::MemoryLedger;

/// Check the WAL once and compact it if `threshold` appends have piled up.
/// Returns whether a compaction ran.
pub async fn compact_if_due(ledger: &MemoryLedger, threshold: u64) -> bool {
    let appends = ledger.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            debug!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL short.
pub async fn run_compactor(ledger: Arc<MemoryLedger>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Collection, Document, LedgerStore, Mutation};

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let dir = std::env::temp_dir().join("hostel_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("threshold.wal");
        let _ = std::fs::remove_file(&path);

        let ledger = MemoryLedger::open(&path).unwrap();
        for _ in 0..3 {
            ledger
                .commit(vec![], vec![Mutation::Set {
                    collection: Collection::Rooms,
                    id: "101".into(),
                    data: Document::new(),
                }])
                .await
                .unwrap();
        }

        assert!(!compact_if_due(&ledger, 4).await);
        assert!(compact_if_due(&ledger, 3).await);
        assert_eq!(ledger.appends_since_compact().await, 0);
        let _ = std::fs::remove_file(&path);
    }
}
