//! Concurrency tests for the snapshot store.
//!
//! A writer commits tagged snapshots while readers hammer every read path.
//! Each snapshot carries its sequence number in every record, so a reader
//! seeing mixed tags or a shrinking sequence has observed a torn or stale
//! commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::json;

use screener::data::{DataStore, Record, RecordFilter, Snapshot, SourceStatus};

const COMMITS: u64 = 500;
const READERS: usize = 4;

fn tagged_snapshot(seq: u64) -> Snapshot {
    let records = (0..=(seq % 7))
        .map(|i| {
            Record::new(format!("SYM{i}"))
                .with_sector(if i % 2 == 0 { "Banking" } else { "IT" })
                .with_market_cap(1_000.0 * (i + 1) as f64)
                .with_extra("seq", json!(seq))
        })
        .collect();
    Snapshot::new(records, SourceStatus::Ok)
}

fn seq_of(snapshot: &Snapshot) -> u64 {
    let seq = snapshot.records[0].extra["seq"].as_u64().unwrap();
    for record in &snapshot.records {
        assert_eq!(record.extra["seq"].as_u64(), Some(seq), "torn snapshot");
    }
    assert_eq!(snapshot.len() as u64, seq % 7 + 1, "torn snapshot");
    seq
}

#[test]
fn test_readers_never_see_torn_or_stale_snapshots() {
    let store = Arc::new(DataStore::default());
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                let mut last_seen = None;
                while !done.load(Ordering::Acquire) {
                    if let Some(latest) = store.get_latest() {
                        let seq = seq_of(&latest);
                        if let Some(prev) = last_seen {
                            assert!(seq >= prev, "latest went backwards: {prev} -> {seq}");
                        }
                        last_seen = Some(seq);
                    }

                    let history = store.get_history(None);
                    assert!(history.len() <= 100);
                    let seqs: Vec<u64> = history.iter().map(|s| seq_of(s)).collect();
                    assert!(seqs.windows(2).all(|w| w[0] + 1 == w[1]), "history out of order");

                    for record in store.by_sector("Banking") {
                        assert_eq!(record.sector.as_deref(), Some("Banking"));
                    }
                    let _ = store.query(&RecordFilter::new().market_cap(Some(2_000.0), None));
                }
            });
        }

        scope.spawn(|| {
            for seq in 0..COMMITS {
                store.commit(tagged_snapshot(seq)).unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    let history = store.get_history(None);
    assert_eq!(history.len(), 100);
    assert_eq!(seq_of(&history[0]), COMMITS - 100);
    assert_eq!(seq_of(history.last().unwrap()), COMMITS - 1);
    assert_eq!(seq_of(&store.get_latest().unwrap()), COMMITS - 1);
}

#[test]
fn test_latest_is_shared_not_copied() {
    let store = DataStore::default();
    let committed = store.commit(tagged_snapshot(3)).unwrap();

    let a = store.get_latest().unwrap();
    let b = store.get_latest().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &committed));
    assert!(Arc::ptr_eq(store.get_history(Some(1)).last().unwrap(), &committed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_commits_visible_to_concurrent_readers() {
    use async_trait::async_trait;
    use screener::fetch::{FetchError, ScanFetcher};
    use screener::scheduler::ScanScheduler;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct SequenceFetcher(AtomicU64);

    #[async_trait]
    impl ScanFetcher for SequenceFetcher {
        fn name(&self) -> &'static str {
            "sequence"
        }

        async fn fetch(&self) -> Result<Snapshot, FetchError> {
            Ok(tagged_snapshot(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    let store = Arc::new(DataStore::new(10));
    let scheduler = ScanScheduler::new(Arc::clone(&store));
    scheduler.start(
        Arc::new(SequenceFetcher(AtomicU64::new(0))),
        Duration::from_millis(1),
    );

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut last_seen = 0;
                for _ in 0..200 {
                    if let Some(latest) = store.get_latest() {
                        let seq = seq_of(&latest);
                        assert!(seq >= last_seen);
                        last_seen = seq;
                    }
                    assert!(store.len() <= 10);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for reader in readers {
        reader.await.unwrap();
    }

    assert!(scheduler.stop(Duration::from_secs(5)).await);
    assert!(store.len() <= 10);
}
