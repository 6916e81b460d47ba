//! End-to-end upload scenarios
//!
//! Every participant runs on its own tokio task with an in-process collective
//! endpoint; all of them share one in-memory store.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use weave_core::collective::local::LocalGroup;
use weave_core::storage::{multipart, MemoryStore, ObjectStore};
use weave_core::{Layout, OpenOptions, Weave, WeaveConfig, WeaveError};

/// Run `work` once per participant and collect results in rank order
async fn run_group<F, Fut, T>(
    store: &Arc<MemoryStore>,
    participants: u32,
    config: WeaveConfig,
    work: F,
) -> (LocalGroup, Vec<T>)
where
    F: Fn(Weave) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let group = LocalGroup::new(participants);
    let mut handles = Vec::new();
    for endpoint in group.endpoints() {
        let weave = Weave::new(store.clone(), Arc::new(endpoint), config.clone());
        handles.push(tokio::spawn(work(weave)));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("participant task panicked"));
    }
    (group, results)
}

fn block(rank: u32, local: u64) -> Bytes {
    Bytes::from(format!("[r{}l{}]", rank, local))
}

/// Open, write `parts` blocks, close
async fn write_blocks(weave: Weave, key: &'static str, parts: u64) -> weave_core::Result<u64> {
    let mut handle = weave.open(key, OpenOptions::write()).await?;
    for local in 0..parts {
        handle.write(block(weave.rank(), local)).await?;
    }
    let written = handle.parts_written();
    handle.close().await?;
    Ok(written)
}

#[tokio::test]
async fn scenario_single_writer_three_parts() {
    let store = Arc::new(MemoryStore::new("weave"));
    let (_, results) = run_group(&store, 1, WeaveConfig::default(), |weave| {
        write_blocks(weave, "single", 3)
    })
    .await;

    assert_eq!(results[0].as_ref().unwrap(), &3);
    assert_eq!(
        store.object("single").unwrap(),
        Bytes::from_static(b"[r0l0][r0l1][r0l2]")
    );
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn scenario_three_writers_interleave() {
    let store = Arc::new(MemoryStore::new("weave"));
    let (group, results) = run_group(&store, 3, WeaveConfig::default(), |weave| {
        write_blocks(weave, "shared", 2)
    })
    .await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap(), &2);
    }
    assert!(group.abort_reason().is_none());
    assert_eq!(
        store.object("shared").unwrap(),
        Bytes::from_static(b"[r0l0][r1l0][r2l0][r0l1][r1l1][r2l1]")
    );
}

#[tokio::test]
async fn scenario_one_based_part_numbers() {
    let store = Arc::new(MemoryStore::new("weave"));
    let config = WeaveConfig {
        first_part_number: 1,
        ..WeaveConfig::default()
    };
    let (_, results) = run_group(&store, 2, config, |weave| write_blocks(weave, "one-based", 2)).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(
        store.object("one-based").unwrap(),
        Bytes::from_static(b"[r0l0][r1l0][r0l1][r1l1]")
    );
}

#[tokio::test]
async fn scenario_reset_of_missing_object() {
    let store = Arc::new(MemoryStore::new("weave"));
    assert!(store.object("fresh").is_none());

    let (_, results) = run_group(&store, 1, WeaveConfig::default(), |weave| async move {
        let handle = weave
            .open("fresh", OpenOptions::write().truncate(true))
            .await?;
        let session = handle.session().cloned();
        let during = weave.stat("fresh").await?;
        handle.close().await?;
        Ok::<_, WeaveError>((session, during))
    })
    .await;

    let (session, during) = results.into_iter().next().unwrap().unwrap();
    assert!(session.is_some());
    assert_eq!(during.unwrap().size, 0);
    assert_eq!(store.object("fresh").unwrap().len(), 0);
}

#[tokio::test]
async fn scenario_unequal_part_counts_fail_everyone() {
    let store = Arc::new(MemoryStore::new("weave"));
    let (group, results) = run_group(&store, 2, WeaveConfig::default(), |weave| {
        let parts = if weave.rank() == 0 { 2 } else { 3 };
        write_blocks(weave, "uneven", parts)
    })
    .await;

    for (rank, result) in results.iter().enumerate() {
        match result {
            Err(WeaveError::LedgerLengthMismatch { min: 2, max: 3, .. }) => {}
            other => panic!("rank {} expected ledger mismatch, got {:?}", rank, other),
        }
    }
    assert!(group.abort_reason().is_some());
    // Never finalized: the upload stays open and the object keeps its reset content.
    assert_eq!(store.open_uploads(), 1);
    assert_eq!(store.object("uneven").unwrap().len(), 0);
}

#[tokio::test]
async fn transport_failure_on_coordinator_aborts_all() {
    let store = Arc::new(MemoryStore::new("weave"));
    store.fail_on("POST uploads");

    let (group, results) = run_group(&store, 4, WeaveConfig::default(), |weave| {
        write_blocks(weave, "broken", 1)
    })
    .await;

    assert!(matches!(results[0], Err(WeaveError::Status { status: 500, .. })));
    for result in &results[1..] {
        assert!(matches!(result, Err(WeaveError::Aborted { .. })));
    }
    assert!(group.abort_reason().unwrap().contains("POST uploads"));
}

#[tokio::test]
async fn failed_finalize_aborts_all() {
    let store = Arc::new(MemoryStore::new("weave"));
    store.fail_on("POST complete");

    let (group, results) = run_group(&store, 3, WeaveConfig::default(), |weave| {
        write_blocks(weave, "unfinished", 1)
    })
    .await;

    assert!(matches!(
        results[0],
        Err(WeaveError::Status { op: "POST complete", status: 500, .. })
    ));
    for result in &results[1..] {
        assert!(matches!(result, Err(WeaveError::Aborted { .. })));
    }
    assert!(group.abort_reason().unwrap().contains("POST complete"));
    // Parts were uploaded but never assembled.
    assert_eq!(store.open_uploads(), 1);
    assert!(store.object("unfinished").unwrap().is_empty());
}

#[tokio::test]
async fn part_write_failure_aborts_close() {
    let store = Arc::new(MemoryStore::new("weave"));
    store.fail_on("PUT part");

    let (group, results) = run_group(&store, 3, WeaveConfig::default(), |weave| {
        write_blocks(weave, "no-parts", 1)
    })
    .await;

    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert!(err.is_transport() || matches!(err, WeaveError::Aborted { .. }));
    }
    assert!(group.abort_reason().is_some());
    assert!(store.object("no-parts").unwrap().is_empty());
}

#[tokio::test]
async fn malformed_session_response_aborts_all() {
    let store = Arc::new(MemoryStore::new("weave"));
    store.set_initiate_response("<InitiateMultipartUploadResult></InitiateMultipartUploadResult>");

    let (_, results) = run_group(&store, 2, WeaveConfig::default(), |weave| {
        write_blocks(weave, "malformed", 1)
    })
    .await;

    assert!(matches!(results[0], Err(WeaveError::MalformedSessionResponse { .. })));
    assert!(matches!(results[1], Err(WeaveError::Aborted { .. })));
}

#[tokio::test]
async fn oversized_upload_id_aborts_all() {
    let store = Arc::new(MemoryStore::new("weave"));
    let config = WeaveConfig {
        max_upload_id_len: 16,
        ..WeaveConfig::default()
    };
    store.set_initiate_response(multipart::render_initiate_response(
        "weave",
        "long-id",
        &"x".repeat(17),
    ));

    let (_, results) = run_group(&store, 2, config, |weave| write_blocks(weave, "long-id", 1)).await;

    assert!(matches!(
        results[0],
        Err(WeaveError::UploadIdTooLong { len: 17, max: 16 })
    ));
    assert!(matches!(results[1], Err(WeaveError::Aborted { .. })));
}

#[tokio::test]
async fn file_per_process_last_write_wins() {
    let store = Arc::new(MemoryStore::new("weave"));
    let config = WeaveConfig {
        layout: Layout::FilePerProcess,
        ..WeaveConfig::default()
    };

    let (_, results) = run_group(&store, 2, config, |weave| async move {
        let key = format!("own.{}", weave.rank());
        let mut handle = weave.open(&key, OpenOptions::write()).await?;
        for local in 0..3 {
            handle.write(block(weave.rank(), local)).await?;
        }
        assert!(handle.session().is_none());
        handle.close().await?;
        Ok::<_, WeaveError>(())
    })
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.object("own.0").unwrap(), block(0, 2));
    assert_eq!(store.object("own.1").unwrap(), block(1, 2));
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn read_back_finalized_object() {
    let store = Arc::new(MemoryStore::new("weave"));
    let (_, results) = run_group(&store, 2, WeaveConfig::default(), |weave| async move {
        write_blocks(weave, "readable", 1).await
    })
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let (_, reads) = run_group(&store, 2, WeaveConfig::default(), |weave| async move {
        let handle = weave.open("readable", OpenOptions::read()).await?;
        let offset = weave.rank() as u64 * 6;
        let data = handle.read(offset, 6).await?;
        handle.close().await?;
        Ok::<_, WeaveError>(data)
    })
    .await;

    assert_eq!(reads[0].as_ref().unwrap(), &block(0, 0));
    assert_eq!(reads[1].as_ref().unwrap(), &block(1, 0));
    assert!(store.head("readable").await.unwrap().is_some());
}
