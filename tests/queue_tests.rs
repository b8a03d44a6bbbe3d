mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use polycopy::models::{DlqSource, Side};
use polycopy::queue::ops::{self, PurgeScope, ReplayOptions};
use polycopy::queue::{
    now_ms, JobQueue, MemoryQueue, NackOutcome, QueueBackend, QueueError, QueueSettings, REASON_EXECUTION_ERROR,
    REASON_LIVENESS_TIMEOUT,
};

const CLAIM_WAIT: Duration = Duration::from_millis(50);

fn settings(max_size: usize) -> QueueSettings {
    QueueSettings {
        max_size,
        max_attempts: 2,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        ..QueueSettings::default()
    }
}

fn over(backend: Arc<dyn QueueBackend>, max_size: usize) -> JobQueue {
    JobQueue::new(backend, settings(max_size))
}

async fn capacity_scenario(queue: JobQueue) {
    for _ in 0..10 {
        queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    }
    let first = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    queue.claim(CLAIM_WAIT).await.unwrap().unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 8);
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.occupancy(), 10);

    // pending + in-flight at the limit: the 11th push is refused
    let err = queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap_err();
    assert!(matches!(err, QueueError::Full { occupancy: 10, max: 10 }));

    assert!(queue.ack(&first.token).await.unwrap());
    queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    assert_eq!(queue.stats().await.unwrap().occupancy(), 10);
    assert!(queue.enqueue(intent(Side::Buy, "10", "0.5")).await.is_err());
}

async fn zero_capacity_refuses_everything(queue: JobQueue) {
    let err = queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap_err();
    assert!(matches!(err, QueueError::Full { occupancy: 0, max: 0 }));
    assert_eq!(queue.stats().await.unwrap().occupancy(), 0);
}

async fn retry_then_dead_letter(queue: JobQueue) {
    let copy = intent(Side::Buy, "10", "0.5");
    let key = copy.idempotency_key.clone();
    queue.enqueue(copy).await.unwrap();

    let claimed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    assert_eq!(claimed.queue_attempt, 0);
    let outcome = queue.nack(&claimed.token, REASON_EXECUTION_ERROR, None).await.unwrap();
    assert!(matches!(outcome, NackOutcome::Retrying { attempt: 1, .. }));
    assert_eq!(queue.stats().await.unwrap().delayed, 1);

    // nothing is claimable until the delay elapses
    assert!(queue.claim(Duration::ZERO).await.unwrap().is_none());
    assert_eq!(queue.promote_due(now_ms() + 1_000).await.unwrap(), 1);

    let again = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    assert_eq!(again.queue_attempt, 1);
    assert_eq!(again.payload.idempotency_key, key);

    let outcome = queue
        .nack(&again.token, REASON_EXECUTION_ERROR, Some("rpc down".into()))
        .await
        .unwrap();
    assert_eq!(outcome, NackOutcome::DeadLettered { attempt: 2 });

    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.pending, stats.in_flight, stats.delayed, stats.dlq), (0, 0, 0, 1));

    let rows = ops::peek(&queue, 10).await.unwrap();
    let dead = rows[0].entry.as_ref().unwrap();
    assert_eq!(dead.reason, REASON_EXECUTION_ERROR);
    assert_eq!(dead.source, DlqSource::Nack);
    assert_eq!(dead.detail.as_deref(), Some("rpc down"));

    // replay mints a new token, keeps the key and resets the attempt counter
    let summary = ops::replay(
        &queue,
        &ReplayOptions {
            limit: 10,
            reason: Some(REASON_EXECUTION_ERROR.into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!((summary.matched, summary.replayed), (1, 1));

    let replayed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    assert!(replayed.replayed);
    assert_eq!(replayed.queue_attempt, 0);
    assert_ne!(replayed.token, again.token);
    assert_eq!(replayed.payload.idempotency_key, key);
    assert_eq!(queue.stats().await.unwrap().dlq, 0);
}

async fn stale_claims_are_reclaimed(queue: JobQueue) {
    queue.enqueue(intent(Side::Sell, "10", "0.5")).await.unwrap();
    let claimed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();

    assert!(queue.reclaim_stale(now_ms()).await.unwrap().is_empty());

    let moved = queue.reclaim_stale(now_ms() + 301_000).await.unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].reason, REASON_LIVENESS_TIMEOUT);
    assert_eq!(moved[0].source, DlqSource::Reclaim);
    assert_eq!(moved[0].entry.token, claimed.token);

    // a late ack from the stalled worker finds nothing
    assert!(!queue.ack(&claimed.token).await.unwrap());
    assert_eq!(queue.stats().await.unwrap().dlq, 1);
}

#[tokio::test]
async fn test_capacity_counts_in_flight_entries() {
    capacity_scenario(over(Arc::new(MemoryQueue::new()), 10)).await;
}

#[tokio::test]
async fn test_zero_capacity_refuses_everything() {
    zero_capacity_refuses_everything(over(Arc::new(MemoryQueue::new()), 0)).await;
}

#[tokio::test]
async fn test_nack_retries_then_dead_letters_and_replays() {
    retry_then_dead_letter(over(Arc::new(MemoryQueue::new()), 100)).await;
}

#[tokio::test]
async fn test_reclaim_moves_expired_claims_to_dlq() {
    stale_claims_are_reclaimed(over(Arc::new(MemoryQueue::new()), 100)).await;
}

#[tokio::test]
async fn test_fail_permanently_skips_retries() {
    let queue = over(Arc::new(MemoryQueue::new()), 100);
    queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    let claimed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();

    queue.fail_permanently(&claimed.token, "FATAL_EXECUTION_ERROR", None).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.in_flight, stats.delayed, stats.dlq), (0, 0, 1));
    let err = queue.nack(&claimed.token, REASON_EXECUTION_ERROR, None).await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownToken(_)));
}

#[tokio::test]
async fn test_replay_filters_and_counts_invalid_rows() {
    let backend = Arc::new(MemoryQueue::new());
    let queue = over(backend.clone(), 100);

    for reason in ["A", "B", "A"] {
        queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
        let claimed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
        queue.fail_permanently(&claimed.token, reason, None).await.unwrap();
    }
    backend.push_dlq_raw("{not json");

    let rows = ops::peek(&queue, 10).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows[3].entry.is_none());
    assert_eq!(rows[3].index, 3);

    let dry = ops::replay(
        &queue,
        &ReplayOptions {
            limit: 10,
            reason: Some("A".into()),
            dry_run: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!((dry.scanned, dry.matched, dry.replayed, dry.skipped, dry.invalid), (4, 2, 2, 1, 1));
    assert_eq!(queue.stats().await.unwrap().dlq, 4);

    let kept = ops::replay(
        &queue,
        &ReplayOptions {
            limit: 10,
            reason: Some("B".into()),
            keep_attempt: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(kept.replayed, 1);
    let entry = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.queue_attempt, 1);
    assert_eq!(queue.stats().await.unwrap().dlq, 3);
}

#[tokio::test]
async fn test_replay_respects_capacity() {
    let queue = over(Arc::new(MemoryQueue::new()), 1);
    queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    let claimed = queue.claim(CLAIM_WAIT).await.unwrap().unwrap();
    queue.fail_permanently(&claimed.token, "A", None).await.unwrap();
    queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();

    let dry = ops::replay(
        &queue,
        &ReplayOptions {
            limit: 5,
            dry_run: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!((dry.capacity_blocked, dry.replayed), (1, 0));

    let summary = ops::replay(&queue, &ReplayOptions { limit: 5, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(summary.capacity_blocked, 1);
    assert_eq!(summary.replayed, 0);
    assert_eq!(queue.stats().await.unwrap().dlq, 1);
}

#[tokio::test]
async fn test_purge_drops_oldest_rows() {
    let backend = Arc::new(MemoryQueue::new());
    let queue = over(backend.clone(), 100);
    for i in 0..5 {
        backend.push_dlq_raw(format!("row-{i}"));
    }
    queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();

    let dry = ops::purge(&queue, PurgeScope::Oldest(2), true).await.unwrap();
    assert_eq!((dry.before, dry.removed, dry.remaining), (5, 2, 3));
    assert_eq!(queue.stats().await.unwrap().dlq, 5);

    let real = ops::purge(&queue, PurgeScope::Oldest(2), false).await.unwrap();
    assert_eq!(real.remaining, 3);
    let rows = ops::peek(&queue, 10).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].index, 0);

    let all = ops::purge(&queue, PurgeScope::All, false).await.unwrap();
    assert_eq!((all.removed, all.remaining), (3, 0));
    // pending work is untouched
    assert_eq!(queue.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_claim_waits_for_enqueue() {
    let queue = over(Arc::new(MemoryQueue::new()), 100);
    let producer = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        producer.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    });

    let claimed = queue.claim(Duration::from_secs(2)).await.unwrap();
    assert!(claimed.is_some());
}

// Same scenarios against a real Redis when TEST_REDIS_URL is set.

#[tokio::test]
async fn test_redis_capacity_counts_in_flight_entries() {
    let Some(redis) = test_redis_queue().await else {
        return;
    };
    capacity_scenario(over(Arc::new(redis), 10)).await;
}

#[tokio::test]
async fn test_redis_zero_capacity_refuses_everything() {
    let Some(redis) = test_redis_queue().await else {
        return;
    };
    zero_capacity_refuses_everything(over(Arc::new(redis), 0)).await;
}

#[tokio::test]
async fn test_redis_nack_retries_then_dead_letters_and_replays() {
    let Some(redis) = test_redis_queue().await else {
        return;
    };
    retry_then_dead_letter(over(Arc::new(redis), 100)).await;
}

#[tokio::test]
async fn test_redis_reclaim_moves_expired_claims_to_dlq() {
    let Some(redis) = test_redis_queue().await else {
        return;
    };
    stale_claims_are_reclaimed(over(Arc::new(redis), 100)).await;
}
