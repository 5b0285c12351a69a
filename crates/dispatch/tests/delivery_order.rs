//! Integration tests for the delivery queue: chained-batch ordering,
//! transient retry with backoff, and attempt exhaustion.
//!
//! These drive the [`DeliveryQueue`] directly; no router or fleet is
//! involved.

mod common;

use std::sync::Arc;

use easel_dispatch::{DeliveryError, DeliveryItem, DeliveryQueue, DeliverySink};
use easel_endpoint::InvokeResult;

use common::*;

fn queue(sink: &Arc<RecordingSink>) -> Arc<DeliveryQueue> {
    init_tracing();
    DeliveryQueue::new(
        Arc::clone(sink) as Arc<dyn DeliverySink>,
        test_config(),
    )
}

fn result_item(job: easel_core::Job) -> DeliveryItem {
    let content = format!("result for {}", job.id);
    DeliveryItem::result(
        job,
        InvokeResult {
            content,
            attachments: Vec::new(),
        },
    )
}

// ---------------------------------------------------------------------------
// Chained ordering
// ---------------------------------------------------------------------------

/// Results of a three-job chain deliver in chain order even when they
/// complete (and enqueue) in reverse.
#[tokio::test(start_paused = true)]
async fn chained_items_deliver_in_chain_order() {
    let sink = Arc::new(RecordingSink::new());
    let queue = queue(&sink);

    let j1 = draw_job(1, None);
    let j2 = draw_job(1, None).chain_after(&j1);
    let j3 = draw_job(1, None).chain_after(&j2);
    let (id1, id2, id3) = (j1.id, j2.id, j3.id);

    // Completion order: J3, J2, then J1 last.
    queue.enqueue(result_item(j3)).await;
    queue.enqueue(result_item(j2)).await;
    queue.enqueue(result_item(j1)).await;

    wait_until(|| sink.delivered().len() == 3).await;
    assert_eq!(sink.delivered_ids(), vec![id1, id2, id3]);
    assert!(queue.is_empty().await);
}

// ---------------------------------------------------------------------------
// Transient failures
// ---------------------------------------------------------------------------

/// A transient failure retries the same item after a backoff; the item is
/// delivered on the second attempt.
#[tokio::test(start_paused = true)]
async fn transient_failure_retries_same_item() {
    let sink = Arc::new(RecordingSink::new());
    sink.fail_next(DeliveryError::Transient("connection reset".to_string()));
    let queue = queue(&sink);

    let job = draw_job(1, None);
    let job_id = job.id;
    queue.enqueue(result_item(job)).await;

    wait_until(|| sink.delivered().len() == 1).await;
    assert_eq!(sink.call_count(), 2);
    assert_eq!(sink.delivered_ids(), vec![job_id]);
}

/// After exhausting its attempts on transient failures, an item is
/// force-marked delivered and dropped, so a chained successor still
/// goes out.
#[tokio::test(start_paused = true)]
async fn exhausted_attempts_unblock_successors() {
    let sink = Arc::new(RecordingSink::new());
    for _ in 0..3 {
        sink.fail_next(DeliveryError::Transient("connection reset".to_string()));
    }
    let queue = queue(&sink);

    let j1 = draw_job(1, None);
    let j1_flag = j1.delivered.clone();
    let j2 = draw_job(1, None).chain_after(&j1);
    let j2_id = j2.id;

    queue.enqueue(result_item(j1)).await;
    queue.enqueue(result_item(j2)).await;

    wait_until(|| sink.delivered().len() == 1).await;
    // Three failed attempts for J1, then J2's single success.
    assert_eq!(sink.call_count(), 4);
    assert_eq!(sink.delivered_ids(), vec![j2_id]);
    // The swallowed item still counts as delivered for chain purposes.
    assert!(j1_flag.is_set());
    assert!(queue.is_empty().await);
}

// ---------------------------------------------------------------------------
// Permanent failures
// ---------------------------------------------------------------------------

/// A permanent failure drops the item immediately but still marks its job
/// delivered so the chain moves on.
#[tokio::test(start_paused = true)]
async fn permanent_failure_drops_item_and_unblocks_chain() {
    let sink = Arc::new(RecordingSink::new());
    sink.fail_next(DeliveryError::Permanent("forbidden".to_string()));
    let queue = queue(&sink);

    let j1 = draw_job(1, None);
    let j2 = draw_job(1, None).chain_after(&j1);
    let j2_id = j2.id;

    queue.enqueue(result_item(j1)).await;
    queue.enqueue(result_item(j2)).await;

    wait_until(|| sink.delivered().len() == 1).await;
    assert_eq!(sink.call_count(), 2);
    assert_eq!(sink.delivered_ids(), vec![j2_id]);
}

// ---------------------------------------------------------------------------
// Lazy worker
// ---------------------------------------------------------------------------

/// The drain worker exits when the queue empties and restarts for the
/// next enqueue.
#[tokio::test(start_paused = true)]
async fn worker_restarts_after_draining() {
    let sink = Arc::new(RecordingSink::new());
    let queue = queue(&sink);

    queue.enqueue(result_item(draw_job(1, None))).await;
    wait_until(|| sink.delivered().len() == 1).await;
    assert!(queue.is_empty().await);

    queue.enqueue(result_item(draw_job(1, None))).await;
    wait_until(|| sink.delivered().len() == 2).await;
    assert!(queue.is_empty().await);
}
