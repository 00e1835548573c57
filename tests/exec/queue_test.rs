//! Tests for the push/pull event queue.

use codex_bridge::exec::event_queue;
use futures_util::StreamExt;
use tokio_test::task;
use tokio_test::{assert_pending, assert_ready_eq};

#[test]
fn push_wakes_pending_consumer() {
    let (tx, mut rx) = event_queue::<u32, String>();

    {
        let mut next = task::spawn(rx.next());
        assert_pending!(next.poll());

        assert!(tx.push(1));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(Ok(1)));
    }

    assert_eq!(rx.buffered(), 0);
}

#[test]
fn end_wakes_pending_consumer() {
    let (tx, mut rx) = event_queue::<u32, String>();
    let mut next = task::spawn(rx.next());
    assert_pending!(next.poll());

    assert!(tx.end());
    assert!(next.is_woken());
    assert_ready_eq!(next.poll(), None);
}

#[test]
fn buffered_items_precede_handoff() {
    let (tx, mut rx) = event_queue::<u32, String>();
    tx.push(1);
    tx.push(2);

    let mut results = Vec::new();
    for _ in 0..2 {
        let mut next = task::spawn(rx.next());
        match next.poll() {
            std::task::Poll::Ready(Some(Ok(v))) => results.push(v),
            other => panic!("Expected buffered item, got {other:?}"),
        }
    }

    let mut next = task::spawn(rx.next());
    assert_pending!(next.poll());
    tx.push(3);
    assert_ready_eq!(next.poll(), Some(Ok(3)));
    drop(next);

    assert_eq!(results, vec![1, 2]);
}

#[test]
fn item_survives_abandoned_next() {
    let (tx, mut rx) = event_queue::<u32, String>();

    let mut next = task::spawn(rx.next());
    assert_pending!(next.poll());
    assert!(tx.push(7));
    drop(next);

    assert!(tx.end());
    let mut next = task::spawn(rx.next());
    assert_ready_eq!(next.poll(), Some(Ok(7)));
    drop(next);

    let mut next = task::spawn(rx.next());
    assert_ready_eq!(next.poll(), None);
}

#[test]
fn error_survives_abandoned_next() {
    let (tx, mut rx) = event_queue::<u32, String>();

    let mut next = task::spawn(rx.next());
    assert_pending!(next.poll());
    assert!(tx.fail("exit 2".to_string()));
    drop(next);

    assert!(!tx.end());
    let mut next = task::spawn(rx.next());
    assert_ready_eq!(next.poll(), Some(Err("exit 2".to_string())));
    drop(next);

    let mut next = task::spawn(rx.next());
    assert_ready_eq!(next.poll(), None);
}

#[tokio::test]
async fn next_inside_timeout_loses_nothing() {
    let (tx, mut rx) = event_queue::<u32, String>();

    let producer = tokio::spawn(async move {
        for i in 0..20 {
            tx.push(i);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        tx.fail("done badly".to_string());
    });

    let mut seen = Vec::new();
    let mut error = None;
    loop {
        match tokio::time::timeout(std::time::Duration::from_millis(1), rx.next()).await {
            Err(_) => continue,
            Ok(Some(Ok(v))) => seen.push(v),
            Ok(Some(Err(e))) => error = Some(e),
            Ok(None) => break,
        }
    }
    producer.await.unwrap();

    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    assert_eq!(error.as_deref(), Some("done badly"));
}

#[tokio::test]
async fn error_after_events_is_delivered_last() {
    let (tx, rx) = event_queue::<&'static str, String>();
    tx.push("a");
    tx.push("b");
    tx.fail("exit 2".to_string());
    tx.end();
    tx.push("c");

    let results: Vec<_> = rx.into_stream().collect().await;
    assert_eq!(
        results,
        vec![Ok("a"), Ok("b"), Err("exit 2".to_string())]
    );
}

#[tokio::test]
async fn slow_consumer_receives_everything_in_order() {
    let (tx, mut rx) = event_queue::<usize, String>();

    let producer = tokio::spawn(async move {
        for i in 0..500 {
            tx.push(i);
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
        tx.end();
    });

    let mut expected = 0;
    while let Some(item) = rx.next().await {
        assert_eq!(item.unwrap(), expected);
        expected += 1;
        if expected % 100 == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
    assert_eq!(expected, 500);
    producer.await.unwrap();
}
