//! End-to-end: backfill a draw, then an appeal arrives live.

use alloy::primitives::Address;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use juror_notify::chain::memory::{appeal_event, draw_event};
use juror_notify::chain::{MemoryEventSource, Period};
use juror_notify::notify::{
    AcknowledgmentStore, Acknowledger, Category, Deriver, FileAckStore, MemoryAckStore,
    Notification, NotificationStream, NotificationView, Phase, StreamOptions, TokenSymbols,
};

const DEPLOY_BLOCK: u64 = 100;
const HEAD: u64 = 1_000;

fn deriver() -> Deriver {
    Deriver::new(
        TokenSymbols {
            native: "ETH".to_string(),
            stake: "PNK".to_string(),
        },
        DEPLOY_BLOCK,
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<NotificationView>,
    pred: impl Fn(&NotificationView) -> bool,
) -> NotificationView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            rx.changed().await.expect("stream dropped");
        }
    })
    .await
    .expect("timed out waiting for view")
}

/// Dispute #7: B drawn in round 1 (before the backfill window), A drawn in
/// round 2 (inside it). Three rounds so far, not executed.
fn dispute_seven(a: Address, b: Address) -> Arc<MemoryEventSource> {
    let source = MemoryEventSource::new(HEAD);
    let now = Utc::now();
    source.set_dispute(7, Period::Vote, 3);
    source.push_event(draw_event(500, 0, 0, 7, 1, b), now);
    source.push_event(draw_event(900, 2, 1, 7, 2, a), now);
    source
}

#[tokio::test]
async fn drawn_then_appealed() {
    let a = Address::repeat_byte(0xaa);
    let b = Address::repeat_byte(0xbb);
    let source = dispute_seven(a, b);
    let store = Arc::new(MemoryAckStore::new());

    let alerts: Arc<Mutex<Vec<Vec<Category>>>> = Arc::default();
    let sink = alerts.clone();
    let options = StreamOptions::default()
        .live_from_block(HEAD + 1)
        .on_new(Arc::new(move |batch: &[Notification], _ack: &Acknowledger| {
            sink.lock()
                .unwrap()
                .push(batch.iter().map(|n| n.category).collect());
        }));

    let stream = NotificationStream::new(source.clone(), store.clone(), deriver(), options);
    let mut rx = stream.subscribe();
    stream.start().await.unwrap();

    let view = stream.snapshot();
    assert_eq!(view.phase, Phase::Live);
    let visible = view.notifications.clone().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].category, Category::Drawn);
    assert_eq!(visible[0].dispute_id, 7);
    assert_eq!(visible[0].account, a);

    source.push_live(appeal_event(HEAD + 1, 0, 3, 7), Utc::now());
    let view = wait_for(&mut rx, |v| v.len() == 3).await;
    let visible = view.notifications.unwrap();

    // Derivation order is [B, A] (first-draw order); prepending reverses it.
    assert_eq!(visible[0].category, Category::Appeal);
    assert_eq!(visible[0].account, a);
    assert_eq!(visible[1].category, Category::Appeal);
    assert_eq!(visible[1].account, b);
    assert_eq!(visible[2].category, Category::Drawn);
    assert_eq!(visible[0].message, "Case #7 has been appealed.");
    assert_eq!(visible[0].key, format!("{}-0-3-{}", HEAD + 1, a));

    assert_eq!(
        *alerts.lock().unwrap(),
        vec![
            vec![Category::Drawn],
            vec![Category::Appeal, Category::Appeal]
        ]
    );

    stream.shutdown();
}

#[tokio::test]
async fn acknowledgments_persist_across_restarts() {
    let a = Address::repeat_byte(0xaa);
    let b = Address::repeat_byte(0xbb);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acknowledged.json");
    let drawn_key = format!("900-2-1-{}", a);

    {
        let store = Arc::new(FileAckStore::open(&path).await.unwrap());
        let stream = NotificationStream::new(
            dispute_seven(a, b),
            store,
            deriver(),
            StreamOptions::default().live_from_block(HEAD + 1),
        );
        stream.start().await.unwrap();
        assert_eq!(stream.snapshot().len(), 1);

        stream.acknowledger().acknowledge(&drawn_key).await.unwrap();
        assert_eq!(stream.snapshot().notifications, Some(Vec::new()));
        stream.shutdown();
    }

    let store = Arc::new(FileAckStore::open(&path).await.unwrap());
    assert!(store.is_acknowledged(&drawn_key).await.unwrap());
    let stream = NotificationStream::new(
        dispute_seven(a, b),
        store,
        deriver(),
        StreamOptions::default().live_from_block(HEAD + 1),
    );
    stream.start().await.unwrap();
    assert_eq!(stream.snapshot().notifications, Some(Vec::new()));
}

#[tokio::test]
async fn executed_dispute_stays_silent() {
    let a = Address::repeat_byte(0xaa);
    let b = Address::repeat_byte(0xbb);
    let source = dispute_seven(a, b);
    source.set_dispute(7, Period::Execution, 3);

    let stream = NotificationStream::new(
        source.clone(),
        Arc::new(MemoryAckStore::new()),
        deriver(),
        StreamOptions::default().live_from_block(HEAD + 1),
    );
    let mut rx = stream.subscribe();
    stream.start().await.unwrap();
    assert_eq!(stream.snapshot().notifications, Some(Vec::new()));

    // A later live draw for another dispute still gets through, proving the
    // appeal before it was processed and produced nothing.
    source.set_dispute(8, Period::Evidence, 1);
    source.push_live(appeal_event(HEAD + 1, 0, 0, 7), Utc::now());
    source.push_live(draw_event(HEAD + 2, 0, 0, 8, 0, a), Utc::now());
    let view = wait_for(&mut rx, |v| v.len() == 1).await;
    assert_eq!(view.notifications.unwrap()[0].dispute_id, 8);
}
