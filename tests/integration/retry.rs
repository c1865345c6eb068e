use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loralink_core::MessageType;
use loralink_services::sender::Stage;
use loralink_services::testing::AirChannel;
use loralink_services::{TransferError, TransferMode};

use crate::*;

#[tokio::test(start_paused = true)]
async fn lost_chunk_is_retransmitted() {
    let root = TempRoot::new("retry");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    let contents = pattern(1000);
    node.write_file("/data/log.txt", &contents);

    // the fourth chunk is lost twice, then gets through
    let bodies = Arc::new(AtomicUsize::new(0));
    let counter = bodies.clone();
    air.set_loss(move |f| {
        if f.from != "alpha" || f.message_type() != Some(MessageType::FileBody) {
            return false;
        }
        let n = counter.fetch_add(1, Ordering::SeqCst);
        n == 3 || n == 4
    });

    let started = Instant::now();
    let report = node.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap();
    assert_eq!(report.chunks, 5);
    assert_eq!(report.transmissions, 9);
    assert_eq!(bodies.load(Ordering::SeqCst), 7);
    // two ack timeouts were waited out
    assert!(started.elapsed() >= Duration::from_secs(10));

    assert_eq!(gateway.received("node/alpha/log.txt"), contents);
}

#[tokio::test(start_paused = true)]
async fn silent_gateway_exhausts_attempts_then_recovers() {
    let root = TempRoot::new("exhaust");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    let contents = pattern(450);
    node.write_file("/data/log.txt", &contents);
    air.clear_log();

    air.set_loss(|f| f.from == "alpha" && f.message_type() == Some(MessageType::FileBody));
    let err = node.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
    assert!(
        matches!(err, TransferError::TimedOut { stage: Stage::Body { chunk: 0 }, attempts: 3, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(
        air.sent_by("alpha"),
        vec![
            MessageType::FileMeta,
            MessageType::FileBody,
            MessageType::FileBody,
            MessageType::FileBody,
        ]
    );
    assert!(gateway.receiver.is_active());

    // the stale session blocks nobody once it has been idle long enough
    tokio::time::sleep(Duration::from_secs(61)).await;
    air.clear_loss();

    let report = node.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(gateway.received("node/alpha/log.txt"), contents);
    assert!(!gateway.receiver.is_active());
}
