use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loralink_core::MessageType;
use loralink_services::resume::record_path;
use loralink_services::testing::AirChannel;
use loralink_services::{FileStore, TransferMode};

use crate::*;

const LOG: &str = "/data/log.txt";
const RECEIVED: &str = "node/alpha/log.txt";

#[tokio::test(start_paused = true)]
async fn sync_sends_only_new_bytes() {
    let root = TempRoot::new("sync");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    let mut source = pattern(1000);
    node.write_file(LOG, &source);

    let first = node.sender.send_file(LOG, TransferMode::Sync).await.unwrap();
    assert_eq!((first.start_offset, first.end_offset), (0, 1000));
    assert_eq!(node.store.read_to_string(&record_path(LOG)).unwrap(), "1000\n");

    let more = pattern(300);
    node.append_file(LOG, &more);
    source.extend_from_slice(&more);

    let second = node.sender.send_file(LOG, TransferMode::Sync).await.unwrap();
    assert_eq!((second.start_offset, second.end_offset), (1000, 1300));
    assert_eq!(second.chunks, 2);
    assert_eq!(gateway.received(RECEIVED), source);

    // nothing new: meta and end only
    air.clear_log();
    let third = node.sender.send_file(LOG, TransferMode::Sync).await.unwrap();
    assert_eq!(third.chunks, 0);
    assert_eq!(air.sent_by("alpha"), vec![MessageType::FileMeta, MessageType::FileEnd]);
    assert_eq!(gateway.received(RECEIVED), source);
}

#[tokio::test(start_paused = true)]
async fn interrupted_sync_resumes_to_identical_copy() {
    let root = TempRoot::new("interrupt");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    let mut source = pattern(600);
    node.write_file(LOG, &source);
    node.sender.send_file(LOG, TransferMode::Sync).await.unwrap();

    let more = pattern(1000);
    node.append_file(LOG, &more);
    source.extend_from_slice(&more);

    // the third new chunk and everything after it is lost
    let bodies = Arc::new(AtomicUsize::new(0));
    let counter = bodies.clone();
    air.set_loss(move |f| {
        f.from == "alpha"
            && f.message_type() == Some(MessageType::FileBody)
            && counter.fetch_add(1, Ordering::SeqCst) >= 2
    });
    assert!(node.sender.send_file(LOG, TransferMode::Sync).await.is_err());
    assert_eq!(node.store.read_to_string(&record_path(LOG)).unwrap(), "600\n");
    assert_eq!(gateway.received(RECEIVED).len(), 1000);

    // the gateway drops the half-finished session and its bytes
    tokio::time::sleep(Duration::from_secs(61)).await;
    air.clear_loss();

    let resumed = node.sender.send_file(LOG, TransferMode::Sync).await.unwrap();
    assert_eq!((resumed.start_offset, resumed.end_offset), (600, 1600));
    assert_eq!(resumed.chunks, 5);
    assert_eq!(gateway.received(RECEIVED), source);
    assert_eq!(node.store.read_to_string(&record_path(LOG)).unwrap(), "1600\n");
}
