use loralink_core::MessageType;
use loralink_services::sender::Stage;
use loralink_services::testing::AirChannel;
use loralink_services::{TransferError, TransferMode};

use crate::*;

#[tokio::test(start_paused = true)]
async fn full_transfer_rebuilds_file() {
    let root = TempRoot::new("full");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    let contents = pattern(2050);
    node.write_file("/data/samples.bin", &contents);
    air.clear_log();

    let report = node.sender.send_file("/data/samples.bin", TransferMode::Full).await.unwrap();
    assert_eq!(report.chunks, 11);
    assert_eq!(report.bytes, 2050);
    assert_eq!(report.transmissions, 13);

    assert_eq!(gateway.received("node/alpha/samples.bin"), contents);
    assert!(!gateway.receiver.is_active());
    // every frame answered once
    assert_eq!(air.sent_by("gateway"), vec![MessageType::Ack; 13]);
}

#[tokio::test(start_paused = true)]
async fn frame_sequence_on_air() {
    let root = TempRoot::new("sequence");
    let air = AirChannel::new();
    let _gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    node.pair().await.unwrap();

    node.write_file("/data/log.txt", &pattern(1000));
    air.clear_log();

    node.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap();

    let mut expected = vec![MessageType::FileMeta];
    expected.extend([MessageType::FileBody; 5]);
    expected.push(MessageType::FileEnd);
    assert_eq!(air.sent_by("alpha"), expected);
    assert!(air.log().iter().all(|f| f.delivered));
}

#[tokio::test(start_paused = true)]
async fn unpaired_node_is_ignored() {
    let root = TempRoot::new("unpaired");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);

    node.write_file("/data/log.txt", b"not yet");
    let err = node.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
    assert!(
        matches!(err, TransferError::TimedOut { stage: Stage::Meta, attempts: 3, .. }),
        "unexpected error: {err}"
    );

    assert!(air.sent_by("gateway").is_empty());
    assert!(!gateway.receiver.is_active());
    assert!(!gateway.store.exists("node/alpha/log.txt"));
}

#[tokio::test(start_paused = true)]
async fn second_sender_rejected_while_session_open() {
    let root = TempRoot::new("single-flight");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let alpha = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    let beta = spawn_node(&air, root.path(), "beta", BETA_MAC, PAIRING_KEY);
    alpha.pair().await.unwrap();
    beta.pair().await.unwrap();

    alpha.write_file("/data/log.txt", &pattern(600));
    beta.write_file("/data/log.txt", &pattern(300));

    // alpha opens a session, then its bodies never arrive
    air.set_loss(|f| f.from == "alpha" && f.message_type() == Some(MessageType::FileBody));
    let err = alpha.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
    assert!(matches!(err, TransferError::TimedOut { stage: Stage::Body { chunk: 0 }, .. }));
    assert!(gateway.receiver.is_active());

    air.clear_log();
    let err = beta.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
    assert!(matches!(err, TransferError::Rejected { stage: Stage::Meta, .. }), "unexpected error: {err}");
    assert_eq!(air.sent_by("beta"), vec![MessageType::FileMeta]);
    assert_eq!(air.sent_by("gateway"), vec![MessageType::Reject]);

    match gateway.receiver.state() {
        loralink_services::ReceiverState::Active(session) => {
            assert_eq!(session.owner, ALPHA_MAC);
            assert_eq!(session.bytes_received, 0);
        }
        loralink_services::ReceiverState::Idle => panic!("alpha's session should still be open"),
    }
    assert!(!gateway.store.exists("node/beta/log.txt"));
}
