use loralink_core::MessageType;
use loralink_services::testing::AirChannel;
use loralink_services::PairingState;

use crate::*;

#[tokio::test(start_paused = true)]
async fn node_pairs_with_matching_key() {
    let root = TempRoot::new("pair-ok");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);

    assert_eq!(node.pair().await.unwrap(), GATEWAY_MAC);
    assert_eq!(node.pairing.state(), PairingState::Paired { gateway: GATEWAY_MAC });

    assert_eq!(air.sent_by("alpha"), vec![MessageType::Pairing]);
    assert_eq!(air.sent_by("gateway"), vec![MessageType::Pairing]);

    assert_eq!(gateway.peers.len(), 1);
    assert_eq!(gateway.peers.name_of(&ALPHA_MAC).as_deref(), Some("alpha"));
    assert!(node.peers.contains(&GATEWAY_MAC));
}

#[tokio::test(start_paused = true)]
async fn wrong_key_gets_no_answer() {
    let root = TempRoot::new("pair-key");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let node = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY ^ 1);

    assert!(node.pair().await.is_err());
    assert!(matches!(node.pairing.state(), PairingState::RequestPending { .. }));
    assert!(air.sent_by("gateway").is_empty());
    assert!(gateway.peers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn two_nodes_share_a_gateway() {
    let root = TempRoot::new("pair-two");
    let air = AirChannel::new();
    let gateway = spawn_gateway(&air, root.path(), PAIRING_KEY);
    let alpha = spawn_node(&air, root.path(), "alpha", ALPHA_MAC, PAIRING_KEY);
    let beta = spawn_node(&air, root.path(), "beta", BETA_MAC, PAIRING_KEY);

    assert_eq!(alpha.pair().await.unwrap(), GATEWAY_MAC);
    assert_eq!(beta.pair().await.unwrap(), GATEWAY_MAC);

    let names: Vec<String> = gateway.peers.list().into_iter().map(|p| p.name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"alpha".to_string()));
    assert!(names.contains(&"beta".to_string()));
    // beta heard alpha's exchange but only its own answer paired it
    assert!(!beta.peers.contains(&ALPHA_MAC));
}
