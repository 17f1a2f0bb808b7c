//! Grand Ma protects two accounts with four helpers, loses her phone and
//! recovers with two of them.

mod common;

use std::time::Duration;

use common::{note, Net};
use lockbox::{Config, HelperState, KeyPair, MessageType, OperatingMode};

const GRAND_MA: &str = "Grand Ma";
const GRAND_MA_PHONE: &str = "12345";
const PEERS: [(&str, &str); 4] = [("Alice", "11"), ("Bob", "22"), ("Carol", "33"), ("Dave", "44")];

async fn protected_grand_ma() -> Net {
    let mut net = Net::new(Config::default());
    net.add(GRAND_MA, GRAND_MA_PHONE).await;
    for (name, phone) in PEERS {
        net.add(name, phone).await;
    }

    for i in 1..=2 {
        let name = format!("Grand Ma's Account-{i}");
        net.node_mut(GRAND_MA)
            .add_account(&name, &format!("addr-{i}"), "polkadot", KeyPair::generate_ed25519())
            .unwrap();
        assert_eq!(
            net.last_notification(GRAND_MA),
            note(&format!("Account ({name}) added"), "Vault protection requires minimum 3 active paired helpers")
        );
    }

    for (i, (peer, _)) in PEERS.iter().enumerate() {
        net.pair(GRAND_MA, peer);
        if i < 2 {
            assert_eq!(
                net.last_notification(GRAND_MA),
                note(&format!("{peer} added as a helper - Vault is not protected!"), "You have less than 3 active paired helpers")
            );
        } else {
            assert_eq!(
                net.last_notification(GRAND_MA),
                note(&format!("{peer} added as a helper"), "Redistributing Vault")
            );
        }
        assert_eq!(
            net.last_notification(peer),
            note("Grand Ma added as a helper - Vault is not protected!", "You have less than 3 active paired helpers")
        );
    }
    net
}

#[tokio::test]
async fn test_pair_distribute_lose_and_recover() {
    let mut net = protected_grand_ma().await;

    let gm = net.node(GRAND_MA);
    assert!(gm.can_protect());
    assert_eq!(gm.helpers().len(), 4);
    let accounts_before = gm.vault().clone();
    let secret_before = gm.lockbox().secret().clone();

    for (peer, _) in PEERS {
        let record = net.node(peer).helper(GRAND_MA_PHONE).unwrap();
        assert_eq!(record.state, HelperState::Paired);
        assert!(!record.lockbox_share.is_empty(), "{peer} holds no share");
    }
    let bob_share_before = net.node("Bob").helper(GRAND_MA_PHONE).unwrap().lockbox_share.clone();

    // total loss of local state
    net.lose_device(GRAND_MA).await;
    assert_eq!(net.node(GRAND_MA).operating_mode(), OperatingMode::Recovery);
    assert!(net.node(GRAND_MA).helpers().is_empty());

    net.pair(GRAND_MA, "Alice");
    assert_eq!(
        net.last_notification(GRAND_MA),
        note("Alice added as a helper - Recovery in progress", "Please continue pairing with half of your original helpers")
    );
    assert_eq!(net.node(GRAND_MA).operating_mode(), OperatingMode::Recovery);
    assert!(net.node(GRAND_MA).vault().is_empty());

    net.pair(GRAND_MA, "Carol");
    assert_eq!(
        net.last_notification(GRAND_MA),
        note("Recovery Successful", "Restored 2 accounts, and 4 helpers!")
    );

    let gm = net.node(GRAND_MA);
    assert_eq!(gm.operating_mode(), OperatingMode::Normal);
    assert_eq!(gm.vault(), &accounts_before);
    assert_eq!(gm.lockbox().secret(), &secret_before);
    assert!(gm.needs_storage_flush());
    for (peer, phone) in PEERS {
        let record = gm.helper(phone).unwrap_or_else(|| panic!("{peer} not restored"));
        assert_eq!(record.name(), peer);
        assert_eq!(record.state, HelperState::Paired);
        assert!(record.in_sync, "{peer} not back in sync");
    }

    // bob was never re-paired but still talks to the restored session
    let bob_share_after = net.node("Bob").helper(GRAND_MA_PHONE).unwrap().lockbox_share.clone();
    assert!(!bob_share_after.is_empty());
    assert_ne!(bob_share_after, bob_share_before);

    // alice's record of grand ma is back to normal once shares flow again
    assert_eq!(
        net.node("Alice").helper(GRAND_MA_PHONE).unwrap().operating_mode,
        OperatingMode::Normal
    );

    net.node_mut(GRAND_MA).flush_storage().await.unwrap();
    net.node_mut(GRAND_MA)
        .add_account("Grand Ma's Account-AfterRecovery-1", "addr-3", "kusama", KeyPair::generate_ecdsa())
        .unwrap();
    assert_eq!(
        net.last_notification(GRAND_MA),
        note("Account (Grand Ma's Account-AfterRecovery-1) added", "Redistributing Vault")
    );
}

#[tokio::test]
async fn test_helper_recovers_with_confirmation() {
    let mut net = protected_grand_ma().await;

    net.lose_device("Alice").await;
    // grand ma shows the code, recovering alice scans it
    net.pair(GRAND_MA, "Alice");

    // held back until grand ma confirms
    assert_eq!(
        net.confirmations.lock().unwrap().as_slice(),
        [(GRAND_MA.to_string(), "Alice".to_string())]
    );
    assert!(net.node(GRAND_MA).helper("00000000000000000000").is_some());

    assert!(net.node_mut(GRAND_MA).confirm_pairing_with_recovering_peer().unwrap());
    net.pump();

    assert_eq!(net.last_notification(GRAND_MA), note("Alice added as a helper", "Redistributing Vault"));
    assert_eq!(
        net.last_notification("Alice"),
        note("Grand Ma added as a helper - Recovery in progress", "Please continue pairing with half of your original helpers")
    );

    let gm = net.node(GRAND_MA);
    assert_eq!(gm.helpers().len(), 4);
    assert!(gm.helper("00000000000000000000").is_none());
    let alice = gm.helper("11").unwrap();
    assert!(alice.is_paired());
    assert_eq!(alice.operating_mode, OperatingMode::Recovery);

    // nothing left to confirm
    assert!(!net.node_mut(GRAND_MA).confirm_pairing_with_recovering_peer().unwrap());
}

#[tokio::test]
async fn test_unknown_recovering_peer_over_relay() {
    let mut net = protected_grand_ma().await;
    net.add("Mallory", "666").await;
    net.node_mut("Mallory").set_operating_mode(OperatingMode::Recovery);

    net.pair(GRAND_MA, "Mallory");
    assert_eq!(net.confirmations.lock().unwrap().len(), 1);
    net.node_mut(GRAND_MA).confirm_pairing_with_recovering_peer().unwrap();

    assert_eq!(
        net.last_notification(GRAND_MA),
        note("Recovery attempt failed", "Previously unpaired User Mallory is trying to recover")
    );
    assert!(net.node(GRAND_MA).helper("666").is_none());
    assert_eq!(net.relay.sent_between(MessageType::PairingAck, GRAND_MA_PHONE, "666"), 0);
}

#[tokio::test]
async fn test_quiet_helper_loses_and_regains_sync() {
    let mut net = protected_grand_ma().await;

    net.node_mut("Dave").toggle_pause_mode();
    net.advance(Duration::from_secs(6));
    net.tick();
    // the others answered at +6s, dave's last answer is from pairing
    net.advance(Duration::from_secs(6));
    net.tick();

    assert!(!net.node(GRAND_MA).helper("44").unwrap().in_sync);
    assert!(net.has_notification(GRAND_MA, "Communication lost with Dave", "Redistributing Vault"));
    assert!(net.node(GRAND_MA).can_protect());

    net.node_mut("Dave").toggle_pause_mode();
    net.tick();
    assert!(net.node(GRAND_MA).helper("44").unwrap().in_sync);
    assert_eq!(
        net.last_notification(GRAND_MA),
        note("Communication restored with Dave", "Redistributing Vault")
    );
}
