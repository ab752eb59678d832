//! Chain synchronization after the handshake: membership changes propagate,
//! removal of a peer tears the connection down.

use std::time::Instant;

use accord_core::team::Team;
use accord_harness::pump::Pair;
use accord_harness::{ConnectionEvent, Phase, TwoMembers};
use accord_proto::payloads::{ErrorCode, Invitee, KeyScope};

#[test]
fn membership_change_resyncs_and_keeps_the_session() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut pair = Pair::new(fixture.alice_connection(21), fixture.bob_connection(22));
    pair.start(now);

    let key_before = pair.a.session_key().expect("session").as_bytes().to_vec();

    // Alice's replica gains a link; Bob's replica must catch up while the
    // session stays keyed.
    fixture
        .alice_team
        .invite(Invitee { kind: KeyScope::Member, name: "carol".into() }, "carrots")
        .expect("invite");
    pair.run_until_idle(now);

    assert_eq!(pair.a.phase(), Phase::Connected);
    assert_eq!(pair.b.phase(), Phase::Connected);
    assert_eq!(fixture.bob_team.head(), fixture.alice_team.head());

    assert!(Pair::saw(&pair.b_events, |e| matches!(e, ConnectionEvent::Updated { .. })));
    assert!(Pair::saw(&pair.a_events, |e| matches!(e, ConnectionEvent::Updated { .. })));

    // Session key survived the re-synchronization, on both sides.
    assert_eq!(pair.a.session_key().expect("still keyed").as_bytes().to_vec(), key_before);
    assert_eq!(pair.b.session_key().expect("still keyed").as_bytes().to_vec(), key_before);

    // The re-sync never tore the connection down.
    assert!(!Pair::saw(&pair.a_events, |e| matches!(e, ConnectionEvent::Disconnected { .. })));
}

#[test]
fn removing_the_peer_fails_both_sides_once_it_propagates() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut pair = Pair::new(fixture.alice_connection(23), fixture.bob_connection(24));
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Connected);

    // Bob is removed on Alice's replica while the connection is up.
    fixture.alice_team.remove_member("bob").expect("remove bob");
    pair.run_until_idle(now);

    assert_eq!(pair.a.phase(), Phase::Failed);
    assert_eq!(pair.a.error().map(|e| e.code), Some(ErrorCode::PeerRemoved));
    assert!(Pair::saw(&pair.a_events, |e| matches!(e, ConnectionEvent::Disconnected { .. })));

    // The removal reached Bob's replica, and Alice's ERROR ended his side.
    assert!(!fixture.bob_team.has("bob"));
    assert_eq!(pair.b.phase(), Phase::Failed);
    assert_eq!(pair.b.error().map(|e| e.code), Some(ErrorCode::PeerError));
}

#[test]
fn equal_head_updates_do_not_disturb_a_connected_pair() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut pair = Pair::new(fixture.alice_connection(25), fixture.bob_connection(26));
    pair.start(now);

    let changes_before = pair.a_events.len();

    // Nothing changed; polling must not generate traffic or events.
    pair.run_until_idle(now);

    assert_eq!(pair.a_events.len(), changes_before);
    assert!(pair.a_to_b.is_empty());
    assert!(pair.b_to_a.is_empty());
    assert_eq!(pair.a.phase(), Phase::Connected);
}
