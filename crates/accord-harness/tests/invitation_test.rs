//! Invitation scenarios: joining, forgery, revocation, seed normalization.

use std::time::Instant;

use accord_core::connection::{Connection, ConnectionConfig};
use accord_core::team::memory::SharedTeam;
use accord_core::team::Team;
use accord_harness::pump::Pair;
use accord_harness::{
    seeded_rng, test_device, test_user, ConnectionEvent, Phase, TestConnection, TwoMembers,
};
use accord_proto::payloads::{ErrorCode, Invitee, KeyScope};

fn member_invitee(name: &str) -> Invitee {
    Invitee { kind: KeyScope::Member, name: name.into() }
}

fn invitee_connection(user: &str, device: &str, seed: &str, rng_seed: u64) -> TestConnection {
    Connection::invitee(
        test_device(user, device),
        member_invitee(user),
        seed,
        ConnectionConfig::default(),
        seeded_rng(rng_seed),
    )
}

#[test]
fn invitee_joins_and_connects() {
    let now = Instant::now();

    let alice = test_user("alice");
    let alice_device = test_device("alice", "laptop");
    let alice_team = SharedTeam::create("spies", &alice, &alice_device).expect("team");
    alice_team.invite(member_invitee("bob"), "passw0rd").expect("invite");

    let alice_connection = Connection::member(
        alice_device,
        alice,
        alice_team.clone(),
        ConnectionConfig::default(),
        seeded_rng(11),
    );
    let bob_connection = invitee_connection("bob", "phone", "passw0rd", 12);

    let mut pair = Pair::new(alice_connection, bob_connection);
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Connected);
    assert_eq!(pair.b.phase(), Phase::Connected);

    // Bob fired `joined` and now holds a replica that knows him.
    assert!(Pair::saw(&pair.b_events, |e| matches!(e, ConnectionEvent::Joined { .. })));
    let bob_team = pair.b.team().expect("bob has a team after joining");
    assert!(bob_team.has("bob"));
    assert!(alice_team.has("bob"));
    assert_eq!(bob_team.head(), alice_team.head());

    // Bob's user identity was established by the join.
    assert_eq!(pair.b.user().map(|u| u.user_name.as_str()), Some("bob"));

    let alice_key = pair.a.session_key().expect("alice key");
    let bob_key = pair.b.session_key().expect("bob key");
    assert_eq!(alice_key.as_bytes(), bob_key.as_bytes());
}

#[test]
fn forged_invitee_name_is_rejected() {
    let now = Instant::now();

    let alice = test_user("alice");
    let alice_device = test_device("alice", "laptop");
    let alice_team = SharedTeam::create("spies", &alice, &alice_device).expect("team");
    alice_team.invite(member_invitee("bob"), "passw0rd").expect("invite");

    let alice_connection = Connection::member(
        alice_device,
        alice,
        alice_team.clone(),
        ConnectionConfig::default(),
        seeded_rng(13),
    );
    // Eve holds Bob's seed but claims to be eve.
    let eve_connection = invitee_connection("eve", "phone", "passw0rd", 14);

    let mut pair = Pair::new(alice_connection, eve_connection);
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Failed);
    let error = pair.a.error().expect("alice records the failure");
    assert_eq!(error.code, ErrorCode::InvitationInvalid);
    assert!(error.message.to_lowercase().contains("user names don't match"));

    // Eve hears about it and fails too; nobody was admitted.
    assert_eq!(pair.b.phase(), Phase::Failed);
    assert_eq!(pair.b.error().map(|e| e.code), Some(ErrorCode::PeerError));
    assert!(!alice_team.has("eve"));
    assert!(!alice_team.has("bob"));
}

#[test]
fn revoked_invitation_is_rejected_by_another_replica() {
    let now = Instant::now();
    let fixture = TwoMembers::new();

    // Alice invites Charlie, then revokes; Bob loads the post-revocation
    // chain and is the one Charlie happens to reach.
    fixture.alice_team.invite(member_invitee("charlie"), "open sesame").expect("invite");
    let id = accord_core::invitation::invitation_id("open sesame");
    fixture.alice_team.revoke_invitation(&id).expect("revoke");

    let bob_replica = SharedTeam::load(&fixture.alice_team.save(), fixture.bob_device.clone())
        .expect("bob replica");
    let bob_connection = Connection::member(
        fixture.bob_device.clone(),
        fixture.bob.clone(),
        bob_replica,
        ConnectionConfig::default(),
        seeded_rng(15),
    );
    let charlie_connection = invitee_connection("charlie", "phone", "open sesame", 16);

    let mut pair = Pair::new(bob_connection, charlie_connection);
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Failed);
    assert_eq!(pair.a.error().map(|e| e.code), Some(ErrorCode::InvitationRevoked));
    assert_eq!(pair.b.phase(), Phase::Failed);
}

#[test]
fn transcribed_seed_variants_still_join() {
    let now = Instant::now();

    let alice = test_user("alice");
    let alice_device = test_device("alice", "laptop");
    let alice_team = SharedTeam::create("spies", &alice, &alice_device).expect("team");

    // Invitation written down as words; Bob types it with plus signs.
    alice_team.invite(member_invitee("bob"), "abc def ghi").expect("invite");

    let alice_connection = Connection::member(
        alice_device,
        alice,
        alice_team.clone(),
        ConnectionConfig::default(),
        seeded_rng(17),
    );
    let bob_connection = invitee_connection("bob", "phone", "ABC+DEF+GHI", 18);

    let mut pair = Pair::new(alice_connection, bob_connection);
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Connected);
    assert_eq!(pair.b.phase(), Phase::Connected);
    assert!(alice_team.has("bob"));
}

#[test]
fn two_invitees_cannot_admit_each_other() {
    let now = Instant::now();

    let bob_connection = invitee_connection("bob", "phone", "seed one", 19);
    let carol_connection = invitee_connection("carol", "tablet", "seed two", 20);

    let mut pair = Pair::new(bob_connection, carol_connection);
    pair.start(now);

    assert_eq!(pair.a.phase(), Phase::Failed);
    assert_eq!(pair.b.phase(), Phase::Failed);
    assert!(
        pair.a.error().map(|e| e.code) == Some(ErrorCode::NeitherIsMember)
            || pair.b.error().map(|e| e.code) == Some(ErrorCode::NeitherIsMember)
    );
}
