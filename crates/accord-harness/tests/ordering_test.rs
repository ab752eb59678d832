//! Ordered-delivery behavior at the connection boundary: reordering,
//! duplication, gaps, and the permutation property.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use accord_harness::{ConnectionAction, Phase, TestConnection, TwoMembers};
use accord_proto::payloads::ErrorCode;
use accord_proto::Envelope;

/// Execute one side's actions, splitting sends from events.
fn sends(actions: Vec<ConnectionAction>) -> Vec<Envelope> {
    actions
        .into_iter()
        .filter_map(|action| match action {
            ConnectionAction::Send(envelope) => Some(envelope),
            ConnectionAction::Emit(_) => None,
        })
        .collect()
}

/// Drive two raw connections to quiescence, delivering `b`'s inbox in the
/// order produced by `reorder`.
fn run_with_reorder(
    a: &mut TestConnection,
    b: &mut TestConnection,
    now: Instant,
    reorder: impl Fn(Vec<Envelope>) -> Vec<Envelope>,
) {
    let mut a_inbox: VecDeque<Envelope> = VecDeque::new();
    let mut b_inbox: Vec<Envelope> = Vec::new();

    b_inbox.extend(sends(a.start(now, []).expect("a.start")));
    a_inbox.extend(sends(b.start(now, []).expect("b.start")));

    for _ in 0..1_000 {
        if a_inbox.is_empty() && b_inbox.is_empty() {
            return;
        }

        // b receives its whole backlog shuffled; a receives in order.
        for envelope in reorder(std::mem::take(&mut b_inbox)) {
            a_inbox.extend(sends(b.deliver(envelope, now).expect("b.deliver")));
        }
        while let Some(envelope) = a_inbox.pop_front() {
            b_inbox.extend(sends(a.deliver(envelope, now).expect("a.deliver")));
        }
    }
    panic!("connections did not quiesce");
}

#[test]
fn reversed_batches_still_connect() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut a = fixture.alice_connection(31);
    let mut b = fixture.bob_connection(32);

    run_with_reorder(&mut a, &mut b, now, |mut batch| {
        batch.reverse();
        batch
    });

    assert_eq!(a.phase(), Phase::Connected);
    assert_eq!(b.phase(), Phase::Connected);
    assert_eq!(
        a.session_key().expect("a key").as_bytes(),
        b.session_key().expect("b key").as_bytes()
    );
}

#[test]
fn duplicated_envelopes_are_dropped() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut a = fixture.alice_connection(33);
    let mut b = fixture.bob_connection(34);

    run_with_reorder(&mut a, &mut b, now, |batch| {
        // Every envelope arrives twice.
        batch.iter().cloned().flat_map(|envelope| [envelope.clone(), envelope]).collect()
    });

    assert_eq!(a.phase(), Phase::Connected);
    assert_eq!(b.phase(), Phase::Connected);
}

#[test]
fn a_gap_stalls_the_machine_until_timeout() {
    let now = Instant::now();
    let fixture = TwoMembers::new();
    let mut a = fixture.alice_connection(35);
    let mut b = fixture.bob_connection(36);

    let a_ready = sends(a.start(now, []).expect("a.start"));
    let b_ready = sends(b.start(now, []).expect("b.start"));
    assert_eq!(a_ready.len(), 1);

    // a processes b's READY and produces HELLO at index 1.
    let mut later = Vec::new();
    for envelope in b_ready {
        later.extend(sends(a.deliver(envelope, now).expect("a.deliver")));
    }

    // b never receives a's READY (index 0); everything after it parks
    // behind the gap and the machine never leaves Inert.
    for envelope in later {
        let actions = b.deliver(envelope, now).expect("b.deliver");
        assert!(actions.is_empty(), "parked envelopes must not reach the machine");
    }
    assert_eq!(b.phase(), Phase::Inert);

    // First tick arms the phase clock; a later tick past the handshake
    // budget fails the connection.
    assert!(b.tick(now).is_empty());
    let actions = b.tick(now + Duration::from_secs(31));
    assert_eq!(b.phase(), Phase::Failed);
    assert_eq!(b.error().map(|e| e.code), Some(ErrorCode::Timeout));
    assert!(!actions.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Replaying Alice's captured transcript to a fresh Bob in any
    /// permutation produces the same outcome: the ordered-delivery buffer
    /// makes arrival order irrelevant.
    #[test]
    fn transcript_permutations_converge(permutation in Just((0..64usize).collect::<Vec<_>>()).prop_shuffle()) {
        let now = Instant::now();
        let fixture = TwoMembers::new();

        // Canonical run with fixed RNG seeds, capturing Alice's transcript.
        let mut a = fixture.alice_connection(1_000);
        let mut b = fixture.bob_connection(2_000);
        let mut transcript: Vec<Envelope> = Vec::new();

        {
            let mut a_inbox: VecDeque<Envelope> = VecDeque::new();
            let mut b_inbox: VecDeque<Envelope> = VecDeque::new();

            for envelope in sends(a.start(now, []).unwrap()) {
                transcript.push(envelope.clone());
                b_inbox.push_back(envelope);
            }
            a_inbox.extend(sends(b.start(now, []).unwrap()));

            for _ in 0..1_000 {
                if a_inbox.is_empty() && b_inbox.is_empty() {
                    break;
                }
                if let Some(envelope) = b_inbox.pop_front() {
                    a_inbox.extend(sends(b.deliver(envelope, now).unwrap()));
                }
                if let Some(envelope) = a_inbox.pop_front() {
                    for reply in sends(a.deliver(envelope, now).unwrap()) {
                        transcript.push(reply.clone());
                        b_inbox.push_back(reply);
                    }
                }
            }
        }
        prop_assert_eq!(b.phase(), Phase::Connected);
        let canonical_key = b.session_key().unwrap().as_bytes().to_vec();

        // Fresh Bob, same RNG seed, transcript delivered in a random order.
        let mut b2 = fixture.bob_connection(2_000);
        b2.start(now, []).unwrap();
        for position in permutation {
            if let Some(envelope) = transcript.get(position % transcript.len()) {
                let _ = b2.deliver(envelope.clone(), now).unwrap();
            }
        }
        // Whatever order (and duplication) the permutation produced, finish
        // by delivering everything once more so no index is missing.
        for envelope in &transcript {
            let _ = b2.deliver(envelope.clone(), now).unwrap();
        }

        prop_assert_eq!(b2.phase(), Phase::Connected);
        prop_assert_eq!(b2.session_key().unwrap().as_bytes().to_vec(), canonical_key);
    }
}
