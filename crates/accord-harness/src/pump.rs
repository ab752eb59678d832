//! Deterministic two-peer message pump.
//!
//! The pump owns both connections and two in-order queues. Each round it
//! polls both team watches, then drains one envelope per side, executing the
//! resulting actions immediately: `Send`s enqueue to the other side,
//! `Emit`s accumulate into per-side event logs. Rounds repeat until both
//! queues are empty and neither side produces anything new.
//!
//! The pump is synchronous and single-threaded, so scenario tests are
//! perfectly reproducible; the iteration cap turns a protocol livelock into
//! a loud test failure instead of a hang.

use std::collections::VecDeque;
use std::time::Instant;

use accord_proto::Envelope;

use crate::{ConnectionAction, ConnectionEvent, TestConnection};

/// Hard cap on pump rounds; hitting it means the protocol is looping.
const MAX_ROUNDS: usize = 10_000;

/// Two connections wired back to back.
pub struct Pair {
    /// Left side
    pub a: TestConnection,
    /// Right side
    pub b: TestConnection,
    /// Envelopes in flight from `a` to `b`
    pub a_to_b: VecDeque<Envelope>,
    /// Envelopes in flight from `b` to `a`
    pub b_to_a: VecDeque<Envelope>,
    /// Every event `a` emitted, in order
    pub a_events: Vec<ConnectionEvent>,
    /// Every event `b` emitted, in order
    pub b_events: Vec<ConnectionEvent>,
}

impl Pair {
    /// Wire two connections together.
    pub fn new(a: TestConnection, b: TestConnection) -> Self {
        Self {
            a,
            b,
            a_to_b: VecDeque::new(),
            b_to_a: VecDeque::new(),
            a_events: Vec::new(),
            b_events: Vec::new(),
        }
    }

    /// Start both sides and run until the link is quiet.
    pub fn start(&mut self, now: Instant) {
        let actions = self.a.start(now, []).expect("a.start");
        Self::absorb(actions, &mut self.a_to_b, &mut self.a_events);

        let actions = self.b.start(now, []).expect("b.start");
        Self::absorb(actions, &mut self.b_to_a, &mut self.b_events);

        self.run_until_idle(now);
    }

    /// Deliver queued envelopes round-robin until both sides go quiet.
    ///
    /// # Panics
    ///
    /// Panics after [`MAX_ROUNDS`] rounds: the protocol is livelocked.
    pub fn run_until_idle(&mut self, now: Instant) {
        for _ in 0..MAX_ROUNDS {
            let mut progressed = false;

            // Team watches first: a mutation made between pump calls becomes
            // a LOCAL_UPDATE before any message processing.
            let actions = self.a.poll_team(now);
            progressed |= !actions.is_empty();
            Self::absorb(actions, &mut self.a_to_b, &mut self.a_events);

            let actions = self.b.poll_team(now);
            progressed |= !actions.is_empty();
            Self::absorb(actions, &mut self.b_to_a, &mut self.b_events);

            if let Some(envelope) = self.b_to_a.pop_front() {
                progressed = true;
                let actions = self.a.deliver(envelope, now).expect("a.deliver");
                Self::absorb(actions, &mut self.a_to_b, &mut self.a_events);
            }

            if let Some(envelope) = self.a_to_b.pop_front() {
                progressed = true;
                let actions = self.b.deliver(envelope, now).expect("b.deliver");
                Self::absorb(actions, &mut self.b_to_a, &mut self.b_events);
            }

            if !progressed {
                return;
            }
        }
        panic!("pump did not quiesce after {MAX_ROUNDS} rounds");
    }

    /// Route one side's actions: sends to the peer's queue, events to the log.
    fn absorb(
        actions: Vec<ConnectionAction>,
        outbound: &mut VecDeque<Envelope>,
        events: &mut Vec<ConnectionEvent>,
    ) {
        for action in actions {
            match action {
                ConnectionAction::Send(envelope) => outbound.push_back(envelope),
                ConnectionAction::Emit(event) => events.push(event),
            }
        }
    }

    /// Convenience: did this side observe the given event?
    pub fn saw(events: &[ConnectionEvent], wanted: impl Fn(&ConnectionEvent) -> bool) -> bool {
        events.iter().any(wanted)
    }
}
