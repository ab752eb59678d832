//! Ordered delivery buffer.
//!
//! Transports may reorder or duplicate envelopes; the state machine must see
//! a gap-free, duplicate-free sequence. This buffer reassembles inbound
//! envelopes into index order: it is the only component between the wire and
//! the machine, and it is pure state — no I/O, no time.
//!
//! # Algorithm
//!
//! A cursor `next_expected` starts at 0. For an arriving envelope with
//! index `i`:
//!
//! - `i < next_expected`: drop (duplicate or replay)
//! - `i > next_expected`: park it, keyed by index
//! - `i == next_expected`: release it, advance the cursor, then drain any
//!   contiguous parked run
//!
//! A gap that never closes stalls the machine in its current state until the
//! driver's timeout fires; that is the intended behavior.

use std::collections::BTreeMap;

use accord_proto::{Envelope, Message};

/// Reassembles inbound envelopes into a gap-free, in-order message sequence.
#[derive(Debug, Default)]
pub struct OrderedDelivery {
    next_expected: u64,
    parked: BTreeMap<u64, Message>,
}

impl OrderedDelivery {
    /// An empty buffer expecting index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one envelope, returning every message now ready for the
    /// machine, in index order. The list is often empty (gap) or a single
    /// message (in-order arrival).
    pub fn accept(&mut self, envelope: Envelope) -> Vec<Message> {
        let Envelope { index, message } = envelope;

        if index < self.next_expected {
            tracing::debug!(index, next_expected = self.next_expected, "dropping duplicate");
            return Vec::new();
        }

        if index > self.next_expected {
            // Parking an index twice keeps the first arrival.
            self.parked.entry(index).or_insert(message);
            return Vec::new();
        }

        let mut ready = vec![message];
        self.next_expected += 1;

        while let Some(message) = self.parked.remove(&self.next_expected) {
            ready.push(message);
            self.next_expected += 1;
        }

        ready
    }

    /// The next index the buffer will release.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of messages parked behind a gap.
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ready_at(index: u64) -> Envelope {
        Envelope::new(index, Message::Ready)
    }

    fn kinds(messages: &[Message]) -> Vec<&'static str> {
        messages.iter().map(Message::kind).collect()
    }

    #[test]
    fn in_order_passes_through() {
        let mut buffer = OrderedDelivery::new();
        assert_eq!(buffer.accept(ready_at(0)).len(), 1);
        assert_eq!(buffer.accept(ready_at(1)).len(), 1);
        assert_eq!(buffer.next_expected(), 2);
    }

    #[test]
    fn reordered_pair_is_sorted() {
        let mut buffer = OrderedDelivery::new();

        assert!(buffer.accept(ready_at(1)).is_empty());
        assert_eq!(buffer.parked_len(), 1);

        let released = buffer.accept(ready_at(0));
        assert_eq!(released.len(), 2);
        assert_eq!(buffer.parked_len(), 0);
        assert_eq!(buffer.next_expected(), 2);
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut buffer = OrderedDelivery::new();
        buffer.accept(ready_at(0));

        assert!(buffer.accept(ready_at(0)).is_empty());
        assert_eq!(buffer.next_expected(), 1);

        // Duplicate of a parked index is also dropped.
        buffer.accept(ready_at(2));
        buffer.accept(ready_at(2));
        assert_eq!(buffer.parked_len(), 1);
    }

    #[test]
    fn gap_stalls_until_filled() {
        let mut buffer = OrderedDelivery::new();
        buffer.accept(ready_at(0));

        assert!(buffer.accept(ready_at(2)).is_empty());
        assert!(buffer.accept(ready_at(3)).is_empty());
        assert_eq!(buffer.parked_len(), 2);

        let released = buffer.accept(ready_at(1));
        assert_eq!(released.len(), 3);
        assert_eq!(buffer.next_expected(), 4);
    }

    #[test]
    fn contiguous_drain_preserves_payload_order() {
        let mut buffer = OrderedDelivery::new();
        buffer.accept(Envelope::new(2, Message::AcceptIdentity));
        buffer.accept(Envelope::new(1, Message::Disconnect));

        let released = buffer.accept(Envelope::new(0, Message::Ready));
        assert_eq!(kinds(&released), ["READY", "DISCONNECT", "ACCEPT_IDENTITY"]);
    }

    proptest! {
        /// Any permutation of 0..n, with arbitrary duplicates mixed in,
        /// releases exactly 0..n in order.
        #[test]
        fn permutation_releases_in_order(
            order in Just((0u64..20).collect::<Vec<_>>()).prop_shuffle(),
            duplicates in proptest::collection::vec(0u64..20, 0..10),
        ) {
            let mut buffer = OrderedDelivery::new();
            let mut release_count = 0;

            let mut arrivals = order;
            arrivals.extend(duplicates);

            for index in arrivals {
                release_count += buffer.accept(ready_at(index)).len();
            }

            // Every index released exactly once; cursor at the end.
            prop_assert_eq!(release_count, 20);
            prop_assert_eq!(buffer.next_expected(), 20);
            prop_assert_eq!(buffer.parked_len(), 0);
        }
    }
}
