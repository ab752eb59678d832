//! The connection driver.
//!
//! Owns one [`Machine`] plus everything the machine deliberately does not
//! know about: outbound numbering, inbound reassembly, the stopped flag, and
//! the team watch that turns shared-team mutations into `LOCAL_UPDATE`s.
//!
//! Every operation returns [`ConnectionAction`]s for the host to execute in
//! order: `Send` an envelope over whatever transport the host owns, or
//! `Emit` an event to whoever is observing the connection. The driver never
//! performs I/O itself.
//!
//! # Lifecycle
//!
//! - [`Connection::start`] — first call marks the connection live and offers
//!   READY to the peer; later calls restart the machine (RECONNECT + READY)
//!   while outbound numbering continues, so indices never repeat for the
//!   life of the connection. Stored envelopes from a previous transport
//!   session can be replayed through it.
//! - [`Connection::deliver`] — push one inbound envelope; the ordered
//!   delivery buffer decides what (if anything) the machine sees.
//! - [`Connection::tick`] — drive phase timeouts from the host's clock.
//! - [`Connection::poll_team`] — inject `LOCAL_UPDATE` when the shared team
//!   replica has moved underneath us.
//! - [`Connection::stop`] — idempotent teardown; tells the peer, transitions
//!   the machine, and detaches the team watch.

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{CryptoRng, RngCore};

use accord_proto::payloads::{Hash, Invitee, LocalUpdatePayload};
use accord_proto::{Envelope, Message};

use crate::delivery::OrderedDelivery;
use crate::error::ConnectionError;
use crate::identity::{DeviceWithSecrets, UserWithSecrets};
use crate::machine::{Effect, Machine, Phase};
use crate::session::SessionKey;
use crate::team::Team;

/// Tunable timeouts for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Budget for each handshake/negotiation phase
    pub handshake_timeout: Duration,
    /// Budget for chain synchronization
    pub sync_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(60),
        }
    }
}

/// Events surfaced to the host. These are the connection's only observable
/// interface besides outbound envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The machine moved to a new phase (payload is the phase label)
    Change(String),
    /// The handshake completed and a session key is established
    Connected,
    /// We were admitted to the team we were invited to
    Joined {
        /// Head of the newly constructed team replica
        head: Hash,
    },
    /// Chains re-synchronized after a change
    Updated {
        /// The agreed head
        head: Hash,
    },
    /// Terminal: the connection ended
    Disconnected {
        /// Why it ended
        reason: String,
    },
    /// A decrypted application message from the peer
    Message(Bytes),
}

/// One instruction for the host to execute.
#[derive(Debug)]
pub enum ConnectionAction {
    /// Serialize this envelope and transmit it to the peer
    Send(Envelope),
    /// Deliver this event to the connection's observers
    Emit(ConnectionEvent),
}

/// The per-peer connection driver.
pub struct Connection<T: Team, R: RngCore + CryptoRng> {
    machine: Machine<T, R>,
    config: ConnectionConfig,
    outbound_index: u64,
    inbound: OrderedDelivery,
    started: bool,
    stopped: bool,
    last_seen_head: Option<Hash>,
}

impl<T: Team, R: RngCore + CryptoRng> Connection<T, R> {
    /// Connection for an existing team member.
    pub fn member(
        device: DeviceWithSecrets,
        user: UserWithSecrets,
        team: T,
        config: ConnectionConfig,
        rng: R,
    ) -> Self {
        Self::with_machine(Machine::member(device, user, team, rng), config)
    }

    /// Connection for an invitee holding only an invitation seed.
    pub fn invitee(
        device: DeviceWithSecrets,
        invitee: Invitee,
        invitation_seed: impl Into<String>,
        config: ConnectionConfig,
        rng: R,
    ) -> Self {
        Self::with_machine(Machine::invitee(device, invitee, invitation_seed, rng), config)
    }

    fn with_machine(machine: Machine<T, R>, config: ConnectionConfig) -> Self {
        Self {
            machine,
            config,
            outbound_index: 0,
            inbound: OrderedDelivery::new(),
            started: false,
            stopped: false,
            last_seen_head: None,
        }
    }

    /// Start (or restart) the connection.
    ///
    /// The first call offers READY; later calls additionally announce
    /// RECONNECT and reset the machine, keeping outbound numbering. Stored
    /// envelopes are replayed through [`Self::deliver`] in arrival order.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Stopped`] after [`Self::stop`].
    pub fn start(
        &mut self,
        now: Instant,
        stored: impl IntoIterator<Item = Envelope>,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.stopped {
            return Err(ConnectionError::Stopped);
        }

        let mut actions = Vec::new();
        if self.started {
            tracing::debug!("restarting connection");
            self.machine.reset();
            actions.push(self.outbound(Message::Reconnect));
            actions.push(ConnectionAction::Emit(ConnectionEvent::Change(
                Phase::Inert.describe().into(),
            )));
        } else {
            self.started = true;
        }

        // Begin watching the shared team for local updates.
        self.last_seen_head = self.machine.team().map(Team::head);

        actions.push(self.outbound(Message::Ready));

        for envelope in stored {
            actions.extend(self.deliver(envelope, now)?);
        }
        Ok(actions)
    }

    /// Stop the connection: tell the peer, terminate the machine, detach the
    /// team watch. Safe to call from any state; calling it twice is a no-op.
    pub fn stop(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        if !self.started {
            return Vec::new();
        }

        tracing::debug!(peer = %self.machine.peer_name(), "stopping connection");
        let mut actions = vec![self.outbound(Message::Disconnect)];
        actions.extend(self.run_machine(Message::Disconnect, now));
        self.last_seen_head = None;
        actions
    }

    /// Push one inbound envelope through ordered delivery and the machine.
    ///
    /// Duplicate indices are dropped here and produce nothing; a call on a
    /// stopped connection is a no-op.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotStarted`] before [`Self::start`].
    pub fn deliver(
        &mut self,
        envelope: Envelope,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.stopped {
            return Ok(Vec::new());
        }
        if !self.started {
            return Err(ConnectionError::NotStarted);
        }

        let mut actions = Vec::new();
        for message in self.inbound.accept(envelope) {
            actions.extend(self.run_machine(message, now));
        }
        Ok(actions)
    }

    /// Seal and queue an application payload for the peer.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NoSessionKey`] before the handshake completes,
    /// [`ConnectionError::Stopped`] / [`ConnectionError::NotStarted`] outside
    /// the running lifecycle.
    pub fn send(&mut self, payload: &[u8]) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.stopped {
            return Err(ConnectionError::Stopped);
        }
        if !self.started {
            return Err(ConnectionError::NotStarted);
        }

        let effects = self.machine.send_app_message(payload)?;
        Ok(self.map_effects(effects))
    }

    /// Drive phase timeouts. Call periodically with the host's clock.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.stopped || !self.started {
            return Vec::new();
        }
        let effects = self.machine.tick(now, &self.config);
        self.map_effects(effects)
    }

    /// Inject `LOCAL_UPDATE` if the shared team moved since we last looked.
    ///
    /// Hosts with a real team event stream call this from their listener;
    /// the harness calls it from its pump loop.
    pub fn poll_team(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.stopped || !self.started {
            return Vec::new();
        }
        let Some(head) = self.machine.team().map(Team::head) else {
            return Vec::new();
        };

        match self.last_seen_head {
            // First sight of a team (an invitee that just joined): start
            // watching without announcing anything.
            None => {
                self.last_seen_head = Some(head);
                Vec::new()
            }
            Some(seen) if seen != head => {
                self.last_seen_head = Some(head);
                self.run_machine(Message::LocalUpdate(LocalUpdatePayload { head }), now)
            }
            Some(_) => Vec::new(),
        }
    }

    /// Current machine phase.
    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// The session key, once connected.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.machine.session_key()
    }

    /// The team handle (present for members, and for invitees after they
    /// join). `Joined` events carry the head; the handle lives here.
    pub fn team(&self) -> Option<&T> {
        self.machine.team()
    }

    /// The local user identity, once established.
    pub fn user(&self) -> Option<&UserWithSecrets> {
        self.machine.user()
    }

    /// The first terminal error, if any.
    pub fn error(&self) -> Option<&accord_proto::payloads::ErrorPayload> {
        self.machine.error()
    }

    /// Best known peer name, for logs.
    pub fn peer_name(&self) -> String {
        self.machine.peer_name()
    }

    fn run_machine(&mut self, message: Message, now: Instant) -> Vec<ConnectionAction> {
        let effects = self.machine.handle(message, now);
        let actions = self.map_effects(effects);

        // Mutations the machine itself just made to the team (admission,
        // received links) must not echo back as LOCAL_UPDATE.
        if self.last_seen_head.is_some() {
            self.last_seen_head = self.machine.team().map(Team::head);
        }
        actions
    }

    fn map_effects(&mut self, effects: Vec<Effect>) -> Vec<ConnectionAction> {
        effects
            .into_iter()
            .map(|effect| match effect {
                Effect::Send(message) => self.outbound(message),
                Effect::Emit(event) => ConnectionAction::Emit(event),
            })
            .collect()
    }

    /// Number an outbound message. Indices start at 0 and never repeat.
    fn outbound(&mut self, message: Message) -> ConnectionAction {
        debug_assert!(!message.is_local(), "local-only messages must not be transmitted");
        let index = self.outbound_index;
        self.outbound_index += 1;
        ConnectionAction::Send(Envelope::new(index, message))
    }
}

impl<T: Team, R: RngCore + CryptoRng> std::fmt::Debug for Connection<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.machine.phase())
            .field("peer", &self.machine.peer_name())
            .field("outbound_index", &self.outbound_index)
            .field("next_expected", &self.inbound.next_expected())
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use crate::team::memory::SharedTeam;

    use super::*;

    type MemberConnection = Connection<SharedTeam, OsRng>;

    fn alice_connection() -> MemberConnection {
        let alice = UserWithSecrets::generate("alice", &mut OsRng);
        let device = DeviceWithSecrets::generate("alice", "laptop", &mut OsRng);
        let team = SharedTeam::create("spies", &alice, &device).unwrap();
        Connection::member(device, alice, team, ConnectionConfig::default(), OsRng)
    }

    fn sent_indices(actions: &[ConnectionAction]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|action| match action {
                ConnectionAction::Send(envelope) => Some(envelope.index),
                ConnectionAction::Emit(_) => None,
            })
            .collect()
    }

    #[test]
    fn start_offers_ready_at_index_zero() {
        let mut connection = alice_connection();
        let actions = connection.start(Instant::now(), []).unwrap();

        assert_eq!(sent_indices(&actions), [0]);
        match &actions[0] {
            ConnectionAction::Send(envelope) => assert_eq!(envelope.message, Message::Ready),
            other => panic!("expected Send(READY), got {other:?}"),
        }
        assert_eq!(connection.phase(), Phase::Inert);
    }

    #[test]
    fn restart_keeps_numbering_and_announces_reconnect() {
        let now = Instant::now();
        let mut connection = alice_connection();
        connection.start(now, []).unwrap();

        let actions = connection.start(now, []).unwrap();
        let indices = sent_indices(&actions);
        assert_eq!(indices, [1, 2]);
        match &actions[0] {
            ConnectionAction::Send(envelope) => assert_eq!(envelope.message, Message::Reconnect),
            other => panic!("expected Send(RECONNECT), got {other:?}"),
        }
    }

    #[test]
    fn deliver_before_start_is_an_error() {
        let mut connection = alice_connection();
        let result = connection.deliver(Envelope::new(0, Message::Ready), Instant::now());
        assert!(matches!(result, Err(ConnectionError::NotStarted)));
    }

    #[test]
    fn stop_is_idempotent_and_quiesces_the_connection() {
        let now = Instant::now();
        let mut connection = alice_connection();
        connection.start(now, []).unwrap();

        let actions = connection.stop(now);
        assert_eq!(sent_indices(&actions), [1]);
        assert!(actions.iter().any(|action| matches!(
            action,
            ConnectionAction::Emit(ConnectionEvent::Disconnected { .. })
        )));
        assert_eq!(connection.phase(), Phase::Disconnected);

        // Second stop: nothing at all.
        assert!(connection.stop(now).is_empty());

        // Deliveries after stop are silently discarded.
        let delivered = connection.deliver(Envelope::new(0, Message::Ready), now).unwrap();
        assert!(delivered.is_empty());

        // Start after stop is refused.
        assert!(matches!(connection.start(now, []), Err(ConnectionError::Stopped)));
    }

    #[test]
    fn duplicate_deliveries_are_no_ops() {
        let now = Instant::now();
        let mut connection = alice_connection();
        connection.start(now, []).unwrap();

        let first = connection.deliver(Envelope::new(0, Message::Ready), now).unwrap();
        assert!(!first.is_empty());

        let second = connection.deliver(Envelope::new(0, Message::Ready), now).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn send_requires_a_session_key() {
        let now = Instant::now();
        let mut connection = alice_connection();
        connection.start(now, []).unwrap();

        assert!(matches!(connection.send(b"hello"), Err(ConnectionError::NoSessionKey)));
    }

    #[test]
    fn handshake_phase_times_out() {
        let now = Instant::now();
        let mut connection = alice_connection();
        connection.start(now, []).unwrap();

        // Peer goes silent after READY: we are stuck in the handshake.
        connection.deliver(Envelope::new(0, Message::Ready), now).unwrap();
        assert_eq!(connection.phase(), Phase::Handshake);

        assert!(connection.tick(now).is_empty());

        let late = now + Duration::from_secs(31);
        let actions = connection.tick(late);
        assert_eq!(connection.phase(), Phase::Failed);
        assert!(actions.iter().any(|action| matches!(
            action,
            ConnectionAction::Send(envelope) if matches!(envelope.message, Message::Error(_))
        )));
        assert!(actions.iter().any(|action| matches!(
            action,
            ConnectionAction::Emit(ConnectionEvent::Disconnected { .. })
        )));
    }

    #[test]
    fn outbound_indices_strictly_increase_across_operations() {
        let now = Instant::now();
        let mut connection = alice_connection();

        let mut indices = sent_indices(&connection.start(now, []).unwrap());
        indices.extend(sent_indices(&connection.deliver(Envelope::new(0, Message::Ready), now).unwrap()));
        indices.extend(sent_indices(&connection.stop(now)));

        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(indices, sorted, "indices must be strictly increasing and never reused");
    }
}
