//! The connection protocol state machine.
//!
//! One machine per peer connection, driven entirely by messages (the peer's,
//! plus driver-injected `LOCAL_UPDATE`s). It performs no I/O: every handler
//! returns a list of [`Effect`]s — messages to transmit and events to
//! surface — which the [`Connection`](crate::connection::Connection) driver
//! numbers and hands to the host.
//!
//! # Phases
//!
//! ```text
//! Inert ──READY──> Handshake ──both identities accepted──> Synchronizing
//!                     │  (invitation settlement and the                │ heads equal
//!                     │   identity challenge run in parallel)          v
//!                     │                                          Negotiating
//!                     │                                                │ seeds exchanged
//!                     v                                                v
//!                  Failed <──ERROR / bad proof / timeout──────── Connected
//!                                                                      │
//!                  Disconnected <──────────────DISCONNECT──────────────┘
//! ```
//!
//! `Connected` re-enters `Synchronizing` when either chain moves; the
//! session key survives re-synchronization and is derived exactly once per
//! machine run. `Failed` and `Disconnected` are terminal: the machine drops
//! every subsequent message.
//!
//! # Parallel handshake regions
//!
//! During the handshake the invitation exchange and the mutual identity
//! challenge logically run side by side. They reduce to a small struct of
//! flags ([`HandshakeState`]); when one message drives both regions (an
//! invitee's HELLO carrying a proof), the invitation region runs first so
//! admission lands on the chain before the identity lookup consults it.

use std::time::Instant;

use bytes::Bytes;
use rand::{CryptoRng, RngCore};

use accord_proto::payloads::{
    AcceptInvitationPayload, Challenge, ChallengePayload, EncryptedPayload, ErrorCode,
    ErrorPayload, HelloPayload, IdentityClaim, Invitee, KeyScope, LocalUpdatePayload,
    MissingLinksPayload, ProofOfInvitation, ProvePayload, SeedPayload, UpdatePayload,
};
use accord_proto::{Blob, Message};

use crate::challenge;
use crate::connection::{ConnectionConfig, ConnectionEvent};
use crate::error::ConnectionError;
use crate::identity::{DeviceWithSecrets, UserWithSecrets};
use crate::invitation;
use crate::session::{KeyAgreementSeed, SessionKey};
use crate::team::{invitation_error_code, IdentityLookup, Member, Team, TeamError};

/// Something the machine wants done: transmit a message or notify the host.
///
/// The driver assigns outbound indices and executes these in order.
#[derive(Debug)]
pub enum Effect {
    /// Transmit this message to the peer
    Send(Message),
    /// Surface this event to the host
    Emit(ConnectionEvent),
}

/// Top-level machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created or reset; waiting for the peer's READY
    Inert,
    /// Invitation settlement and mutual identity challenge
    Handshake,
    /// Reconciling signature chains
    Synchronizing,
    /// Exchanging key-agreement seeds
    Negotiating,
    /// Session established
    Connected,
    /// Terminal: a failure was recorded and reported
    Failed,
    /// Terminal: clean disconnect
    Disconnected,
}

impl Phase {
    /// Terminal phases accept no further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }

    /// Short human-readable label, used in `Change` events and logs.
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Inert => "starting",
            Self::Handshake => "connecting",
            Self::Synchronizing => "synchronizing",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Sub-state of the parallel handshake regions.
#[derive(Debug, Default, Clone)]
struct HandshakeState {
    /// We hold an invitation and have not received ACCEPT_INVITATION yet
    awaiting_acceptance: bool,
    /// We already challenged the peer's claim
    sent_challenge: bool,
    /// We verified the peer's identity proof and sent ACCEPT_IDENTITY
    we_accepted_them: bool,
    /// The peer accepted our identity proof
    they_accepted_us: bool,
}

/// The connection context: everything the machine knows about both sides.
struct Context<T: Team> {
    device: DeviceWithSecrets,
    user: Option<UserWithSecrets>,
    invitee: Option<Invitee>,
    invitation_seed: Option<String>,
    team: Option<T>,

    their_claim: Option<IdentityClaim>,
    they_have_invitation: bool,
    their_proof: Option<ProofOfInvitation>,
    my_proof: Option<ProofOfInvitation>,
    proof_sent: bool,

    peer: Option<Member>,
    their_device_encryption: Option<[u8; 32]>,
    challenge: Option<Challenge>,

    seed: Option<KeyAgreementSeed>,
    their_encrypted_seed: Option<Blob>,
    session_key: Option<SessionKey>,

    their_head: Option<accord_proto::payloads::Hash>,
    error: Option<ErrorPayload>,
}

/// The per-connection protocol state machine.
pub struct Machine<T: Team, R: RngCore + CryptoRng> {
    ctx: Context<T>,
    phase: Phase,
    handshake: HandshakeState,
    phase_entered: Option<Instant>,
    connected_once: bool,
    rng: R,
}

impl<T: Team, R: RngCore + CryptoRng> Machine<T, R> {
    /// Machine for an existing team member.
    pub fn member(device: DeviceWithSecrets, user: UserWithSecrets, team: T, rng: R) -> Self {
        Self::new(device, Some(user), None, None, Some(team), rng)
    }

    /// Machine for an invitee holding only an invitation seed.
    pub fn invitee(
        device: DeviceWithSecrets,
        invitee: Invitee,
        invitation_seed: impl Into<String>,
        rng: R,
    ) -> Self {
        Self::new(device, None, Some(invitee), Some(invitation_seed.into()), None, rng)
    }

    fn new(
        device: DeviceWithSecrets,
        user: Option<UserWithSecrets>,
        invitee: Option<Invitee>,
        invitation_seed: Option<String>,
        team: Option<T>,
        rng: R,
    ) -> Self {
        Self {
            ctx: Context {
                device,
                user,
                invitee,
                invitation_seed,
                team,
                their_claim: None,
                they_have_invitation: false,
                their_proof: None,
                my_proof: None,
                proof_sent: false,
                peer: None,
                their_device_encryption: None,
                challenge: None,
                seed: None,
                their_encrypted_seed: None,
                session_key: None,
                their_head: None,
                error: None,
            },
            phase: Phase::Inert,
            handshake: HandshakeState::default(),
            phase_entered: None,
            connected_once: false,
            rng,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The session key, once `Connected` has been reached.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.ctx.session_key.as_ref()
    }

    /// The first terminal error, if the machine failed.
    pub fn error(&self) -> Option<&ErrorPayload> {
        self.ctx.error.as_ref()
    }

    /// The team handle, present for members and for invitees after joining.
    pub fn team(&self) -> Option<&T> {
        self.ctx.team.as_ref()
    }

    /// The local user identity; assigned for a member invitee when it joins.
    pub fn user(&self) -> Option<&UserWithSecrets> {
        self.ctx.user.as_ref()
    }

    /// Best known name for the peer, for logs.
    pub fn peer_name(&self) -> String {
        if let Some(claim) = &self.ctx.their_claim {
            return claim.name.clone();
        }
        "unknown peer".to_string()
    }

    /// Drop all negotiated state and return to `Inert`, keeping identity,
    /// invitation, and team context. Outbound numbering is the driver's and
    /// is deliberately untouched.
    pub fn reset(&mut self) {
        self.ctx.their_claim = None;
        self.ctx.they_have_invitation = false;
        self.ctx.their_proof = None;
        self.ctx.my_proof = None;
        self.ctx.proof_sent = false;
        self.ctx.peer = None;
        self.ctx.their_device_encryption = None;
        self.ctx.challenge = None;
        self.ctx.seed = None;
        self.ctx.their_encrypted_seed = None;
        self.ctx.session_key = None;
        self.ctx.their_head = None;
        self.ctx.error = None;
        self.handshake = HandshakeState::default();
        self.phase = Phase::Inert;
        self.phase_entered = None;
        self.connected_once = false;
    }

    /// Feed one in-order message through the machine.
    pub fn handle(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        if self.phase.is_terminal() {
            tracing::debug!(kind = message.kind(), "terminal phase; dropping message");
            return Vec::new();
        }

        match message {
            Message::Error(payload) => self.receive_error(&payload),
            Message::Disconnect => self.peer_disconnected(),
            Message::Reconnect => self.peer_reconnected(),
            other => match self.phase {
                Phase::Inert => self.handle_inert(other, now),
                Phase::Handshake => self.handle_handshake(other, now),
                Phase::Synchronizing => self.handle_synchronizing(other, now),
                Phase::Negotiating => self.handle_negotiating(other, now),
                Phase::Connected => self.handle_connected(other, now),
                Phase::Failed | Phase::Disconnected => Vec::new(),
            },
        }
    }

    /// Check the current phase's deadline.
    ///
    /// `Connected` never times out; handshake phases use the handshake
    /// timeout and `Synchronizing` the sync timeout. The clock for a phase
    /// starts on entry (or on the first tick after construction).
    pub fn tick(&mut self, now: Instant, config: &ConnectionConfig) -> Vec<Effect> {
        if self.phase.is_terminal() || self.phase == Phase::Connected {
            return Vec::new();
        }

        let Some(entered) = self.phase_entered else {
            self.phase_entered = Some(now);
            return Vec::new();
        };

        let timeout = match self.phase {
            Phase::Synchronizing => config.sync_timeout,
            _ => config.handshake_timeout,
        };

        if now.duration_since(entered) > timeout {
            return self.fail(
                ErrorCode::Timeout,
                format!("{} did not complete within {:?}", self.phase.describe(), timeout),
            );
        }
        Vec::new()
    }

    /// Seal an application payload with the session key.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NoSessionKey`] before the handshake completes.
    pub fn send_app_message(&mut self, payload: &[u8]) -> Result<Vec<Effect>, ConnectionError> {
        let key = self.ctx.session_key.as_ref().ok_or(ConnectionError::NoSessionKey)?;
        let sealed = key.seal(&mut self.rng, payload);
        Ok(vec![Effect::Send(Message::EncryptedMessage(EncryptedPayload { payload: sealed }))])
    }

    // ---- phase handlers ----------------------------------------------------

    fn handle_inert(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::Ready => self.enter_handshake(now),
            other => self.drop_message(&other),
        }
    }

    fn handle_handshake(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::Hello(hello) => self.receive_hello(hello, now),
            Message::AcceptInvitation(payload) => self.receive_acceptance(payload, now),
            Message::ChallengeIdentity(payload) => self.prove_identity(&payload),
            Message::ProveIdentity(payload) => self.receive_identity_proof(&payload, now),
            Message::AcceptIdentity => {
                self.handshake.they_accepted_us = true;
                self.maybe_advance_handshake(now)
            }
            other => self.drop_message(&other),
        }
    }

    fn handle_synchronizing(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::Update(update) => {
                self.ctx.their_head = Some(update.head);
                let mut effects = self.send_missing_links(&update);
                effects.extend(self.maybe_finish_sync(now));
                effects
            }
            Message::MissingLinks(payload) => self.receive_links(&payload, now),
            Message::LocalUpdate(update) => self.local_update_in_sync(&update, now),
            // The peer can reach key agreement before we consider the chains
            // settled; hold its seed until we get there.
            Message::Seed(seed) => {
                self.ctx.their_encrypted_seed = Some(seed.encrypted_seed);
                Vec::new()
            }
            other => self.drop_message(&other),
        }
    }

    fn handle_negotiating(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::Seed(seed) => {
                self.ctx.their_encrypted_seed = Some(seed.encrypted_seed);
                self.derive_shared_key(now)
            }
            // Either chain moved again: negotiation waits while we re-sync.
            Message::Update(update) => {
                self.ctx.their_head = Some(update.head);
                if update.head != self.team_head() {
                    let mut effects = self.enter_synchronizing(now);
                    effects.extend(self.send_missing_links(&update));
                    effects
                } else {
                    Vec::new()
                }
            }
            Message::MissingLinks(payload) => self.receive_links(&payload, now),
            Message::LocalUpdate(update) => self.local_update_in_sync(&update, now),
            other => self.drop_message(&other),
        }
    }

    fn handle_connected(&mut self, message: Message, now: Instant) -> Vec<Effect> {
        match message {
            Message::EncryptedMessage(payload) => self.receive_encrypted_message(&payload, now),
            Message::Update(update) => {
                self.ctx.their_head = Some(update.head);
                if update.head != self.team_head() {
                    let mut effects = self.enter_synchronizing(now);
                    effects.extend(self.send_missing_links(&update));
                    effects
                } else {
                    Vec::new()
                }
            }
            Message::LocalUpdate(update) => {
                if self.ctx.their_head != Some(update.head) {
                    self.enter_synchronizing(now)
                } else {
                    Vec::new()
                }
            }
            other => self.drop_message(&other),
        }
    }

    // ---- handshake actions -------------------------------------------------

    fn enter_handshake(&mut self, now: Instant) -> Vec<Effect> {
        self.handshake = HandshakeState::default();
        self.handshake.awaiting_acceptance = self.i_have_invitation();

        let mut effects = self.transition(Phase::Handshake, now);
        effects.push(Effect::Send(self.hello()));
        effects
    }

    /// Build our HELLO. The proof of invitation goes out at most once per
    /// connection and never once a team is present.
    fn hello(&mut self) -> Message {
        let proof = if self.i_have_invitation() && !self.ctx.proof_sent {
            match (&self.ctx.invitee, &self.ctx.invitation_seed) {
                (Some(invitee), Some(seed)) => {
                    let proof = invitation::generate_proof(
                        seed,
                        invitee.clone(),
                        self.ctx.device.device_name.clone(),
                        self.ctx.device.keys.public(),
                    );
                    self.ctx.proof_sent = true;
                    self.ctx.my_proof = Some(proof.clone());
                    Some(proof)
                }
                _ => None,
            }
        } else {
            None
        };

        Message::Hello(HelloPayload {
            identity_claim: self.ctx.device.claim(),
            proof_of_invitation: proof,
        })
    }

    fn receive_hello(&mut self, hello: HelloPayload, now: Instant) -> Vec<Effect> {
        tracing::debug!(peer = %hello.identity_claim.name, "received hello");
        self.ctx.they_have_invitation = hello.proof_of_invitation.is_some();
        self.ctx.their_proof = hello.proof_of_invitation;
        self.ctx.their_claim = Some(hello.identity_claim);

        // Two strangers holding invitations cannot admit each other.
        if self.i_have_invitation() && self.ctx.they_have_invitation {
            return self.fail(
                ErrorCode::NeitherIsMember,
                "neither peer is a member of the team; two invitees cannot admit each other",
            );
        }

        let mut effects = Vec::new();

        // Invitation region first: admission must land on the chain before
        // the identity region consults it.
        if self.ctx.they_have_invitation && self.ctx.team.is_some() {
            let proof = self.ctx.their_proof.clone().expect("proof accompanies the flag");
            let team = self.ctx.team.clone().expect("team presence checked above");

            if let Err(error) = team.validate_invitation(&proof) {
                return self.fail(invitation_error_code(&error), error.to_string());
            }
            if let Err(error) = team.admit(&proof) {
                return self.fail(invitation_error_code(&error), error.to_string());
            }
            tracing::debug!(invitee = %proof.invitee.name, "admitted invitee");
            effects.push(Effect::Send(Message::AcceptInvitation(AcceptInvitationPayload {
                chain: team.save(),
            })));
        }

        match self.confirm_and_challenge() {
            Ok(mut challenge_effects) => effects.append(&mut challenge_effects),
            Err(failure) => return failure,
        }

        effects.extend(self.maybe_advance_handshake(now));
        effects
    }

    /// `confirmIdentityExists` + `challengeIdentity`: consult the chain for
    /// the peer's claim, then challenge it. Silently skipped while we have no
    /// team or no claim (the invitee path before ACCEPT_INVITATION).
    fn confirm_and_challenge(&mut self) -> Result<Vec<Effect>, Vec<Effect>> {
        let (Some(team), Some(claim)) = (&self.ctx.team, &self.ctx.their_claim) else {
            return Ok(Vec::new());
        };

        let (code, reason) = match team.lookup_identity(claim) {
            IdentityLookup::ValidDevice => {
                if self.handshake.sent_challenge {
                    return Ok(Vec::new());
                }
                let challenge = challenge::issue(&mut self.rng, claim.clone());
                self.ctx.challenge = Some(challenge.clone());
                self.handshake.sent_challenge = true;
                return Ok(vec![Effect::Send(Message::ChallengeIdentity(ChallengePayload {
                    challenge,
                }))]);
            }
            IdentityLookup::MemberUnknown => {
                (ErrorCode::MemberUnknown, format!("{} is not a member of this team", claim.name))
            }
            IdentityLookup::MemberRemoved => {
                (ErrorCode::MemberRemoved, format!("{} was removed from this team", claim.name))
            }
            IdentityLookup::DeviceUnknown => {
                (ErrorCode::DeviceUnknown, format!("device {} is not on this team", claim.name))
            }
            IdentityLookup::DeviceRemoved => {
                (ErrorCode::DeviceRemoved, format!("device {} was removed from this team", claim.name))
            }
        };
        Err(self.fail(code, reason))
    }

    fn receive_acceptance(&mut self, payload: AcceptInvitationPayload, now: Instant) -> Vec<Effect> {
        if !self.handshake.awaiting_acceptance {
            return self.drop_message(&Message::AcceptInvitation(payload));
        }

        let Some(seed) = self.ctx.invitation_seed.clone() else {
            return self.fail(ErrorCode::WrongTeam, "no invitation seed to join with");
        };

        let team = match T::load(&payload.chain, self.ctx.device.clone()) {
            Ok(team) => team,
            Err(error) => {
                return self.fail(
                    ErrorCode::WrongTeam,
                    format!("could not reconstruct the team we were invited to: {error}"),
                );
            }
        };

        // A rogue peer could "accept" us onto a team we were never invited
        // to; the chain must contain our own invitation.
        if !team.has_invitation(&invitation::invitation_id(&seed)) {
            return self.fail(
                ErrorCode::WrongTeam,
                TeamError::WrongTeam.to_string(),
            );
        }

        let Some(proof) = self.ctx.my_proof.clone() else {
            return self.fail(ErrorCode::WrongTeam, "acceptance arrived before our proof was sent");
        };

        let member = match team.join(&proof, &seed) {
            Ok(member) => member,
            Err(error) => return self.fail(invitation_error_code(&error), error.to_string()),
        };

        // A member invitee starts out with its device keyset as its user
        // keyset; rotation happens on-chain later.
        if self.ctx.invitee.as_ref().map(|i| i.kind) == Some(KeyScope::Member) {
            self.ctx.user = Some(UserWithSecrets {
                user_name: member.user_name.clone(),
                keys: self.ctx.device.keys.clone(),
            });
        }

        let head = team.head();
        self.ctx.team = Some(team);
        self.handshake.awaiting_acceptance = false;
        tracing::debug!(user = %member.user_name, "joined team");

        let mut effects = vec![Effect::Emit(ConnectionEvent::Joined { head })];
        match self.confirm_and_challenge() {
            Ok(mut challenge_effects) => effects.append(&mut challenge_effects),
            Err(failure) => return failure,
        }
        effects.extend(self.maybe_advance_handshake(now));
        effects
    }

    /// `proveIdentity`: sign the peer's challenge with our device key.
    fn prove_identity(&mut self, payload: &ChallengePayload) -> Vec<Effect> {
        if payload.challenge.claim != self.ctx.device.claim() {
            tracing::warn!(
                claim = %payload.challenge.claim.name,
                "challenge names an identity we never claimed; dropping"
            );
            return Vec::new();
        }

        let proof = challenge::prove(&payload.challenge, &self.ctx.device.keys.signing);
        vec![Effect::Send(Message::ProveIdentity(ProvePayload {
            challenge: payload.challenge.clone(),
            proof,
        }))]
    }

    fn receive_identity_proof(&mut self, payload: &ProvePayload, now: Instant) -> Vec<Effect> {
        let Some(challenge) = self.ctx.challenge.clone() else {
            return self.drop_message(&Message::ProveIdentity(payload.clone()));
        };
        if payload.challenge != challenge {
            return self.fail(
                ErrorCode::IdentityProofInvalid,
                "identity proof answers a challenge we did not issue",
            );
        }

        let team = self.ctx.team.clone().expect("a challenge is only issued with a team present");
        if !team.verify_identity_proof(&challenge, &payload.proof) {
            return self.fail(ErrorCode::IdentityProofInvalid, "identity proof failed verification");
        }

        self.store_peer(&team);
        self.handshake.we_accepted_them = true;

        let mut effects = vec![Effect::Send(Message::AcceptIdentity)];
        effects.extend(self.maybe_advance_handshake(now));
        effects
    }

    /// `storePeer`: resolve the peer's member record and the device key the
    /// SEED box will be addressed to. Left unset if the member is gone.
    fn store_peer(&mut self, team: &T) {
        let Some(claim) = self.ctx.their_claim.clone() else { return };
        let Some((user_name, device_name)) = claim.split_device() else { return };

        self.ctx.peer = team.members(user_name);
        self.ctx.their_device_encryption = self
            .ctx
            .peer
            .as_ref()
            .and_then(|member| member.device(device_name))
            .map(|device| device.keys.encryption);
    }

    fn maybe_advance_handshake(&mut self, now: Instant) -> Vec<Effect> {
        let handshake = &self.handshake;
        if handshake.awaiting_acceptance
            || !handshake.we_accepted_them
            || !handshake.they_accepted_us
        {
            return Vec::new();
        }
        self.enter_synchronizing(now)
    }

    // ---- synchronization actions -------------------------------------------

    /// Entry to `Synchronizing` always advertises our chain state.
    fn enter_synchronizing(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = self.transition(Phase::Synchronizing, now);
        effects.extend(self.send_update());
        effects
    }

    fn team_head(&self) -> accord_proto::payloads::Hash {
        self.team_ref().head()
    }

    fn team_ref(&self) -> &T {
        self.ctx.team.as_ref().expect("team is present past the handshake")
    }

    /// `sendUpdate`: advertise our chain state.
    fn send_update(&self) -> Vec<Effect> {
        let team = self.team_ref();
        vec![Effect::Send(Message::Update(UpdatePayload {
            root: team.root(),
            head: team.head(),
            hashes: team.link_hashes(),
        }))]
    }

    /// `sendMissingLinks`: push the delta the peer's UPDATE reveals, if any.
    fn send_missing_links(&self, update: &UpdatePayload) -> Vec<Effect> {
        let team = self.team_ref();
        let links = team.get_missing_links(update);
        if links.is_empty() {
            return Vec::new();
        }
        tracing::debug!(count = links.len(), "sending missing links");
        vec![Effect::Send(Message::MissingLinks(MissingLinksPayload { head: team.head(), links }))]
    }

    /// `receiveMissingLinks`: fold the peer's links into our replica.
    fn receive_links(&mut self, payload: &MissingLinksPayload, now: Instant) -> Vec<Effect> {
        let team = self.team_ref().clone();
        if let Err(error) = team.receive_missing_links(&payload.head, &payload.links) {
            // Bad link sets don't advance our chain; we stay here and let the
            // sync timeout fire if the peer never sends usable data.
            tracing::warn!(%error, "ignoring undecodable link set");
            return Vec::new();
        }
        self.ctx.their_head = Some(payload.head);

        let mut effects = self.send_update();
        effects.extend(self.maybe_finish_sync(now));
        effects
    }

    fn local_update_in_sync(&mut self, update: &LocalUpdatePayload, now: Instant) -> Vec<Effect> {
        tracing::debug!(head = ?update.head, "local team update");
        let mut effects = self.send_update();
        effects.extend(self.maybe_finish_sync(now));
        effects
    }

    /// Leave `Synchronizing` once the chains agree: on to key agreement, or
    /// straight back to `Connected` when a session key already exists.
    fn maybe_finish_sync(&mut self, now: Instant) -> Vec<Effect> {
        if self.phase != Phase::Synchronizing && self.phase != Phase::Negotiating {
            return Vec::new();
        }

        // The peer may have vanished from the chain we just synced.
        let peer_gone = match &self.ctx.peer {
            Some(peer) => !self.team_ref().has(&peer.user_name),
            None => true,
        };
        if peer_gone {
            let name = self.peer_name();
            return self.fail(ErrorCode::PeerRemoved, format!("{name} was removed from the team"));
        }

        if self.ctx.their_head != Some(self.team_head()) {
            return Vec::new();
        }

        if self.ctx.session_key.is_some() {
            let head = self.team_head();
            let mut effects = self.transition(Phase::Connected, now);
            effects.push(Effect::Emit(ConnectionEvent::Updated { head }));
            return effects;
        }

        if self.phase == Phase::Negotiating {
            // Already negotiating; nothing further to do until SEED arrives.
            return Vec::new();
        }
        self.enter_negotiating(now)
    }

    // ---- key agreement actions ---------------------------------------------

    /// `generateSeed` + `sendSeed`, then derive immediately if the peer's
    /// seed already arrived.
    fn enter_negotiating(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = self.transition(Phase::Negotiating, now);

        if self.ctx.seed.is_none() {
            let Some(recipient) = self.ctx.their_device_encryption else {
                return self.fail(
                    ErrorCode::PeerRemoved,
                    "no device key to address the key agreement seed to",
                );
            };

            let seed = KeyAgreementSeed::generate(&mut self.rng);
            let sealed = crate::crypto::seal_box(
                &mut self.rng,
                &seed.0,
                &recipient,
                &self.ctx.device.keys.encryption,
            );
            self.ctx.seed = Some(seed);

            match sealed {
                Ok(encrypted_seed) => effects.push(Effect::Send(Message::Seed(SeedPayload {
                    encrypted_seed,
                }))),
                Err(error) => {
                    return self.fail(ErrorCode::DecryptionFailed, error.to_string());
                }
            }
        }

        effects.extend(self.derive_shared_key(now));
        effects
    }

    /// `deriveSharedKey`: open the peer's seed and derive the session key.
    /// A decryption failure is fatal.
    fn derive_shared_key(&mut self, now: Instant) -> Vec<Effect> {
        let (Some(sealed), Some(ours)) =
            (self.ctx.their_encrypted_seed.clone(), self.ctx.seed.clone())
        else {
            return Vec::new();
        };
        let Some(sender) = self.ctx.their_device_encryption else {
            return Vec::new();
        };

        let opened =
            crate::crypto::open_box(&sealed, &sender, &self.ctx.device.keys.encryption);
        let theirs = match opened {
            Ok(bytes) => match KeyAgreementSeed::from_bytes(&bytes) {
                Some(seed) => seed,
                None => {
                    return self.fail(
                        ErrorCode::DecryptionFailed,
                        "peer's key agreement seed has the wrong length",
                    );
                }
            },
            Err(_) => {
                return self.fail(
                    ErrorCode::DecryptionFailed,
                    "could not decrypt the peer's key agreement seed",
                );
            }
        };

        self.ctx.session_key = Some(SessionKey::derive(&ours, &theirs));

        let mut effects = self.transition(Phase::Connected, now);
        if !self.connected_once {
            self.connected_once = true;
            effects.push(Effect::Emit(ConnectionEvent::Connected));
        } else {
            let head = self.team_head();
            effects.push(Effect::Emit(ConnectionEvent::Updated { head }));
        }
        effects
    }

    // ---- connected actions -------------------------------------------------

    /// `receiveEncryptedMessage`: open with the session key and surface the
    /// plaintext.
    fn receive_encrypted_message(&mut self, payload: &EncryptedPayload, _now: Instant) -> Vec<Effect> {
        let key = self.ctx.session_key.as_ref().expect("connected implies a session key");
        match key.open(&payload.payload) {
            Ok(plaintext) => {
                vec![Effect::Emit(ConnectionEvent::Message(Bytes::from(plaintext)))]
            }
            Err(_) => self.fail(
                ErrorCode::DecryptionFailed,
                "could not decrypt an application message",
            ),
        }
    }

    // ---- terminal transitions ----------------------------------------------

    /// `receiveError`: the peer reported a failure and is gone.
    fn receive_error(&mut self, payload: &ErrorPayload) -> Vec<Effect> {
        tracing::warn!(code = ?payload.code, message = %payload.message, "peer reported an error");
        let reason = format!("peer error: {}", payload.message);
        self.ctx.error = Some(ErrorPayload { code: ErrorCode::PeerError, message: reason.clone() });
        self.phase = Phase::Failed;
        self.phase_entered = None;
        vec![
            Effect::Emit(ConnectionEvent::Change(Phase::Failed.describe().into())),
            Effect::Emit(ConnectionEvent::Disconnected { reason }),
        ]
    }

    fn peer_disconnected(&mut self) -> Vec<Effect> {
        self.phase = Phase::Disconnected;
        self.phase_entered = None;
        vec![
            Effect::Emit(ConnectionEvent::Change(Phase::Disconnected.describe().into())),
            Effect::Emit(ConnectionEvent::Disconnected { reason: "peer disconnected".into() }),
        ]
    }

    /// The peer restarted its machine; restart ours and offer a fresh READY.
    fn peer_reconnected(&mut self) -> Vec<Effect> {
        tracing::debug!("peer reconnected; restarting handshake");
        self.reset();
        vec![
            Effect::Emit(ConnectionEvent::Change(Phase::Inert.describe().into())),
            Effect::Send(Message::Ready),
        ]
    }

    /// Record a terminal failure: context error, outbound ERROR, events.
    fn fail(&mut self, code: ErrorCode, message: impl Into<String>) -> Vec<Effect> {
        let message = message.into();
        tracing::warn!(?code, %message, peer = %self.peer_name(), "connection failed");

        let payload = ErrorPayload { code, message: message.clone() };
        self.ctx.error = Some(payload.clone());
        self.phase = Phase::Failed;
        self.phase_entered = None;

        vec![
            Effect::Send(Message::Error(payload)),
            Effect::Emit(ConnectionEvent::Change(Phase::Failed.describe().into())),
            Effect::Emit(ConnectionEvent::Disconnected { reason: message }),
        ]
    }

    fn transition(&mut self, phase: Phase, now: Instant) -> Vec<Effect> {
        tracing::debug!(from = self.phase.describe(), to = phase.describe(), "transition");
        self.phase = phase;
        self.phase_entered = Some(now);
        vec![Effect::Emit(ConnectionEvent::Change(phase.describe().into()))]
    }

    fn drop_message(&self, message: &Message) -> Vec<Effect> {
        tracing::warn!(
            kind = message.kind(),
            phase = self.phase.describe(),
            "unexpected message for phase; dropping"
        );
        Vec::new()
    }

    fn i_have_invitation(&self) -> bool {
        self.ctx.invitee.is_some() && self.ctx.team.is_none()
    }
}
