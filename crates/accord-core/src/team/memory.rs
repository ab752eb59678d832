//! In-memory reference team.
//!
//! A working implementation of the [`Team`] trait over a linear hash-linked
//! chain of signed membership operations, held entirely in memory. It backs
//! the harness and the protocol tests; a production deployment would swap in
//! a persistent chain store behind the same trait.
//!
//! # Chain model
//!
//! Each link holds `{ prev, author, op }`, is hashed with blake3 over its
//! canonical JSON, and is signed by its author's device key (or, for
//! self-admission, by the keys carried in the proof). Replay validates
//! linkage, signatures, signer authority, and op-level rules in order, so a
//! replica can only be built from a chain that is valid end to end.
//!
//! # Merge rule
//!
//! Chains are linear. Receiving links that extend our head adopts the longer
//! chain; receiving a stale view is a no-op; a true divergence adopts the
//! longer chain with a deterministic tiebreak. Full CRDT merge of concurrent
//! membership operations is out of scope for the reference implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use accord_proto::payloads::{
    Challenge, Hash, IdentityClaim, InvitationId, Invitee, KeyScope, ProofOfInvitation,
    UpdatePayload,
};
use accord_proto::Blob;

use crate::challenge;
use crate::crypto;
use crate::identity::{DeviceWithSecrets, UserWithSecrets};
use crate::invitation::{self, Invitation};

use super::{DeviceInfo, IdentityLookup, Member, Team, TeamError, ADMIN};

/// One membership operation on the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum TeamOp {
    /// Genesis: the team and its founder
    Root {
        team_name: String,
        founder: Member,
    },
    /// Add a member (with their devices)
    AddMember { member: Member },
    /// Add a device to an existing member
    AddDevice { device: DeviceInfo },
    /// Remove a member and all their devices
    RemoveMember { user_name: String },
    /// Record a new invitation
    Invite { invitation: Invitation },
    /// Revoke an unredeemed invitation
    RevokeInvitation { id: InvitationId },
    /// Redeem an invitation, materializing the invitee on the chain
    Admit { proof: ProofOfInvitation },
}

/// Chain link: body, plus the signature that covers the body's canonical
/// JSON and the key that made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Link {
    body: LinkBody,
    #[serde(with = "hex::serde")]
    signer: [u8; 32],
    #[serde(with = "hex::serde")]
    signature: [u8; 64],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LinkBody {
    /// Hash of the previous link; `None` only for the root
    prev: Option<Hash>,
    /// Device id of the link's author
    author: String,
    op: TeamOp,
}

fn canonical(body: &LinkBody) -> Vec<u8> {
    serde_json::to_vec(body).expect("link body serialization cannot fail")
}

fn link_hash(body: &LinkBody) -> Hash {
    Hash::from_bytes(crypto::hash(&canonical(body)))
}

#[derive(Debug, Clone)]
struct InvitationState {
    invitation: Invitation,
    revoked: bool,
    used: bool,
}

/// The replica state behind a [`SharedTeam`] handle.
#[derive(Debug)]
pub struct TeamState {
    team_name: String,
    links: Vec<Link>,
    hashes: Vec<Hash>,
    members: BTreeMap<String, Member>,
    removed_members: BTreeSet<String>,
    removed_devices: BTreeSet<String>,
    invitations: BTreeMap<InvitationId, InvitationState>,
    local_device: DeviceWithSecrets,
}

impl TeamState {
    /// Found a team: the founder's user and first device go on the root link.
    fn create(
        team_name: impl Into<String>,
        founder: &UserWithSecrets,
        device: &DeviceWithSecrets,
    ) -> Result<Self, TeamError> {
        if founder.user_name != device.user_name {
            return Err(TeamError::InvalidChain(format!(
                "founding device {} does not belong to founder {}",
                device.device_id(),
                founder.user_name
            )));
        }

        let member = Member {
            user_name: founder.user_name.clone(),
            keys: founder.keys.public(),
            roles: BTreeSet::from([ADMIN.to_string()]),
            devices: vec![DeviceInfo {
                user_name: device.user_name.clone(),
                device_name: device.device_name.clone(),
                keys: device.keys.public(),
            }],
        };

        let mut state = Self::empty(team_name.into(), device.clone());
        state.append(TeamOp::Root { team_name: state.team_name.clone(), founder: member })?;
        Ok(state)
    }

    fn empty(team_name: String, local_device: DeviceWithSecrets) -> Self {
        Self {
            team_name,
            links: Vec::new(),
            hashes: Vec::new(),
            members: BTreeMap::new(),
            removed_members: BTreeSet::new(),
            removed_devices: BTreeSet::new(),
            invitations: BTreeMap::new(),
            local_device,
        }
    }

    /// Rebuild a replica by replaying a full chain.
    fn from_links(links: Vec<Link>, local_device: DeviceWithSecrets) -> Result<Self, TeamError> {
        let mut state = Self::empty(String::new(), local_device);
        for link in links {
            state.integrate(link)?;
        }
        if state.links.is_empty() {
            return Err(TeamError::InvalidChain("chain is empty".into()));
        }
        Ok(state)
    }

    /// Author, sign, and integrate a new link.
    fn append(&mut self, op: TeamOp) -> Result<(), TeamError> {
        let body = LinkBody {
            prev: self.hashes.last().copied(),
            author: self.local_device.device_id(),
            op,
        };
        let bytes = canonical(&body);
        let signature = self.local_device.keys.signing.sign(&bytes);
        let signer = self.local_device.keys.signing.public();
        self.integrate(Link { body, signer, signature })
    }

    /// Validate one link against the current state, then apply it.
    fn integrate(&mut self, link: Link) -> Result<(), TeamError> {
        let bytes = canonical(&link.body);
        let hash = Hash::from_bytes(crypto::hash(&bytes));

        match (&link.body.prev, self.hashes.last()) {
            (None, None) => {
                if !matches!(link.body.op, TeamOp::Root { .. }) {
                    return Err(TeamError::InvalidChain("first link is not a root".into()));
                }
            }
            (Some(prev), Some(head)) if prev == head => {}
            _ => return Err(TeamError::InvalidChain("broken linkage".into())),
        }

        if !crypto::verify_signature(&link.signer, &bytes, &link.signature) {
            return Err(TeamError::InvalidChain("bad link signature".into()));
        }
        self.check_signer(&link)?;

        self.apply(&link.body.op, &link.body.author)?;
        self.links.push(link);
        self.hashes.push(hash);
        Ok(())
    }

    /// Verify that the signing key belongs to someone entitled to author the
    /// link at this point in the chain.
    fn check_signer(&self, link: &Link) -> Result<(), TeamError> {
        match &link.body.op {
            TeamOp::Root { founder, .. } => {
                let device = founder
                    .devices
                    .iter()
                    .find(|d| d.device_id() == link.body.author)
                    .ok_or_else(|| {
                        TeamError::InvalidChain("root author is not a founder device".into())
                    })?;
                if device.keys.signing != link.signer {
                    return Err(TeamError::InvalidChain("root signer mismatch".into()));
                }
                Ok(())
            }
            // An admission may be self-signed with the keys carried in the
            // proof (the invitee joining) or signed by an existing member
            // device (the inviter admitting).
            TeamOp::Admit { proof } => {
                if proof.keys.signing == link.signer {
                    return Ok(());
                }
                self.expect_member_device(&link.body.author, &link.signer)
            }
            _ => self.expect_member_device(&link.body.author, &link.signer),
        }
    }

    fn expect_member_device(&self, author: &str, signer: &[u8; 32]) -> Result<(), TeamError> {
        let device = self
            .members
            .values()
            .flat_map(|m| m.devices.iter())
            .find(|d| d.device_id() == author)
            .ok_or_else(|| TeamError::InvalidChain(format!("unknown link author {author}")))?;
        if device.keys.signing != *signer {
            return Err(TeamError::InvalidChain(format!("signer mismatch for author {author}")));
        }
        Ok(())
    }

    fn author_member(&self, author: &str) -> Option<&Member> {
        let (user_name, _) = author.split_once("::")?;
        self.members.get(user_name)
    }

    fn require_admin(&self, author: &str) -> Result<(), TeamError> {
        let member = self
            .author_member(author)
            .ok_or_else(|| TeamError::NotAMember(author.to_string()))?;
        if !member.is_admin() {
            return Err(TeamError::NotAdmin(member.user_name.clone()));
        }
        Ok(())
    }

    fn apply(&mut self, op: &TeamOp, author: &str) -> Result<(), TeamError> {
        match op {
            TeamOp::Root { team_name, founder } => {
                if !self.links.is_empty() {
                    return Err(TeamError::InvalidChain("root after genesis".into()));
                }
                self.team_name = team_name.clone();
                self.members.insert(founder.user_name.clone(), founder.clone());
            }
            TeamOp::AddMember { member } => {
                self.require_admin(author)?;
                if self.members.contains_key(&member.user_name) {
                    return Err(TeamError::DuplicateMember(member.user_name.clone()));
                }
                self.members.insert(member.user_name.clone(), member.clone());
            }
            TeamOp::AddDevice { device } => {
                let author_user = self.author_member(author).map(|m| m.user_name.clone());
                if author_user.as_deref() != Some(device.user_name.as_str()) {
                    self.require_admin(author)?;
                }
                let member = self
                    .members
                    .get_mut(&device.user_name)
                    .ok_or_else(|| TeamError::NotAMember(device.user_name.clone()))?;
                if member.device(&device.device_name).is_some() {
                    return Err(TeamError::InvalidChain(format!(
                        "device {} already exists",
                        device.device_id()
                    )));
                }
                member.devices.push(device.clone());
            }
            TeamOp::RemoveMember { user_name } => {
                self.require_admin(author)?;
                let member = self
                    .members
                    .remove(user_name)
                    .ok_or_else(|| TeamError::NotAMember(user_name.clone()))?;
                for device in &member.devices {
                    self.removed_devices.insert(device.device_id());
                }
                self.removed_members.insert(user_name.clone());
            }
            TeamOp::Invite { invitation } => {
                self.require_admin(author)?;
                self.invitations.insert(
                    invitation.id.clone(),
                    InvitationState { invitation: invitation.clone(), revoked: false, used: false },
                );
            }
            TeamOp::RevokeInvitation { id } => {
                self.require_admin(author)?;
                let state = self
                    .invitations
                    .get_mut(id)
                    .ok_or_else(|| TeamError::UnknownInvitation(id.clone()))?;
                if state.used {
                    return Err(TeamError::InvitationUsed(id.clone()));
                }
                state.revoked = true;
            }
            TeamOp::Admit { proof } => {
                self.check_proof(proof)?;
                let state = self
                    .invitations
                    .get_mut(&proof.id)
                    .expect("checked by check_proof");
                state.used = true;

                match proof.invitee.kind {
                    KeyScope::Member => {
                        let user_name = proof.invitee.name.clone();
                        let device = DeviceInfo {
                            user_name: user_name.clone(),
                            device_name: proof.device_name.clone(),
                            keys: proof.keys,
                        };
                        self.members.insert(
                            user_name.clone(),
                            Member {
                                user_name,
                                keys: proof.keys,
                                roles: BTreeSet::new(),
                                devices: vec![device],
                            },
                        );
                    }
                    KeyScope::Device => {
                        let (user_name, device_name) =
                            proof.invitee.name.split_once("::").ok_or_else(|| {
                                TeamError::InvalidChain(format!(
                                    "malformed device invitee {}",
                                    proof.invitee.name
                                ))
                            })?;
                        let member =
                            self.members.get_mut(user_name).ok_or_else(|| {
                                TeamError::NotAMember(user_name.to_string())
                            })?;
                        member.devices.push(DeviceInfo {
                            user_name: user_name.to_string(),
                            device_name: device_name.to_string(),
                            keys: proof.keys,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The validation behind both `validate_invitation` and admission.
    fn check_proof(&self, proof: &ProofOfInvitation) -> Result<(), TeamError> {
        let state = self
            .invitations
            .get(&proof.id)
            .ok_or_else(|| TeamError::UnknownInvitation(proof.id.clone()))?;
        if state.revoked {
            return Err(TeamError::InvitationRevoked(proof.id.clone()));
        }
        if state.used {
            return Err(TeamError::InvitationUsed(proof.id.clone()));
        }
        if proof.invitee != state.invitation.invitee {
            return Err(TeamError::NameMismatch {
                expected: state.invitation.invitee.name.clone(),
                actual: proof.invitee.name.clone(),
            });
        }
        if !invitation::verify_proof(proof, &state.invitation.starter_signing) {
            return Err(TeamError::BadProofSignature);
        }
        Ok(())
    }

    fn head(&self) -> Hash {
        *self.hashes.last().expect("a valid chain is never empty")
    }

    fn resolve_device(&self, claim: &IdentityClaim) -> Option<&DeviceInfo> {
        let (user_name, device_name) = claim.split_device()?;
        self.members.get(user_name)?.device(device_name)
    }

    fn lookup_identity(&self, claim: &IdentityClaim) -> IdentityLookup {
        match claim.kind {
            KeyScope::Member => {
                if self.members.contains_key(&claim.name) {
                    IdentityLookup::ValidDevice
                } else if self.removed_members.contains(&claim.name) {
                    IdentityLookup::MemberRemoved
                } else {
                    IdentityLookup::MemberUnknown
                }
            }
            KeyScope::Device => {
                let Some((user_name, _)) = claim.split_device() else {
                    return IdentityLookup::MemberUnknown;
                };
                match self.members.get(user_name) {
                    Some(_) => {
                        if self.resolve_device(claim).is_some() {
                            IdentityLookup::ValidDevice
                        } else if self.removed_devices.contains(&claim.name) {
                            IdentityLookup::DeviceRemoved
                        } else {
                            IdentityLookup::DeviceUnknown
                        }
                    }
                    None if self.removed_members.contains(user_name) => {
                        IdentityLookup::MemberRemoved
                    }
                    None => IdentityLookup::MemberUnknown,
                }
            }
        }
    }

    /// Reconcile links received from a peer. See the module docs for the
    /// merge rule.
    fn receive_missing_links(&mut self, head: &Hash, blobs: &[Blob]) -> Result<(), TeamError> {
        if *head == self.head() {
            return Ok(());
        }

        let mut by_hash: BTreeMap<Hash, Link> = BTreeMap::new();
        for (link, hash) in self.links.iter().zip(&self.hashes) {
            by_hash.insert(*hash, link.clone());
        }
        for blob in blobs {
            let link: Link = serde_json::from_slice(blob.as_bytes())
                .map_err(|e| TeamError::InvalidChain(format!("unparseable link: {e}")))?;
            by_hash.insert(link_hash(&link.body), link);
        }

        // Walk the peer's chain back from its head.
        let mut their_chain = Vec::new();
        let mut their_hashes = BTreeSet::new();
        let mut cursor = Some(*head);
        while let Some(hash) = cursor {
            let link = by_hash
                .get(&hash)
                .ok_or_else(|| TeamError::InvalidChain("incomplete link set".into()))?;
            cursor = link.body.prev;
            their_chain.push(link.clone());
            their_hashes.insert(hash);
        }
        their_chain.reverse();

        let ours = self.head();
        if self.hashes.iter().any(|h| *h == *head) {
            // Their view is a prefix of ours; nothing to do.
            return Ok(());
        }

        let extends_ours = their_hashes.contains(&ours);
        let adopt = if extends_ours {
            true
        } else {
            // True divergence. Linear chains cannot merge, so adopt the
            // longer history deterministically and let replay validate it.
            tracing::warn!(
                ours = ?ours,
                theirs = ?head,
                "divergent chains; adopting the longer one"
            );
            (their_chain.len(), *head) > (self.links.len(), ours)
        };

        if adopt {
            let rebuilt = Self::from_links(their_chain, self.local_device.clone())?;
            *self = rebuilt;
        }
        Ok(())
    }
}

/// A cloneable handle to a [`TeamState`], shared across connections.
///
/// This is the [`Team`] implementation the harness wires into connections.
/// Interior mutability makes `&self` mutation safe from several connections
/// on one team replica.
#[derive(Clone)]
pub struct SharedTeam {
    inner: Arc<RwLock<TeamState>>,
}

impl SharedTeam {
    /// Found a new team.
    pub fn create(
        team_name: impl Into<String>,
        founder: &UserWithSecrets,
        device: &DeviceWithSecrets,
    ) -> Result<Self, TeamError> {
        Ok(Self::wrap(TeamState::create(team_name, founder, device)?))
    }

    fn wrap(state: TeamState) -> Self {
        Self { inner: Arc::new(RwLock::new(state)) }
    }

    fn read(&self) -> RwLockReadGuard<'_, TeamState> {
        self.inner.read().expect("team lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, TeamState> {
        self.inner.write().expect("team lock poisoned")
    }

    /// Create an invitation for `invitee` with the given seed.
    ///
    /// Requires the local member to hold the admin role.
    pub fn invite(&self, invitee: Invitee, seed: &str) -> Result<InvitationId, TeamError> {
        let invitation = Invitation::new(invitee, seed);
        let id = invitation.id.clone();
        self.write().append(TeamOp::Invite { invitation })?;
        Ok(id)
    }

    /// Revoke an unredeemed invitation. Admin only.
    pub fn revoke_invitation(&self, id: &InvitationId) -> Result<(), TeamError> {
        self.write().append(TeamOp::RevokeInvitation { id: id.clone() })
    }

    /// Remove a member and all their devices. Admin only.
    pub fn remove_member(&self, user_name: &str) -> Result<(), TeamError> {
        self.write().append(TeamOp::RemoveMember { user_name: user_name.into() })
    }

    /// Add a fully-formed member record. Admin only; used for test setup and
    /// out-of-band enrollment.
    pub fn add_member(&self, member: Member) -> Result<(), TeamError> {
        self.write().append(TeamOp::AddMember { member })
    }

    /// The team's name, from the root link.
    pub fn team_name(&self) -> String {
        self.read().team_name.clone()
    }

    /// Names of all active members, for assertions.
    pub fn member_names(&self) -> Vec<String> {
        self.read().members.keys().cloned().collect()
    }
}

impl std::fmt::Debug for SharedTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SharedTeam")
            .field("team_name", &state.team_name)
            .field("links", &state.links.len())
            .field("members", &state.members.len())
            .finish()
    }
}

impl Team for SharedTeam {
    fn load(chain: &Blob, device: DeviceWithSecrets) -> Result<Self, TeamError> {
        let links: Vec<Link> = serde_json::from_slice(chain.as_bytes())
            .map_err(|e| TeamError::InvalidChain(format!("unparseable chain: {e}")))?;
        Ok(Self::wrap(TeamState::from_links(links, device)?))
    }

    fn save(&self) -> Blob {
        let state = self.read();
        Blob::new(serde_json::to_vec(&state.links).expect("chain serialization cannot fail"))
    }

    fn admit(&self, proof: &ProofOfInvitation) -> Result<(), TeamError> {
        self.write().append(TeamOp::Admit { proof: proof.clone() })
    }

    fn join(&self, proof: &ProofOfInvitation, seed: &str) -> Result<Member, TeamError> {
        let state = self.read();

        let invitation = state
            .invitations
            .get(&proof.id)
            .map(|s| s.invitation.clone())
            .ok_or(TeamError::WrongTeam)?;

        // The chain must record the starter key our seed derives; otherwise
        // this chain's invitation is not the one we were given.
        let derived = invitation::starter_keys(seed).signing.public();
        if invitation.starter_signing != derived {
            return Err(TeamError::WrongTeam);
        }

        let user_name = match proof.invitee.kind {
            KeyScope::Member => proof.invitee.name.clone(),
            KeyScope::Device => proof
                .invitee
                .name
                .split_once("::")
                .map(|(user, _)| user.to_string())
                .ok_or_else(|| {
                    TeamError::InvalidChain(format!(
                        "malformed device invitee {}",
                        proof.invitee.name
                    ))
                })?,
        };

        state
            .members
            .get(&user_name)
            .cloned()
            .ok_or(TeamError::NotAMember(user_name))
    }

    fn has_invitation(&self, id: &InvitationId) -> bool {
        self.read().invitations.contains_key(id)
    }

    fn validate_invitation(&self, proof: &ProofOfInvitation) -> Result<(), TeamError> {
        self.read().check_proof(proof)
    }

    fn lookup_identity(&self, claim: &IdentityClaim) -> IdentityLookup {
        self.read().lookup_identity(claim)
    }

    fn verify_identity_proof(&self, challenge: &Challenge, proof: &[u8; 64]) -> bool {
        let state = self.read();
        if state.lookup_identity(&challenge.claim) != IdentityLookup::ValidDevice {
            return false;
        }
        let signing = match challenge.claim.kind {
            KeyScope::Device => match state.resolve_device(&challenge.claim) {
                Some(device) => device.keys.signing,
                None => return false,
            },
            KeyScope::Member => match state.members.get(&challenge.claim.name) {
                Some(member) => member.keys.signing,
                None => return false,
            },
        };
        challenge::verify(challenge, &signing, proof)
    }

    fn has(&self, user_name: &str) -> bool {
        self.read().members.contains_key(user_name)
    }

    fn members(&self, user_name: &str) -> Option<Member> {
        self.read().members.get(user_name).cloned()
    }

    fn root(&self) -> Hash {
        self.read().hashes[0]
    }

    fn head(&self) -> Hash {
        self.read().head()
    }

    fn link_hashes(&self) -> Vec<Hash> {
        self.read().hashes.clone()
    }

    fn get_missing_links(&self, update: &UpdatePayload) -> Vec<Blob> {
        let state = self.read();
        let theirs: BTreeSet<Hash> = update.hashes.iter().copied().collect();
        state
            .links
            .iter()
            .zip(&state.hashes)
            .filter(|(_, hash)| !theirs.contains(hash))
            .map(|(link, _)| {
                Blob::new(serde_json::to_vec(link).expect("link serialization cannot fail"))
            })
            .collect()
    }

    fn receive_missing_links(&self, head: &Hash, links: &[Blob]) -> Result<(), TeamError> {
        self.write().receive_missing_links(head, links)
    }
}
