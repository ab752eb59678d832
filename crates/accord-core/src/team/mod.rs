//! The team abstraction.
//!
//! The connection protocol treats the team — the hash-linked chain of signed
//! membership operations — as an external collaborator. This module defines
//! the exact surface the protocol consumes, plus the record types that cross
//! it. [`memory`] provides an in-memory reference implementation used by the
//! harness and anywhere a real chain store is not wired in.

pub mod memory;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_proto::payloads::{
    Challenge, Hash, IdentityClaim, InvitationId, ProofOfInvitation, PublicKeyset, UpdatePayload,
};
use accord_proto::Blob;

use crate::identity::{device_id, DeviceWithSecrets};

/// The role that grants membership-management rights.
pub const ADMIN: &str = "admin";

/// A device as recorded on the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Owning user
    pub user_name: String,
    /// Device name, unique per user
    pub device_name: String,
    /// The device's public keys
    pub keys: PublicKeyset,
}

impl DeviceInfo {
    /// Stable `user::device` identifier.
    pub fn device_id(&self) -> String {
        device_id(&self.user_name, &self.device_name)
    }
}

/// A member as recorded on the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Team-unique user name
    pub user_name: String,
    /// The member's public keys
    pub keys: PublicKeyset,
    /// Assigned roles
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    /// The member's devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceInfo>,
}

impl Member {
    /// True if the member holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN)
    }

    /// Find one of this member's devices by name.
    pub fn device(&self, device_name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.device_name == device_name)
    }
}

/// Outcome of resolving an identity claim against the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityLookup {
    /// The claimed device is on the chain and its member is active
    ValidDevice,
    /// No member by that name
    MemberUnknown,
    /// The member was removed
    MemberRemoved,
    /// The member exists but has no such device
    DeviceUnknown,
    /// The device was removed
    DeviceRemoved,
}

/// Errors from team operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeamError {
    /// No invitation with this id on the chain
    #[error("invitation {0} is not on this team's chain")]
    UnknownInvitation(InvitationId),

    /// The invitation was revoked before redemption
    #[error("invitation {0} was revoked")]
    InvitationRevoked(InvitationId),

    /// The invitation was already redeemed
    #[error("invitation {0} was already used")]
    InvitationUsed(InvitationId),

    /// The proof claims a different invitee than the invitation names
    #[error("user names don't match: invitation was issued for {expected}, proof claims {actual}")]
    NameMismatch {
        /// Invitee the invitation was created for
        expected: String,
        /// Invitee the proof claims
        actual: String,
    },

    /// The proof signature does not verify against the recorded starter key
    #[error("proof of invitation signature is invalid")]
    BadProofSignature,

    /// The chain (or a received link set) failed validation
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// A member lookup failed
    #[error("{0} is not a member of this team")]
    NotAMember(String),

    /// Attempt to add a member that already exists
    #[error("member {0} already exists")]
    DuplicateMember(String),

    /// The local member lacks the admin role
    #[error("operation requires admin rights, which {0} does not hold")]
    NotAdmin(String),

    /// A received chain does not contain the expected invitation
    #[error("the received chain does not contain our invitation")]
    WrongTeam,
}

/// The team interface the connection protocol consumes.
///
/// Implementations are shared handles: methods take `&self` and interior
/// mutation must be safe to drive from several connections at once. `Clone`
/// clones the handle, not the team.
pub trait Team: Clone {
    /// Rebuild a team replica from a serialized chain.
    ///
    /// Used by an invitee processing ACCEPT_INVITATION; `device` becomes the
    /// local device of the new replica.
    fn load(chain: &Blob, device: DeviceWithSecrets) -> Result<Self, TeamError>
    where
        Self: Sized;

    /// Serialize the full chain.
    fn save(&self) -> Blob;

    /// Validate and redeem an invitation proof, placing the invitee's member
    /// and device records on the chain.
    fn admit(&self, proof: &ProofOfInvitation) -> Result<(), TeamError>;

    /// Complete a join from the invitee side: verify the chain's invitation
    /// matches our seed and resolve our member record.
    fn join(&self, proof: &ProofOfInvitation, seed: &str) -> Result<Member, TeamError>;

    /// Whether the chain records an invitation with this id.
    fn has_invitation(&self, id: &InvitationId) -> bool;

    /// Check a proof against the chain without redeeming it.
    fn validate_invitation(&self, proof: &ProofOfInvitation) -> Result<(), TeamError>;

    /// Resolve an identity claim.
    fn lookup_identity(&self, claim: &IdentityClaim) -> IdentityLookup;

    /// Verify a challenge response against the claimed device's key on the
    /// chain.
    fn verify_identity_proof(&self, challenge: &Challenge, proof: &[u8; 64]) -> bool;

    /// Whether `user_name` is an active member.
    fn has(&self, user_name: &str) -> bool;

    /// Look up an active member.
    fn members(&self, user_name: &str) -> Option<Member>;

    /// Genesis link hash.
    fn root(&self) -> Hash;

    /// Most recent link hash.
    fn head(&self) -> Hash;

    /// Every link hash, in chain order.
    fn link_hashes(&self) -> Vec<Hash>;

    /// The links we hold that the peer's UPDATE shows it lacks.
    fn get_missing_links(&self, update: &UpdatePayload) -> Vec<Blob>;

    /// Fold links received from the peer into our replica.
    fn receive_missing_links(&self, head: &Hash, links: &[Blob]) -> Result<(), TeamError>;
}

/// Map an invitation-validation failure to its wire error code.
pub fn invitation_error_code(error: &TeamError) -> accord_proto::payloads::ErrorCode {
    use accord_proto::payloads::ErrorCode;
    match error {
        TeamError::InvitationRevoked(_) => ErrorCode::InvitationRevoked,
        TeamError::WrongTeam => ErrorCode::WrongTeam,
        _ => ErrorCode::InvitationInvalid,
    }
}
