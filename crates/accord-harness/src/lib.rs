//! Test harness for the Accord connection protocol.
//!
//! Everything here exists to put two [`Connection`]s in a room and watch
//! them talk:
//!
//! - [`pump`]: a deterministic, synchronous message pump — actions from each
//!   side are executed immediately, envelopes are queued to the other side,
//!   and the loop runs until both sides go quiet. Used by the scenario
//!   tests.
//! - [`duplex`]: a tokio-channel byte transport for async end-to-end tests
//!   that exercise the wire codec.
//! - Fixture helpers for building users, devices, teams, and seeded-RNG
//!   connections.
//!
//! Determinism matters: connections built with [`seeded_rng`] produce
//! identical nonces, seeds, and signatures run after run, which is what lets
//! the ordering tests replay a captured transcript in arbitrary permutations
//! and demand the same outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod duplex;
pub mod pump;

use rand::rngs::OsRng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use accord_core::connection::{Connection, ConnectionConfig};
use accord_core::identity::{DeviceWithSecrets, UserWithSecrets};
use accord_core::team::memory::SharedTeam;
use accord_core::team::{DeviceInfo, Member, Team};

pub use accord_core::connection::{ConnectionAction, ConnectionEvent};
pub use accord_core::machine::Phase;

/// The connection type the harness drives: reference team, seeded RNG.
pub type TestConnection = Connection<SharedTeam, ChaCha20Rng>;

/// A deterministic RNG for reproducible handshakes.
pub fn seeded_rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

/// Generate a user with fresh keys.
pub fn test_user(name: &str) -> UserWithSecrets {
    UserWithSecrets::generate(name, &mut OsRng)
}

/// Generate a device with fresh keys.
pub fn test_device(user_name: &str, device_name: &str) -> DeviceWithSecrets {
    DeviceWithSecrets::generate(user_name, device_name, &mut OsRng)
}

/// A two-member team with independent replicas, ready to connect.
pub struct TwoMembers {
    /// Alice: founder and admin
    pub alice: UserWithSecrets,
    /// Alice's device
    pub alice_device: DeviceWithSecrets,
    /// Alice's team replica
    pub alice_team: SharedTeam,
    /// Bob: ordinary member
    pub bob: UserWithSecrets,
    /// Bob's device
    pub bob_device: DeviceWithSecrets,
    /// Bob's team replica
    pub bob_team: SharedTeam,
}

impl TwoMembers {
    /// Found a team as Alice, enroll Bob, and give Bob his own replica.
    pub fn new() -> Self {
        let alice = test_user("alice");
        let alice_device = test_device("alice", "laptop");
        let alice_team =
            SharedTeam::create("spies", &alice, &alice_device).expect("team creation");

        let bob = test_user("bob");
        let bob_device = test_device("bob", "phone");
        alice_team
            .add_member(Member {
                user_name: "bob".into(),
                keys: bob.keys.public(),
                roles: Default::default(),
                devices: vec![DeviceInfo {
                    user_name: "bob".into(),
                    device_name: "phone".into(),
                    keys: bob_device.keys.public(),
                }],
            })
            .expect("enrolling bob");

        let bob_team =
            SharedTeam::load(&alice_team.save(), bob_device.clone()).expect("bob's replica");

        Self { alice, alice_device, alice_team, bob, bob_device, bob_team }
    }

    /// Alice's connection, with a seeded RNG.
    pub fn alice_connection(&self, seed: u64) -> TestConnection {
        Connection::member(
            self.alice_device.clone(),
            self.alice.clone(),
            self.alice_team.clone(),
            ConnectionConfig::default(),
            seeded_rng(seed),
        )
    }

    /// Bob's connection, with a seeded RNG.
    pub fn bob_connection(&self, seed: u64) -> TestConnection {
        Connection::member(
            self.bob_device.clone(),
            self.bob.clone(),
            self.bob_team.clone(),
            ConnectionConfig::default(),
            seeded_rng(seed),
        )
    }
}

impl Default for TwoMembers {
    fn default() -> Self {
        Self::new()
    }
}
