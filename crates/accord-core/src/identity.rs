//! Local user and device identities.
//!
//! A device is the unit that connects: it has its own keyset and a stable id
//! of the form `user::device`. A user is the team-level principal a device
//! belongs to. An unjoined invitee connects with a device only; its user
//! identity is established when it joins.

use rand::{CryptoRng, RngCore};

use accord_proto::payloads::IdentityClaim;

use crate::crypto::KeysetWithSecrets;

/// A user identity with secret keys.
#[derive(Debug, Clone)]
pub struct UserWithSecrets {
    /// Team-unique user name
    pub user_name: String,
    /// The user's keyset
    pub keys: KeysetWithSecrets,
}

impl UserWithSecrets {
    /// Generate a user with a fresh keyset.
    pub fn generate<R: RngCore + CryptoRng>(user_name: impl Into<String>, rng: &mut R) -> Self {
        Self { user_name: user_name.into(), keys: KeysetWithSecrets::generate(rng) }
    }
}

/// A device identity with secret keys.
#[derive(Debug, Clone)]
pub struct DeviceWithSecrets {
    /// Owning user's name
    pub user_name: String,
    /// Device name, unique per user
    pub device_name: String,
    /// The device's keyset
    pub keys: KeysetWithSecrets,
}

impl DeviceWithSecrets {
    /// Generate a device with a fresh keyset.
    pub fn generate<R: RngCore + CryptoRng>(
        user_name: impl Into<String>,
        device_name: impl Into<String>,
        rng: &mut R,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            device_name: device_name.into(),
            keys: KeysetWithSecrets::generate(rng),
        }
    }

    /// Stable `user::device` identifier.
    pub fn device_id(&self) -> String {
        device_id(&self.user_name, &self.device_name)
    }

    /// The identity claim this device asserts in HELLO.
    pub fn claim(&self) -> IdentityClaim {
        IdentityClaim::device(&self.user_name, &self.device_name)
    }
}

/// Format a `user::device` id.
pub fn device_id(user_name: &str, device_name: &str) -> String {
    format!("{user_name}::{device_name}")
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn device_id_format() {
        let device = DeviceWithSecrets::generate("alice", "laptop", &mut OsRng);
        assert_eq!(device.device_id(), "alice::laptop");
        assert_eq!(device.claim().name, "alice::laptop");
    }
}
