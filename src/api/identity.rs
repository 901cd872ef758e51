// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-stable client identity.

use std::fmt;

use once_cell::sync::Lazy;
use uuid::Uuid;

static PROCESS_IDENTITY: Lazy<ClientIdentity> = Lazy::new(ClientIdentity::new);

/// Identifier sent with every request so the backend can attribute traffic
/// to this agent process.
///
/// Generated once per process and never changed; tests may construct their
/// own with [`ClientIdentity::from_uuid`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Uuid);

impl ClientIdentity {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The identity of the running process.
    pub fn process() -> Self {
        *PROCESS_IDENTITY
    }

    /// Create an identity from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Get a short representation (first 8 characters).
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::process()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientIdentity({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_identity_is_stable() {
        assert_eq!(ClientIdentity::process(), ClientIdentity::process());
        assert_eq!(ClientIdentity::default(), ClientIdentity::process());
    }

    #[test]
    fn test_short() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let id = ClientIdentity::from_uuid(uuid);
        assert_eq!(id.short(), "550e8400");
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
        assert!(format!("{:?}", id).starts_with("ClientIdentity("));
    }
}
