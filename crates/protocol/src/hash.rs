//! Typed 39-byte hash identifiers.
//!
//! A hash is laid out as `prefix (3) | core (32) | location (4)`. The prefix
//! names the hash type, the core is the raw digest or public key, and the
//! location is a 4-byte checksum derived from the core.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use crate::error::{ProtocolError, Result};

/// Length of the type prefix.
pub const HASH_PREFIX_LEN: usize = 3;
/// Length of the core digest or key.
pub const HASH_CORE_LEN: usize = 32;
/// Length of the location suffix.
pub const HASH_LOCATION_LEN: usize = 4;
/// Total length of a hash.
pub const HASH_LEN: usize = HASH_PREFIX_LEN + HASH_CORE_LEN + HASH_LOCATION_LEN;

/// Prefix for agent public keys.
pub const AGENT_PREFIX: [u8; 3] = [132, 32, 36];
/// Prefix for entry hashes.
pub const ENTRY_PREFIX: [u8; 3] = [132, 33, 36];
/// Prefix for action hashes.
pub const ACTION_PREFIX: [u8; 3] = [132, 41, 36];
/// Prefix for DNA hashes.
pub const DNA_PREFIX: [u8; 3] = [132, 45, 36];

type Blake2b128 = Blake2b<U16>;

/// Compute the 4-byte location suffix for a 32-byte core.
///
/// The core is hashed with 16-byte blake2b and the four 4-byte words of the
/// digest are XOR-folded together.
pub fn location_from_core(core: &[u8; HASH_CORE_LEN]) -> [u8; HASH_LOCATION_LEN] {
    let digest = Blake2b128::digest(core);
    let mut out = [0u8; HASH_LOCATION_LEN];
    out.copy_from_slice(&digest[..4]);
    for word in digest[4..].chunks_exact(4) {
        for (o, b) in out.iter_mut().zip(word) {
            *o ^= b;
        }
    }
    out
}

fn assemble(prefix: [u8; 3], core: &[u8; HASH_CORE_LEN]) -> [u8; HASH_LEN] {
    let mut bytes = [0u8; HASH_LEN];
    bytes[..HASH_PREFIX_LEN].copy_from_slice(&prefix);
    bytes[HASH_PREFIX_LEN..HASH_PREFIX_LEN + HASH_CORE_LEN].copy_from_slice(core);
    bytes[HASH_PREFIX_LEN + HASH_CORE_LEN..].copy_from_slice(&location_from_core(core));
    bytes
}

fn check(prefix: [u8; 3], name: &str, bytes: &[u8]) -> Result<[u8; HASH_LEN]> {
    let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
        ProtocolError::InvalidHash(format!(
            "{name} must be {HASH_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    if arr[..HASH_PREFIX_LEN] != prefix {
        return Err(ProtocolError::InvalidHash(format!(
            "{name} has wrong type prefix {:?}",
            &arr[..HASH_PREFIX_LEN]
        )));
    }
    Ok(arr)
}

macro_rules! hash_type {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; HASH_LEN]);

        impl $name {
            /// Type prefix for this hash.
            pub const PREFIX: [u8; 3] = $prefix;

            /// Build a hash from its 32-byte core, computing the location.
            pub fn from_core(core: [u8; HASH_CORE_LEN]) -> Self {
                Self(assemble(Self::PREFIX, &core))
            }

            /// Parse a full 39-byte hash, checking length and prefix.
            ///
            /// The location suffix is carried as-is and not recomputed.
            pub fn from_raw_39(bytes: &[u8]) -> Result<Self> {
                check(Self::PREFIX, stringify!($name), bytes).map(Self)
            }

            /// Full 39-byte representation.
            pub fn get_raw_39(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            /// The 32-byte core.
            pub fn get_core(&self) -> [u8; HASH_CORE_LEN] {
                let mut core = [0u8; HASH_CORE_LEN];
                core.copy_from_slice(&self.0[HASH_PREFIX_LEN..HASH_PREFIX_LEN + HASH_CORE_LEN]);
                core
            }

            /// The 4-byte location suffix.
            pub fn get_location(&self) -> [u8; HASH_LOCATION_LEN] {
                let mut loc = [0u8; HASH_LOCATION_LEN];
                loc.copy_from_slice(&self.0[HASH_PREFIX_LEN + HASH_CORE_LEN..]);
                loc
            }

            /// Whether the location suffix matches the core.
            pub fn has_valid_location(&self) -> bool {
                self.get_location() == location_from_core(&self.get_core())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = ProtocolError;

            fn try_from(bytes: &[u8]) -> Result<Self> {
                Self::from_raw_39(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "u{}", URL_SAFE_NO_PAD.encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self> {
                let encoded = s.strip_prefix('u').ok_or_else(|| {
                    ProtocolError::InvalidHash(format!("{} must start with 'u'", stringify!($name)))
                })?;
                let bytes = URL_SAFE_NO_PAD
                    .decode(encoded)
                    .map_err(|e| ProtocolError::InvalidHash(e.to_string()))?;
                Self::from_raw_39(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let buf = ByteBuf::deserialize(deserializer)?;
                Self::from_raw_39(&buf).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_type!(
    /// An agent's public signing key, wrapped as a 39-byte hash.
    AgentPubKey,
    AGENT_PREFIX
);

hash_type!(
    /// Hash of a DNA definition.
    DnaHash,
    DNA_PREFIX
);

hash_type!(
    /// Hash of a source-chain action.
    ActionHash,
    ACTION_PREFIX
);

hash_type!(
    /// Hash of an entry.
    EntryHash,
    ENTRY_PREFIX
);

impl AgentPubKey {
    /// Wrap a raw ed25519 verifying key.
    pub fn from_ed25519(key: &ed25519_dalek::VerifyingKey) -> Self {
        Self::from_core(key.to_bytes())
    }

    /// Wrap a raw 32-byte key with a zeroed location suffix.
    ///
    /// Conductors do not check the suffix on signing keys, so this matches
    /// what older clients sent. Prefer [`AgentPubKey::from_core`].
    pub fn from_raw_32_unchecked_location(core: [u8; HASH_CORE_LEN]) -> Self {
        let mut bytes = [0u8; HASH_LEN];
        bytes[..HASH_PREFIX_LEN].copy_from_slice(&AGENT_PREFIX);
        bytes[HASH_PREFIX_LEN..HASH_PREFIX_LEN + HASH_CORE_LEN].copy_from_slice(&core);
        Self(bytes)
    }

    /// Interpret the core as an ed25519 verifying key.
    pub fn to_ed25519(&self) -> Result<ed25519_dalek::VerifyingKey> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.get_core())
            .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))
    }
}

/// Identifies a cell: a DNA instantiated for an agent.
///
/// Serialized as a two-element array `[dna_hash, agent_pub_key]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub DnaHash, pub AgentPubKey);

impl CellId {
    /// Create a cell id.
    pub fn new(dna_hash: DnaHash, agent_pub_key: AgentPubKey) -> Self {
        Self(dna_hash, agent_pub_key)
    }

    /// The DNA hash.
    pub fn dna_hash(&self) -> &DnaHash {
        &self.0
    }

    /// The agent key.
    pub fn agent_pub_key(&self) -> &AgentPubKey {
        &self.1
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({self})")
    }
}
