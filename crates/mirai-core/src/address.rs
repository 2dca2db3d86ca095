//! 32-byte addresses and deterministic derivation.
//!
//! Every ledger, stream and vesting record lives at an address derived from
//! its seeds with BLAKE3. Anyone can recompute where a record (and its escrow)
//! must be, and only the real recipient derives the address that matches a
//! given stream, so the derived address doubles as a withdrawal capability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::constants::{LEDGER_SEED, PRINCIPAL_SEED, STREAM_SEED, VESTING_SEED};

pub const ADDRESS_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid hex address '{0}'")]
    InvalidHex(String),
    #[error("address must be {expected} bytes, got {0}", expected = ADDRESS_LEN)]
    InvalidLength(usize),
}

impl Address {
    pub const ZERO: Address = Address([0; ADDRESS_LEN]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_LEN]
    }

    /// Address of a principal identified by a human-readable name.
    pub fn named(name: &str) -> Self {
        derive(&[PRINCIPAL_SEED, name.as_bytes()])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Hash the seeds into an address. Each seed is length-prefixed (u32 LE),
/// so `["ab", "c"]` and `["a", "bc"]` derive different addresses.
pub fn derive(seeds: &[&[u8]]) -> Address {
    let mut hasher = blake3::Hasher::new();
    for seed in seeds {
        hasher.update(&(seed.len() as u32).to_le_bytes());
        hasher.update(seed);
    }
    Address(*hasher.finalize().as_bytes())
}

pub fn ledger_address(authority: &Address) -> Address {
    derive(&[LEDGER_SEED, authority.as_bytes()])
}

pub fn stream_address(ledger: &Address, recipient: &Address) -> Address {
    derive(&[STREAM_SEED, ledger.as_bytes(), recipient.as_bytes()])
}

pub fn vesting_address(ledger: &Address, recipient: &Address) -> Address {
    derive(&[VESTING_SEED, ledger.as_bytes(), recipient.as_bytes()])
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.to_hex()[..12])
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed).map_err(|_| AddressError::InvalidHex(s.to_string()))?;
        let array: [u8; ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
