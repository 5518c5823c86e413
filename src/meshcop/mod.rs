pub mod steering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CommissionError;

/// Shortest PSKd accepted for a joiner
pub const PSKD_MIN_LEN: usize = 1;
/// Longest PSKd accepted for a joiner
pub const PSKD_MAX_LEN: usize = 32;
/// Upper bound of the Commissioner ID TLV payload
pub const COMMISSIONER_ID_MAX_LEN: usize = 64;

/// Commissioning state as carried by the MeshCoP State TLV,
/// plus the local "no network" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommissioningState {
    Accept,
    Pending,
    Reject,
    NoNetwork,
}

impl fmt::Display for CommissioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommissioningState::Accept => write!(f, "Accept"),
            CommissioningState::Pending => write!(f, "Pending"),
            CommissioningState::Reject => write!(f, "Reject"),
            CommissioningState::NoNetwork => write!(f, "NoNetwork"),
        }
    }
}

/// IEEE EUI-64 device identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Eui64([u8; 8]);

impl Eui64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Joiner ID used as steering data input.
    ///
    /// The full form hashes the whole EUI-64; the short form hashes only the
    /// lower 24 bits, everything above them zeroed.
    pub fn joiner_id(&self, short_form: bool) -> JoinerId {
        let mut input = self.0;
        if short_form {
            input[..5].fill(0);
        }
        let digest = Sha256::digest(input);
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        // Joiner IDs are locally administered
        id[0] |= 0x02;
        JoinerId(id)
    }
}

impl TryFrom<&[u8]> for Eui64 {
    type Error = CommissionError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 8] = value.try_into().map_err(|_| {
            CommissionError::invalid(format!("EUI-64 must be 8 bytes, got {}", value.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for Eui64 {
    type Err = CommissionError;

    /// Accepts `0102030405060708` as well as `01:02:..` / `01-02-..` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let raw = hex::decode(&digits)
            .map_err(|e| CommissionError::invalid(format!("EUI-64 '{}': {}", s, e)))?;
        Eui64::try_from(raw.as_slice())
    }
}

impl TryFrom<String> for Eui64 {
    type Error = CommissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Eui64> for String {
    fn from(value: Eui64) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", self)
    }
}

/// Truncated SHA-256 of an EUI-64, the value inserted into steering data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinerId(pub [u8; 8]);

/// Pre-shared device key of a joiner (1-32 bytes).
///
/// Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pskd(Vec<u8>);

impl Pskd {
    pub fn new(bytes: &[u8]) -> Result<Self, CommissionError> {
        if !(PSKD_MIN_LEN..=PSKD_MAX_LEN).contains(&bytes.len()) {
            return Err(CommissionError::invalid(format!(
                "PSKd length must be {}-{} bytes, got {}",
                PSKD_MIN_LEN,
                PSKD_MAX_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Pskd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pskd(<{} bytes>)", self.0.len())
    }
}

/// Network found by discovery, target of an unsecure attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCandidate {
    pub network_name: String,
    pub pan_id: u16,
    pub channel: u8,
}

impl fmt::Display for NetworkCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' PAN=0x{:04X} ch={}",
            self.network_name, self.pan_id, self.channel
        )
    }
}
