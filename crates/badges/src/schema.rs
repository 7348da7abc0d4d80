use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ADDRESS_LEN: usize = 20;

/// Field-level failure while turning a ledger row into a leaf
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("invalid winner address {value:?}: {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("badge definition number {0} does not fit in a signed byte")]
    DefinitionOutOfRange(i64),
}

/// 20-byte account identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncodingError> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| EncodingError::InvalidAddress {
            value: hex::encode(bytes),
            reason: format!("expected {ADDRESS_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    /// Accepts 40 hex chars, with or without a `0x` prefix, any case
    pub fn parse_hex(s: &str) -> Result<Self, EncodingError> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| EncodingError::InvalidAddress {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes).map_err(|_| EncodingError::InvalidAddress {
            value: s.to_string(),
            reason: format!("expected {ADDRESS_LEN} bytes, got {}", bytes.len()),
        })
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
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
        Self::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Award row as delivered by the ledger, before any field validation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBadgeAward {
    pub winner: String,
    pub badge_definition_number: i64,
    pub global_badge_number: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeAwardRecord {
    pub winner: Address,
    pub badge_definition_number: i8,
    pub global_badge_number: u64,
}

impl BadgeAwardRecord {
    pub fn new(winner: Address, badge_definition_number: i8, global_badge_number: u64) -> Self {
        Self { winner, badge_definition_number, global_badge_number }
    }
}

impl TryFrom<&RawBadgeAward> for BadgeAwardRecord {
    type Error = EncodingError;

    fn try_from(raw: &RawBadgeAward) -> Result<Self, Self::Error> {
        let winner = Address::parse_hex(&raw.winner)?;
        let badge_definition_number = i8::try_from(raw.badge_definition_number)
            .map_err(|_| EncodingError::DefinitionOutOfRange(raw.badge_definition_number))?;

        Ok(Self {
            winner,
            badge_definition_number,
            global_badge_number: raw.global_badge_number,
        })
    }
}

impl From<&BadgeAwardRecord> for RawBadgeAward {
    fn from(record: &BadgeAwardRecord) -> Self {
        Self {
            winner: record.winner.to_hex(),
            badge_definition_number: record.badge_definition_number as i64,
            global_badge_number: record.global_badge_number,
        }
    }
}
