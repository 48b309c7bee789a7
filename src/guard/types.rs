//! Core types for the delay guard
//!
//! Defines identities, the guarded Safe transaction, and fingerprints.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to parse a hex-encoded value from user input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid address length: expected 20 bytes, got {0}")]
    AddressLength(usize),

    #[error("Invalid fingerprint length: expected 32 bytes, got {0}")]
    FingerprintLength(usize),
}

fn decode_hex(input: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| ParseError::InvalidHex(format!("{}: {}", input, e)))
}

/// 20-byte account identity
///
/// Used for transaction targets as well as for caller identities presented
/// to the authorization gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseError::AddressLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Fixed-width digest identifying one proposed action in one check context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex form used in file names and on the command line
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseError::FingerprintLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Which guard hook a fingerprint was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckContext {
    /// Pre-execution check that queues and permits
    Pending,
    /// Post-execution acknowledgment
    AfterExecution,
}

impl CheckContext {
    pub fn discriminant(&self) -> u8 {
        match self {
            CheckContext::Pending => 0x01,
            CheckContext::AfterExecution => 0x02,
        }
    }
}

impl fmt::Display for CheckContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckContext::Pending => write!(f, "pending"),
            CheckContext::AfterExecution => write!(f, "after_execution"),
        }
    }
}

/// Safe call type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(&self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Call => write!(f, "call"),
            Operation::DelegateCall => write!(f, "delegate_call"),
        }
    }
}

/// Outbound call proposed by the multisig wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeTransaction {
    /// Call target
    pub to: Address,

    /// Native value in wei
    #[serde(default, with = "amount")]
    pub value: u128,

    /// Calldata, `0x` hex on the wire
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,

    #[serde(default)]
    pub operation: Operation,

    #[serde(default)]
    pub safe_tx_gas: u64,

    #[serde(default)]
    pub base_gas: u64,

    #[serde(default, with = "amount")]
    pub gas_price: u128,

    #[serde(default)]
    pub gas_token: Address,

    #[serde(default)]
    pub refund_receiver: Address,
}

impl SafeTransaction {
    /// Plain call with no value, gas or refund parameters
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            value: 0,
            data,
            operation: Operation::Call,
            safe_tx_gas: 0,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
        }
    }
}

/// Decimal string on output; accepts integer or string on input
mod amount {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(u128::from(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim()
                    .parse()
                    .map_err(|e| E::custom(format!("invalid amount {:?}: {}", v, e)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode_hex(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "0x00000000000000000000000000000000000000aB".parse().unwrap();
        assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ab");

        let bare: Address = "00000000000000000000000000000000000000ab".parse().unwrap();
        assert_eq!(addr, bare);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert_eq!(
            "0x1234".parse::<Address>(),
            Err(ParseError::AddressLength(2))
        );
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(ParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_fingerprint_hex_round_trip() {
        let fp = Fingerprint::from_bytes([7u8; 32]);
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.short().len(), 16);
    }

    #[test]
    fn test_transaction_deserialize_defaults() {
        let json = r#"{
            "to": "0x1111111111111111111111111111111111111111",
            "value": "1000000000000000000",
            "data": "0xa9059cbb"
        }"#;

        let tx: SafeTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.value, 1_000_000_000_000_000_000);
        assert_eq!(tx.data, vec![0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(tx.operation, Operation::Call);
        assert_eq!(tx.gas_price, 0);
        assert!(tx.refund_receiver.is_zero());
    }

    #[test]
    fn test_transaction_accepts_numeric_value() {
        let json = r#"{
            "to": "0x1111111111111111111111111111111111111111",
            "value": 42,
            "operation": "delegate_call"
        }"#;

        let tx: SafeTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.value, 42);
        assert_eq!(tx.operation, Operation::DelegateCall);
        assert!(tx.data.is_empty());
    }

    #[test]
    fn test_transaction_serializes_value_as_string() {
        let tx = SafeTransaction::call(Address::ZERO, vec![0xde, 0xad]);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["value"], "0");
        assert_eq!(json["data"], "0xdead");
        assert_eq!(json["operation"], "call");
    }
}
