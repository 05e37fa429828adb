//! Minimal ABI codec for the notarization contract.
//!
//! Only static 32-byte words and one dynamic `bytes32[]` return value are
//! needed, so this stays hand-written instead of pulling in a full ABI stack.

use std::fmt;

use serde_json::Value;
use sha3::{Digest, Keccak256};

use super::error::LedgerError;

pub const NOTARIZE_DOCUMENT: &str = "notarizeDocument(bytes32,uint256)";
pub const REVOKE_NOTARIZATION: &str = "revokeNotarization(bytes32)";
pub const IS_DOCUMENT_NOTARIZED: &str = "isDocumentNotarized(bytes32)";
pub const IS_DOCUMENT_EXPIRED: &str = "isDocumentExpired(bytes32)";
pub const SEARCH_DOCUMENTS_BY_NOTARY: &str = "searchDocumentsByNotary(address)";
pub const DOCUMENTS: &str = "documents(bytes32)";

/// `documentHash` and `notary` are indexed; times live in the data section.
pub const DOCUMENT_NOTARIZED_EVENT: &str = "DocumentNotarized(bytes32,address,uint256,uint256)";
/// `documentHash` and `revoker` are indexed.
pub const NOTARIZATION_REVOKED_EVENT: &str = "NotarizationRevoked(bytes32,address)";

pub type Word = [u8; 32];

pub fn keccak256(data: &[u8]) -> Word {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> String {
    to_hex(&keccak256(signature.as_bytes()))
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, LedgerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| LedgerError::Decode(format!("bad hex '{s}': {e}")))
}

/// 20-byte account address. Parsing accepts all-lowercase, all-uppercase,
/// or a correct EIP-55 mixed-case checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let invalid = || LedgerError::InvalidAddress(s.to_string());
        let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid())?;
        let address = Self(bytes);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum() != s {
            return Err(invalid());
        }
        Ok(address)
    }

    pub fn from_word(word: &Word) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Self(bytes)
    }

    pub fn to_word(&self) -> Word {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// EIP-55 mixed-case encoding.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

pub fn uint_word(value: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn bool_word(value: bool) -> Word {
    uint_word(value as u64)
}

/// Calldata for a function taking only static arguments.
pub fn encode_call(signature: &str, args: &[Word]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    to_hex(&data)
}

pub fn encode_words(words: &[Word]) -> String {
    to_hex(&words.concat())
}

/// ABI encoding of a single dynamic `bytes32[]` return value.
pub fn encode_word_array(items: &[Word]) -> String {
    let mut words = vec![uint_word(32), uint_word(items.len() as u64)];
    words.extend_from_slice(items);
    encode_words(&words)
}

pub fn word_at(data: &[u8], index: usize) -> Result<Word, LedgerError> {
    let start = index * 32;
    let slice = data
        .get(start..start + 32)
        .ok_or_else(|| LedgerError::Decode(format!("return data too short for word {index}")))?;
    let mut word = [0u8; 32];
    word.copy_from_slice(slice);
    Ok(word)
}

pub fn decode_uint(word: &Word) -> Result<u64, LedgerError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("uint256 does not fit in 64 bits".into()));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(tail))
}

pub fn decode_bool(word: &Word) -> Result<bool, LedgerError> {
    match decode_uint(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LedgerError::Decode(format!("invalid bool word {other}"))),
    }
}

pub fn decode_word_array(data: &[u8]) -> Result<Vec<Word>, LedgerError> {
    let offset = decode_uint(&word_at(data, 0)?)? as usize;
    if offset % 32 != 0 {
        return Err(LedgerError::Decode(format!("unaligned array offset {offset}")));
    }
    let head = offset / 32;
    let len = decode_uint(&word_at(data, head)?)? as usize;
    (0..len).map(|i| word_at(data, head + 1 + i)).collect()
}

/// Split calldata into selector and argument words.
pub fn split_call(data: &[u8]) -> Result<([u8; 4], Vec<Word>), LedgerError> {
    if data.len() < 4 || (data.len() - 4) % 32 != 0 {
        return Err(LedgerError::Decode(format!("malformed calldata of {} bytes", data.len())));
    }
    let sel = [data[0], data[1], data[2], data[3]];
    let args = (0..(data.len() - 4) / 32)
        .map(|i| word_at(&data[4..], i))
        .collect::<Result<_, _>>()?;
    Ok((sel, args))
}

pub fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn parse_quantity(value: &Value) -> Result<u64, LedgerError> {
    let s = value
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("expected hex quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| LedgerError::Decode(format!("bad quantity '{s}': {e}")))
}

pub fn parse_word(s: &str) -> Result<Word, LedgerError> {
    let bytes = from_hex(s)?;
    if bytes.len() != 32 {
        return Err(LedgerError::Decode(format!("expected 32-byte word, got {} bytes", bytes.len())));
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(word)
}
