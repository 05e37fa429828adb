use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::ledger::abi::keccak256;

/// Content-addressed document identity (keccak256 of the raw bytes).
///
/// Matches the contract's `bytes32` document hash, so anyone holding the
/// file can recompute it with standard EVM tooling. Display and serde use the `0x`-prefixed hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

#[derive(Debug, thiserror::Error)]
#[error("failed to read document bytes: {0}")]
pub struct ReadError(#[from] std::io::Error);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint '{0}': expected 64 hex characters")]
pub struct ParseFingerprintError(String);

impl Fingerprint {
    pub const LEN: usize = 32;

    /// Hash an in-memory byte slice.
    pub fn of(content: &[u8]) -> Self {
        Self(keccak256(content))
    }

    /// Hash everything a reader yields. A read failure part-way through
    /// returns an error; no digest of the partial stream is ever produced.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ReadError> {
        let mut hasher = Keccak256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Ok(Self(out))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bare lowercase hex, used for store keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for logs and certificate headers.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    /// Accepts the hex digest with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != Self::LEN * 2 {
            return Err(ParseFingerprintError(s.to_string()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out).map_err(|_| ParseFingerprintError(s.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream closed"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    #[test]
    fn identical_bytes_hash_identically() {
        let a = Fingerprint::of(b"This Agreement is made between the parties.");
        let b = Fingerprint::of(b"This Agreement is made between the parties.");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_is_keccak256() {
        assert_eq!(
            Fingerprint::of(b"").to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            Fingerprint::of(b"abc").to_string(),
            "0x4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
        assert_eq!(Fingerprint::from_reader(&b"abc"[..]).unwrap(), Fingerprint::of(b"abc"));
    }

    #[test]
    fn one_byte_difference_changes_fingerprint() {
        let a = Fingerprint::of(b"Notary seal: affixed");
        let b = Fingerprint::of(b"Notary seal: affixee");
        assert_ne!(a, b);
    }

    #[test]
    fn reader_and_slice_agree() {
        let content = vec![7u8; 200_000];
        let from_reader = Fingerprint::from_reader(&content[..]).unwrap();
        assert_eq!(from_reader, Fingerprint::of(&content));
    }

    #[test]
    fn failing_stream_yields_read_error() {
        let err = Fingerprint::from_reader(FailingReader { served: false }).unwrap_err();
        assert!(err.to_string().contains("stream closed"));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let fp = Fingerprint::of(b"deed");
        let bare: Fingerprint = fp.to_hex().parse().unwrap();
        let prefixed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(bare, fp);
        assert_eq!(prefixed, fp);
        assert!("0x1234".parse::<Fingerprint>().is_err());
        assert!(format!("0x{}", "zz".repeat(32)).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn serde_uses_prefixed_hex() {
        let fp = Fingerprint::of(b"affidavit");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
