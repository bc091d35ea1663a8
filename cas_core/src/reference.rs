//! The content address used throughout the store (SHA-256, 32 bytes).

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest identifying a blob.
///
/// Refs are ordered lexicographically by their byte representation, which
/// is also the order `Store::list_refs` must enumerate in.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ref([u8; 32]);

#[derive(thiserror::Error, Debug)]
pub enum RefParseError {
    #[error("invalid ref length: expected 64 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex in ref: {0}")]
    InvalidHex(#[from] data_encoding::DecodeError),
}

impl Ref {
    /// The distinguished ref representing absence: 32 zero bytes.
    pub const ZERO: Ref = Ref([0u8; 32]);

    /// Computes the ref of a byte slice: `SHA-256(bytes)`.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(bytes.as_ref());
        Ref(digest.into())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Ref(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }

    /// Parses exactly 64 lowercase (or uppercase) hex characters; any other
    /// length is rejected.
    pub fn parse(s: &str) -> Result<Self, RefParseError> {
        if s.len() != 64 {
            return Err(RefParseError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        data_encoding::HEXLOWER_PERMISSIVE.decode_mut(s.as_bytes(), &mut bytes)
            .map_err(|e| RefParseError::InvalidHex(e.error))?;
        Ok(Ref(bytes))
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Ref {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ref::parse(s)
    }
}

impl AsRef<[u8]> for Ref {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Ref {
    fn from(value: [u8; 32]) -> Self {
        Ref(value)
    }
}

impl From<Ref> for [u8; 32] {
    fn from(value: Ref) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_ref_matches_known_sha256() {
        let r = Ref::of(b"");
        assert_eq!(
            r.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_round_trip() {
        let r = Ref::of(b"hello, world");
        let s = r.to_hex();
        assert_eq!(Ref::parse(&s).unwrap(), r);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(matches!(
            Ref::parse("abcd"),
            Err(RefParseError::InvalidLength(4))
        ));
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = Ref::from_bytes([0u8; 32]);
        let mut b = [0u8; 32];
        b[31] = 1;
        let b = Ref::from_bytes(b);
        assert!(a < b);
    }
}
