use alloy_primitives::{BlockNumber, B256};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

pub use alloy_consensus::Header;

/// A [`Header`] together with its keccak hash.
///
/// The hash is computed once at sealing time; all verification paths pass
/// sealed headers around so the hash is never recomputed per check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// Seals the header with a hash computed elsewhere.
    pub const fn new(header: Header, hash: B256) -> Self {
        Self { header, hash }
    }

    /// Seals the header, hashing it on the spot.
    pub fn seal_slow(header: Header) -> Self {
        let hash = header.hash_slow();
        Self { header, hash }
    }

    /// The block hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// The block height.
    pub const fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Consumes the seal, returning the raw header.
    pub fn into_header(self) -> Header {
        self.header
    }

    /// Splits into header and hash.
    pub fn split(self) -> (Header, B256) {
        (self.header, self.hash)
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

impl Default for SealedHeader {
    fn default() -> Self {
        Self::seal_slow(Header::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_matches_slow_hash() {
        let header = Header { number: 7, gas_limit: 30_000_000, ..Default::default() };
        let sealed = SealedHeader::seal_slow(header.clone());
        assert_eq!(sealed.hash(), header.hash_slow());
        assert_eq!(sealed.number(), 7);
    }
}
