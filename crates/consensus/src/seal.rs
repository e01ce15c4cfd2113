//! Seal hashing and seal recovery.
//!
//! The seal hash is the keccak of the RLP of all header fields with the
//! 65-byte seal suffix stripped from the extra-data; it is what a signer
//! signs and what verification recovers against.

use crate::{
    constants::{EXTRA_SEAL_LEN, EXTRA_VANITY_LEN},
    error::ApoaError,
};
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_rlp::Encodable;
use aura_primitives::{crypto, Header};

/// The extra-data with the seal suffix stripped.
fn truncated_extra(header: &Header) -> Bytes {
    let extra = &header.extra_data;
    if extra.len() >= EXTRA_SEAL_LEN {
        Bytes::copy_from_slice(&extra[..extra.len() - EXTRA_SEAL_LEN])
    } else {
        extra.clone()
    }
}

/// RLP-encodes the header with the seal stripped and appends it to `out`.
pub fn encode_header_for_sealing(header: &Header, out: &mut Vec<u8>) {
    let mut sealless = header.clone();
    sealless.extra_data = truncated_extra(header);
    sealless.encode(out);
}

/// The hash a signer commits to.
pub fn seal_hash(header: &Header) -> B256 {
    let mut out = Vec::new();
    encode_header_for_sealing(header, &mut out);
    keccak256(&out)
}

/// Extracts the 65-byte seal from the extra-data.
pub fn seal_of(header: &Header) -> Result<(&[u8], u8), ApoaError> {
    let extra = &header.extra_data;
    if extra.len() < EXTRA_VANITY_LEN {
        return Err(ApoaError::MissingVanity);
    }
    if extra.len() < EXTRA_VANITY_LEN + EXTRA_SEAL_LEN {
        return Err(ApoaError::MissingSignature);
    }
    let seal = &extra[extra.len() - EXTRA_SEAL_LEN..];
    Ok((&seal[..64], seal[64]))
}

/// Recovers the address that sealed `header`.
pub fn recover_seal_signer(header: &Header) -> Result<Address, ApoaError> {
    let (sig, rec_id) = seal_of(header)?;
    let sig: [u8; 64] = sig.try_into().expect("slice is 64 bytes");
    crypto::recover_address(&sig, rec_id, seal_hash(header))
        .map_err(|_| ApoaError::RecoveryFailed)
}

/// Writes a fresh seal into the extra-data suffix.
pub fn write_seal(header: &mut Header, sig: &[u8; 64], rec_id: u8) -> Result<(), ApoaError> {
    let extra = header.extra_data.to_vec();
    if extra.len() < EXTRA_VANITY_LEN + EXTRA_SEAL_LEN {
        return Err(ApoaError::MissingSignature);
    }
    let mut extra = extra;
    let offset = extra.len() - EXTRA_SEAL_LEN;
    extra[offset..offset + 64].copy_from_slice(sig);
    extra[offset + 64] = rec_id;
    header.extra_data = extra.into();
    Ok(())
}

/// Signs the seal hash with `secret` and embeds the seal.
pub fn seal_header(header: &mut Header, secret: B256) -> Result<(), ApoaError> {
    let hash = seal_hash(header);
    let (sig, rec_id) =
        crypto::sign_prehash(secret, hash).map_err(|_| ApoaError::RecoveryFailed)?;
    write_seal(header, &sig, rec_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use aura_primitives::crypto::address_of;

    fn sealable_header() -> Header {
        Header {
            number: 5,
            gas_limit: 30_000_000,
            extra_data: Bytes::from(vec![0u8; EXTRA_VANITY_LEN + EXTRA_SEAL_LEN]),
            ..Default::default()
        }
    }

    #[test]
    fn seal_hash_ignores_the_seal_itself() {
        let mut header = sealable_header();
        let before = seal_hash(&header);
        let secret = B256::new([7u8; 32]);
        seal_header(&mut header, secret).unwrap();
        assert_eq!(seal_hash(&header), before, "sealing must not move the seal hash");
        // but the block hash does change
        assert_ne!(header.hash_slow(), sealable_header().hash_slow());
    }

    #[test]
    fn seal_roundtrip_recovers_the_signer() {
        let secret = B256::new([9u8; 32]);
        let mut header = sealable_header();
        seal_header(&mut header, secret).unwrap();
        assert_eq!(recover_seal_signer(&header).unwrap(), address_of(secret).unwrap());
    }

    #[test]
    fn short_extra_data_is_rejected() {
        let mut header = sealable_header();
        header.extra_data = Bytes::from(vec![0u8; 10]);
        assert_eq!(seal_of(&header).unwrap_err(), ApoaError::MissingVanity);
        header.extra_data = Bytes::from(vec![0u8; EXTRA_VANITY_LEN + 3]);
        assert_eq!(seal_of(&header).unwrap_err(), ApoaError::MissingSignature);
    }
}
