//! ECDSA helpers over secp256k1 shared by transaction sender recovery and
//! consensus seal handling.

use alloy_primitives::{keccak256, Address, B256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};

/// Error produced by signature recovery or signing.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum CryptoError {
    /// The 64-byte r||s payload or the recovery id is malformed.
    #[error("invalid signature")]
    InvalidSignature,
    /// The secret key is not a valid scalar.
    #[error("invalid secret key")]
    InvalidSecretKey,
}

/// Converts an uncompressed public key to its 20-byte address.
pub fn public_key_to_address(public: &PublicKey) -> Address {
    Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..])
}

/// Recovers the address that produced `sig` (64 bytes r||s) with the given
/// recovery id over a 32-byte prehash.
pub fn recover_address(sig: &[u8; 64], rec_id: u8, prehash: B256) -> Result<Address, CryptoError> {
    let rec_id =
        RecoveryId::from_i32(rec_id as i32).map_err(|_| CryptoError::InvalidSignature)?;
    let signature = RecoverableSignature::from_compact(sig.as_slice(), rec_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let message = Message::from_digest_slice(prehash.as_slice())
        .map_err(|_| CryptoError::InvalidSignature)?;
    let public = SECP256K1
        .recover_ecdsa(&message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(public_key_to_address(&public))
}

/// Signs a 32-byte prehash, returning the 64-byte r||s payload and the
/// recovery id.
pub fn sign_prehash(secret: B256, prehash: B256) -> Result<([u8; 64], u8), CryptoError> {
    let secret =
        SecretKey::from_slice(secret.as_slice()).map_err(|_| CryptoError::InvalidSecretKey)?;
    let message = Message::from_digest_slice(prehash.as_slice())
        .map_err(|_| CryptoError::InvalidSignature)?;
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, &secret);
    let (rec_id, data) = signature.serialize_compact();
    Ok((data, rec_id.to_i32() as u8))
}

/// Address controlled by a secret key.
pub fn address_of(secret: B256) -> Result<Address, CryptoError> {
    let secret =
        SecretKey::from_slice(secret.as_slice()).map_err(|_| CryptoError::InvalidSecretKey)?;
    Ok(public_key_to_address(&secret.public_key(SECP256K1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn sign_then_recover() {
        let secret = b256!("4646464646464646464646464646464646464646464646464646464646464646");
        let prehash = keccak256(b"aura");
        let (sig, rec_id) = sign_prehash(secret, prehash).unwrap();
        let recovered = recover_address(&sig, rec_id, prehash).unwrap();
        assert_eq!(recovered, address_of(secret).unwrap());
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let prehash = keccak256(b"aura");
        assert_eq!(
            recover_address(&[0u8; 64], 0, prehash),
            Err(CryptoError::InvalidSignature)
        );
    }
}
