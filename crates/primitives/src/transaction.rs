use crate::{
    constants::GAS_PER_BLOB,
    crypto::{self, CryptoError},
};
use alloy_consensus::{
    transaction::SignableTransaction, Signed, TxEip1559, TxEip2930, TxEip4844, TxEip4844Variant,
    TxEnvelope, TxLegacy, TxType,
};
use alloy_eips::{
    eip2718::{Decodable2718, Encodable2718},
    eip2930::AccessList,
};
use alloy_primitives::{Address, Bytes, Parity, Signature, TxHash, TxKind, B256, U256};
use serde::{Deserialize, Serialize};

/// Error decoding a transaction from its EIP-2718 envelope.
#[derive(Debug, thiserror::Error)]
pub enum TxDecodeError {
    /// The payload is not a valid typed envelope or legacy list.
    #[error("malformed transaction: {0}")]
    Malformed(String),
    /// The envelope decoded to a type this chain does not accept.
    #[error("unsupported transaction type {0}")]
    UnsupportedType(u8),
}

/// A signed transaction of any of the supported types: legacy, EIP-2930,
/// EIP-1559 or EIP-4844.
///
/// Wraps the typed envelope so that chain-specific helpers (sender
/// recovery, effective gas price, blob gas) live next to the wire type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSigned {
    envelope: TxEnvelope,
}

impl TransactionSigned {
    /// Wraps an envelope, rejecting transaction types the chain does not
    /// execute.
    pub fn from_envelope(envelope: TxEnvelope) -> Result<Self, TxDecodeError> {
        match envelope.tx_type() {
            TxType::Legacy | TxType::Eip2930 | TxType::Eip1559 | TxType::Eip4844 => {
                Ok(Self { envelope })
            }
            other => Err(TxDecodeError::UnsupportedType(other as u8)),
        }
    }

    /// Decodes a raw transaction as submitted via `eth_sendRawTransaction`.
    pub fn decode_enveloped(data: &[u8]) -> Result<Self, TxDecodeError> {
        let envelope = TxEnvelope::decode_2718(&mut &data[..])
            .map_err(|err| TxDecodeError::Malformed(err.to_string()))?;
        Self::from_envelope(envelope)
    }

    /// EIP-2718 encoding, the canonical wire and storage form.
    pub fn encoded_2718(&self) -> Vec<u8> {
        self.envelope.encoded_2718()
    }

    /// Appends the EIP-2718 encoding to `out`.
    pub fn encode_2718(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.envelope.encode_2718(out)
    }

    /// The transaction hash.
    pub fn hash(&self) -> TxHash {
        *self.envelope.tx_hash()
    }

    /// The envelope type.
    pub fn tx_type(&self) -> TxType {
        self.envelope.tx_type()
    }

    /// The inner typed envelope.
    pub const fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }

    /// The ECDSA signature.
    pub fn signature(&self) -> &Signature {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.signature(),
            TxEnvelope::Eip2930(tx) => tx.signature(),
            TxEnvelope::Eip1559(tx) => tx.signature(),
            TxEnvelope::Eip4844(tx) => tx.signature(),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// The hash the sender signed.
    pub fn signature_hash(&self) -> B256 {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().signature_hash(),
            TxEnvelope::Eip2930(tx) => tx.tx().signature_hash(),
            TxEnvelope::Eip1559(tx) => tx.tx().signature_hash(),
            TxEnvelope::Eip4844(tx) => tx.tx().signature_hash(),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Recovers the sender address from the signature.
    pub fn recover_signer(&self) -> Result<Address, CryptoError> {
        let signature = self.signature();
        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
        sig[32..].copy_from_slice(&signature.s().to_be_bytes::<32>());
        crypto::recover_address(&sig, signature.v().y_parity_byte(), self.signature_hash())
    }

    /// Account nonce.
    pub fn nonce(&self) -> u64 {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().nonce,
            TxEnvelope::Eip2930(tx) => tx.tx().nonce,
            TxEnvelope::Eip1559(tx) => tx.tx().nonce,
            TxEnvelope::Eip4844(tx) => self::eip4844(tx).nonce,
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Gas limit supplied with the transaction.
    pub fn gas_limit(&self) -> u64 {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().gas_limit,
            TxEnvelope::Eip2930(tx) => tx.tx().gas_limit,
            TxEnvelope::Eip1559(tx) => tx.tx().gas_limit,
            TxEnvelope::Eip4844(tx) => self::eip4844(tx).gas_limit,
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Call target, or `TxKind::Create` for deployments.
    pub fn to(&self) -> TxKind {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().to,
            TxEnvelope::Eip2930(tx) => tx.tx().to,
            TxEnvelope::Eip1559(tx) => tx.tx().to,
            TxEnvelope::Eip4844(tx) => TxKind::Call(self::eip4844(tx).to),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Whether this deploys a contract.
    pub fn is_create(&self) -> bool {
        matches!(self.to(), TxKind::Create)
    }

    /// Transferred value in wei.
    pub fn value(&self) -> U256 {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().value,
            TxEnvelope::Eip2930(tx) => tx.tx().value,
            TxEnvelope::Eip1559(tx) => tx.tx().value,
            TxEnvelope::Eip4844(tx) => self::eip4844(tx).value,
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Call data.
    pub fn input(&self) -> &Bytes {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => &tx.tx().input,
            TxEnvelope::Eip2930(tx) => &tx.tx().input,
            TxEnvelope::Eip1559(tx) => &tx.tx().input,
            TxEnvelope::Eip4844(tx) => &self::eip4844(tx).input,
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Chain id the transaction is replay-protected for, if any.
    pub fn chain_id(&self) -> Option<u64> {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().chain_id,
            TxEnvelope::Eip2930(tx) => Some(tx.tx().chain_id),
            TxEnvelope::Eip1559(tx) => Some(tx.tx().chain_id),
            TxEnvelope::Eip4844(tx) => Some(self::eip4844(tx).chain_id),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// EIP-2930 access list, for the types that carry one.
    pub fn access_list(&self) -> Option<&AccessList> {
        match &self.envelope {
            TxEnvelope::Legacy(_) => None,
            TxEnvelope::Eip2930(tx) => Some(&tx.tx().access_list),
            TxEnvelope::Eip1559(tx) => Some(&tx.tx().access_list),
            TxEnvelope::Eip4844(tx) => Some(&self::eip4844(tx).access_list),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Maximum total fee per gas the sender is willing to pay.
    pub fn max_fee_per_gas(&self) -> u128 {
        match &self.envelope {
            TxEnvelope::Legacy(tx) => tx.tx().gas_price,
            TxEnvelope::Eip2930(tx) => tx.tx().gas_price,
            TxEnvelope::Eip1559(tx) => tx.tx().max_fee_per_gas,
            TxEnvelope::Eip4844(tx) => self::eip4844(tx).max_fee_per_gas,
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Maximum priority fee per gas, for dynamic-fee transactions.
    pub fn max_priority_fee_per_gas(&self) -> Option<u128> {
        match &self.envelope {
            TxEnvelope::Legacy(_) | TxEnvelope::Eip2930(_) => None,
            TxEnvelope::Eip1559(tx) => Some(tx.tx().max_priority_fee_per_gas),
            TxEnvelope::Eip4844(tx) => Some(self::eip4844(tx).max_priority_fee_per_gas),
            _ => unreachable!("unsupported envelopes are rejected on construction"),
        }
    }

    /// Maximum fee per blob gas, for blob transactions.
    pub fn max_fee_per_blob_gas(&self) -> Option<u128> {
        match &self.envelope {
            TxEnvelope::Eip4844(tx) => Some(self::eip4844(tx).max_fee_per_blob_gas),
            _ => None,
        }
    }

    /// Versioned hashes of the carried blobs, for blob transactions.
    pub fn blob_versioned_hashes(&self) -> Option<&[B256]> {
        match &self.envelope {
            TxEnvelope::Eip4844(tx) => Some(&self::eip4844(tx).blob_versioned_hashes),
            _ => None,
        }
    }

    /// Blob gas consumed by this transaction: `blobs * GAS_PER_BLOB`.
    pub fn blob_gas(&self) -> Option<u64> {
        self.blob_versioned_hashes().map(|hashes| hashes.len() as u64 * GAS_PER_BLOB)
    }

    /// The per-gas price actually charged given the block base fee.
    ///
    /// For dynamic-fee transactions this is
    /// `min(max_fee, base_fee + max_priority_fee)`; legacy transactions pay
    /// their declared gas price.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        match self.max_priority_fee_per_gas() {
            None => self.max_fee_per_gas(),
            Some(priority) => match base_fee {
                None => self.max_fee_per_gas(),
                Some(base_fee) => {
                    self.max_fee_per_gas().min(base_fee as u128 + priority)
                }
            },
        }
    }

    /// The tip over the base fee this transaction pays the block proposer,
    /// or `None` if it cannot cover the base fee at all.
    pub fn effective_tip_per_gas(&self, base_fee: Option<u64>) -> Option<u128> {
        let base_fee = base_fee.unwrap_or(0) as u128;
        let max_fee = self.max_fee_per_gas();
        if max_fee < base_fee {
            return None;
        }
        match self.max_priority_fee_per_gas() {
            None => Some(max_fee - base_fee),
            Some(priority) => Some(priority.min(max_fee - base_fee)),
        }
    }
}

fn eip4844(tx: &Signed<TxEip4844Variant>) -> &TxEip4844 {
    match tx.tx() {
        TxEip4844Variant::TxEip4844(tx) => tx,
        TxEip4844Variant::TxEip4844WithSidecar(tx) => tx.tx(),
    }
}

impl From<Signed<TxLegacy>> for TransactionSigned {
    fn from(tx: Signed<TxLegacy>) -> Self {
        Self { envelope: tx.into() }
    }
}

impl From<Signed<TxEip2930>> for TransactionSigned {
    fn from(tx: Signed<TxEip2930>) -> Self {
        Self { envelope: tx.into() }
    }
}

impl From<Signed<TxEip1559>> for TransactionSigned {
    fn from(tx: Signed<TxEip1559>) -> Self {
        Self { envelope: tx.into() }
    }
}

impl From<Signed<TxEip4844>> for TransactionSigned {
    fn from(tx: Signed<TxEip4844>) -> Self {
        let (tx, signature, hash) = tx.into_parts();
        let variant = Signed::new_unchecked(TxEip4844Variant::TxEip4844(tx), signature, hash);
        Self { envelope: variant.into() }
    }
}

/// Signs `tx` with `secret` and wraps it into a [`TransactionSigned`].
pub fn sign_transaction<T>(tx: T, secret: B256) -> Result<TransactionSigned, CryptoError>
where
    T: SignableTransaction<Signature>,
    TransactionSigned: From<Signed<T>>,
{
    let chain_id = tx.chain_id();
    let (sig, rec_id) = crypto::sign_prehash(secret, tx.signature_hash())?;
    let mut signature = Signature::from_rs_and_parity(
        U256::from_be_slice(&sig[..32]),
        U256::from_be_slice(&sig[32..]),
        Parity::Parity(rec_id == 1),
    )
    .map_err(|_| CryptoError::InvalidSignature)?;
    if let Some(chain_id) = chain_id {
        signature = signature.with_chain_id(chain_id);
    }
    Ok(tx.into_signed(signature).into())
}

/// Recovers all senders of `transactions`, preserving order.
pub fn recover_signers(
    transactions: &[TransactionSigned],
) -> Result<Vec<Address>, CryptoError> {
    transactions.iter().map(TransactionSigned::recover_signer).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address_of;
    use alloy_primitives::{address, b256, bytes};

    fn secret() -> B256 {
        b256!("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
    }

    fn legacy_tx() -> TxLegacy {
        TxLegacy {
            chain_id: Some(9917),
            nonce: 2,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(address!("70997970c51812dc3a010c7d01b50e0d17dc79c8")),
            value: U256::from(10u64).pow(U256::from(18u64)),
            input: bytes!(""),
        }
    }

    #[test]
    fn sign_and_recover_legacy() {
        let signed = sign_transaction(legacy_tx(), secret()).unwrap();
        assert_eq!(signed.recover_signer().unwrap(), address_of(secret()).unwrap());
        assert_eq!(signed.nonce(), 2);
        assert!(!signed.is_create());
    }

    #[test]
    fn enveloped_roundtrip() {
        let signed = sign_transaction(legacy_tx(), secret()).unwrap();
        let raw = signed.encoded_2718();
        let decoded = TransactionSigned::decode_enveloped(&raw).unwrap();
        assert_eq!(decoded, signed);
        assert_eq!(decoded.hash(), signed.hash());
    }

    #[test]
    fn dynamic_fee_effective_price() {
        let tx = TxEip1559 {
            chain_id: 9917,
            nonce: 0,
            gas_limit: 100_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            to: TxKind::Create,
            value: U256::ZERO,
            access_list: AccessList::default(),
            input: bytes!("60016000f3"),
        };
        let signed = sign_transaction(tx, secret()).unwrap();
        assert!(signed.is_create());
        // capped by max_fee
        assert_eq!(signed.effective_gas_price(Some(29_000_000_000)), 30_000_000_000);
        // base + priority below cap
        assert_eq!(signed.effective_gas_price(Some(10_000_000_000)), 12_000_000_000);
        // tip shrinks when the cap binds
        assert_eq!(signed.effective_tip_per_gas(Some(29_000_000_000)), Some(1_000_000_000));
        // cannot cover base fee
        assert_eq!(signed.effective_tip_per_gas(Some(31_000_000_000)), None);
    }
}
