use crate::constants::KECCAK_EMPTY;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

const FIELD_NONCE: u8 = 0b0001;
const FIELD_BALANCE: u8 = 0b0010;
const FIELD_INCARNATION: u8 = 0b0100;
const FIELD_CODE_HASH: u8 = 0b1000;

/// On-disk account record of the plain-state schema.
///
/// `incarnation` shards storage keys so that slots written by a destroyed
/// contract cannot leak into a re-created one; it only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAccount {
    /// Transaction count of the account.
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    /// Storage generation, bumped on contract creation over a destroyed
    /// address.
    pub incarnation: u16,
    /// Keccak-256 of the account code; [`KECCAK_EMPTY`] when there is none.
    pub code_hash: B256,
}

impl Default for StateAccount {
    fn default() -> Self {
        Self { nonce: 0, balance: U256::ZERO, incarnation: 0, code_hash: KECCAK_EMPTY }
    }
}

/// Error decoding a [`StateAccount`] from its storage encoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountDecodeError {
    /// A length prefix points past the end of the buffer.
    #[error("account field truncated at offset {offset}")]
    Truncated {
        /// Offset of the truncated field payload.
        offset: usize,
    },
    /// A field payload is longer than its type allows.
    #[error("account field too long: {len} bytes")]
    FieldTooLong {
        /// Encoded payload length.
        len: usize,
    },
}

impl StateAccount {
    /// Account with the given balance and no other state.
    pub fn from_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }

    /// Whether the account has associated code.
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY && self.code_hash != B256::ZERO
    }

    /// EIP-161 emptiness: no nonce, no balance, no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_code()
    }

    /// Encodes the record with a leading field-presence bitmask followed by
    /// length-prefixed big-endian field payloads. Zero-valued fields are
    /// omitted; a fully empty account encodes to zero bytes.
    pub fn encode_for_storage(&self) -> Vec<u8> {
        let mut buf = vec![0u8];
        let mut fieldset = 0u8;

        if self.nonce != 0 {
            fieldset |= FIELD_NONCE;
            push_trimmed(&mut buf, &self.nonce.to_be_bytes());
        }
        if !self.balance.is_zero() {
            fieldset |= FIELD_BALANCE;
            push_trimmed(&mut buf, &self.balance.to_be_bytes::<32>());
        }
        if self.incarnation != 0 {
            fieldset |= FIELD_INCARNATION;
            push_trimmed(&mut buf, &self.incarnation.to_be_bytes());
        }
        if self.has_code() {
            fieldset |= FIELD_CODE_HASH;
            buf.push(32);
            buf.extend_from_slice(self.code_hash.as_slice());
        }

        if fieldset == 0 {
            return Vec::new();
        }
        buf[0] = fieldset;
        buf
    }

    /// Decodes a record produced by [`Self::encode_for_storage`]. Zero bytes
    /// decode to the default (empty) account.
    pub fn decode_for_storage(mut data: &[u8]) -> Result<Self, AccountDecodeError> {
        let mut account = Self::default();
        if data.is_empty() {
            return Ok(account);
        }

        let fieldset = data[0];
        data = &data[1..];
        let mut offset = 1usize;

        if fieldset & FIELD_NONCE != 0 {
            let payload = take_field(&mut data, &mut offset, 8)?;
            let mut be = [0u8; 8];
            be[8 - payload.len()..].copy_from_slice(payload);
            account.nonce = u64::from_be_bytes(be);
        }
        if fieldset & FIELD_BALANCE != 0 {
            let payload = take_field(&mut data, &mut offset, 32)?;
            account.balance = U256::from_be_slice(payload);
        }
        if fieldset & FIELD_INCARNATION != 0 {
            let payload = take_field(&mut data, &mut offset, 2)?;
            let mut be = [0u8; 2];
            be[2 - payload.len()..].copy_from_slice(payload);
            account.incarnation = u16::from_be_bytes(be);
        }
        if fieldset & FIELD_CODE_HASH != 0 {
            let payload = take_field(&mut data, &mut offset, 32)?;
            if payload.len() != 32 {
                return Err(AccountDecodeError::FieldTooLong { len: payload.len() });
            }
            account.code_hash = B256::from_slice(payload);
        }

        Ok(account)
    }
}

fn push_trimmed(buf: &mut Vec<u8>, be: &[u8]) {
    let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    let payload = &be[start..];
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
}

fn take_field<'a>(
    data: &mut &'a [u8],
    offset: &mut usize,
    max: usize,
) -> Result<&'a [u8], AccountDecodeError> {
    if data.is_empty() {
        return Err(AccountDecodeError::Truncated { offset: *offset });
    }
    let len = data[0] as usize;
    if len > max {
        return Err(AccountDecodeError::FieldTooLong { len });
    }
    if data.len() < 1 + len {
        return Err(AccountDecodeError::Truncated { offset: *offset });
    }
    let payload = &data[1..1 + len];
    *data = &data[1 + len..];
    *offset += 1 + len;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn empty_account_encodes_to_nothing() {
        let account = StateAccount::default();
        assert!(account.is_empty());
        assert!(account.encode_for_storage().is_empty());
        assert_eq!(StateAccount::decode_for_storage(&[]).unwrap(), account);
    }

    #[test]
    fn roundtrip_full_record() {
        let account = StateAccount {
            nonce: 777,
            balance: U256::from(123_456_789_000_000_000u128),
            incarnation: 3,
            code_hash: b256!("4f1f8c3e7a1f2c0ffee1c0de00000000000000000000000000000000000000aa"),
        };
        let encoded = account.encode_for_storage();
        assert_eq!(StateAccount::decode_for_storage(&encoded).unwrap(), account);
    }

    #[test]
    fn roundtrip_sparse_records() {
        let cases = [
            StateAccount { nonce: 1, ..Default::default() },
            StateAccount::from_balance(U256::from(1u64)),
            StateAccount { incarnation: 1, ..Default::default() },
            StateAccount { nonce: u64::MAX, balance: U256::MAX, ..Default::default() },
        ];
        for account in cases {
            let encoded = account.encode_for_storage();
            assert_eq!(
                StateAccount::decode_for_storage(&encoded).unwrap(),
                account,
                "roundtrip failed for {account:?}"
            );
        }
    }

    #[test]
    fn zero_fields_are_omitted() {
        let account = StateAccount { nonce: 5, ..Default::default() };
        let encoded = account.encode_for_storage();
        // bitmask + length prefix + single nonce byte
        assert_eq!(encoded, vec![0b0001, 1, 5]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let account = StateAccount { nonce: 5, balance: U256::from(10u64), ..Default::default() };
        let mut encoded = account.encode_for_storage();
        encoded.pop();
        assert!(matches!(
            StateAccount::decode_for_storage(&encoded),
            Err(AccountDecodeError::Truncated { .. })
        ));
    }
}
