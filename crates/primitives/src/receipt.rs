use alloy_consensus::TxType;
use alloy_primitives::{Bloom, Log};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Execution receipt of a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Envelope type of the transaction this receipt belongs to.
    pub tx_type: TxType,
    /// EIP-658 status: `true` when execution finished without an
    /// exceptional halt.
    pub success: bool,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Computes the bloom filter over the receipt logs.
    pub fn bloom_slow(&self) -> Bloom {
        let mut bloom = Bloom::ZERO;
        for log in &self.logs {
            bloom.accrue_log(log);
        }
        bloom
    }

    /// Pairs the receipt with its bloom.
    pub fn with_bloom(self) -> ReceiptWithBloom {
        let bloom = self.bloom_slow();
        ReceiptWithBloom { receipt: self, bloom }
    }
}

/// [`Receipt`] with its bloom filter, the form receipts take in the
/// receipts-root trie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptWithBloom {
    /// The receipt.
    pub receipt: Receipt,
    /// Bloom over the receipt logs.
    pub bloom: Bloom,
}

#[derive(RlpEncodable, RlpDecodable)]
struct ReceiptParts {
    success: bool,
    cumulative_gas_used: u64,
    bloom: Bloom,
    logs: Vec<Log>,
}

impl ReceiptWithBloom {
    /// Appends the EIP-2718 encoding (type prefix + RLP payload) to `out`,
    /// the form hashed into the receipts root.
    pub fn encode_2718(&self, out: &mut dyn BufMut) {
        if self.receipt.tx_type != TxType::Legacy {
            out.put_u8(self.receipt.tx_type as u8);
        }
        self.parts().encode(out);
    }

    /// EIP-2718 encoding as a fresh buffer.
    pub fn encoded_2718(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_2718(&mut out);
        out
    }

    /// Decodes an EIP-2718 receipt encoding.
    pub fn decode_2718(data: &[u8]) -> alloy_rlp::Result<Self> {
        let (tx_type, mut payload) = match data.first() {
            Some(&byte) if byte <= 0x7f => {
                let tx_type = TxType::try_from(byte)
                    .map_err(|_| alloy_rlp::Error::Custom("unknown receipt type"))?;
                (tx_type, &data[1..])
            }
            Some(_) => (TxType::Legacy, data),
            None => return Err(alloy_rlp::Error::InputTooShort),
        };
        let parts = ReceiptParts::decode(&mut payload)?;
        Ok(Self {
            receipt: Receipt {
                tx_type,
                success: parts.success,
                cumulative_gas_used: parts.cumulative_gas_used,
                logs: parts.logs,
            },
            bloom: parts.bloom,
        })
    }

    fn parts(&self) -> ReceiptParts {
        ReceiptParts {
            success: self.receipt.success,
            cumulative_gas_used: self.receipt.cumulative_gas_used,
            bloom: self.bloom,
            logs: self.receipt.logs.clone(),
        }
    }
}

/// Compact receipt record persisted in the receipts bucket; logs live in
/// their own bucket keyed by `(block, tx_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct StoredReceipt {
    /// Envelope type byte.
    pub tx_type: u8,
    /// EIP-658 status.
    pub success: bool,
    /// Cumulative block gas after this transaction.
    pub cumulative_gas_used: u64,
}

impl From<&Receipt> for StoredReceipt {
    fn from(receipt: &Receipt) -> Self {
        Self {
            tx_type: receipt.tx_type as u8,
            success: receipt.success,
            cumulative_gas_used: receipt.cumulative_gas_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256, LogData};

    fn sample_receipt() -> Receipt {
        Receipt {
            tx_type: TxType::Eip1559,
            success: true,
            cumulative_gas_used: 46_913,
            logs: vec![Log {
                address: address!("0000000000000000000000000000000000001234"),
                data: LogData::new_unchecked(
                    vec![b256!(
                        "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
                    )],
                    vec![0xaa, 0xbb].into(),
                ),
            }],
        }
    }

    #[test]
    fn receipt_2718_roundtrip() {
        let receipt = sample_receipt().with_bloom();
        let encoded = receipt.encoded_2718();
        assert_eq!(ReceiptWithBloom::decode_2718(&encoded).unwrap(), receipt);
    }

    #[test]
    fn legacy_receipt_has_no_type_prefix() {
        let receipt = Receipt { tx_type: TxType::Legacy, ..sample_receipt() }.with_bloom();
        let encoded = receipt.encoded_2718();
        // RLP list header, not a type byte
        assert!(encoded[0] >= 0xc0);
        assert_eq!(ReceiptWithBloom::decode_2718(&encoded).unwrap(), receipt);
    }

    #[test]
    fn bloom_covers_log_address_and_topics() {
        let receipt = sample_receipt();
        let bloom = receipt.bloom_slow();
        assert!(!bloom.is_zero());
        // accruing again is idempotent on the filter
        let mut twice = bloom;
        for log in &receipt.logs {
            twice.accrue_log(log);
        }
        assert_eq!(bloom, twice);
    }
}
