//! Header, body, receipt and lookup storage over the chain buckets.

use crate::error::StateError;
use alloy_rlp::{Decodable, Encodable};
use aura_db::{
    models::{StoredBlockBody, TxMeta},
    tables,
    tables::{HeaderKey, LogKey, HEAD_KEY},
    Decode, Encode, Tx, TxMut,
};
use aura_primitives::{
    Address, Block, BlockBody, Header, Log, Receipt, SealedHeader, StoredReceipt,
    TransactionSigned, TxType, B256, U256,
};
use libmdbx::TransactionKind;

const TX_ID_SEQUENCE: &str = "BlockTx";

/// Read access to the chain buckets.
#[derive(Debug)]
pub struct ChainReader<'tx, K: TransactionKind> {
    tx: &'tx Tx<'tx, K>,
}

impl<'tx, K: TransactionKind> ChainReader<'tx, K> {
    /// Reader over the given transaction's snapshot.
    pub const fn new(tx: &'tx Tx<'tx, K>) -> Self {
        Self { tx }
    }

    /// Canonical hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> Result<Option<B256>, StateError> {
        Ok(self.tx.get::<tables::HeaderCanonical>(number)?)
    }

    /// Height of the header with the given hash.
    pub fn header_number(&self, hash: B256) -> Result<Option<u64>, StateError> {
        Ok(self.tx.get::<tables::HeaderNumber>(hash)?)
    }

    /// Header at `(number, hash)`.
    pub fn header(&self, number: u64, hash: B256) -> Result<Option<Header>, StateError> {
        let Some(raw) = self.tx.get::<tables::Headers>(HeaderKey { number, hash })? else {
            return Ok(None);
        };
        Ok(Some(Header::decode(&mut raw.as_slice()).map_err(StateError::corrupt)?))
    }

    /// Canonical header at `number`.
    pub fn header_by_number(&self, number: u64) -> Result<Option<SealedHeader>, StateError> {
        let Some(hash) = self.canonical_hash(number)? else { return Ok(None) };
        Ok(self.header(number, hash)?.map(|header| SealedHeader::new(header, hash)))
    }

    /// Header by hash.
    pub fn header_by_hash(&self, hash: B256) -> Result<Option<SealedHeader>, StateError> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        Ok(self.header(number, hash)?.map(|header| SealedHeader::new(header, hash)))
    }

    /// Hash of the latest known header.
    pub fn head_header_hash(&self) -> Result<Option<B256>, StateError> {
        Ok(self.tx.get::<tables::HeadHeaderKey>(HEAD_KEY.to_string())?)
    }

    /// Hash of the latest full block.
    pub fn head_block_hash(&self) -> Result<Option<B256>, StateError> {
        Ok(self.tx.get::<tables::HeadBlockKey>(HEAD_KEY.to_string())?)
    }

    /// The canonical tip.
    pub fn head_header(&self) -> Result<Option<SealedHeader>, StateError> {
        let Some(hash) = self.head_header_hash()? else { return Ok(None) };
        self.header_by_hash(hash)
    }

    /// Total difficulty at `(number, hash)`.
    pub fn td(&self, number: u64, hash: B256) -> Result<Option<U256>, StateError> {
        Ok(self.tx.get::<tables::HeaderTD>(HeaderKey { number, hash })?)
    }

    /// Block body at `(number, hash)`.
    pub fn body(&self, number: u64, hash: B256) -> Result<Option<BlockBody>, StateError> {
        let Some(raw) = self.tx.get::<tables::BlockBody>(HeaderKey { number, hash })? else {
            return Ok(None);
        };
        let stored = StoredBlockBody::decode_value(&raw)?;
        let mut transactions = Vec::with_capacity(stored.tx_count as usize);
        for tx_id in stored.base_tx_id..stored.base_tx_id + stored.tx_count {
            let raw = self.tx.require::<tables::BlockTx>(tx_id)?;
            transactions.push(
                TransactionSigned::decode_enveloped(&raw).map_err(StateError::corrupt)?,
            );
        }
        Ok(Some(BlockBody {
            transactions,
            withdrawals: stored.has_withdrawals.then_some(stored.withdrawals),
        }))
    }

    /// Recovered senders stored alongside the body.
    pub fn senders(&self, number: u64, hash: B256) -> Result<Option<Vec<Address>>, StateError> {
        let Some(raw) = self.tx.get::<tables::Senders>(HeaderKey { number, hash })? else {
            return Ok(None);
        };
        if raw.len() % 20 != 0 {
            return Err(StateError::corrupt("senders row not a multiple of 20 bytes"));
        }
        Ok(Some(raw.chunks_exact(20).map(Address::from_slice).collect()))
    }

    /// Full block at `(number, hash)`.
    pub fn block(&self, number: u64, hash: B256) -> Result<Option<Block>, StateError> {
        let Some(header) = self.header(number, hash)? else { return Ok(None) };
        let Some(body) = self.body(number, hash)? else { return Ok(None) };
        Ok(Some(Block { header, body }))
    }

    /// Canonical block at `number`.
    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>, StateError> {
        let Some(hash) = self.canonical_hash(number)? else { return Ok(None) };
        self.block(number, hash)
    }

    /// Block by hash.
    pub fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, StateError> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        self.block(number, hash)
    }

    /// Where a transaction landed on the canonical chain.
    pub fn tx_meta(&self, tx_hash: B256) -> Result<Option<TxMeta>, StateError> {
        let Some(raw) = self.tx.get::<tables::TxLookup>(tx_hash)? else { return Ok(None) };
        Ok(Some(TxMeta::decode(&raw)?))
    }

    /// Receipts of the canonical block at `number`, with logs re-joined
    /// from the log bucket.
    pub fn receipts(&self, number: u64) -> Result<Option<Vec<Receipt>>, StateError> {
        let Some(raw) = self.tx.get::<tables::Receipts>(number)? else { return Ok(None) };
        let stored = Vec::<StoredReceipt>::decode(&mut raw.as_slice())
            .map_err(StateError::corrupt)?;
        let mut receipts = Vec::with_capacity(stored.len());
        for (index, receipt) in stored.into_iter().enumerate() {
            let logs = match self
                .tx
                .get::<tables::Log>(LogKey { block_number: number, tx_index: index as u32 })?
            {
                Some(raw) => {
                    Vec::<Log>::decode(&mut raw.as_slice()).map_err(StateError::corrupt)?
                }
                None => Vec::new(),
            };
            receipts.push(Receipt {
                tx_type: TxType::try_from(receipt.tx_type)
                    .map_err(|_| StateError::corrupt("unknown receipt tx type"))?,
                success: receipt.success,
                cumulative_gas_used: receipt.cumulative_gas_used,
                logs,
            });
        }
        Ok(Some(receipts))
    }
}

/// Write access to the chain buckets.
#[derive(Debug)]
pub struct ChainWriter<'tx, 'env> {
    tx: &'tx TxMut<'env>,
}

impl<'tx, 'env> ChainWriter<'tx, 'env> {
    /// Writer over the given read-write transaction.
    pub const fn new(tx: &'tx TxMut<'env>) -> Self {
        Self { tx }
    }

    /// Stores a header and its hash-to-number link.
    pub fn write_header(&self, header: &SealedHeader) -> Result<(), StateError> {
        let mut raw = Vec::new();
        (**header).encode(&mut raw);
        self.tx
            .put::<tables::Headers>(HeaderKey { number: header.number(), hash: header.hash() }, raw)?;
        self.tx.put::<tables::HeaderNumber>(header.hash(), header.number())?;
        Ok(())
    }

    /// Stores the total difficulty of a header.
    pub fn write_td(&self, number: u64, hash: B256, td: U256) -> Result<(), StateError> {
        self.tx.put::<tables::HeaderTD>(HeaderKey { number, hash }, td)?;
        Ok(())
    }

    /// Makes `hash` the canonical block at `number`.
    pub fn write_canonical_hash(&self, number: u64, hash: B256) -> Result<(), StateError> {
        self.tx.put::<tables::HeaderCanonical>(number, hash)?;
        Ok(())
    }

    /// Moves the head-header marker.
    pub fn set_head_header(&self, hash: B256) -> Result<(), StateError> {
        self.tx.put::<tables::HeadHeaderKey>(HEAD_KEY.to_string(), hash)?;
        Ok(())
    }

    /// Moves the head-block marker.
    pub fn set_head_block(&self, hash: B256) -> Result<(), StateError> {
        self.tx.put::<tables::HeadBlockKey>(HEAD_KEY.to_string(), hash)?;
        Ok(())
    }

    /// Stores a block body: transactions under freshly allocated global tx
    /// ids, the sender list, and a lookup entry per transaction.
    pub fn write_body(
        &self,
        number: u64,
        hash: B256,
        body: &BlockBody,
        senders: &[Address],
    ) -> Result<(), StateError> {
        let tx_count = body.transactions.len() as u64;
        let base_tx_id = self.tx.increment_sequence(TX_ID_SEQUENCE, tx_count)?;

        let mut batch = aura_db::Batch::<tables::BlockTx>::new(self.tx);
        for (index, transaction) in body.transactions.iter().enumerate() {
            batch.put(base_tx_id + index as u64, transaction.encoded_2718())?;
            self.tx.put::<tables::TxLookup>(
                transaction.hash(),
                TxMeta { block_number: number, tx_index: index as u32 }.encode().to_vec(),
            )?;
        }
        batch.flush()?;

        let stored = StoredBlockBody {
            base_tx_id,
            tx_count,
            has_withdrawals: body.withdrawals.is_some(),
            withdrawals: body.withdrawals.clone().unwrap_or_default(),
        };
        self.tx
            .put::<tables::BlockBody>(HeaderKey { number, hash }, stored.encode_value())?;

        let mut sender_bytes = Vec::with_capacity(senders.len() * 20);
        for sender in senders {
            sender_bytes.extend_from_slice(sender.as_slice());
        }
        self.tx.put::<tables::Senders>(HeaderKey { number, hash }, sender_bytes)?;
        Ok(())
    }

    /// Stores the receipts of a block, splitting logs into the log bucket.
    pub fn write_receipts(&self, number: u64, receipts: &[Receipt]) -> Result<(), StateError> {
        let stored: Vec<StoredReceipt> = receipts.iter().map(StoredReceipt::from).collect();
        let mut raw = Vec::new();
        stored.encode(&mut raw);
        self.tx.put::<tables::Receipts>(number, raw)?;

        for (index, receipt) in receipts.iter().enumerate() {
            if receipt.logs.is_empty() {
                continue;
            }
            let mut raw = Vec::new();
            receipt.logs.encode(&mut raw);
            self.tx
                .put::<tables::Log>(LogKey { block_number: number, tx_index: index as u32 }, raw)?;
        }
        Ok(())
    }

    /// Stores a complete canonical block and moves both head markers.
    pub fn write_block(
        &self,
        header: &SealedHeader,
        body: &BlockBody,
        senders: &[Address],
        td: U256,
    ) -> Result<(), StateError> {
        self.write_header(header)?;
        self.write_td(header.number(), header.hash(), td)?;
        self.write_canonical_hash(header.number(), header.hash())?;
        self.write_body(header.number(), header.hash(), body, senders)?;
        self.set_head_header(header.hash())?;
        self.set_head_block(header.hash())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_db::test_utils::create_test_db;
    use aura_primitives::{constants::EMPTY_ROOT_HASH, LogData};

    #[test]
    fn header_roundtrip_and_canonical_links() {
        let (env, _dir) = create_test_db();
        let header = Header { number: 3, gas_limit: 30_000_000, ..Default::default() };
        let sealed = SealedHeader::seal_slow(header);

        let tx = env.tx_mut().unwrap();
        let writer = ChainWriter::new(&tx);
        writer.write_header(&sealed).unwrap();
        writer.write_canonical_hash(3, sealed.hash()).unwrap();
        writer.set_head_header(sealed.hash()).unwrap();
        tx.commit().unwrap();

        let tx = env.tx().unwrap();
        let reader = ChainReader::new(&tx);
        let loaded = reader.header_by_number(3).unwrap().unwrap();
        assert_eq!(loaded.hash(), sealed.hash());
        assert_eq!(reader.header_number(sealed.hash()).unwrap(), Some(3));
        assert_eq!(reader.head_header().unwrap().unwrap().number(), 3);
        // exactly one canonical entry for the height
        assert_eq!(reader.canonical_hash(3).unwrap(), Some(sealed.hash()));
        assert_eq!(reader.canonical_hash(4).unwrap(), None);
    }

    #[test]
    fn empty_body_roundtrip() {
        let (env, _dir) = create_test_db();
        let sealed = SealedHeader::seal_slow(Header::default());

        let tx = env.tx_mut().unwrap();
        let writer = ChainWriter::new(&tx);
        let body = BlockBody { transactions: vec![], withdrawals: Some(vec![]) };
        writer.write_body(0, sealed.hash(), &body, &[]).unwrap();
        tx.commit().unwrap();

        let tx = env.tx().unwrap();
        let reader = ChainReader::new(&tx);
        let loaded = reader.body(0, sealed.hash()).unwrap().unwrap();
        assert_eq!(loaded, body);
        assert_eq!(loaded.calculate_tx_root(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn receipts_roundtrip_with_logs() {
        let (env, _dir) = create_test_db();
        let receipts = vec![
            Receipt { tx_type: TxType::Legacy, success: true, cumulative_gas_used: 21_000, logs: vec![] },
            Receipt {
                tx_type: TxType::Eip1559,
                success: false,
                cumulative_gas_used: 63_000,
                logs: vec![Log {
                    address: Address::new([5u8; 20]),
                    data: LogData::new_unchecked(vec![B256::with_last_byte(1)], vec![1, 2].into()),
                }],
            },
        ];

        env.update(|tx| {
            ChainWriter::new(tx).write_receipts(12, &receipts).map_err(|_| {
                aura_db::DatabaseError::Internal("write failed".into())
            })?;
            Ok(())
        })
        .unwrap();

        let tx = env.tx().unwrap();
        let loaded = ChainReader::new(&tx).receipts(12).unwrap().unwrap();
        assert_eq!(loaded, receipts);
        assert!(loaded[1].cumulative_gas_used >= loaded[0].cumulative_gas_used);
    }
}
