use crate::error::StateError;
use aura_db::{
    tables,
    tables::PlainStorageKey,
    Tx,
};
use aura_primitives::{Address, Bytes, StateAccount, B256, U256};
use libmdbx::TransactionKind;

/// Uniform read access to world state.
///
/// Both the tip reader and the historical reader satisfy this contract;
/// absence is `Ok(None)`, errors are reserved for store failures.
pub trait StateReader {
    /// The account record, if the account exists.
    fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError>;

    /// A storage slot of the given account generation. `None` when unset.
    fn read_storage(
        &self,
        address: Address,
        incarnation: u16,
        slot: B256,
    ) -> Result<Option<U256>, StateError>;

    /// Contract code by hash. Content-addressed, so identical for every
    /// reader.
    fn read_code(
        &self,
        address: Address,
        incarnation: u16,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError>;

    /// Code size without copying the code out.
    fn read_code_size(
        &self,
        address: Address,
        incarnation: u16,
        code_hash: B256,
    ) -> Result<Option<usize>, StateError> {
        Ok(self.read_code(address, incarnation, code_hash)?.map(|code| code.len()))
    }

    /// Latest incarnation ever used at `address`; 0 if never a contract.
    fn read_incarnation(&self, address: Address) -> Result<u16, StateError>;
}

/// Point lookups into the plain buckets at the current tip.
#[derive(Debug)]
pub struct PlainStateReader<'tx, K: TransactionKind> {
    tx: &'tx Tx<'tx, K>,
}

impl<'tx, K: TransactionKind> PlainStateReader<'tx, K> {
    /// Reader over the given transaction's snapshot.
    pub const fn new(tx: &'tx Tx<'tx, K>) -> Self {
        Self { tx }
    }
}

impl<'tx, K: TransactionKind> StateReader for PlainStateReader<'tx, K> {
    fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError> {
        Ok(self.tx.get::<tables::PlainAccount>(address)?)
    }

    fn read_storage(
        &self,
        address: Address,
        incarnation: u16,
        slot: B256,
    ) -> Result<Option<U256>, StateError> {
        Ok(self.tx.get::<tables::PlainStorage>(PlainStorageKey { address, incarnation, slot })?)
    }

    fn read_code(
        &self,
        _address: Address,
        _incarnation: u16,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError> {
        if code_hash == aura_primitives::constants::KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(None);
        }
        Ok(self.tx.get::<tables::Code>(code_hash)?)
    }

    fn read_incarnation(&self, address: Address) -> Result<u16, StateError> {
        if let Some(incarnation) = self.tx.get::<tables::IncarnationMap>(address)? {
            return Ok(incarnation);
        }
        Ok(self.read_account(address)?.map(|account| account.incarnation).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_db::test_utils::create_test_db;
    use aura_primitives::keccak256;

    #[test]
    fn plain_reader_hits_plain_buckets() {
        let (env, _dir) = create_test_db();
        let address = Address::new([0xaa; 20]);
        let slot = B256::with_last_byte(1);
        let code = Bytes::from_static(&[0x60, 0x01]);
        let code_hash = keccak256(&code);
        let account =
            StateAccount { nonce: 1, balance: U256::from(100u64), incarnation: 1, code_hash };

        env.update(|tx| {
            tx.put::<tables::PlainAccount>(address, account)?;
            tx.put::<tables::PlainStorage>(
                PlainStorageKey { address, incarnation: 1, slot },
                U256::from(42u64),
            )?;
            tx.put::<tables::Code>(code_hash, code.clone())?;
            Ok(())
        })
        .unwrap();

        let tx = env.tx().unwrap();
        let reader = PlainStateReader::new(&tx);
        assert_eq!(reader.read_account(address).unwrap(), Some(account));
        assert_eq!(reader.read_storage(address, 1, slot).unwrap(), Some(U256::from(42u64)));
        // wrong incarnation sees nothing
        assert_eq!(reader.read_storage(address, 2, slot).unwrap(), None);
        assert_eq!(reader.read_code(address, 1, code_hash).unwrap(), Some(code));
        assert_eq!(reader.read_code_size(address, 1, code_hash).unwrap(), Some(2));
        assert_eq!(reader.read_incarnation(address).unwrap(), 1);
        // absent account
        assert_eq!(reader.read_account(Address::ZERO).unwrap(), None);
    }
}
