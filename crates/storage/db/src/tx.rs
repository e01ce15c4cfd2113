//! Typed transaction wrapper.

use crate::{
    cursor::Cursor,
    error::DatabaseError,
    tables::{self, Decode, Encode, Table},
};
use libmdbx::{Database, NoWriteMap, Transaction, TransactionKind, WriteFlags, RO, RW};

/// A typed MDBX transaction. `RO` transactions see a consistent snapshot
/// and never block the writer; the `RW` transaction is exclusive.
#[derive(Debug)]
pub struct Tx<'env, K: TransactionKind> {
    inner: Transaction<'env, K, NoWriteMap>,
}

/// Read-only transaction.
pub type TxRo<'env> = Tx<'env, RO>;
/// Read-write transaction.
pub type TxMut<'env> = Tx<'env, RW>;

impl<'env, K: TransactionKind> Tx<'env, K> {
    pub(crate) const fn new(inner: Transaction<'env, K, NoWriteMap>) -> Self {
        Self { inner }
    }

    fn db<T: Table>(&self) -> Result<Database<'_>, DatabaseError> {
        self.inner.open_db(Some(T::NAME)).map_err(DatabaseError::from_mdbx)
    }

    /// Point lookup. Absence is `Ok(None)`.
    pub fn get<T: Table>(&self, key: T::Key) -> Result<Option<T::Value>, DatabaseError> {
        let db = self.db::<T>()?;
        let raw: Option<Vec<u8>> = self
            .inner
            .get(&db, key.encode().as_ref())
            .map_err(DatabaseError::from_mdbx)?;
        raw.map(|bytes| T::Value::decode(&bytes)).transpose()
    }

    /// Point lookup that treats absence as an error.
    pub fn require<T: Table>(&self, key: T::Key) -> Result<T::Value, DatabaseError> {
        self.get::<T>(key)?.ok_or(DatabaseError::NotFound { table: T::NAME })
    }

    /// Opens an ordered cursor over the bucket.
    pub fn cursor<T: Table>(&self) -> Result<Cursor<'_, K, T>, DatabaseError> {
        let db = self.db::<T>()?;
        Ok(Cursor::new(self.inner.cursor(&db).map_err(DatabaseError::from_mdbx)?))
    }

    /// Commits the transaction.
    pub fn commit(self) -> Result<bool, DatabaseError> {
        self.inner.commit().map_err(DatabaseError::from_mdbx)
    }
}

impl<'env> Tx<'env, RW> {
    /// Inserts or overwrites `key`.
    pub fn put<T: Table>(&self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        let db = self.db::<T>()?;
        self.inner
            .put(&db, key.encode().as_ref(), value.encode().as_ref(), WriteFlags::UPSERT)
            .map_err(DatabaseError::from_mdbx)
    }

    /// Deletes `key`. For dup-sort buckets, a `value` restricts the delete
    /// to that exact pair. Returns whether anything was removed.
    pub fn delete<T: Table>(
        &self,
        key: T::Key,
        value: Option<T::Value>,
    ) -> Result<bool, DatabaseError> {
        let db = self.db::<T>()?;
        let value = value.map(Encode::encode);
        self.inner
            .del(&db, key.encode().as_ref(), value.as_ref().map(|v| v.as_ref()))
            .map_err(DatabaseError::from_mdbx)
    }

    /// Removes every entry of the bucket.
    pub fn clear<T: Table>(&self) -> Result<(), DatabaseError> {
        let db = self.db::<T>()?;
        self.inner.clear_db(&db).map_err(DatabaseError::from_mdbx)
    }

    /// Bumps the named monotonic counter by `amount`, returning the first
    /// value of the reserved range.
    pub fn increment_sequence(&self, name: &str, amount: u64) -> Result<u64, DatabaseError> {
        let current = self.get::<tables::Sequence>(name.to_string())?.unwrap_or(0);
        self.put::<tables::Sequence>(name.to_string(), current + amount)?;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use crate::{tables, test_utils::create_test_db};
    use alloy_primitives::{Address, B256};
    use aura_primitives::StateAccount;

    #[test]
    fn require_maps_absence_to_not_found() {
        let (env, _dir) = create_test_db();
        let tx = env.tx().unwrap();
        let err = tx.require::<tables::HeaderNumber>(B256::ZERO).unwrap_err();
        assert_eq!(err, crate::DatabaseError::NotFound { table: "HeaderNumber" });
    }

    #[test]
    fn sequence_reserves_ranges() {
        let (env, _dir) = create_test_db();
        env.update(|tx| {
            assert_eq!(tx.increment_sequence("tx", 3).unwrap(), 0);
            assert_eq!(tx.increment_sequence("tx", 2).unwrap(), 3);
            assert_eq!(tx.increment_sequence("other", 1).unwrap(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn typed_account_roundtrip() {
        let (env, _dir) = create_test_db();
        let address = Address::new([3u8; 20]);
        let account = StateAccount { nonce: 9, ..Default::default() };
        env.update(|tx| tx.put::<tables::PlainAccount>(address, account)).unwrap();
        assert_eq!(env.view(|tx| tx.get::<tables::PlainAccount>(address)).unwrap(), Some(account));

        // delete is visible in later transactions
        env.update(|tx| tx.delete::<tables::PlainAccount>(address, None).map(|_| ())).unwrap();
        assert_eq!(env.view(|tx| tx.get::<tables::PlainAccount>(address)).unwrap(), None);
    }
}
