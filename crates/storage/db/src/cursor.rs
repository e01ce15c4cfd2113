//! Typed cursor over a bucket.

use crate::{
    error::DatabaseError,
    tables::{Decode, Encode, Table},
};
use libmdbx::{TransactionKind, WriteFlags, RW};
use std::marker::PhantomData;

/// A `(key, value)` pair result coming from a cursor.
pub type PairResult<T> =
    Result<Option<(<T as Table>::Key, <T as Table>::Value)>, DatabaseError>;

/// Marker for buckets holding sorted duplicate values per key.
pub trait DupSort: Table {}

impl DupSort for crate::tables::AccountChangeSet {}
impl DupSort for crate::tables::StorageChangeSet {}

/// Ordered cursor over bucket `T`.
#[derive(Debug)]
pub struct Cursor<'tx, K: TransactionKind, T: Table> {
    inner: libmdbx::Cursor<'tx, K>,
    _marker: PhantomData<T>,
}

fn decode_pair<T: Table>(
    raw: Option<(Vec<u8>, Vec<u8>)>,
) -> Result<Option<(T::Key, T::Value)>, DatabaseError> {
    raw.map(|(key, value)| Ok((T::Key::decode(&key)?, T::Value::decode(&value)?))).transpose()
}

impl<'tx, K: TransactionKind, T: Table> Cursor<'tx, K, T> {
    pub(crate) const fn new(inner: libmdbx::Cursor<'tx, K>) -> Self {
        Self { inner, _marker: PhantomData }
    }

    /// First entry of the bucket.
    pub fn first(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.first().map_err(DatabaseError::from_mdbx)?)
    }

    /// First entry with a key greater or equal to `key`.
    pub fn seek(&mut self, key: T::Key) -> PairResult<T> {
        self.seek_raw(key.encode().as_ref())
    }

    /// First entry with a key greater or equal to the raw `prefix` bytes.
    /// Used for prefix scans over composite keys.
    pub fn seek_raw(&mut self, prefix: &[u8]) -> PairResult<T> {
        decode_pair::<T>(self.inner.set_range(prefix).map_err(DatabaseError::from_mdbx)?)
    }

    /// Entry at exactly `key`.
    pub fn seek_exact(&mut self, key: T::Key) -> PairResult<T> {
        decode_pair::<T>(
            self.inner.set_key(key.encode().as_ref()).map_err(DatabaseError::from_mdbx)?,
        )
    }

    /// Next entry in key order.
    pub fn next(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.next().map_err(DatabaseError::from_mdbx)?)
    }

    /// Previous entry in key order.
    pub fn prev(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.prev().map_err(DatabaseError::from_mdbx)?)
    }

    /// Last entry of the bucket.
    pub fn last(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.last().map_err(DatabaseError::from_mdbx)?)
    }

    /// Entry under the cursor.
    pub fn current(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.get_current().map_err(DatabaseError::from_mdbx)?)
    }

    /// Iterator from `start` (or the first key) to the end of the bucket.
    pub fn walk(&mut self, start: Option<T::Key>) -> Result<Walker<'_, 'tx, K, T>, DatabaseError> {
        let first = match start {
            Some(key) => self.seek(key)?,
            None => self.first()?,
        };
        Ok(Walker { cursor: self, next: first, started: false })
    }
}

impl<'tx, K: TransactionKind, T: DupSort> Cursor<'tx, K, T> {
    /// Positions at `key` and returns the first dup value whose bytes are
    /// greater or equal to `subkey`.
    pub fn seek_by_key_subkey(
        &mut self,
        key: T::Key,
        subkey: &[u8],
    ) -> Result<Option<T::Value>, DatabaseError> {
        let raw: Option<Vec<u8>> = self
            .inner
            .get_both_range(key.encode().as_ref(), subkey)
            .map_err(DatabaseError::from_mdbx)?;
        raw.map(|value| T::Value::decode(&value)).transpose()
    }

    /// Next duplicate value of the current key.
    pub fn next_dup(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.next_dup().map_err(DatabaseError::from_mdbx)?)
    }

    /// Next entry, skipping remaining duplicates of the current key.
    pub fn next_no_dup(&mut self) -> PairResult<T> {
        decode_pair::<T>(self.inner.next_nodup().map_err(DatabaseError::from_mdbx)?)
    }

    /// Iterator over all dup values stored under `key`.
    pub fn walk_dup(
        &mut self,
        key: T::Key,
    ) -> Result<DupWalker<'_, 'tx, K, T>, DatabaseError> {
        let first = self.seek_exact(key)?;
        Ok(DupWalker { cursor: self, next: first.map(|(_, value)| value) })
    }
}

impl<'tx, T: Table> Cursor<'tx, RW, T> {
    /// Inserts or overwrites under the cursor.
    pub fn upsert(&mut self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.inner
            .put(key.encode().as_ref(), value.encode().as_ref(), WriteFlags::UPSERT)
            .map_err(DatabaseError::from_mdbx)
    }

    /// Appends at the end of the bucket; keys must arrive in order.
    pub fn append(&mut self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.inner
            .put(key.encode().as_ref(), value.encode().as_ref(), WriteFlags::APPEND)
            .map_err(DatabaseError::from_mdbx)
    }

    /// Deletes the entry under the cursor.
    pub fn delete_current(&mut self) -> Result<(), DatabaseError> {
        self.inner.del(WriteFlags::CURRENT).map_err(DatabaseError::from_mdbx)
    }
}

impl<'tx, T: DupSort> Cursor<'tx, RW, T> {
    /// Appends a dup value under `key`; dup values must arrive in order.
    pub fn append_dup(&mut self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.inner
            .put(key.encode().as_ref(), value.encode().as_ref(), WriteFlags::APPEND_DUP)
            .map_err(DatabaseError::from_mdbx)
    }

    /// Deletes all dup values of the current key.
    pub fn delete_current_duplicates(&mut self) -> Result<(), DatabaseError> {
        self.inner.del(WriteFlags::NO_DUP_DATA).map_err(DatabaseError::from_mdbx)
    }
}

/// Forward iterator over `(key, value)` pairs.
#[derive(Debug)]
pub struct Walker<'cursor, 'tx, K: TransactionKind, T: Table> {
    cursor: &'cursor mut Cursor<'tx, K, T>,
    next: Option<(T::Key, T::Value)>,
    started: bool,
}

impl<'cursor, 'tx, K: TransactionKind, T: Table> Iterator for Walker<'cursor, 'tx, K, T> {
    type Item = Result<(T::Key, T::Value), DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            match self.cursor.next() {
                Ok(pair) => self.next = pair,
                Err(err) => return Some(Err(err)),
            }
        }
        self.started = true;
        self.next.take().map(Ok)
    }
}

/// Forward iterator over the dup values of one key.
#[derive(Debug)]
pub struct DupWalker<'cursor, 'tx, K: TransactionKind, T: DupSort> {
    cursor: &'cursor mut Cursor<'tx, K, T>,
    next: Option<T::Value>,
}

impl<'cursor, 'tx, K: TransactionKind, T: DupSort> Iterator for DupWalker<'cursor, 'tx, K, T> {
    type Item = Result<T::Value, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        match self.cursor.next_dup() {
            Ok(pair) => self.next = pair.map(|(_, value)| value),
            Err(err) => {
                self.next = None;
                return Some(Err(err));
            }
        }
        Some(Ok(current))
    }
}

#[cfg(test)]
mod tests {
    use crate::{tables, test_utils::create_test_db};

    #[test]
    fn walk_visits_keys_in_order() {
        let (env, _dir) = create_test_db();
        env.update(|tx| {
            for number in [5u64, 1, 3] {
                tx.put::<tables::HeaderCanonical>(
                    number,
                    alloy_primitives::B256::with_last_byte(number as u8),
                )?;
            }
            Ok(())
        })
        .unwrap();

        let tx = env.tx().unwrap();
        let mut cursor = tx.cursor::<tables::HeaderCanonical>().unwrap();
        let keys: Vec<u64> = cursor
            .walk(None)
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn dup_values_share_a_key() {
        let (env, _dir) = create_test_db();
        env.update(|tx| {
            let mut cursor = tx.cursor::<tables::AccountChangeSet>()?;
            cursor.append_dup(7, vec![0x01, 0xaa])?;
            cursor.append_dup(7, vec![0x02, 0xbb])?;
            cursor.append_dup(9, vec![0x03, 0xcc])?;
            Ok(())
        })
        .unwrap();

        let tx = env.tx().unwrap();
        let mut cursor = tx.cursor::<tables::AccountChangeSet>().unwrap();
        let values: Vec<Vec<u8>> =
            cursor.walk_dup(7).unwrap().map(|value| value.unwrap()).collect();
        assert_eq!(values, vec![vec![0x01, 0xaa], vec![0x02, 0xbb]]);

        // subkey seek lands on the first dup >= prefix
        let hit = cursor.seek_by_key_subkey(7, &[0x02]).unwrap();
        assert_eq!(hit, Some(vec![0x02, 0xbb]));
    }
}
