//! Buffered bucket writes.

use crate::{error::DatabaseError, tables::Table, tx::TxMut};

/// Default soft limit of pending operations before a flush.
pub const DEFAULT_BATCH_LIMIT: usize = 10_000;

/// Buffers `put`s against one bucket and writes them key-sorted once the
/// soft pending-operation limit is hit, or at [`Batch::flush`].
///
/// Sorted insertion keeps MDBX page splits to a minimum on bulk loads.
pub struct Batch<'a, 'env, T: Table> {
    tx: &'a TxMut<'env>,
    pending: Vec<(T::Key, T::Value)>,
    limit: usize,
}

impl<'a, 'env, T: Table> std::fmt::Debug for Batch<'a, 'env, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("table", &T::NAME)
            .field("pending", &self.pending.len())
            .field("limit", &self.limit)
            .finish()
    }
}

impl<'a, 'env, T: Table> Batch<'a, 'env, T> {
    /// New batch with the default limit.
    pub fn new(tx: &'a TxMut<'env>) -> Self {
        Self::with_limit(tx, DEFAULT_BATCH_LIMIT)
    }

    /// New batch flushing after `limit` pending operations.
    pub fn with_limit(tx: &'a TxMut<'env>, limit: usize) -> Self {
        Self { tx, pending: Vec::new(), limit: limit.max(1) }
    }

    /// Queues a put, flushing if the soft limit is reached.
    pub fn put(&mut self, key: T::Key, value: T::Value) -> Result<(), DatabaseError> {
        self.pending.push((key, value));
        if self.pending.len() >= self.limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes out everything queued.
    pub fn flush(&mut self) -> Result<(), DatabaseError> {
        self.pending.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in self.pending.drain(..) {
            self.tx.put::<T>(key, value)?;
        }
        Ok(())
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tables, test_utils::create_test_db};
    use alloy_primitives::B256;

    #[test]
    fn batch_flushes_at_limit() {
        let (env, _dir) = create_test_db();
        let tx = env.tx_mut().unwrap();
        {
            let mut batch = Batch::<tables::HeaderCanonical>::with_limit(&tx, 2);
            batch.put(2, B256::with_last_byte(2)).unwrap();
            assert_eq!(batch.pending(), 1);
            // second put crosses the limit and flushes
            batch.put(1, B256::with_last_byte(1)).unwrap();
            assert_eq!(batch.pending(), 0);
            batch.put(3, B256::with_last_byte(3)).unwrap();
            batch.flush().unwrap();
        }
        tx.commit().unwrap();

        let stored = env.view(|tx| tx.get::<tables::HeaderCanonical>(1)).unwrap();
        assert_eq!(stored, Some(B256::with_last_byte(1)));
    }
}
