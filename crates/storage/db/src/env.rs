//! MDBX environment wrapper.

use crate::{
    error::DatabaseError,
    tables::TABLES,
    tx::{TxMut, TxRo},
};
use libmdbx::{
    DatabaseFlags, Environment, EnvironmentFlags, Geometry, Mode, NoWriteMap, PageSize, SyncMode,
};
use std::path::Path;
use tracing::debug;

const GIGABYTE: usize = 1024 * 1024 * 1024;
const TERABYTE: usize = GIGABYTE * 1024;

/// Environment open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    /// Read-only environment; write transactions are refused locally.
    RO,
    /// Read-write environment.
    RW,
}

/// The store: an MDBX environment plus the bucket catalog.
#[derive(Debug)]
pub struct DatabaseEnv {
    inner: Environment<NoWriteMap>,
    kind: EnvKind,
}

impl DatabaseEnv {
    /// Opens (creating if needed) the environment at `path` and ensures all
    /// catalog buckets exist.
    pub fn open(path: &Path, kind: EnvKind) -> Result<Self, DatabaseError> {
        let mode = match kind {
            EnvKind::RO => Mode::ReadOnly,
            EnvKind::RW => Mode::ReadWrite { sync_mode: SyncMode::Durable },
        };

        let env = Environment::new()
            .set_max_dbs(TABLES.len())
            .set_geometry(Geometry {
                size: Some(0..4 * TERABYTE),
                growth_step: Some(4 * GIGABYTE as isize),
                shrink_threshold: None,
                page_size: Some(PageSize::Set(4096)),
            })
            .set_flags(EnvironmentFlags { mode, no_rdahead: true, coalesce: true, ..Default::default() })
            .open(path)
            .map_err(DatabaseError::from_mdbx)?;

        let this = Self { inner: env, kind };
        if kind == EnvKind::RW {
            this.create_tables()?;
        }
        debug!(target: "db", ?path, ?kind, "opened database");
        Ok(this)
    }

    /// Begins a read-only transaction with snapshot isolation.
    pub fn tx(&self) -> Result<TxRo<'_>, DatabaseError> {
        Ok(TxRo::new(self.inner.begin_ro_txn().map_err(DatabaseError::from_mdbx)?))
    }

    /// Begins the read-write transaction. Single writer; concurrent callers
    /// block until the current writer commits or aborts.
    pub fn tx_mut(&self) -> Result<TxMut<'_>, DatabaseError> {
        if self.kind == EnvKind::RO {
            return Err(DatabaseError::ReadOnly);
        }
        Ok(TxMut::new(self.inner.begin_rw_txn().map_err(DatabaseError::from_mdbx)?))
    }

    /// Runs `f` inside a read-only transaction.
    pub fn view<T>(
        &self,
        f: impl FnOnce(&TxRo<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let tx = self.tx()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs `f` inside a read-write transaction, committing on success.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&TxMut<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let tx = self.tx_mut()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn create_tables(&self) -> Result<(), DatabaseError> {
        let tx = self.inner.begin_rw_txn().map_err(DatabaseError::from_mdbx)?;
        for (name, dup_sort) in TABLES {
            let flags =
                if dup_sort { DatabaseFlags::DUP_SORT } else { DatabaseFlags::default() };
            tx.create_db(Some(name), flags).map_err(DatabaseError::from_mdbx)?;
        }
        tx.commit().map_err(DatabaseError::from_mdbx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        tables,
        tables::{HeaderKey, Table},
        test_utils::create_test_db,
    };
    use alloy_primitives::B256;

    #[test]
    fn open_creates_all_buckets() {
        let (env, _dir) = create_test_db();
        // every bucket must be addressable from a fresh read transaction
        let tx = env.tx().unwrap();
        assert!(tx.get::<tables::PlainAccount>(Default::default()).unwrap().is_none());
        assert!(tx
            .get::<tables::Headers>(HeaderKey { number: 0, hash: B256::ZERO })
            .unwrap()
            .is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (env, _dir) = create_test_db();
        let key = HeaderKey { number: 1, hash: B256::new([1u8; 32]) };
        env.update(|tx| tx.put::<tables::Headers>(key, vec![0xde, 0xad])).unwrap();
        let value = env.view(|tx| tx.get::<tables::Headers>(key)).unwrap();
        assert_eq!(value, Some(vec![0xde, 0xad]));
        assert_eq!(tables::Headers::NAME, "Headers");
    }
}
