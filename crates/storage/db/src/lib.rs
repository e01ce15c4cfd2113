//! Transactional bucketed key-value store.
//!
//! A thin typed layer over MDBX: a fixed [`tables`] catalog, read-only and
//! read-write [`Tx`] transactions, ordered [`Cursor`] iteration and a
//! batching writer. Bucket access discipline (which subsystem writes which
//! bucket) is a code-review contract, not enforced at runtime.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod batch;
mod cursor;
mod env;
mod error;
pub mod models;
pub mod tables;
mod tx;
mod version;

pub use batch::Batch;
pub use cursor::{Cursor, DupWalker, Walker};
pub use env::{DatabaseEnv, EnvKind};
pub use error::DatabaseError;
pub use tables::{Decode, Encode, Table, TABLES};
pub use tx::{Tx, TxMut, TxRo};
pub use version::{ensure_schema_version, SCHEMA_VERSION};

/// Collection of database test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::{DatabaseEnv, EnvKind};

    /// Error during database creation.
    pub const ERROR_DB_CREATION: &str = "could not create the mdbx file";
    /// Error during tempdir creation.
    pub const ERROR_TEMPDIR: &str = "could not create a temporary directory";

    /// Creates a fresh read-write database in a temporary directory, which
    /// lives as long as the returned guard.
    pub fn create_test_db() -> (DatabaseEnv, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect(ERROR_TEMPDIR);
        let env = DatabaseEnv::open(dir.path(), EnvKind::RW).expect(ERROR_DB_CREATION);
        (env, dir)
    }
}
