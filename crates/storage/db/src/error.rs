/// Database failure taxonomy.
///
/// `Conflict` on commit means the whole unit of work should be retried;
/// `DiskFull` is terminal and shuts the node down cleanly.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DatabaseError {
    /// A required entry is absent. Point reads return `Option` instead;
    /// this surfaces only at boundaries that cannot proceed without the
    /// value.
    #[error("not found in table {table}")]
    NotFound {
        /// Table the lookup targeted.
        table: &'static str,
    },

    /// A write was attempted through a read-only environment.
    #[error("database is opened read-only")]
    ReadOnly,

    /// The transaction lost a write race and must be retried.
    #[error("transaction conflict")]
    Conflict,

    /// The database geometry is exhausted.
    #[error("database is full")]
    DiskFull,

    /// A stored value failed to decode.
    #[error("failed to decode value in table {table}: {reason}")]
    Decode {
        /// Table the value came from.
        table: &'static str,
        /// Human-readable cause.
        reason: String,
    },

    /// The on-disk schema version does not match this binary.
    #[error("incompatible schema version: found {found}, expected {expected}")]
    SchemaVersion {
        /// Version found in the store.
        found: u64,
        /// Version this binary writes.
        expected: u64,
    },

    /// Any other engine-level failure.
    #[error("database error: {0}")]
    Internal(String),
}

impl DatabaseError {
    pub(crate) fn from_mdbx(err: libmdbx::Error) -> Self {
        match err {
            libmdbx::Error::MapFull => Self::DiskFull,
            libmdbx::Error::Busy => Self::Conflict,
            other => Self::Internal(other.to_string()),
        }
    }

    pub(crate) fn decode(table: &'static str, reason: impl ToString) -> Self {
        Self::Decode { table, reason: reason.to_string() }
    }
}
