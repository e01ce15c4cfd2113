use aura_db::DatabaseError;

/// State layer failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum StateError {
    /// Underlying store failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A history bitmap points at a change-set entry that does not exist.
    #[error("change-set entry missing for block {block_number}")]
    ChangeSetGap {
        /// Block the bitmap claims a change happened in.
        block_number: u64,
    },

    /// A stored value failed to decode.
    #[error("corrupt state entry: {0}")]
    Corrupt(String),
}

impl StateError {
    pub(crate) fn corrupt(reason: impl ToString) -> Self {
        Self::Corrupt(reason.to_string())
    }
}
