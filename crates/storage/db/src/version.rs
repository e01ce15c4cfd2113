//! Schema version gate.

use crate::{error::DatabaseError, tables, tx::TxMut};

/// Schema version this binary reads and writes.
pub const SCHEMA_VERSION: u64 = 1;

const VERSION_KEY: &str = "schema_version";

/// Stamps a fresh store, or refuses to proceed when the store was written
/// by an incompatible schema.
pub fn ensure_schema_version(tx: &TxMut<'_>) -> Result<(), DatabaseError> {
    match tx.get::<tables::DatabaseInfo>(VERSION_KEY.to_string())? {
        None => {
            tx.put::<tables::DatabaseInfo>(
                VERSION_KEY.to_string(),
                SCHEMA_VERSION.to_be_bytes().to_vec(),
            )?;
            Ok(())
        }
        Some(raw) => {
            let found = raw
                .try_into()
                .map(u64::from_be_bytes)
                .map_err(|_| DatabaseError::decode("DatabaseInfo", "malformed schema version"))?;
            if found == SCHEMA_VERSION {
                Ok(())
            } else {
                Err(DatabaseError::SchemaVersion { found, expected: SCHEMA_VERSION })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[test]
    fn fresh_store_is_stamped() {
        let (env, _dir) = create_test_db();
        env.update(|tx| ensure_schema_version(tx)).unwrap();
        // idempotent on reopen
        env.update(|tx| ensure_schema_version(tx)).unwrap();
    }

    #[test]
    fn incompatible_version_refuses_to_open() {
        let (env, _dir) = create_test_db();
        env.update(|tx| {
            tx.put::<tables::DatabaseInfo>(
                VERSION_KEY.to_string(),
                99u64.to_be_bytes().to_vec(),
            )
        })
        .unwrap();
        let err = env.update(|tx| ensure_schema_version(tx)).unwrap_err();
        assert_eq!(err, DatabaseError::SchemaVersion { found: 99, expected: SCHEMA_VERSION });
    }
}
