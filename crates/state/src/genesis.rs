//! Genesis initialization.

use crate::{
    chain::ChainWriter,
    error::StateError,
    intra_block_state::IntraBlockState,
    reader::StateReader,
    writer::PlainStateWriter,
};
use aura_chainspec::ChainSpec;
use aura_db::{ensure_schema_version, tables, DatabaseEnv};
use aura_primitives::{Address, Bytes, SealedHeader, StateAccount, B256, U256};
use tracing::info;

const GENESIS_HASH_KEY: &str = "genesis_hash";
const CHAIN_CONFIG_KEY: &str = "genesis";

/// Reader over nothing: genesis state is built on an empty world.
#[derive(Debug, Default)]
struct EmptyReader;

impl StateReader for EmptyReader {
    fn read_account(&self, _address: Address) -> Result<Option<StateAccount>, StateError> {
        Ok(None)
    }

    fn read_storage(
        &self,
        _address: Address,
        _incarnation: u16,
        _slot: B256,
    ) -> Result<Option<U256>, StateError> {
        Ok(None)
    }

    fn read_code(
        &self,
        _address: Address,
        _incarnation: u16,
        _code_hash: B256,
    ) -> Result<Option<Bytes>, StateError> {
        Ok(None)
    }

    fn read_incarnation(&self, _address: Address) -> Result<u16, StateError> {
        Ok(0)
    }
}

/// Writes the genesis block and its state if the store is fresh; verifies
/// compatibility and returns the stored genesis header otherwise.
pub fn init_genesis(env: &DatabaseEnv, spec: &ChainSpec) -> Result<SealedHeader, StateError> {
    let tx = env.tx_mut()?;
    ensure_schema_version(&tx)?;

    if let Some(raw) = tx.get::<tables::DatabaseInfo>(GENESIS_HASH_KEY.to_string())? {
        let stored_hash = B256::try_from(raw.as_slice())
            .map_err(|_| StateError::corrupt("malformed stored genesis hash"))?;
        let reader = crate::chain::ChainReader::new(&tx);
        let header = reader
            .header_by_number(0)?
            .ok_or_else(|| StateError::corrupt("genesis hash present but header missing"))?;
        if header.hash() != stored_hash {
            return Err(StateError::corrupt("canonical genesis does not match stored hash"));
        }
        tx.commit()?;
        return Ok(header);
    }

    // build the allocation on an empty world
    let reader = EmptyReader;
    let mut state = IntraBlockState::new(&reader);
    for (address, account) in &spec.genesis.alloc {
        state.add_balance(*address, account.balance)?;
        if let Some(nonce) = account.nonce {
            state.set_nonce(*address, nonce)?;
        }
        if let Some(code) = &account.code {
            if !code.is_empty() {
                state.create_account(*address, true)?;
                state.set_balance(*address, account.balance)?;
                if let Some(nonce) = account.nonce {
                    state.set_nonce(*address, nonce)?;
                }
                state.set_code(*address, code.clone())?;
            }
        }
        if let Some(storage) = &account.storage {
            for (slot, value) in storage {
                state.set_state(*address, *slot, U256::from_be_bytes(value.0))?;
            }
        }
    }
    state.finalize(false);

    let mut writer = PlainStateWriter::new(&tx, 0, B256::ZERO);
    let state_root = state.commit_block(&mut writer)?;

    let header = spec.genesis_header(state_root);
    let sealed = SealedHeader::seal_slow(header);

    let chain = ChainWriter::new(&tx);
    chain.write_block(
        &sealed,
        &aura_primitives::BlockBody {
            transactions: vec![],
            withdrawals: spec
                .is_shanghai_active_at_timestamp(spec.genesis.timestamp)
                .then(Vec::new),
        },
        &[],
        sealed.difficulty,
    )?;
    chain.write_receipts(0, &[])?;

    tx.put::<tables::DatabaseInfo>(
        GENESIS_HASH_KEY.to_string(),
        sealed.hash().as_slice().to_vec(),
    )?;
    tx.put::<tables::ChainConfig>(
        CHAIN_CONFIG_KEY.to_string(),
        serde_json::to_vec(&spec.genesis).map_err(StateError::corrupt)?,
    )?;

    tx.commit()?;
    info!(target: "state", chain = spec.chain.name(), hash = %sealed.hash(), "genesis initialized");
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{history::HistoryStateReader, reader::PlainStateReader};
    use aura_chainspec::MAINNET;
    use aura_db::test_utils::create_test_db;

    #[test]
    fn genesis_is_written_once_and_stable() {
        let (env, _dir) = create_test_db();
        let first = init_genesis(&env, &MAINNET).unwrap();
        let second = init_genesis(&env, &MAINNET).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.number(), 0);

        // alloc visible through the plain reader
        let tx = env.tx().unwrap();
        let reader = PlainStateReader::new(&tx);
        let (treasury, expected) = {
            let (address, account) = MAINNET.genesis.alloc.iter().next().unwrap();
            (*address, account.balance)
        };
        let account = reader.read_account(treasury).unwrap().unwrap();
        assert_eq!(account.balance, expected);

        // and through the historical reader anchored after genesis
        let history = HistoryStateReader::at_end_of(&tx, 0);
        let account = history.read_account(treasury).unwrap().unwrap();
        assert_eq!(account.balance, expected);
    }
}
