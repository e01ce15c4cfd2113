//! Point-in-time reads against written change-sets.

use aura_db::test_utils::create_test_db;
use aura_primitives::{Address, StateAccount, B256, U256};
use aura_state::{
    HistoryStateReader, IntraBlockState, PlainStateReader, PlainStateWriter, StateReader,
};

fn addr(byte: u8) -> Address {
    Address::new([byte; 20])
}

fn slot(byte: u8) -> B256 {
    B256::with_last_byte(byte)
}

/// Commits one block that credits `address` and writes `slot_value` into
/// slot 1, anchored on the current plain state.
fn commit_block(
    env: &aura_db::DatabaseEnv,
    block_number: u64,
    address: Address,
    credit: u64,
    slot_value: u64,
) {
    let tx = env.tx_mut().unwrap();
    let root = {
        let reader = PlainStateReader::new(&tx);
        let mut state = IntraBlockState::new(&reader);
        state.add_balance(address, U256::from(credit)).unwrap();
        state.set_state(address, slot(1), U256::from(slot_value)).unwrap();
        state.finalize(true);
        let mut writer = PlainStateWriter::new(&tx, block_number, B256::ZERO);
        state.commit_block(&mut writer).unwrap()
    };
    assert_ne!(root, B256::ZERO);
    tx.commit().unwrap();
}

#[test]
fn history_reader_returns_pre_and_post_images() {
    let (env, _dir) = create_test_db();
    let address = addr(0x5a);

    commit_block(&env, 10, address, 100, 7);
    commit_block(&env, 11, address, 50, 9);

    let tx = env.tx().unwrap();

    // end of block 9: nothing yet
    let before = HistoryStateReader::new(&tx, 10);
    assert_eq!(before.read_account(address).unwrap(), None);
    assert_eq!(before.read_storage(address, 0, slot(1)).unwrap(), None);

    // end of block 10: first write visible (the pre-image of block 11)
    let at_ten = HistoryStateReader::new(&tx, 11);
    let account = at_ten.read_account(address).unwrap().unwrap();
    assert_eq!(account.balance, U256::from(100u64));
    assert_eq!(at_ten.read_storage(address, 0, slot(1)).unwrap(), Some(U256::from(7u64)));

    // end of block 11 and beyond: falls through to the plain state
    let at_eleven = HistoryStateReader::new(&tx, 12);
    let account = at_eleven.read_account(address).unwrap().unwrap();
    assert_eq!(account.balance, U256::from(150u64));
    assert_eq!(at_eleven.read_storage(address, 0, slot(1)).unwrap(), Some(U256::from(9u64)));

    // the plain reader agrees with the latest anchor
    let plain = PlainStateReader::new(&tx);
    assert_eq!(plain.read_account(address).unwrap(), at_eleven.read_account(address).unwrap());
}

#[test]
fn incarnation_bump_hides_old_slots_but_history_still_sees_them() {
    let (env, _dir) = create_test_db();
    let address = addr(0x77);

    // block 1: a contract at incarnation 1 writes slot 1
    {
        let tx = env.tx_mut().unwrap();
        let root = {
            let reader = PlainStateReader::new(&tx);
            let mut state = IntraBlockState::new(&reader);
            state.create_account(address, true).unwrap();
            state.set_state(address, slot(1), U256::from(41u64)).unwrap();
            state.finalize(true);
            let mut writer = PlainStateWriter::new(&tx, 1, B256::ZERO);
            state.commit_block(&mut writer).unwrap()
        };
        assert_ne!(root, B256::ZERO);
        tx.commit().unwrap();
    }

    // block 2: destroy and re-create; the new incarnation starts empty
    {
        let tx = env.tx_mut().unwrap();
        {
            let reader = PlainStateReader::new(&tx);
            let mut state = IntraBlockState::new(&reader);
            state.self_destruct(address).unwrap();
            state.finalize(true);
            let mut writer = PlainStateWriter::new(&tx, 2, B256::ZERO);
            state.commit_block(&mut writer).unwrap();
        }
        tx.commit().unwrap();
    }

    let tx = env.tx().unwrap();
    let plain = PlainStateReader::new(&tx);

    // account is gone at tip, incarnation map remembers generation 1
    assert_eq!(plain.read_account(address).unwrap(), None);
    assert_eq!(plain.read_incarnation(address).unwrap(), 1);

    // history at end of block 1 still sees the account and its slot
    let at_one = HistoryStateReader::at_end_of(&tx, 1);
    let account = at_one.read_account(address).unwrap().unwrap();
    assert_eq!(account.incarnation, 1);
    assert_eq!(at_one.read_storage(address, 1, slot(1)).unwrap(), Some(U256::from(41u64)));
}

#[test]
fn change_sets_store_account_pre_images() {
    let (env, _dir) = create_test_db();
    let address = addr(0x01);
    commit_block(&env, 5, address, 10, 1);
    commit_block(&env, 6, address, 10, 2);

    let tx = env.tx().unwrap();
    // block 5 created the account: empty pre-image
    assert_eq!(aura_state::account_pre_image(&tx, 5, address).unwrap(), Some(Vec::new()));
    // block 6 saw the state block 5 left behind
    let pre = aura_state::account_pre_image(&tx, 6, address).unwrap().unwrap();
    let account = StateAccount::decode_for_storage(&pre).unwrap();
    assert_eq!(account.balance, U256::from(10u64));
}
