//! End-to-end message application over an in-memory state.

use alloy_consensus::TxLegacy;
use aura_chainspec::MAINNET;
use aura_evm::{
    apply_transaction, EmptyBlockHashes, StructLogTracer, TraceConfig,
};
use aura_primitives::{
    constants::{ETH_TO_WEI, GWEI_TO_WEI},
    crypto::address_of,
    transaction::sign_transaction,
    Address, Bytes, Header, StateAccount, TransactionSigned, B256, U256,
};
use aura_state::{IntraBlockState, StateError, StateReader};
use std::collections::HashMap;

#[derive(Default)]
struct TestReader {
    accounts: HashMap<Address, StateAccount>,
}

impl StateReader for TestReader {
    fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError> {
        Ok(self.accounts.get(&address).copied())
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

fn sender_secret() -> B256 {
    B256::new([0x42; 32])
}

fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::from(ETH_TO_WEI)
}

fn test_header() -> Header {
    Header {
        number: 1,
        timestamp: MAINNET.genesis.timestamp + 8,
        gas_limit: 30_000_000,
        base_fee_per_gas: Some(GWEI_TO_WEI),
        beneficiary: Address::new([0xc0; 20]),
        excess_blob_gas: Some(0),
        blob_gas_used: Some(0),
        ..Default::default()
    }
}

fn legacy_transfer(nonce: u64, to: Address, value: U256, gas_limit: u64) -> TransactionSigned {
    sign_transaction(
        TxLegacy {
            chain_id: Some(MAINNET.chain_id),
            nonce,
            gas_price: GWEI_TO_WEI as u128,
            gas_limit,
            to: alloy_primitives::TxKind::Call(to),
            value,
            input: Bytes::new(),
        },
        sender_secret(),
    )
    .unwrap()
}

#[test]
fn simple_transfer_debits_and_credits_exactly() {
    let sender = address_of(sender_secret()).unwrap();
    let recipient = Address::new([0xbb; 20]);

    let mut reader = TestReader::default();
    reader.accounts.insert(sender, StateAccount { balance: eth(2), ..Default::default() });

    let mut state = IntraBlockState::new(&reader);
    let header = test_header();
    let tx = legacy_transfer(0, recipient, eth(1), 21_000);

    let result = apply_transaction(
        &MAINNET,
        &header,
        &mut state,
        &EmptyBlockHashes,
        &tx,
        sender,
        None,
        None,
    )
    .unwrap();

    assert!(result.success);
    assert_eq!(result.gas_used, 21_000);
    assert!(result.logs.is_empty());

    let expected_sender =
        eth(2) - eth(1) - U256::from(21_000u64) * U256::from(GWEI_TO_WEI);
    assert_eq!(state.get_balance(sender).unwrap(), expected_sender);
    assert_eq!(state.get_balance(recipient).unwrap(), eth(1));
    assert_eq!(state.get_nonce(sender).unwrap(), 1);
}

#[test]
fn nonce_mismatch_is_rejected_before_any_state_change() {
    let sender = address_of(sender_secret()).unwrap();
    let mut reader = TestReader::default();
    reader.accounts.insert(sender, StateAccount { balance: eth(2), ..Default::default() });

    let mut state = IntraBlockState::new(&reader);
    let tx = legacy_transfer(5, Address::new([0xbb; 20]), eth(1), 21_000);

    let err = apply_transaction(
        &MAINNET,
        &test_header(),
        &mut state,
        &EmptyBlockHashes,
        &tx,
        sender,
        None,
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("nonce mismatch"));
    assert_eq!(state.get_balance(sender).unwrap(), eth(2));
}

#[test]
fn insufficient_funds_names_the_shortfall() {
    let sender = address_of(sender_secret()).unwrap();
    let mut reader = TestReader::default();
    reader
        .accounts
        .insert(sender, StateAccount { balance: U256::from(1000u64), ..Default::default() });

    let mut state = IntraBlockState::new(&reader);
    let tx = legacy_transfer(0, Address::new([0xbb; 20]), eth(1), 21_000);

    let err = apply_transaction(
        &MAINNET,
        &test_header(),
        &mut state,
        &EmptyBlockHashes,
        &tx,
        sender,
        None,
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("insufficient funds"));
}

/// Init code that deploys `PUSH1 1 PUSH1 0 SSTORE STOP` as runtime code.
fn storing_contract_initcode() -> Bytes {
    Bytes::from_static(&[
        0x65, 0x60, 0x01, 0x60, 0x00, 0x55, 0x00, // PUSH6 <runtime>
        0x60, 0x00, 0x52, // PUSH1 0 MSTORE
        0x60, 0x06, 0x60, 0x1a, 0xf3, // PUSH1 6 PUSH1 26 RETURN
    ])
}

#[test]
fn deploy_then_invoke_stores_a_slot_and_traces() {
    let sender = address_of(sender_secret()).unwrap();
    let mut reader = TestReader::default();
    reader.accounts.insert(sender, StateAccount { balance: eth(10), ..Default::default() });

    let mut state = IntraBlockState::new(&reader);
    let header = test_header();

    // deploy
    let deploy = sign_transaction(
        TxLegacy {
            chain_id: Some(MAINNET.chain_id),
            nonce: 0,
            gas_price: GWEI_TO_WEI as u128,
            gas_limit: 300_000,
            to: alloy_primitives::TxKind::Create,
            value: U256::ZERO,
            input: storing_contract_initcode(),
        },
        sender_secret(),
    )
    .unwrap();

    let result = apply_transaction(
        &MAINNET,
        &header,
        &mut state,
        &EmptyBlockHashes,
        &deploy,
        sender,
        None,
        None,
    )
    .unwrap();
    assert!(result.success, "deployment must succeed");
    let contract = result.contract_address.expect("created address");
    assert_eq!(state.get_nonce(sender).unwrap(), 1);
    assert!(state.get_code_size(contract).unwrap() > 0);
    state.finalize(true);

    // invoke with a struct-log tracer attached
    let invoke = legacy_transfer(1, contract, U256::ZERO, 100_000);
    let mut tracer = StructLogTracer::new(TraceConfig::default());
    let result = apply_transaction(
        &MAINNET,
        &header,
        &mut state,
        &EmptyBlockHashes,
        &invoke,
        sender,
        Some(&mut tracer),
        None,
    )
    .unwrap();
    assert!(result.success);
    assert_eq!(state.get_state(contract, B256::ZERO).unwrap(), U256::from(1u64));

    let logs = tracer.into_logs();
    let ops: Vec<&str> = logs.iter().map(|log| log.op).collect();
    assert!(ops.len() >= 3, "expected at least PUSH1 PUSH1 SSTORE, got {ops:?}");
    assert_eq!(&ops[..3], &["PUSH1", "PUSH1", "SSTORE"]);
    // gas decreases monotonically along the trace
    assert!(logs.windows(2).all(|w| w[1].gas < w[0].gas));
}

#[test]
fn failed_execution_consumes_gas_but_keeps_nonce_bump() {
    let sender = address_of(sender_secret()).unwrap();
    let mut reader = TestReader::default();
    reader.accounts.insert(sender, StateAccount { balance: eth(1), ..Default::default() });

    let mut state = IntraBlockState::new(&reader);
    let header = test_header();

    // deploy a contract whose runtime code always reverts: PUSH1 0 PUSH1 0 REVERT
    let deploy = sign_transaction(
        TxLegacy {
            chain_id: Some(MAINNET.chain_id),
            nonce: 0,
            gas_price: GWEI_TO_WEI as u128,
            gas_limit: 300_000,
            to: alloy_primitives::TxKind::Create,
            value: U256::ZERO,
            input: Bytes::from_static(&[
                0x64, 0x60, 0x00, 0x60, 0x00, 0xfd, // PUSH5 <runtime: PUSH1 0 PUSH1 0 REVERT>
                0x60, 0x00, 0x52, // PUSH1 0 MSTORE
                0x60, 0x05, 0x60, 0x1b, 0xf3, // PUSH1 5 PUSH1 27 RETURN
            ]),
        },
        sender_secret(),
    )
    .unwrap();
    let deployed = apply_transaction(
        &MAINNET,
        &header,
        &mut state,
        &EmptyBlockHashes,
        &deploy,
        sender,
        None,
        None,
    )
    .unwrap();
    assert!(deployed.success);
    let contract = deployed.contract_address.unwrap();
    state.finalize(true);

    let balance_before = state.get_balance(sender).unwrap();
    let call = legacy_transfer(1, contract, U256::ZERO, 60_000);
    let result = apply_transaction(
        &MAINNET,
        &header,
        &mut state,
        &EmptyBlockHashes,
        &call,
        sender,
        None,
        None,
    )
    .unwrap();

    assert!(!result.success, "revert surfaces as a failed receipt, not an error");
    assert!(result.gas_used >= 21_000);
    assert_eq!(state.get_nonce(sender).unwrap(), 2, "nonce advances on failure");
    assert!(
        state.get_balance(sender).unwrap() < balance_before,
        "gas is still charged on failure"
    );
}
