//! End-to-end RPC semantics over a real store: genesis, one executed
//! block, then queries through every layer.

use alloy_consensus::TxLegacy;
use alloy_primitives::TxKind;
use aura_chainspec::{AuraChain, ChainSpec, ConsensusKind, ForkCondition, Hardfork, PoaConfig};
use aura_consensus::Faker;
use aura_db::DatabaseEnv;
use aura_evm::{BlockExecutor, EmptyBlockHashes};
use aura_primitives::{
    calculate_receipt_root, constants::{ETH_TO_WEI, GWEI_TO_WEI},
    crypto::address_of, recover_signers, transaction::sign_transaction, Address, Block, BlockBody,
    Bloom, BlockWithSenders, Bytes, Header, SealedHeader, TransactionSigned, B256, U256,
};
use aura_rpc::{CallRequest, EthApi, EthApiError};
use aura_state::{init_genesis, ChainWriter, IntraBlockState, PlainStateReader, PlainStateWriter};
use std::{collections::BTreeMap, sync::Arc};

const CHAIN_ID: u64 = 1337;

fn sender_secret() -> B256 {
    B256::new([0xab; 32])
}

fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::from(ETH_TO_WEI)
}

fn test_spec() -> Arc<ChainSpec> {
    let sender = address_of(sender_secret()).unwrap();
    let genesis = alloy_genesis::Genesis::default()
        .with_gas_limit(30_000_000)
        .with_timestamp(1_700_000_000)
        .with_extra_data(aura_chainspec::seal_extra_data(vec![Address::new([0x11; 20])]))
        .extend_accounts([(
            sender,
            alloy_genesis::GenesisAccount::default().with_balance(eth(2)),
        )]);

    let mut hardforks = BTreeMap::new();
    for fork in [
        Hardfork::Homestead,
        Hardfork::SpuriousDragon,
        Hardfork::Byzantium,
        Hardfork::Istanbul,
        Hardfork::Berlin,
        Hardfork::London,
    ] {
        hardforks.insert(fork, ForkCondition::Block(0));
    }

    Arc::new(ChainSpec {
        chain: AuraChain::Private,
        chain_id: CHAIN_ID,
        genesis,
        poa: PoaConfig { kind: ConsensusKind::Faker, period: 8, epoch: 30_000 },
        hardforks,
    })
}

struct TestNode {
    api: EthApi,
    env: Arc<DatabaseEnv>,
    spec: Arc<ChainSpec>,
    tip: SealedHeader,
    _dir: tempfile::TempDir,
}

impl TestNode {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let env = Arc::new(DatabaseEnv::open(dir.path(), aura_db::EnvKind::RW).unwrap());
        let spec = test_spec();
        let tip = init_genesis(&env, &spec).unwrap();
        let pool = Arc::new(aura_txpool::TxPool::new(spec.clone()));
        let api = EthApi::new(spec.clone(), env.clone(), pool, Arc::new(Faker), None);
        Self { api, env, spec, tip, _dir: dir }
    }

    /// Executes and commits a block containing `transactions` on the tip.
    fn mine_block(&mut self, transactions: Vec<TransactionSigned>) -> SealedHeader {
        let senders = recover_signers(&transactions).unwrap();
        let parent = self.tip.clone();
        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            timestamp: parent.timestamp + self.spec.poa.period,
            gas_limit: parent.gas_limit,
            base_fee_per_gas: self.spec.next_block_base_fee(&parent),
            difficulty: U256::from(1u64),
            beneficiary: Address::new([0xc0; 20]),
            ..Default::default()
        };

        let tx = self.env.tx_mut().unwrap();
        let body = BlockBody { transactions, withdrawals: None };
        let (sealed, receipts) = {
            let reader = PlainStateReader::new(&tx);
            let mut state = IntraBlockState::new(&reader);
            let with_senders = BlockWithSenders {
                block: Block { header: header.clone(), body: body.clone() },
                senders: senders.clone(),
            };
            let executor = BlockExecutor::new(&self.spec);
            let outcome =
                executor.execute_block(&with_senders, &mut state, &EmptyBlockHashes).unwrap();

            let mut writer = PlainStateWriter::new(&tx, header.number, parent.state_root);
            let state_root = state.commit_block(&mut writer).unwrap();

            header.state_root = state_root;
            header.gas_used = outcome.gas_used;
            header.transactions_root = body.calculate_tx_root();
            header.receipts_root = calculate_receipt_root(&outcome.receipts);
            header.logs_bloom = outcome
                .receipts
                .iter()
                .fold(Bloom::ZERO, |bloom, receipt| bloom | receipt.bloom_slow());
            (SealedHeader::seal_slow(header), outcome.receipts)
        };

        let writer = ChainWriter::new(&tx);
        writer.write_block(&sealed, &body, &senders, sealed.difficulty).unwrap();
        writer.write_receipts(sealed.number(), &receipts).unwrap();
        tx.commit().unwrap();
        self.tip = sealed.clone();
        sealed
    }
}

fn transfer(nonce: u64, to: Address, value: U256) -> TransactionSigned {
    sign_transaction(
        TxLegacy {
            chain_id: Some(CHAIN_ID),
            nonce,
            gas_price: GWEI_TO_WEI as u128,
            gas_limit: 21_000,
            to: TxKind::Call(to),
            value,
            input: Bytes::new(),
        },
        sender_secret(),
    )
    .unwrap()
}

#[test]
fn transfer_scenario_balances_and_receipt() {
    let mut node = TestNode::new();
    let sender = address_of(sender_secret()).unwrap();
    let recipient = Address::new([0xbb; 20]);

    assert_eq!(node.api.block_number().unwrap(), 0);
    assert_eq!(node.api.get_balance(sender, None).unwrap(), eth(2));

    let tx = transfer(0, recipient, eth(1));
    let tx_hash = tx.hash();
    let block = node.mine_block(vec![tx]);

    assert_eq!(node.api.block_number().unwrap(), 1);

    // post-state balances: 2 ETH - 1 ETH - 21000 * 1 gwei
    let gas_cost = U256::from(21_000u64) * U256::from(GWEI_TO_WEI);
    assert_eq!(node.api.get_balance(sender, None).unwrap(), eth(2) - eth(1) - gas_cost);
    assert_eq!(node.api.get_balance(recipient, None).unwrap(), eth(1));
    assert_eq!(node.api.get_transaction_count(sender, None).unwrap(), 1);

    // the historical anchor still sees the pre-state
    let at_genesis = Some(alloy_rpc_types_eth::BlockId::Number(
        alloy_rpc_types_eth::BlockNumberOrTag::Number(0),
    ));
    assert_eq!(node.api.get_balance(sender, at_genesis.clone()).unwrap(), eth(2));
    assert_eq!(node.api.get_balance(recipient, at_genesis).unwrap(), U256::ZERO);

    // receipt: status 1, 21000 gas
    let receipt = node.api.get_transaction_receipt(tx_hash).unwrap().unwrap();
    assert_eq!(receipt.status, 1);
    assert_eq!(receipt.gas_used, 21_000);
    assert_eq!(receipt.cumulative_gas_used, 21_000);
    assert_eq!(receipt.block_hash, block.hash());

    // tx lookup is consistent with the block content
    let fetched = node.api.get_transaction_by_hash(tx_hash).unwrap().unwrap();
    assert_eq!(fetched.block_hash, Some(block.hash()));
    assert_eq!(fetched.transaction_index, Some(0));
    let rpc_block = node
        .api
        .get_block_by_number(alloy_rpc_types_eth::BlockNumberOrTag::Number(1), false)
        .unwrap()
        .unwrap();
    assert_eq!(rpc_block.hash, block.hash());
    match rpc_block.transactions {
        aura_rpc::types::RpcBlockTransactions::Hashes(hashes) => {
            assert_eq!(hashes, vec![tx_hash])
        }
        _ => panic!("asked for hashes"),
    }
}

#[test]
fn call_with_state_override_funds_a_poor_sender() {
    let mut node = TestNode::new();
    node.mine_block(vec![]);

    let poor = Address::new([0x99; 20]);
    let recipient = Address::new([0xbb; 20]);
    let request = CallRequest {
        from: Some(poor),
        to: Some(recipient),
        value: Some(eth(5)),
        ..Default::default()
    };

    // without the override the transfer cannot be paid for
    let err = node.api.call(request.clone(), None, None).unwrap_err();
    assert!(matches!(err, EthApiError::Execution(_)));

    // overriding the balance makes it succeed
    let mut overrides = aura_rpc::StateOverride::default();
    overrides.insert(
        poor,
        aura_rpc::AccountOverride { balance: Some(eth(10)), ..Default::default() },
    );
    let out = node.api.call(request, None, Some(overrides)).unwrap();
    assert!(out.is_empty());
}

#[test]
fn estimate_gas_matches_plain_transfer() {
    let mut node = TestNode::new();
    node.mine_block(vec![]);
    let sender = address_of(sender_secret()).unwrap();

    let request = CallRequest {
        from: Some(sender),
        to: Some(Address::new([0xbb; 20])),
        value: Some(eth(1)),
        ..Default::default()
    };
    assert_eq!(node.api.estimate_gas(request, None, None).unwrap(), 21_000);
}

#[test]
fn fee_history_covers_the_requested_window() {
    let mut node = TestNode::new();
    let recipient = Address::new([0xbb; 20]);
    node.mine_block(vec![transfer(0, recipient, eth(1))]);
    node.mine_block(vec![]);

    let history = node
        .api
        .fee_history(2, alloy_rpc_types_eth::BlockNumberOrTag::Latest, Some(vec![50.0]))
        .unwrap();
    assert_eq!(history.oldest_block, 1);
    // two blocks plus the projected next block
    assert_eq!(history.base_fee_per_gas.len(), 3);
    assert_eq!(history.gas_used_ratio.len(), 2);
    assert_eq!(history.reward.as_ref().unwrap().len(), 2);
}

#[test]
fn unknown_blocks_map_to_not_available() {
    let node = TestNode::new();
    let err = node
        .api
        .get_balance(
            Address::ZERO,
            Some(alloy_rpc_types_eth::BlockId::Number(
                alloy_rpc_types_eth::BlockNumberOrTag::Number(99),
            )),
        )
        .unwrap_err();
    assert_eq!(err.code(), aura_rpc::BLOCK_NOT_AVAILABLE_CODE);
}
