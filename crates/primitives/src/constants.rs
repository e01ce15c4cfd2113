//! Chain-wide constants.

use alloy_primitives::{b256, B256};

/// Keccak-256 hash of the empty byte string, the code hash of accounts
/// without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Root hash of an empty trie.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Ommer root of a block with no uncles.
pub const EMPTY_OMMER_ROOT_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Base gas cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;

/// Extra gas charged when a transaction creates a contract.
pub const TX_CREATE_GAS: u64 = 32_000;

/// Gas per non-zero byte of transaction input.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Gas per zero byte of transaction input.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Gas per address in an EIP-2930 access list.
pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;

/// Gas per storage key in an EIP-2930 access list.
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;

/// Gas per 32-byte word of init code (EIP-3860).
pub const INITCODE_WORD_GAS: u64 = 2;

/// Maximum init code size once EIP-3860 is active.
pub const MAX_INITCODE_SIZE: usize = 2 * MAX_CODE_SIZE;

/// Maximum deployed code size (EIP-170).
pub const MAX_CODE_SIZE: usize = 24_576;

/// Denominator of the maximum refund, post-London (EIP-3529).
pub const MAX_REFUND_QUOTIENT: u64 = 5;

/// Gas consumed per blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 131_072;

/// Wei per Gwei.
pub const GWEI_TO_WEI: u64 = 1_000_000_000;

/// Wei per Ether.
pub const ETH_TO_WEI: u128 = 1_000_000_000_000_000_000;

/// The bound divisor of gas limits between consecutive blocks (1/1024).
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Minimum gas limit a header may carry.
pub const MIN_GAS_LIMIT: u64 = 5000;
