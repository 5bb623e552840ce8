//! The nexus: registry of tokens, platforms, contracts, and governance.

use crate::storage::RootStore;
use crate::storage::change_set::ChangeSet;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::virtual_machine::stack::ExecutionContext;
use num_bigint::BigInt;
use std::sync::Arc;

/// Names of the built-in contracts with event or context privileges.
pub mod contracts {
    pub const GAS: &str = "gas";
    pub const BLOCK: &str = "block";
    pub const CONSENSUS: &str = "consensus";
    pub const NEXUS: &str = "nexus";
    pub const STORAGE: &str = "storage";
    pub const VALIDATOR: &str = "validator";
    pub const INTEROP: &str = "interop";
    pub const GOVERNANCE: &str = "governance";
    pub const TOKEN: &str = "token";
    pub const BOMB: &str = "bomb";
    pub const ACCOUNT: &str = "account";
    pub const ENTRY: &str = "entry";
}

/// Trigger method names the runtime invokes on account and token scripts.
pub mod triggers {
    pub const ON_WITNESS: &str = "OnWitness";
    pub const ON_SEND: &str = "OnSend";
    pub const ON_RECEIVE: &str = "OnReceive";
    pub const ON_MINT: &str = "OnMint";
    pub const ON_BURN: &str = "OnBurn";
}

/// Symbol of the staking token.
pub const STAKING_SYMBOL: &str = "SOUL";
/// Symbol of the fuel token gas is priced in.
pub const FUEL_SYMBOL: &str = "KCAL";
/// Symbol of the fiat accounting token.
pub const FIAT_SYMBOL: &str = "USD";
/// Decimals of the fiat accounting token.
pub const FIAT_DECIMALS: u32 = 8;

/// Name of the local platform in interop URLs.
pub const LOCAL_PLATFORM: &str = "main";
/// Name of the root chain of the local platform.
pub const ROOT_CHAIN: &str = "root";

/// Governance key holding the staking token's reference price.
pub const GOVERNANCE_STAKING_PRICE: &str = "staking.price";
/// Governance key holding the minimum accepted gas price.
pub const GOVERNANCE_MINIMUM_FEE: &str = "gas.minimum.fee";

/// Registered token metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    pub fungible: bool,
}

/// Registry the runtime resolves tokens, platforms, contracts, account
/// scripts, and governance values through.
///
/// Implemented by the node; the execution core only consumes it.
pub trait Nexus: Send + Sync {
    /// True once the genesis block has been established. Before that, gas
    /// is free so bootstrap transactions can run.
    fn has_genesis(&self) -> bool;

    fn token_exists(&self, symbol: &str) -> bool;

    fn get_token_info(&self, symbol: &str) -> Option<TokenInfo>;

    fn platform_exists(&self, name: &str) -> bool;

    /// Current value of a governance key, zero when unset.
    fn get_governance_value(&self, name: &str) -> BigInt;

    /// True when the address registered an account script.
    fn has_address_script(&self, address: &Address) -> bool;

    fn lookup_address_script(&self, address: &Address) -> Option<Bytes>;

    /// Resolves a contract name to an executable context.
    fn alloc_contract_by_name(&self, name: &str) -> Option<ExecutionContext>;

    /// Resolves a contract's system address to its context.
    fn alloc_contract_by_address(&self, address: &Address) -> Option<ExecutionContext>;

    /// Moves tokens between accounts inside the transaction's change set.
    fn transfer_tokens(
        &self,
        changes: &mut ChangeSet,
        symbol: &str,
        source: Address,
        destination: Address,
        amount: &BigInt,
    ) -> Result<(), String>;

    /// Root storage the per-transaction change sets overlay.
    fn root_storage(&self) -> Arc<dyn RootStore>;
}

/// Host hook receiving token withdraws destined for foreign platforms.
pub trait InteropResolver: Send + Sync {
    fn withdraw_tokens(
        &self,
        source: Address,
        destination: Address,
        symbol: &str,
        amount: &BigInt,
    ) -> Result<(), String>;
}
