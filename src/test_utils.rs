//! Shared fixtures for the test suite: in-memory nexus, chain, and oracle
//! host implementations plus native contracts driving the runtime.

use crate::core::chain::{Block, ChainStore};
use crate::core::nexus::{
    FIAT_DECIMALS, FIAT_SYMBOL, LOCAL_PLATFORM, Nexus, ROOT_CHAIN, STAKING_SYMBOL, TokenInfo,
    contracts,
};
use crate::core::transaction::Transaction;
use crate::oracle::{OracleError, OracleHost, OracleReader};
use crate::runtime::RuntimeVM;
use crate::runtime::events::{Event, EventKind, GasEventData};
use crate::storage::change_set::ChangeSet;
use crate::storage::{MemoryStore, RootStore};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Encode, bigint_from_flagged_le, bigint_to_flagged_le};
use crate::types::hash::Hash;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack::{ExecutionContext, NativeContract};
use num_bigint::BigInt;
use num_traits::Zero;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_TIME: u32 = 1_700_000_000;

/// Deterministic user address from a seed string.
pub fn user_address(seed: &str) -> Address {
    Address::user(Hash::sha3().chain(seed.as_bytes()).finalize())
}

/// Storage key of a token balance.
pub fn balance_key(symbol: &str, address: &Address) -> Vec<u8> {
    let mut h = Hash::sha3();
    h.update(b"BALANCE");
    h.update(symbol.as_bytes());
    h.update(address.as_slice());
    h.finalize().to_vec()
}

/// Reads a balance through a change set.
pub fn balance_of(changes: &ChangeSet, symbol: &str, address: &Address) -> BigInt {
    changes
        .get(&balance_key(symbol, address))
        .map(|bytes| bigint_from_flagged_le(&bytes))
        .unwrap_or_else(BigInt::zero)
}

enum RegisteredContract {
    Script(Bytes),
    Native(Arc<dyn NativeContract>),
}

/// In-memory [`Nexus`] with registries the tests populate directly.
pub struct MockNexus {
    genesis: AtomicBool,
    tokens: Mutex<HashMap<String, TokenInfo>>,
    platforms: Mutex<HashSet<String>>,
    governance: Mutex<HashMap<String, BigInt>>,
    scripts: Mutex<HashMap<Address, Bytes>>,
    contracts: Mutex<HashMap<String, RegisteredContract>>,
    store: Arc<MemoryStore>,
}

impl MockNexus {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            genesis: AtomicBool::new(true),
            tokens: Mutex::new(HashMap::new()),
            platforms: Mutex::new(HashSet::new()),
            governance: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            contracts: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn set_genesis(&self, established: bool) {
        self.genesis.store(established, Ordering::Relaxed);
    }

    pub fn register_token(&self, symbol: &str, decimals: u32, fungible: bool) {
        self.tokens.lock().unwrap().insert(
            symbol.to_string(),
            TokenInfo {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                decimals,
                fungible,
            },
        );
    }

    pub fn register_platform(&self, name: &str) {
        self.platforms.lock().unwrap().insert(name.to_string());
    }

    pub fn set_governance_value(&self, name: &str, value: BigInt) {
        self.governance
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
    }

    pub fn register_address_script(&self, address: Address, script: Bytes) {
        self.scripts.lock().unwrap().insert(address, script);
    }

    pub fn register_native_contract(&self, contract: Arc<dyn NativeContract>) {
        self.contracts.lock().unwrap().insert(
            contract.name().to_string(),
            RegisteredContract::Native(contract),
        );
    }

    pub fn register_script_contract(&self, name: &str, script: Bytes) {
        self.contracts
            .lock()
            .unwrap()
            .insert(name.to_string(), RegisteredContract::Script(script));
    }

    /// Seeds a balance directly into root storage.
    pub fn seed_balance(&self, symbol: &str, address: &Address, amount: BigInt) {
        self.store.apply_batch(vec![(
            balance_key(symbol, address),
            Some(bigint_to_flagged_le(&amount)),
        )]);
    }
}

impl Nexus for MockNexus {
    fn has_genesis(&self) -> bool {
        self.genesis.load(Ordering::Relaxed)
    }

    fn token_exists(&self, symbol: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(symbol)
    }

    fn get_token_info(&self, symbol: &str) -> Option<TokenInfo> {
        self.tokens.lock().unwrap().get(symbol).cloned()
    }

    fn platform_exists(&self, name: &str) -> bool {
        self.platforms.lock().unwrap().contains(name)
    }

    fn get_governance_value(&self, name: &str) -> BigInt {
        self.governance
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(BigInt::zero)
    }

    fn has_address_script(&self, address: &Address) -> bool {
        self.scripts.lock().unwrap().contains_key(address)
    }

    fn lookup_address_script(&self, address: &Address) -> Option<Bytes> {
        self.scripts.lock().unwrap().get(address).cloned()
    }

    fn alloc_contract_by_name(&self, name: &str) -> Option<ExecutionContext> {
        match self.contracts.lock().unwrap().get(name)? {
            RegisteredContract::Script(script) => {
                Some(ExecutionContext::script(name, script.clone()))
            }
            RegisteredContract::Native(contract) => {
                Some(ExecutionContext::native(contract.clone()))
            }
        }
    }

    fn alloc_contract_by_address(&self, address: &Address) -> Option<ExecutionContext> {
        let name = self
            .contracts
            .lock()
            .unwrap()
            .keys()
            .find(|name| &Address::from_contract_name(name) == address)
            .cloned()?;
        self.alloc_contract_by_name(&name)
    }

    fn transfer_tokens(
        &self,
        changes: &mut ChangeSet,
        symbol: &str,
        source: Address,
        destination: Address,
        amount: &BigInt,
    ) -> Result<(), String> {
        let from_balance = balance_of(changes, symbol, &source);
        if &from_balance < amount {
            return Err(format!("insufficient {symbol} balance"));
        }
        let to_balance = balance_of(changes, symbol, &destination);

        changes
            .set(
                balance_key(symbol, &source),
                bigint_to_flagged_le(&(from_balance - amount)),
            )
            .map_err(|err| err.to_string())?;
        changes
            .set(
                balance_key(symbol, &destination),
                bigint_to_flagged_le(&(to_balance + amount)),
            )
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    fn root_storage(&self) -> Arc<dyn RootStore> {
        self.store.clone()
    }
}

/// In-memory [`ChainStore`].
pub struct MockChain {
    blocks: Mutex<Vec<Block>>,
    tx_blocks: Mutex<HashMap<Hash, Hash>>,
    tx_events: Mutex<HashMap<Hash, Vec<Event>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            tx_blocks: Mutex::new(HashMap::new()),
            tx_events: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_block(&self, block: Block) {
        self.blocks.lock().unwrap().push(block);
    }

    /// Records a past transaction: the block that included it and the events
    /// it emitted.
    pub fn add_transaction(&self, tx_hash: Hash, block_hash: Hash, events: Vec<Event>) {
        self.tx_blocks.lock().unwrap().insert(tx_hash, block_hash);
        self.tx_events.lock().unwrap().insert(tx_hash, events);
    }
}

impl ChainStore for MockChain {
    fn name(&self) -> &str {
        ROOT_CHAIN
    }

    fn get_block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| &block.hash == hash)
            .cloned()
    }

    fn get_block_by_height(&self, height: u64) -> Option<Block> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.height == height)
            .cloned()
    }

    fn get_transaction_by_hash(&self, _hash: &Hash) -> Option<Transaction> {
        None
    }

    fn get_block_hash_of_transaction(&self, tx_hash: &Hash) -> Option<Hash> {
        self.tx_blocks.lock().unwrap().get(tx_hash).copied()
    }

    fn get_events_for_transaction(&self, tx_hash: &Hash) -> Vec<Event> {
        self.tx_events
            .lock()
            .unwrap()
            .get(tx_hash)
            .cloned()
            .unwrap_or_default()
    }
}

/// Scripted [`OracleHost`] counting its pulls.
pub struct MockOracleHost {
    prices: Mutex<HashMap<String, f64>>,
    data: Mutex<HashMap<String, Vec<u8>>>,
    pub price_pulls: AtomicUsize,
}

impl MockOracleHost {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            data: Mutex::new(HashMap::new()),
            price_pulls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_data(&self, url: &str, content: Vec<u8>) {
        self.data.lock().unwrap().insert(url.to_string(), content);
    }

    pub fn price_pull_count(&self) -> usize {
        self.price_pulls.load(Ordering::Relaxed)
    }
}

impl OracleHost for MockOracleHost {
    fn pull_price(&self, _time: u32, symbol: &str) -> Result<f64, OracleError> {
        self.price_pulls.fetch_add(1, Ordering::Relaxed);
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| OracleError::FetchFailed(format!("no price feed for {symbol}")))
    }

    fn pull_data(&self, _time: u32, url: &str) -> Result<Vec<u8>, OracleError> {
        self.data
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| OracleError::FetchFailed(format!("no data for {url}")))
    }

    fn pull_platform_block(
        &self,
        platform: &str,
        _chain: &str,
        _hash: Option<Hash>,
        _height: Option<u64>,
    ) -> Result<Vec<u8>, OracleError> {
        Err(OracleError::FetchFailed(format!(
            "platform {platform} not watched"
        )))
    }

    fn pull_platform_transaction(
        &self,
        platform: &str,
        _chain: &str,
        _hash: &Hash,
    ) -> Result<Vec<u8>, OracleError> {
        Err(OracleError::FetchFailed(format!(
            "platform {platform} not watched"
        )))
    }

    fn get_current_height(&self, _platform: &str, _chain: &str) -> u64 {
        0
    }

    fn set_current_height(&self, _platform: &str, _chain: &str, _height: u64) {}

    fn read_all_blocks(&self, _platform: &str, _chain: &str) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

/// Native contract whose methods dispatch through a plain handler function.
pub struct TestContract {
    name: String,
    methods: HashMap<String, u64>,
    handler: fn(&mut RuntimeVM, &str) -> Result<(), VMError>,
}

impl TestContract {
    pub fn new(
        name: &str,
        methods: &[(&str, u64)],
        handler: fn(&mut RuntimeVM, &str) -> Result<(), VMError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            methods: methods
                .iter()
                .map(|(method, cost)| (method.to_string(), *cost))
                .collect(),
            handler,
        })
    }
}

impl NativeContract for TestContract {
    fn name(&self) -> &str {
        &self.name
    }

    fn method_cost(&self, method: &str) -> Option<u64> {
        self.methods.get(method).copied()
    }

    fn invoke(&self, runtime: &mut RuntimeVM, method: &str) -> Result<(), VMError> {
        (self.handler)(runtime, method)
    }
}

/// Declared cost of the gas contract's AllowGas method.
pub const ALLOW_GAS_COST: u64 = 8;
/// Declared cost of the gas contract's SpendGas method.
pub const SPEND_GAS_COST: u64 = 5;

/// Gas contract: escrows a budget and later pays the consumed gas.
pub fn gas_contract() -> Arc<TestContract> {
    TestContract::new(
        contracts::GAS,
        &[("AllowGas", ALLOW_GAS_COST), ("SpendGas", SPEND_GAS_COST)],
        |runtime, method| match method {
            "AllowGas" => {
                let address = runtime.pop_address()?;
                let price = runtime.pop_integer()?;
                let amount = runtime.pop_integer()?;
                let data = GasEventData { price, amount }.to_bytes();
                runtime.notify(EventKind::GasEscrow, address, data)
            }
            "SpendGas" => {
                let address = runtime.pop_address()?;
                let amount = runtime.pop_integer()?;
                let data = GasEventData {
                    price: BigInt::zero(),
                    amount,
                }
                .to_bytes();
                runtime.notify(EventKind::GasPayment, address, data)
            }
            other => Err(VMError::UnknownMethod {
                contract: contracts::GAS.to_string(),
                method: other.to_string(),
            }),
        },
    )
}

/// Block contract: opens a block operation.
pub fn block_contract() -> Arc<TestContract> {
    TestContract::new(contracts::BLOCK, &[("OpenBlock", 1)], |runtime, method| {
        match method {
            "OpenBlock" => {
                let address = Address::from_contract_name(contracts::BLOCK);
                runtime.notify(EventKind::BlockCreate, address, Vec::new())
            }
            other => Err(VMError::UnknownMethod {
                contract: contracts::BLOCK.to_string(),
                method: other.to_string(),
            }),
        }
    })
}

/// A contract without any event privileges.
pub fn custom_contract() -> Arc<TestContract> {
    TestContract::new("custom", &[("EmitGasPayment", 1)], |runtime, method| {
        match method {
            "EmitGasPayment" => {
                let address = runtime.pop_address()?;
                let data = GasEventData {
                    price: BigInt::zero(),
                    amount: BigInt::from(1),
                }
                .to_bytes();
                runtime.notify(EventKind::GasPayment, address, data)
            }
            other => Err(VMError::UnknownMethod {
                contract: "custom".to_string(),
                method: other.to_string(),
            }),
        }
    })
}

/// Fully wired environment: store, nexus, chain, oracle, and the standard
/// token and contract registrations.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub nexus: Arc<MockNexus>,
    pub chain: Arc<MockChain>,
    pub host: Arc<MockOracleHost>,
    pub oracle: Arc<OracleReader>,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let nexus = Arc::new(MockNexus::new(store.clone()));
        let chain = Arc::new(MockChain::new());
        let host = Arc::new(MockOracleHost::new());

        nexus.register_token(STAKING_SYMBOL, 8, true);
        nexus.register_token("KCAL", 10, true);
        nexus.register_token(FIAT_SYMBOL, FIAT_DECIMALS, true);
        nexus.register_platform(LOCAL_PLATFORM);
        nexus.register_native_contract(gas_contract());
        nexus.register_native_contract(block_contract());
        nexus.register_native_contract(custom_contract());

        let oracle = Arc::new(OracleReader::new(
            host.clone(),
            nexus.clone(),
            chain.clone(),
        ));

        Self {
            store,
            nexus,
            chain,
            host,
            oracle,
        }
    }

    /// Builds a runtime over a fresh change set for the given entry script.
    pub fn runtime_for_script(&self, script: Bytes) -> RuntimeVM {
        self.runtime_for_transaction(Arc::new(Transaction::new(script, TEST_TIME + 60, vec![])))
    }

    /// Same, with a pre-verified signer set.
    pub fn runtime_for_signed_script(&self, script: Bytes, signers: Vec<Address>) -> RuntimeVM {
        self.runtime_for_transaction(Arc::new(Transaction::new(script, TEST_TIME + 60, signers)))
    }

    pub fn runtime_for_transaction(&self, transaction: Arc<Transaction>) -> RuntimeVM {
        let changes = Rc::new(RefCell::new(ChangeSet::new(self.store.clone())));
        RuntimeVM::new(
            self.nexus.clone(),
            self.chain.clone(),
            self.oracle.clone(),
            changes,
            transaction,
            TEST_TIME,
        )
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
