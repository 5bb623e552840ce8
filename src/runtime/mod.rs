//! Transaction runtime: glues the VM to state, events, triggers, oracles,
//! and witnesses.
//!
//! A [`RuntimeVM`] owns its frame stack and event log and borrows everything
//! shared (change set, oracle, chain, nexus, transaction) so that trigger
//! invocation can build a child runtime over the same resources without
//! conflating parent and child state.

pub mod events;
mod interpreter;

use crate::core::chain::ChainStore;
use crate::core::nexus::{
    FIAT_DECIMALS, FIAT_SYMBOL, FUEL_SYMBOL, GOVERNANCE_MINIMUM_FEE, InteropResolver, Nexus,
    STAKING_SYMBOL, contracts, triggers,
};
use crate::core::receipt::Receipt;
use crate::core::transaction::Transaction;
use crate::core::units;
use crate::oracle::{OracleEntry, OracleReader};
use crate::runtime::events::{Event, EventKind, GasEventData};
use crate::storage::change_set::ChangeSet;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::Decode;
use crate::types::hash::Hash;
use crate::utils::log::Logger;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::gas::GasMeter;
use crate::virtual_machine::stack::{ExecutionContext, Frame, OperandStack};
use crate::virtual_machine::value::Value;
use num_bigint::{BigInt, BigUint};
use num_traits::{One, ToPrimitive, Zero};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Terminal and intermediate execution states.
///
/// `Running` is only ever observed mid-execution; a finished transaction is
/// `Halt` or `Fault`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    Halt,
    Fault,
}

/// A host-registered EXTCALL handler. Handlers pop their arguments from the
/// operand stack and push their result.
pub type ExtcallHandler = fn(&mut RuntimeVM) -> Result<(), VMError>;

/// Multiplier of the LCG behind [`RuntimeVM::get_random_number`].
const LCG_MULTIPLIER: u64 = 16807;
/// Modulus of the LCG: `2^31 - 1`.
const LCG_MODULUS: u64 = 0x7FFF_FFFF;

/// The contract-facing execution surface for one transaction.
pub struct RuntimeVM {
    nexus: Arc<dyn Nexus>,
    chain: Arc<dyn ChainStore>,
    oracle: Arc<OracleReader>,
    resolver: Option<Arc<dyn InteropResolver>>,
    changes: Rc<RefCell<ChangeSet>>,
    transaction: Arc<Transaction>,
    time: u32,

    pub(crate) stack: OperandStack,
    pub(crate) frames: Vec<Frame>,
    pub(crate) current_context: Rc<ExecutionContext>,
    pub(crate) previous_context: Option<Rc<ExecutionContext>>,
    pub(crate) entry_address: Address,
    pub(crate) loaded_contexts: Vec<Rc<ExecutionContext>>,
    pub(crate) gas: GasMeter,
    state: ExecutionState,

    events: Vec<Event>,
    oracle_entries: Vec<OracleEntry>,
    fault: Option<String>,
    pub(crate) current_opcode: Option<&'static str>,

    extcalls: HashMap<String, ExtcallHandler>,
    witnesses: Vec<Address>,
    random_seed: Option<u64>,
    logger: Logger,
}

impl RuntimeVM {
    pub fn new(
        nexus: Arc<dyn Nexus>,
        chain: Arc<dyn ChainStore>,
        oracle: Arc<OracleReader>,
        changes: Rc<RefCell<ChangeSet>>,
        transaction: Arc<Transaction>,
        time: u32,
    ) -> Self {
        let free = !nexus.has_genesis() || changes.borrow().is_read_only();
        let minimum_fee = nexus
            .get_governance_value(GOVERNANCE_MINIMUM_FEE)
            .max(BigInt::one());
        let entry_context = Rc::new(ExecutionContext::script(
            contracts::ENTRY,
            transaction.script.clone(),
        ));

        Self {
            nexus,
            chain,
            oracle,
            resolver: None,
            changes,
            transaction,
            time,
            stack: OperandStack::new(),
            frames: Vec::new(),
            current_context: entry_context,
            previous_context: None,
            entry_address: Address::from_contract_name(contracts::ENTRY),
            loaded_contexts: Vec::new(),
            gas: GasMeter::new(minimum_fee, free),
            state: ExecutionState::Running,
            events: Vec::new(),
            oracle_entries: Vec::new(),
            fault: None,
            current_opcode: None,
            extcalls: Self::default_extcalls(),
            witnesses: Vec::new(),
            random_seed: None,
            logger: Logger::new("runtime"),
        }
    }

    /// Routes interop withdraws through the given resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn InteropResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Builds the child runtime a trigger executes in. Shares the change
    /// set, oracle, chain, nexus, transaction, and time with this runtime.
    fn child(&self, script: &Bytes) -> RuntimeVM {
        let context = Rc::new(ExecutionContext::script(contracts::ACCOUNT, script.clone()));
        let free = !self.nexus.has_genesis() || self.changes.borrow().is_read_only();

        RuntimeVM {
            nexus: self.nexus.clone(),
            chain: self.chain.clone(),
            oracle: self.oracle.clone(),
            resolver: self.resolver.clone(),
            changes: Rc::clone(&self.changes),
            transaction: self.transaction.clone(),
            time: self.time,
            stack: OperandStack::new(),
            frames: Vec::new(),
            current_context: context,
            previous_context: None,
            entry_address: Address::from_contract_name(contracts::ACCOUNT),
            loaded_contexts: Vec::new(),
            gas: GasMeter::new(self.gas.minimum_fee().clone(), free),
            state: ExecutionState::Running,
            events: Vec::new(),
            oracle_entries: Vec::new(),
            fault: None,
            current_opcode: None,
            extcalls: Self::default_extcalls(),
            witnesses: Vec::new(),
            random_seed: None,
            logger: Logger::new("trigger"),
        }
    }

    // ==================== Execution ====================

    /// Runs the transaction's entry script to a terminal state.
    ///
    /// On fault the change set and event log are discarded and the message
    /// is captured for the receipt.
    pub fn execute(&mut self) -> ExecutionState {
        if self.state != ExecutionState::Running {
            return self.state;
        }

        let result = self.run().and_then(|()| self.gas.settle());
        match result {
            Ok(()) => self.state = ExecutionState::Halt,
            Err(err) => {
                let message = match self.current_opcode {
                    Some(opcode) => format!("{opcode}: {err}"),
                    None => err.to_string(),
                };
                self.logger
                    .warn(&format!("transaction {} reverted: {message}", self.transaction.hash));
                self.fault = Some(message);
                self.events.clear();
                self.changes.borrow_mut().discard();
                self.state = ExecutionState::Fault;
            }
        }
        self.state
    }

    /// Builds the receipt for this execution.
    pub fn receipt(&self) -> Receipt {
        Receipt {
            tx_hash: self.transaction.hash,
            success: self.state == ExecutionState::Halt,
            gas_used: self.gas.used_gas().clone(),
            error: self.fault.clone(),
            events: self.events.clone(),
        }
    }

    /// Invokes a method of another contract and returns its result.
    ///
    /// Arguments are pushed in reverse followed by the method name, the
    /// loaded context runs to completion, and the caller's context and entry
    /// address are restored. A call into the bomb contract is exempt from
    /// metering: its gas is rewound afterwards.
    pub fn call_context(
        &mut self,
        context_name: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, VMError> {
        for arg in args.into_iter().rev() {
            self.push_value(arg)?;
        }
        self.push_value(Value::from(method))?;

        let context = self.load_context(context_name)?;
        let rewind = (context_name == contracts::BOMB).then(|| self.gas.used_gas().clone());
        let saved_context = self.current_context.clone();
        let saved_entry = self.entry_address;

        let depth = self.frames.len();
        self.switch_context(context)?;
        self.run_until_depth(depth)?;

        self.current_context = saved_context;
        self.entry_address = saved_entry;
        if let Some(snapshot) = rewind {
            self.gas.rewind(snapshot);
        }
        Ok(self.stack.try_pop().unwrap_or(Value::None))
    }

    /// Invokes an account or token trigger in a child runtime.
    ///
    /// The child shares this runtime's change set and oracle, runs with
    /// payment delayed, and its gas is propagated back whether it halts or
    /// faults. On halt the child's events are appended to this runtime's
    /// log; on fault the caller only learns `false`.
    pub fn invoke_trigger(&mut self, script: &Bytes, trigger: &str, args: Vec<Value>) -> bool {
        let mut child = self.child(script);
        child.gas.set_delay_payment(true);

        let mut seeded = true;
        for arg in args.into_iter().rev() {
            if child.stack.push(arg, 0).is_err() {
                seeded = false;
                break;
            }
        }
        if !seeded || child.stack.push(Value::from(trigger), 0).is_err() {
            return false;
        }

        let result = child.run();
        self.gas.absorb(&child.gas);
        match result {
            Ok(()) => {
                self.events.append(&mut child.events);
                self.oracle_entries.append(&mut child.oracle_entries);
                true
            }
            Err(_) => false,
        }
    }

    // ==================== Events ====================

    /// Appends an event authored by the current context.
    ///
    /// Kinds in the authorization table may only be emitted from their
    /// designated contract; gas and block kinds additionally mutate runtime
    /// state before landing in the log.
    pub fn notify(&mut self, kind: EventKind, address: Address, data: Vec<u8>) -> Result<(), VMError> {
        if let EventKind::Custom(n) = kind {
            if kind.to_byte().is_none() {
                return Err(VMError::InvalidEventKind(n));
            }
        }
        let contract = self.current_context.name.clone();
        if let Some(required) = kind.required_contract() {
            if contract != required {
                return Err(VMError::UnauthorizedEvent {
                    kind: kind.to_string(),
                    contract: required,
                });
            }
        }

        match kind {
            EventKind::GasEscrow => {
                let escrow =
                    GasEventData::from_bytes(&data).map_err(|_| VMError::DecodeFailed)?;
                self.gas.escrow(escrow.price, escrow.amount, address)?;
            }
            EventKind::GasPayment => {
                let payment =
                    GasEventData::from_bytes(&data).map_err(|_| VMError::DecodeFailed)?;
                self.gas.payment(payment.amount);
                if address != self.chain.address() {
                    self.gas.set_fee_target(address);
                }
            }
            EventKind::BlockCreate | EventKind::BlockClose => {
                self.gas.enter_block_operation();
            }
            _ => {}
        }

        self.events.push(Event::new(kind, address, contract, data));
        Ok(())
    }

    // ==================== Witnesses ====================

    /// Checks whether `address` authorizes the current action.
    ///
    /// Interop addresses never witness. System addresses witness through the
    /// current context's derived address, never through the chain address.
    /// User addresses witness through their account script's OnWitness
    /// trigger or through the transaction's signer set; a positive result is
    /// memoized for the rest of the transaction.
    pub fn is_witness(&mut self, address: Address) -> Result<bool, VMError> {
        if address.is_interop() || address.is_null() {
            return Ok(false);
        }
        if address == self.entry_address {
            return Ok(true);
        }
        if address.is_system() {
            if address == self.chain.address() {
                return Ok(false);
            }
            return Ok(address == Address::from_contract_name(&self.current_context.name));
        }

        if self.witnesses.contains(&address) {
            return Ok(true);
        }

        let mut witness = false;
        if self.nexus.has_address_script(&address) {
            if let Some(script) = self.nexus.lookup_address_script(&address) {
                witness =
                    self.invoke_trigger(&script, triggers::ON_WITNESS, vec![Value::Address(address)]);
            }
        }
        if !witness {
            witness = self.transaction.signers.contains(&address);
        }

        if witness {
            self.witnesses.push(address);
        }
        Ok(witness)
    }

    // ==================== Oracles, prices, randomness ====================

    /// Reads external data through the oracle, recording the entry.
    pub fn read_oracle(&mut self, url: &str) -> Result<Vec<u8>, VMError> {
        let content = self
            .oracle
            .read(self.time, url)
            .map_err(|err| VMError::OracleFailure(err.to_string()))?;
        self.oracle_entries.push(OracleEntry {
            url: url.to_string(),
            content: content.clone(),
        });
        Ok(content)
    }

    /// Deterministic pseudo-random sequence seeded from the transaction.
    ///
    /// The lazy seed is `transaction.hash ⊕ entry script ⊕ LE(time)`
    /// byte-wise with wrapping index; subsequent values follow the Lehmer
    /// generator `seed = (16807 * seed) mod (2^31 - 1)`.
    pub fn get_random_number(&mut self) -> BigInt {
        let seed = match self.random_seed {
            None => {
                let mut mixed = self.transaction.hash.0;
                for (i, byte) in self.transaction.script.as_slice().iter().enumerate() {
                    mixed[i % mixed.len()] ^= byte;
                }
                for (i, byte) in self.time.to_le_bytes().iter().enumerate() {
                    mixed[i % mixed.len()] ^= byte;
                }
                u64::from_le_bytes(mixed[..8].try_into().expect("slice is 8 bytes")) % LCG_MODULUS
            }
            Some(previous) => (LCG_MULTIPLIER * previous) % LCG_MODULUS,
        };
        self.random_seed = Some(seed);
        BigInt::from(seed)
    }

    /// Price of a token in fiat units.
    ///
    /// The fiat token is its own unit, the fuel token tracks a fifth of the
    /// staking price, and everything else resolves through the oracle as an
    /// unsigned little-endian integer.
    pub fn get_token_price(&mut self, symbol: &str) -> Result<BigInt, VMError> {
        if symbol == FIAT_SYMBOL {
            return Ok(units::ten_pow(FIAT_DECIMALS));
        }
        if symbol == FUEL_SYMBOL {
            let staking_price = self.get_token_price(STAKING_SYMBOL)?;
            return Ok(staking_price / BigInt::from(5u32));
        }
        if !self.nexus.token_exists(symbol) {
            return Err(VMError::TokenNotFound(symbol.to_string()));
        }
        let bytes = self.read_oracle(&format!("price://{symbol}"))?;
        Ok(BigInt::from(BigUint::from_bytes_le(&bytes)))
    }

    /// Converts `amount` of `base` into `quote` units via fiat prices.
    ///
    /// The product is normalized to fiat decimals, divided by the quote
    /// price, and normalized to quote decimals; division truncates toward
    /// zero. Quoting a token against itself is the identity.
    pub fn get_token_quote(
        &mut self,
        base: &str,
        quote: &str,
        amount: BigInt,
    ) -> Result<BigInt, VMError> {
        if base == quote {
            return Ok(amount);
        }

        let base_info = self
            .nexus
            .get_token_info(base)
            .ok_or_else(|| VMError::TokenNotFound(base.to_string()))?;
        let quote_info = self
            .nexus
            .get_token_info(quote)
            .ok_or_else(|| VMError::TokenNotFound(quote.to_string()))?;

        let base_price = self.get_token_price(base)?;
        let quote_price = self.get_token_price(quote)?;
        if quote_price.is_zero() {
            return Err(VMError::DivisionByZero);
        }

        let mut value = amount * base_price;
        value = units::convert_decimals(&value, base_info.decimals, FIAT_DECIMALS);
        value /= quote_price;
        Ok(units::convert_decimals(&value, FIAT_DECIMALS, quote_info.decimals))
    }

    // ==================== Tokens ====================

    /// Moves tokens inside the change set, or through the interop resolver
    /// when the destination is foreign.
    ///
    /// The source must witness the transaction. Account scripts on either
    /// side veto the transfer through their OnSend/OnReceive triggers, which
    /// returns `false` without faulting.
    pub fn transfer_tokens(
        &mut self,
        symbol: &str,
        source: Address,
        destination: Address,
        amount: &BigInt,
    ) -> Result<bool, VMError> {
        self.expect(amount > &BigInt::zero(), "transfer amount must be positive")?;
        if !self.nexus.token_exists(symbol) {
            return Err(VMError::TokenNotFound(symbol.to_string()));
        }
        if !self.is_witness(source)? {
            return Err(VMError::WitnessFailed(source));
        }

        let trigger_args = vec![
            Value::Address(source),
            Value::Address(destination),
            Value::from(symbol),
            Value::Integer(amount.clone()),
        ];
        if let Some(script) = self.nexus.lookup_address_script(&source) {
            if !self.invoke_trigger(&script, triggers::ON_SEND, trigger_args.clone()) {
                return Ok(false);
            }
        }
        if !destination.is_interop() {
            if let Some(script) = self.nexus.lookup_address_script(&destination) {
                if !self.invoke_trigger(&script, triggers::ON_RECEIVE, trigger_args) {
                    return Ok(false);
                }
            }
        }

        if destination.is_interop() {
            let resolver = self
                .resolver
                .clone()
                .ok_or_else(|| VMError::TransferFailed("no interop resolver".to_string()))?;
            resolver
                .withdraw_tokens(source, destination, symbol, amount)
                .map_err(VMError::TransferFailed)?;
        } else {
            let mut changes = self.changes.borrow_mut();
            self.nexus
                .transfer_tokens(&mut changes, symbol, source, destination, amount)
                .map_err(VMError::TransferFailed)?;
        }
        Ok(true)
    }

    // ==================== Assertions ====================

    /// Contract-level assertion: faults with `message` when `condition` is
    /// false. Debug builds additionally surface the failure in the log.
    pub fn expect(&mut self, condition: bool, message: &str) -> Result<(), VMError> {
        if condition {
            return Ok(());
        }
        #[cfg(debug_assertions)]
        self.logger.error(&format!("runtime assertion failed: {message}"));
        Err(VMError::AssertionFailed(message.to_string()))
    }

    // ==================== Extcalls ====================

    /// Registers a host method reachable through EXTCALL.
    pub fn register_extcall(&mut self, name: impl Into<String>, handler: ExtcallHandler) {
        self.extcalls.insert(name.into(), handler);
    }

    pub(crate) fn extcall_handler(&self, name: &str) -> Option<ExtcallHandler> {
        self.extcalls.get(name).copied()
    }

    /// Storage key for a contract's data entries: domain-separated hash of
    /// the current contract name and the user key.
    fn storage_key(&self, key: &[u8]) -> Vec<u8> {
        let mut h = Hash::sha3();
        h.update(b"DATA");
        h.update(self.current_context.name.as_bytes());
        h.update(key);
        h.finalize().to_vec()
    }

    fn default_extcalls() -> HashMap<String, ExtcallHandler> {
        let mut table: HashMap<String, ExtcallHandler> = HashMap::new();

        table.insert("Runtime.Notify".into(), |rt| {
            let kind_byte = rt.pop_integer()?;
            let kind = kind_byte
                .to_u8()
                .and_then(EventKind::from_byte)
                .ok_or(VMError::DecodeFailed)?;
            let address = rt.pop_address()?;
            let data = rt.pop_bytes()?;
            rt.notify(kind, address, data)
        });
        table.insert("Runtime.IsWitness".into(), |rt| {
            let address = rt.pop_address()?;
            let witness = rt.is_witness(address)?;
            rt.push_value(Value::Bool(witness))
        });
        table.insert("Runtime.Random".into(), |rt| {
            let value = rt.get_random_number();
            rt.push_value(Value::Integer(value))
        });
        table.insert("Runtime.ReadOracle".into(), |rt| {
            let url = rt.pop_string()?;
            let content = rt.read_oracle(&url)?;
            rt.push_value(Value::Bytes(content))
        });
        table.insert("Runtime.Time".into(), |rt| {
            let time = rt.time;
            rt.push_value(Value::Timestamp(time))
        });
        table.insert("Runtime.TransactionHash".into(), |rt| {
            let hash = rt.transaction.hash.to_vec();
            rt.push_value(Value::Bytes(hash))
        });
        table.insert("Runtime.GetTokenPrice".into(), |rt| {
            let symbol = rt.pop_string()?;
            let price = rt.get_token_price(&symbol)?;
            rt.push_value(Value::Integer(price))
        });
        table.insert("Runtime.GetTokenQuote".into(), |rt| {
            let base = rt.pop_string()?;
            let quote = rt.pop_string()?;
            let amount = rt.pop_integer()?;
            let result = rt.get_token_quote(&base, &quote, amount)?;
            rt.push_value(Value::Integer(result))
        });
        table.insert("Runtime.TransferTokens".into(), |rt| {
            let symbol = rt.pop_string()?;
            let source = rt.pop_address()?;
            let destination = rt.pop_address()?;
            let amount = rt.pop_integer()?;
            let moved = rt.transfer_tokens(&symbol, source, destination, &amount)?;
            rt.push_value(Value::Bool(moved))
        });
        table.insert("Runtime.Expect".into(), |rt| {
            let condition = rt.pop_value()?.as_bool()?;
            let message = rt.pop_string()?;
            rt.expect(condition, &message)
        });
        table.insert("Runtime.Log".into(), |rt| {
            let message = rt.pop_string()?;
            rt.logger.info(&message);
            Ok(())
        });
        table.insert("Data.Set".into(), |rt| {
            let key = rt.pop_bytes()?;
            let value = rt.pop_bytes()?;
            let storage_key = rt.storage_key(&key);
            rt.changes.borrow_mut().set(storage_key, value)
        });
        table.insert("Data.Get".into(), |rt| {
            let key = rt.pop_bytes()?;
            let storage_key = rt.storage_key(&key);
            let found = rt.changes.borrow().get(&storage_key);
            rt.push_value(found.map_or(Value::None, Value::Bytes))
        });
        table.insert("Data.Delete".into(), |rt| {
            let key = rt.pop_bytes()?;
            let storage_key = rt.storage_key(&key);
            rt.changes.borrow_mut().delete(storage_key)
        });

        table
    }

    // ==================== Stack helpers ====================

    /// Pushes a value respecting the current frame's growth limit.
    pub fn push_value(&mut self, value: Value) -> Result<(), VMError> {
        let base = self.frames.last().map_or(0, |frame| frame.stack_base);
        self.stack.push(value, base)
    }

    pub fn pop_value(&mut self) -> Result<Value, VMError> {
        self.stack.pop()
    }

    pub fn pop_string(&mut self) -> Result<String, VMError> {
        self.pop_value()?.as_string()
    }

    pub fn pop_integer(&mut self) -> Result<BigInt, VMError> {
        self.pop_value()?.as_integer()
    }

    pub fn pop_address(&mut self) -> Result<Address, VMError> {
        self.pop_value()?.as_address()
    }

    pub fn pop_bytes(&mut self) -> Result<Vec<u8>, VMError> {
        self.pop_value()?.as_byte_vec()
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Handle to the transaction's change set, shared with triggers.
    pub fn changes(&self) -> Rc<RefCell<ChangeSet>> {
        Rc::clone(&self.changes)
    }

    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn oracle_entries(&self) -> &[OracleEntry] {
        &self.oracle_entries
    }

    pub fn fault_message(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn entry_address(&self) -> Address {
        self.entry_address
    }

    pub fn current_context_name(&self) -> &str {
        &self.current_context.name
    }

    /// Name of the context that was running before the last switch.
    pub fn previous_context_name(&self) -> Option<&str> {
        self.previous_context.as_deref().map(|ctx| ctx.name.as_str())
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn time(&self) -> u32 {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::nexus::STAKING_SYMBOL;
    use crate::oracle::interop::InteropTransaction;
    use crate::runtime::events::TokenEventData;
    use crate::test_utils::{
        ALLOW_GAS_COST, SPEND_GAS_COST, TEST_TIME, TestContract, TestEnv, balance_of,
        user_address,
    };
    use crate::types::encoding::Encode;
    use crate::virtual_machine::builder::ScriptBuilder;
    use crate::virtual_machine::isa::Opcode;

    fn gas_context(env: &TestEnv) -> Rc<ExecutionContext> {
        Rc::new(
            env.nexus
                .alloc_contract_by_name(contracts::GAS)
                .expect("gas contract registered"),
        )
    }

    fn escrow_data(price: i64, amount: i64) -> Vec<u8> {
        GasEventData {
            price: BigInt::from(price),
            amount: BigInt::from(amount),
        }
        .to_bytes()
    }

    // ==================== Gas round trips ====================

    #[test]
    fn gas_escrow_payment_round_trip() {
        let env = TestEnv::new();
        let user = user_address("alice");
        let mut runtime = env.runtime_for_script(Bytes::default());
        runtime.current_context = gas_context(&env);

        runtime
            .notify(EventKind::GasEscrow, user, escrow_data(1, 100))
            .unwrap();
        runtime.gas.consume(40).unwrap();
        runtime
            .notify(EventKind::GasPayment, user, escrow_data(0, 40))
            .unwrap();
        runtime.gas.settle().unwrap();

        assert_eq!(runtime.gas.max_gas(), &BigInt::from(100));
        assert_eq!(runtime.gas.used_gas(), &BigInt::from(40));
        assert_eq!(runtime.gas.paid_gas(), &BigInt::from(40));
        assert_eq!(runtime.gas.gas_price(), &BigInt::from(1));
        assert_eq!(runtime.gas.gas_target(), user);
        assert_eq!(runtime.gas.fee_target(), user);
        assert_eq!(runtime.events().len(), 2);
    }

    #[test]
    fn unpaid_gas_faults_and_discards() {
        let env = TestEnv::new();
        let user = user_address("alice");

        let mut builder = ScriptBuilder::new();
        builder.emit_contract_call(
            contracts::GAS,
            "AllowGas",
            &[
                Value::Address(user),
                Value::from(1),
                Value::from(1000),
            ],
        );
        let mut runtime = env.runtime_for_script(builder.build());
        let changes = runtime.changes();

        assert_eq!(runtime.execute(), ExecutionState::Fault);
        assert!(
            runtime
                .fault_message()
                .expect("fault recorded")
                .contains("gas not fully paid")
        );
        assert!(runtime.events().is_empty());
        assert!(!changes.borrow().any());
    }

    #[test]
    fn gas_escrow_payment_script_round_trip() {
        let env = TestEnv::new();
        let user = user_address("alice");

        // Per contract call: 3 gas per argument (LOAD+PUSH), 3 for the
        // method name, 2 to load the contract name, 5 for CTX, 10 for
        // SWITCH, plus the method's declared cost.
        let allow_cost = 3 * 3 + 3 + 2 + 5 + 10 + ALLOW_GAS_COST;
        let spend_cost = 2 * 3 + 3 + 2 + 5 + 10 + SPEND_GAS_COST;
        let total = allow_cost + spend_cost;

        let mut builder = ScriptBuilder::new();
        builder.emit_contract_call(
            contracts::GAS,
            "AllowGas",
            &[
                Value::Address(user),
                Value::from(1),
                Value::from(1000),
            ],
        );
        builder.emit_contract_call(
            contracts::GAS,
            "SpendGas",
            &[Value::Address(user), Value::from(total as i64)],
        );

        let mut runtime = env.runtime_for_script(builder.build());
        assert_eq!(runtime.execute(), ExecutionState::Halt);
        assert_eq!(runtime.gas.used_gas(), &BigInt::from(total));
        assert_eq!(runtime.gas.paid_gas(), &BigInt::from(total));
        assert_eq!(runtime.gas.fee_target(), user);

        let receipt = runtime.receipt();
        assert!(receipt.success);
        assert_eq!(receipt.gas_used, BigInt::from(total));
        assert_eq!(receipt.events.len(), 2);
    }

    #[test]
    fn out_of_gas_mid_script_faults() {
        let env = TestEnv::new();
        let user = user_address("alice");

        let mut builder = ScriptBuilder::new();
        // Escrow a budget too small for what follows.
        builder.emit_contract_call(
            contracts::GAS,
            "AllowGas",
            &[Value::Address(user), Value::from(1), Value::from(40)],
        );
        for _ in 0..20 {
            builder.emit_load(2, &Value::from(1));
        }
        let mut runtime = env.runtime_for_script(builder.build());
        assert_eq!(runtime.execute(), ExecutionState::Fault);
        assert!(runtime.fault_message().unwrap().contains("gas budget exceeded"));
    }

    // ==================== Block operations ====================

    #[test]
    fn block_op_restricts_contexts() {
        let env = TestEnv::new();
        env.nexus.register_native_contract(TestContract::new(
            contracts::VALIDATOR,
            &[("Elect", 1)],
            |_, _| Ok(()),
        ));

        let mut builder = ScriptBuilder::new();
        builder.emit_contract_call(contracts::BLOCK, "OpenBlock", &[]);
        builder.emit_load(0, &Value::from(contracts::VALIDATOR));
        builder.emit_ctx(1, 0);

        let mut runtime = env.runtime_for_script(builder.build());
        assert_eq!(runtime.execute(), ExecutionState::Fault);
        assert!(
            runtime
                .fault_message()
                .unwrap()
                .contains("not available in block operations")
        );
    }

    #[test]
    fn block_op_allows_token_context() {
        let env = TestEnv::new();
        env.nexus.register_native_contract(TestContract::new(
            contracts::TOKEN,
            &[("Mint", 1)],
            |_, _| Ok(()),
        ));

        let mut builder = ScriptBuilder::new();
        builder.emit_contract_call(contracts::BLOCK, "OpenBlock", &[]);
        builder.emit_contract_call(contracts::TOKEN, "Mint", &[]);

        let mut runtime = env.runtime_for_script(builder.build());
        assert_eq!(runtime.execute(), ExecutionState::Halt);
        // Only the opcodes before BlockCreate were metered.
        assert!(runtime.gas.used_gas() < &BigInt::from(40));
    }

    // ==================== Oracle ====================

    #[test]
    fn oracle_price_reads_are_cached() {
        let env = TestEnv::new();
        env.host.set_price(STAKING_SYMBOL, 5.0);
        let mut runtime = env.runtime_for_script(Bytes::default());

        let first = runtime.get_token_price(STAKING_SYMBOL).unwrap();
        let second = runtime.get_token_price(STAKING_SYMBOL).unwrap();

        assert_eq!(env.host.price_pull_count(), 1);
        assert_eq!(first, second);
        assert_eq!(first, BigInt::from(500_000_000u64));
        assert_eq!(runtime.oracle_entries().len(), 2);
        assert_eq!(
            runtime.oracle_entries()[0].content,
            runtime.oracle_entries()[1].content
        );
    }

    #[test]
    fn interop_transfer_synthesis() {
        let env = TestEnv::new();
        env.nexus.register_token("SYM", 8, true);
        let alice = user_address("alice");
        let bob = user_address("bob");

        let tx_hash = Hash::sha3().chain(b"past-tx").finalize();
        let block_hash = Hash::sha3().chain(b"past-block").finalize();
        env.chain.add_block(crate::core::chain::Block {
            hash: block_hash,
            height: 7,
            timestamp: TEST_TIME - 100,
            tx_hashes: vec![tx_hash],
        });
        let payload = |value: i64| {
            TokenEventData {
                symbol: "SYM".into(),
                value: BigInt::from(value),
                chain_name: "root".into(),
            }
            .to_bytes()
        };
        env.chain.add_transaction(
            tx_hash,
            block_hash,
            vec![
                Event::new(EventKind::TokenSend, alice, "token", payload(10)),
                Event::new(EventKind::TokenReceive, bob, "token", payload(10)),
            ],
        );

        let mut runtime = env.runtime_for_script(Bytes::default());
        let url = format!("interop://main/root/tx/{tx_hash}");
        let bytes = runtime.read_oracle(&url).unwrap();

        let interop = InteropTransaction::from_bytes(&bytes).expect("decode failed");
        assert_eq!(interop.platform, "main");
        assert_eq!(interop.chain, "root");
        assert_eq!(interop.hash, tx_hash);
        assert_eq!(interop.transfers.len(), 1);
        let transfer = &interop.transfers[0];
        assert_eq!(transfer.source_address, alice);
        assert_eq!(transfer.destination_address, bob);
        assert_eq!(transfer.symbol, "SYM");
        assert_eq!(transfer.value, BigInt::from(10));
        assert_eq!(transfer.data, None);
    }

    #[test]
    fn oracle_block_by_height_resolves_directly() {
        let env = TestEnv::new();
        let block_hash = Hash::sha3().chain(b"tall-block").finalize();
        env.chain.add_block(crate::core::chain::Block {
            hash: block_hash,
            height: 42,
            timestamp: TEST_TIME - 10,
            tx_hashes: vec![],
        });

        let mut runtime = env.runtime_for_script(Bytes::default());
        let bytes = runtime.read_oracle("interop://main/root/block/42").unwrap();
        let block =
            crate::oracle::interop::InteropBlock::from_bytes(&bytes).expect("decode failed");
        assert_eq!(block.hash, block_hash);
    }

    #[test]
    fn oracle_failure_becomes_vm_fault() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());

        let err = runtime
            .read_oracle("interop://nowhere/root/tx/00")
            .expect_err("unknown platform must fail");
        assert!(matches!(err, VMError::OracleFailure(_)));
        assert!(err.to_string().contains("unknown platform"));
    }

    // ==================== Event authorization ====================

    #[test]
    fn unauthorized_event_emission_faults() {
        let env = TestEnv::new();
        let user = user_address("mallory");

        let mut builder = ScriptBuilder::new();
        builder.emit_contract_call(
            "custom",
            "EmitGasPayment",
            &[Value::Address(user)],
        );

        let mut runtime = env.runtime_for_script(builder.build());
        assert_eq!(runtime.execute(), ExecutionState::Fault);
        assert!(
            runtime
                .fault_message()
                .unwrap()
                .contains("event kind only in gas contract")
        );
    }

    #[test]
    fn events_carry_the_emitting_contract() {
        let env = TestEnv::new();
        let user = user_address("alice");
        let mut runtime = env.runtime_for_script(Bytes::default());
        runtime.current_context = gas_context(&env);

        runtime
            .notify(EventKind::GasEscrow, user, escrow_data(1, 100))
            .unwrap();
        assert_eq!(runtime.events()[0].contract, contracts::GAS);
        assert_eq!(runtime.events()[0].kind, EventKind::GasEscrow);
        assert_eq!(runtime.events()[0].address, user);
    }

    #[test]
    fn custom_events_from_any_contract() {
        let env = TestEnv::new();
        let user = user_address("alice");
        let mut runtime = env.runtime_for_script(Bytes::default());

        runtime
            .notify(EventKind::Custom(3), user, vec![1, 2, 3])
            .unwrap();
        assert_eq!(runtime.events()[0].contract, contracts::ENTRY);
    }

    #[test]
    fn oversized_custom_kind_is_rejected_at_emission() {
        let env = TestEnv::new();
        let user = user_address("alice");
        let mut runtime = env.runtime_for_script(Bytes::default());

        let result = runtime.notify(EventKind::Custom(200), user, vec![]);
        assert!(matches!(result, Err(VMError::InvalidEventKind(200))));
        assert!(runtime.events().is_empty());
    }

    // ==================== Witnesses ====================

    #[test]
    fn signer_witnesses_and_is_memoized() {
        let env = TestEnv::new();
        let alice = user_address("alice");
        let mallory = user_address("mallory");
        let mut runtime = env.runtime_for_signed_script(Bytes::default(), vec![alice]);

        assert!(runtime.is_witness(alice).unwrap());
        assert!(runtime.witnesses.contains(&alice));
        assert!(runtime.is_witness(alice).unwrap());
        assert_eq!(runtime.witnesses.len(), 1);
        assert!(!runtime.is_witness(mallory).unwrap());
    }

    #[test]
    fn interop_addresses_never_witness() {
        let env = TestEnv::new();
        let foreign = Address::interop(Hash::sha3().chain(b"eth").finalize());
        let mut runtime = env.runtime_for_signed_script(Bytes::default(), vec![foreign]);
        assert!(!runtime.is_witness(foreign).unwrap());
    }

    #[test]
    fn system_witness_follows_current_context() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());
        runtime.current_context = gas_context(&env);

        assert!(runtime.is_witness(Address::from_contract_name(contracts::GAS)).unwrap());
        assert!(!runtime.is_witness(Address::from_contract_name("other")).unwrap());
        // The chain address never passes a system check.
        assert!(!runtime.is_witness(env.chain.address()).unwrap());
    }

    #[test]
    fn account_script_witnesses_through_trigger() {
        let env = TestEnv::new();
        let alice = user_address("alice");
        // An account script that halts immediately approves.
        env.nexus.register_address_script(alice, Bytes::default());
        let mut runtime = env.runtime_for_script(Bytes::default());
        assert!(runtime.is_witness(alice).unwrap());

        // One that throws vetoes, and the signer fallback still applies.
        let bob = user_address("bob");
        let mut builder = ScriptBuilder::new();
        builder.emit_load(0, &Value::from("no"));
        builder.emit_throw(0);
        env.nexus.register_address_script(bob, builder.build());
        assert!(!runtime.is_witness(bob).unwrap());
    }

    // ==================== Triggers ====================

    #[test]
    fn trigger_events_merge_after_parent_events() {
        let env = TestEnv::new();
        let user = user_address("alice");
        let mut runtime = env.runtime_for_script(Bytes::default());

        runtime.notify(EventKind::Custom(1), user, vec![]).unwrap();

        let mut builder = ScriptBuilder::new();
        builder.emit_interop(
            "Runtime.Notify",
            &[
                Value::from((CUSTOM_BASE_BYTE + 2) as i64),
                Value::Address(user),
                Value::Bytes(vec![9]),
            ],
        );
        let fired = runtime.invoke_trigger(&builder.build(), "OnTest", vec![]);

        assert!(fired);
        assert_eq!(runtime.events().len(), 2);
        assert_eq!(runtime.events()[0].kind, EventKind::Custom(1));
        assert_eq!(runtime.events()[1].kind, EventKind::Custom(2));
        assert_eq!(runtime.events()[1].contract, contracts::ACCOUNT);
    }

    const CUSTOM_BASE_BYTE: u8 = crate::runtime::events::CUSTOM_EVENT_BASE;

    #[test]
    fn trigger_fault_is_contained_but_costs_gas() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());

        let mut builder = ScriptBuilder::new();
        builder.emit_load(0, &Value::from(1));
        builder.emit_load(0, &Value::from("boom"));
        builder.emit_throw(0);
        let fired = runtime.invoke_trigger(&builder.build(), "OnTest", vec![]);

        assert!(!fired);
        assert!(runtime.events().is_empty());
        // LOAD + LOAD + THROW charged into the parent.
        assert_eq!(runtime.gas.used_gas(), &BigInt::from(5));
    }

    // ==================== Randomness ====================

    #[test]
    fn random_sequence_is_deterministic() {
        let env = TestEnv::new();
        let script = {
            let mut builder = ScriptBuilder::new();
            builder.emit(Opcode::Nop);
            builder.build()
        };
        let mut first = env.runtime_for_script(script.clone());
        let mut second = env.runtime_for_script(script);

        let a: Vec<BigInt> = (0..5).map(|_| first.get_random_number()).collect();
        let b: Vec<BigInt> = (0..5).map(|_| second.get_random_number()).collect();
        assert_eq!(a, b);

        // A different entry script produces a different sequence.
        let mut other = env.runtime_for_script(Bytes::new(vec![0x00, 0x00]));
        let c: Vec<BigInt> = (0..5).map(|_| other.get_random_number()).collect();
        assert_ne!(a, c);
    }

    #[test]
    fn random_advances_with_lehmer_step() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());
        let first = runtime.get_random_number();
        let second = runtime.get_random_number();
        let expected = (first * BigInt::from(16807u32)) % BigInt::from(0x7FFF_FFFFu32);
        assert_eq!(second, expected);
    }

    // ==================== Prices and quotes ====================

    #[test]
    fn fiat_and_fuel_prices() {
        let env = TestEnv::new();
        env.host.set_price(STAKING_SYMBOL, 5.0);
        let mut runtime = env.runtime_for_script(Bytes::default());

        assert_eq!(
            runtime.get_token_price(FIAT_SYMBOL).unwrap(),
            units::ten_pow(FIAT_DECIMALS)
        );
        assert_eq!(
            runtime.get_token_price(FUEL_SYMBOL).unwrap(),
            BigInt::from(100_000_000u64)
        );
    }

    #[test]
    fn unknown_token_price_faults() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());
        assert!(matches!(
            runtime.get_token_price("NOPE"),
            Err(VMError::TokenNotFound(_))
        ));
    }

    #[test]
    fn quote_against_itself_is_identity() {
        let env = TestEnv::new();
        let mut runtime = env.runtime_for_script(Bytes::default());
        for amount in [0i64, 1, 123_456_789] {
            assert_eq!(
                runtime
                    .get_token_quote(STAKING_SYMBOL, STAKING_SYMBOL, BigInt::from(amount))
                    .unwrap(),
                BigInt::from(amount)
            );
        }
    }

    #[test]
    fn quote_converts_through_fiat() {
        let env = TestEnv::new();
        env.host.set_price(STAKING_SYMBOL, 5.0);
        let mut runtime = env.runtime_for_script(Bytes::default());

        // One whole staking token (8 decimals) at 5 USD: 5 USD in fiat units.
        let amount = units::ten_pow(8);
        let quoted = runtime
            .get_token_quote(STAKING_SYMBOL, FIAT_SYMBOL, amount)
            .unwrap();
        assert_eq!(quoted, BigInt::from(500_000_000u64));
    }

    // ==================== Token transfers ====================

    #[test]
    fn transfer_moves_balances_in_change_set() {
        let env = TestEnv::new();
        let alice = user_address("alice");
        let bob = user_address("bob");
        env.nexus.seed_balance(STAKING_SYMBOL, &alice, BigInt::from(100));

        let mut runtime = env.runtime_for_signed_script(Bytes::default(), vec![alice]);
        let changes = runtime.changes();
        let moved = runtime
            .transfer_tokens(STAKING_SYMBOL, alice, bob, &BigInt::from(30))
            .unwrap();

        assert!(moved);
        let changes = changes.borrow();
        assert_eq!(balance_of(&changes, STAKING_SYMBOL, &alice), BigInt::from(70));
        assert_eq!(balance_of(&changes, STAKING_SYMBOL, &bob), BigInt::from(30));
    }

    #[test]
    fn transfer_without_witness_faults() {
        let env = TestEnv::new();
        let alice = user_address("alice");
        let bob = user_address("bob");
        env.nexus.seed_balance(STAKING_SYMBOL, &alice, BigInt::from(100));

        let mut runtime = env.runtime_for_script(Bytes::default());
        assert!(matches!(
            runtime.transfer_tokens(STAKING_SYMBOL, alice, bob, &BigInt::from(30)),
            Err(VMError::WitnessFailed(_))
        ));
    }

    #[test]
    fn receiver_script_can_veto_transfer() {
        let env = TestEnv::new();
        let alice = user_address("alice");
        let bob = user_address("bob");
        env.nexus.seed_balance(STAKING_SYMBOL, &alice, BigInt::from(100));

        let mut builder = ScriptBuilder::new();
        builder.emit_load(0, &Value::from("rejected"));
        builder.emit_throw(0);
        env.nexus.register_address_script(bob, builder.build());

        let mut runtime = env.runtime_for_signed_script(Bytes::default(), vec![alice]);
        let changes = runtime.changes();
        let moved = runtime
            .transfer_tokens(STAKING_SYMBOL, alice, bob, &BigInt::from(30))
            .unwrap();

        assert!(!moved);
        assert!(!changes.borrow().any());
    }

    #[test]
    fn interop_destination_routes_through_resolver() {
        struct RecordingResolver {
            calls: std::sync::Mutex<Vec<(Address, Address, String, BigInt)>>,
        }
        impl InteropResolver for RecordingResolver {
            fn withdraw_tokens(
                &self,
                source: Address,
                destination: Address,
                symbol: &str,
                amount: &BigInt,
            ) -> Result<(), String> {
                self.calls.lock().unwrap().push((
                    source,
                    destination,
                    symbol.to_string(),
                    amount.clone(),
                ));
                Ok(())
            }
        }

        let env = TestEnv::new();
        let alice = user_address("alice");
        let foreign = Address::interop(Hash::sha3().chain(b"eth:0xabc").finalize());
        let resolver = Arc::new(RecordingResolver {
            calls: std::sync::Mutex::new(Vec::new()),
        });

        let mut runtime = env
            .runtime_for_signed_script(Bytes::default(), vec![alice])
            .with_resolver(resolver.clone());
        let changes = runtime.changes();
        let moved = runtime
            .transfer_tokens(STAKING_SYMBOL, alice, foreign, &BigInt::from(9))
            .unwrap();

        assert!(moved);
        assert!(!changes.borrow().any());
        let calls = resolver.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (alice, foreign, STAKING_SYMBOL.to_string(), BigInt::from(9)));
    }

    // ==================== Fault hygiene ====================

    #[test]
    fn fault_discards_storage_writes() {
        let env = TestEnv::new();

        let mut builder = ScriptBuilder::new();
        builder.emit_interop(
            "Data.Set",
            &[
                Value::Bytes(b"key".to_vec()),
                Value::Bytes(b"value".to_vec()),
            ],
        );
        builder.emit_load(0, &Value::from("abort"));
        builder.emit_throw(0);

        let mut runtime = env.runtime_for_script(builder.build());
        let changes = runtime.changes();
        assert_eq!(runtime.execute(), ExecutionState::Fault);
        assert!(!changes.borrow().any());
        assert!(env.store.is_empty());

        let receipt = runtime.receipt();
        assert!(!receipt.success);
        assert!(receipt.error.as_deref().unwrap().contains("abort"));
        assert!(receipt.events.is_empty());
    }

    #[test]
    fn halt_keeps_storage_writes() {
        let env = TestEnv::new();
        env.nexus.set_genesis(false); // free gas, no escrow needed

        let mut builder = ScriptBuilder::new();
        builder.emit_interop(
            "Data.Set",
            &[
                Value::Bytes(b"key".to_vec()),
                Value::Bytes(b"value".to_vec()),
            ],
        );
        let mut runtime = env.runtime_for_script(builder.build());
        let changes = runtime.changes();
        assert_eq!(runtime.execute(), ExecutionState::Halt);
        assert!(changes.borrow().any());
        changes.borrow_mut().merge().unwrap();
        assert_eq!(env.store.len(), 1);
    }

    #[test]
    fn call_context_returns_top_of_stack() {
        let env = TestEnv::new();
        env.nexus.register_native_contract(TestContract::new(
            "echo",
            &[("Double", 2)],
            |runtime, _| {
                let value = runtime.pop_integer()?;
                runtime.push_value(Value::Integer(value * 2))
            },
        ));
        env.nexus.set_genesis(false);

        let mut runtime = env.runtime_for_script(Bytes::default());
        let result = runtime
            .call_context("echo", "Double", vec![Value::from(21)])
            .unwrap();
        assert_eq!(result, Value::from(42));
        assert_eq!(runtime.current_context_name(), contracts::ENTRY);
    }

    #[test]
    fn bomb_calls_rewind_gas() {
        let env = TestEnv::new();
        env.nexus.register_native_contract(TestContract::new(
            contracts::BOMB,
            &[("Feed", 50)],
            |_, _| Ok(()),
        ));

        let mut runtime = env.runtime_for_script(Bytes::default());
        runtime.gas.consume(7).unwrap();
        runtime
            .call_context(contracts::BOMB, "Feed", vec![])
            .unwrap();
        assert_eq!(runtime.gas.used_gas(), &BigInt::from(7));
    }
}
