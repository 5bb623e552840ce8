//! Gas metering: per-opcode charges, escrow, and settlement.

use crate::types::address::Address;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Opcode;
use num_bigint::BigInt;
use num_traits::Zero;

/// Budget granted before any escrow event has run. Covers the opcodes a
/// transaction spends reaching its gas escrow call.
pub const INITIAL_GAS_BUDGET: u64 = 10_000;

/// Tracks gas consumption and payment for one transaction.
///
/// All quantities are arbitrary-precision: escrow and payment amounts arrive
/// from event payloads and are never truncated. The meter never goes
/// negative; charges only accumulate.
pub struct GasMeter {
    used_gas: BigInt,
    paid_gas: BigInt,
    max_gas: BigInt,
    gas_price: BigInt,
    minimum_fee: BigInt,
    gas_target: Address,
    fee_target: Address,
    /// Child runtimes (triggers) run with payment deferred to the parent.
    delay_payment: bool,
    /// Gas is free before genesis is established and in read-only mode.
    free: bool,
    /// Set when a BlockCreate event enters block-operation mode; all
    /// further opcodes are free.
    block_operation: bool,
}

impl GasMeter {
    pub fn new(minimum_fee: BigInt, free: bool) -> Self {
        Self {
            used_gas: BigInt::zero(),
            paid_gas: BigInt::zero(),
            max_gas: BigInt::from(INITIAL_GAS_BUDGET),
            gas_price: BigInt::zero(),
            minimum_fee,
            gas_target: Address::null(),
            fee_target: Address::null(),
            delay_payment: false,
            free,
            block_operation: false,
        }
    }

    /// Charges the consensus cost of an opcode.
    pub fn validate_opcode(&mut self, opcode: Opcode) -> Result<(), VMError> {
        self.consume(opcode.gas_cost())
    }

    /// Debits `amount` from the budget.
    ///
    /// Exceeding the budget faults unless payment is delayed. Free-mode and
    /// block-operation charges are dropped entirely.
    pub fn consume(&mut self, amount: u64) -> Result<(), VMError> {
        if self.free || self.block_operation {
            return Ok(());
        }
        self.used_gas += amount;
        if self.used_gas > self.max_gas && !self.delay_payment {
            return Err(VMError::OutOfGas);
        }
        Ok(())
    }

    /// Applies a GasEscrow event: installs the budget, price, and target.
    pub fn escrow(&mut self, price: BigInt, amount: BigInt, target: Address) -> Result<(), VMError> {
        if price < self.minimum_fee {
            return Err(VMError::GasPriceTooLow);
        }
        self.max_gas = amount;
        self.gas_price = price;
        self.gas_target = target;
        Ok(())
    }

    /// Applies a GasPayment event: accumulates paid gas.
    pub fn payment(&mut self, amount: BigInt) {
        self.paid_gas += amount;
    }

    /// Checks the halt condition: used gas must be covered by payments.
    ///
    /// Block operations settle through block rewards, not gas payments.
    pub fn settle(&self) -> Result<(), VMError> {
        if self.free || self.delay_payment || self.block_operation {
            return Ok(());
        }
        if self.paid_gas < self.used_gas {
            return Err(VMError::UnpaidGas);
        }
        Ok(())
    }

    /// Folds a child meter's consumption into this one, propagating trigger
    /// cost to the caller.
    pub fn absorb(&mut self, child: &GasMeter) {
        self.used_gas += &child.used_gas;
    }

    pub fn used_gas(&self) -> &BigInt {
        &self.used_gas
    }

    pub fn paid_gas(&self) -> &BigInt {
        &self.paid_gas
    }

    pub fn max_gas(&self) -> &BigInt {
        &self.max_gas
    }

    pub fn gas_price(&self) -> &BigInt {
        &self.gas_price
    }

    pub fn minimum_fee(&self) -> &BigInt {
        &self.minimum_fee
    }

    pub fn gas_target(&self) -> Address {
        self.gas_target
    }

    pub fn fee_target(&self) -> Address {
        self.fee_target
    }

    pub fn set_fee_target(&mut self, address: Address) {
        self.fee_target = address;
    }

    pub fn delay_payment(&self) -> bool {
        self.delay_payment
    }

    pub fn set_delay_payment(&mut self, delay: bool) {
        self.delay_payment = delay;
    }

    pub fn in_block_operation(&self) -> bool {
        self.block_operation
    }

    pub fn enter_block_operation(&mut self) {
        self.block_operation = true;
    }

    /// Restores used gas to an earlier snapshot. Used by the bomb-contract
    /// exemption, which rewinds the cost of the whole call.
    pub fn rewind(&mut self, snapshot: BigInt) {
        self.used_gas = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter() -> GasMeter {
        GasMeter::new(BigInt::from(1), false)
    }

    #[test]
    fn charges_accumulate() {
        let mut gas = meter();
        gas.validate_opcode(Opcode::Switch).unwrap();
        gas.validate_opcode(Opcode::Ctx).unwrap();
        assert_eq!(gas.used_gas(), &BigInt::from(15));
    }

    #[test]
    fn over_budget_faults() {
        let mut gas = meter();
        gas.escrow(BigInt::from(1), BigInt::from(3), Address::null())
            .unwrap();
        gas.consume(3).unwrap();
        assert!(matches!(gas.consume(1), Err(VMError::OutOfGas)));
    }

    #[test]
    fn delay_payment_suspends_budget() {
        let mut gas = meter();
        gas.escrow(BigInt::from(1), BigInt::from(1), Address::null())
            .unwrap();
        gas.set_delay_payment(true);
        gas.consume(100).unwrap();
        assert_eq!(gas.used_gas(), &BigInt::from(100));
    }

    #[test]
    fn free_mode_charges_nothing() {
        let mut gas = GasMeter::new(BigInt::from(1), true);
        gas.consume(1_000_000).unwrap();
        assert!(gas.used_gas().is_zero());
        gas.settle().unwrap();
    }

    #[test]
    fn block_operation_charges_nothing() {
        let mut gas = meter();
        gas.consume(5).unwrap();
        gas.enter_block_operation();
        gas.consume(1_000_000).unwrap();
        assert_eq!(gas.used_gas(), &BigInt::from(5));
    }

    #[test]
    fn escrow_rejects_price_below_minimum() {
        let mut gas = GasMeter::new(BigInt::from(10), false);
        assert!(matches!(
            gas.escrow(BigInt::from(9), BigInt::from(100), Address::null()),
            Err(VMError::GasPriceTooLow)
        ));
    }

    #[test]
    fn settle_requires_full_payment() {
        let mut gas = meter();
        gas.escrow(BigInt::from(1), BigInt::from(100), Address::null())
            .unwrap();
        gas.consume(40).unwrap();
        assert!(matches!(gas.settle(), Err(VMError::UnpaidGas)));
        gas.payment(BigInt::from(40));
        gas.settle().unwrap();
    }

    #[test]
    fn absorb_propagates_child_cost() {
        let mut parent = meter();
        parent.consume(10).unwrap();
        let mut child = meter();
        child.set_delay_payment(true);
        child.consume(25).unwrap();
        parent.absorb(&child);
        assert_eq!(parent.used_gas(), &BigInt::from(35));
    }
}
