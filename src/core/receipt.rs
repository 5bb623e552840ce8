//! Transaction execution receipts.
//!
//! Every executed transaction produces a [`Receipt`] recording the terminal
//! state, gas consumption, the emitted events, and, for reverted
//! transactions, the fault message. Receipts are what the node layer stores
//! alongside the block.

use crate::runtime::events::Event;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use chaincore_derive::Wire;
use num_bigint::BigInt;

/// Record of a single transaction's execution result.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct Receipt {
    /// Hash of the transaction that produced this receipt.
    pub tx_hash: Hash,
    /// True when execution halted successfully; false for a revert.
    pub success: bool,
    /// Gas consumed by the transaction, triggers included.
    pub gas_used: BigInt,
    /// Fault message with the triggering opcode, for reverted transactions.
    pub error: Option<String>,
    /// Events emitted during execution, in emission order. Empty on fault.
    pub events: Vec<Event>,
}

impl Receipt {
    /// Computes a domain-separated hash of this receipt.
    ///
    /// The `"RECEIPT"` prefix prevents collisions with other hash domains.
    pub fn hash(&self) -> Hash {
        let mut h = Hash::sha3();
        h.update(b"RECEIPT");
        self.encode(&mut h);
        h.finalize()
    }
}
