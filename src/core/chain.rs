//! Chain access as seen from inside the execution core.

use crate::core::transaction::Transaction;
use crate::runtime::events::Event;
use crate::types::address::Address;
use crate::types::hash::Hash;
use chaincore_derive::Wire;

/// Minimal block view the core and the oracle consume.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct Block {
    pub hash: Hash,
    pub height: u64,
    pub timestamp: u32,
    pub tx_hashes: Vec<Hash>,
}

/// Read access to the chain the transaction executes on.
///
/// Implemented by the node's block storage; the core only ever reads.
pub trait ChainStore: Send + Sync {
    /// Name of this chain; its address derives from it.
    fn name(&self) -> &str;

    /// The chain's own system address. Gas payments routed here are burned
    /// rather than forwarded to a fee target.
    fn address(&self) -> Address {
        Address::from_contract_name(self.name())
    }

    fn get_block_by_hash(&self, hash: &Hash) -> Option<Block>;

    fn get_block_by_height(&self, height: u64) -> Option<Block>;

    fn get_transaction_by_hash(&self, hash: &Hash) -> Option<Transaction>;

    /// Returns the hash of the block that included the transaction.
    fn get_block_hash_of_transaction(&self, tx_hash: &Hash) -> Option<Hash>;

    /// Returns the events a past transaction emitted, in emission order.
    fn get_events_for_transaction(&self, tx_hash: &Hash) -> Vec<Event>;
}
