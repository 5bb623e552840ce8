//! Entities the oracle synthesizes from cross-chain reads.

use crate::types::address::Address;
use crate::types::hash::Hash;
use chaincore_derive::Wire;
use num_bigint::BigInt;

/// One settled token movement observed on a platform.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct InteropTransfer {
    pub source_address: Address,
    pub destination_address: Address,
    pub symbol: String,
    pub value: BigInt,
    /// Serialized item content for non-fungible transfers, absent otherwise.
    pub data: Option<Vec<u8>>,
}

/// A foreign or local transaction reduced to its token movements.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct InteropTransaction {
    pub platform: String,
    pub chain: String,
    pub hash: Hash,
    pub transfers: Vec<InteropTransfer>,
}

/// A foreign or local block reduced to its transaction list.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct InteropBlock {
    pub platform: String,
    pub chain: String,
    pub hash: Hash,
    pub tx_hashes: Vec<Hash>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn transaction_wire_round_trip() {
        let tx = InteropTransaction {
            platform: "main".into(),
            chain: "root".into(),
            hash: Hash::sha3().chain(b"tx").finalize(),
            transfers: vec![InteropTransfer {
                source_address: Address::from_contract_name("a"),
                destination_address: Address::from_contract_name("b"),
                symbol: "SOUL".into(),
                value: BigInt::from(10),
                data: None,
            }],
        };
        let decoded = InteropTransaction::from_bytes(&tx.to_bytes()).expect("decode failed");
        assert_eq!(decoded, tx);
    }

    #[test]
    fn block_wire_round_trip() {
        let block = InteropBlock {
            platform: "main".into(),
            chain: "root".into(),
            hash: Hash::sha3().chain(b"block").finalize(),
            tx_hashes: vec![Hash::sha3().chain(b"tx").finalize()],
        };
        let decoded = InteropBlock::from_bytes(&block.to_bytes()).expect("decode failed");
        assert_eq!(decoded, block);
    }
}
