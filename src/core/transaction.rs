//! Transactions as the execution core consumes them.
//!
//! Signature verification happens in the node layer before execution; the
//! core receives the already-verified signer set and treats it as the
//! transaction's witness base.

use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use chaincore_derive::Wire;

/// A transaction scheduled for execution.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct Transaction {
    /// Content hash identifying the transaction.
    pub hash: Hash,
    /// Entry script executed by the runtime.
    pub script: Bytes,
    /// Unix time after which the transaction is no longer valid.
    pub expiration: u32,
    /// Addresses whose signatures over this transaction verified.
    pub signers: Vec<Address>,
}

impl Transaction {
    /// Creates a transaction, deriving its hash from the payload.
    pub fn new(script: Bytes, expiration: u32, signers: Vec<Address>) -> Self {
        let hash = Self::hash_parts(&script, expiration, &signers);
        Self {
            hash,
            script,
            expiration,
            signers,
        }
    }

    /// Computes the domain-separated content hash.
    fn hash_parts(script: &Bytes, expiration: u32, signers: &[Address]) -> Hash {
        let mut h = Hash::sha3();
        h.update(b"TX");
        h.update(script.as_slice());
        h.update(&expiration.to_le_bytes());
        for signer in signers {
            signer.encode(&mut h);
        }
        h.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::Decode;

    #[test]
    fn hash_covers_all_parts() {
        let signer = Address::from_contract_name("entry");
        let a = Transaction::new(Bytes::new(vec![1, 2]), 100, vec![signer]);
        let b = Transaction::new(Bytes::new(vec![1, 2]), 101, vec![signer]);
        let c = Transaction::new(Bytes::new(vec![1, 3]), 100, vec![signer]);
        let d = Transaction::new(Bytes::new(vec![1, 2]), 100, vec![]);
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_ne!(a.hash, d.hash);
    }

    #[test]
    fn wire_round_trip() {
        let tx = Transaction::new(Bytes::new(vec![9]), 7, vec![Address::null()]);
        let decoded = Transaction::from_bytes(&tx.to_bytes()).expect("decode failed");
        assert_eq!(decoded, tx);
    }
}
