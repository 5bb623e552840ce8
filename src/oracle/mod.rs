//! Deterministic oracle reader.
//!
//! External data enters the VM exclusively through [`OracleReader::read`].
//! Results are canonicalized to bytes and interned per URL, so a URL
//! observed twice inside one block returns identical bytes no matter how
//! many VMs race on it: the cache map serializes inserts and the first
//! writer wins. [`OracleReader::clear`] wipes the cache between blocks.

pub mod interop;

use crate::core::chain::ChainStore;
use crate::core::nexus::{FIAT_DECIMALS, LOCAL_PLATFORM, Nexus, ROOT_CHAIN};
use crate::core::units;
use crate::oracle::interop::{InteropBlock, InteropTransaction, InteropTransfer};
use crate::runtime::events::{Event, EventKind, PackedNFTData, TokenEventData};
use crate::types::encoding::{Decode, Encode, bigint_to_flagged_le};
use crate::types::hash::Hash;
use crate::utils::log::Logger;
use chaincore_derive::{Error, Wire};
use dashmap::DashMap;
use std::sync::Arc;

/// One recorded oracle read: the URL and the bytes it resolved to.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct OracleEntry {
    pub url: String,
    pub content: Vec<u8>,
}

/// Failures raised while resolving an oracle URL.
///
/// The runtime converts these into VM faults, preserving the message.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("malformed oracle url: {0}")]
    MalformedUrl(String),
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("unknown token: {0}")]
    UnknownToken(String),
    #[error("unknown oracle command: {0}")]
    UnknownCommand(String),
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("no matching receive for {0} transfer")]
    UnmatchedTransfer(String),
    #[error("missing packed nft payload for {0}")]
    MissingNftData(String),
    #[error("malformed event payload in oracle source")]
    MalformedEvent,
    #[error("oracle fetch failed: {0}")]
    FetchFailed(String),
}

/// Host hooks the oracle pulls external data through.
///
/// Everything behind this trait is non-deterministic; the reader's cache is
/// what makes the results stable within a block.
pub trait OracleHost: Send + Sync {
    /// Current price of a token in fiat units.
    fn pull_price(&self, time: u32, symbol: &str) -> Result<f64, OracleError>;

    /// Arbitrary URL fetch for feeds outside the canonical grammar.
    fn pull_data(&self, time: u32, url: &str) -> Result<Vec<u8>, OracleError>;

    /// Fetches a block from a non-local platform, by hash or height.
    fn pull_platform_block(
        &self,
        platform: &str,
        chain: &str,
        hash: Option<Hash>,
        height: Option<u64>,
    ) -> Result<Vec<u8>, OracleError>;

    /// Fetches a transaction from a non-local platform.
    fn pull_platform_transaction(
        &self,
        platform: &str,
        chain: &str,
        hash: &Hash,
    ) -> Result<Vec<u8>, OracleError>;

    /// Height up to which a foreign chain has been observed.
    fn get_current_height(&self, platform: &str, chain: &str) -> u64;

    /// Records the height up to which a foreign chain has been consumed.
    fn set_current_height(&self, platform: &str, chain: &str, height: u64);

    /// Serialized blocks observed on a foreign chain since the recorded
    /// height, oldest first.
    fn read_all_blocks(&self, platform: &str, chain: &str) -> Vec<Vec<u8>>;
}

/// Deterministic cache of external reads keyed by URL.
///
/// Shared by every VM in the node; the cache map is its only mutable state.
pub struct OracleReader {
    host: Arc<dyn OracleHost>,
    nexus: Arc<dyn Nexus>,
    chain: Arc<dyn ChainStore>,
    cache: DashMap<String, Vec<u8>>,
    logger: Logger,
}

impl OracleReader {
    pub fn new(
        host: Arc<dyn OracleHost>,
        nexus: Arc<dyn Nexus>,
        chain: Arc<dyn ChainStore>,
    ) -> Self {
        Self {
            host,
            nexus,
            chain,
            cache: DashMap::new(),
            logger: Logger::new("oracle"),
        }
    }

    /// Resolves a URL, consulting the cache first.
    ///
    /// On a miss the content is fetched, interned, and returned. A racing
    /// insert keeps the first writer's bytes, so every caller observes the
    /// same content for the lifetime of the cache.
    pub fn read(&self, time: u32, url: &str) -> Result<Vec<u8>, OracleError> {
        if let Some(hit) = self.cache.get(url) {
            return Ok(hit.value().clone());
        }
        let content = self.fetch(time, url).inspect_err(|err| {
            self.logger.warn(&format!("read of {url} failed: {err}"));
        })?;
        let entry = self.cache.entry(url.to_string()).or_insert(content);
        Ok(entry.value().clone())
    }

    /// Wipes all cached entries. Called between blocks.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of interned URLs.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn fetch(&self, time: u32, url: &str) -> Result<Vec<u8>, OracleError> {
        if let Some(symbol) = url.strip_prefix("price://") {
            return self.fetch_price(time, symbol);
        }
        if let Some(rest) = url.strip_prefix("interop://") {
            return self.fetch_interop(rest);
        }
        self.host.pull_data(time, url)
    }

    fn fetch_price(&self, time: u32, symbol: &str) -> Result<Vec<u8>, OracleError> {
        if symbol.is_empty() || symbol.contains('/') {
            return Err(OracleError::MalformedUrl(format!("price://{symbol}")));
        }
        if !self.nexus.token_exists(symbol) {
            return Err(OracleError::UnknownToken(symbol.to_string()));
        }
        let price = self.host.pull_price(time, symbol)?;
        Ok(bigint_to_flagged_le(&units::to_big_int(price, FIAT_DECIMALS)))
    }

    fn fetch_interop(&self, rest: &str) -> Result<Vec<u8>, OracleError> {
        let parts: Vec<&str> = rest.split('/').collect();
        let [platform, chain, cmd, arg] = parts.as_slice() else {
            return Err(OracleError::MalformedUrl(format!("interop://{rest}")));
        };
        if !self.nexus.platform_exists(platform) {
            return Err(OracleError::UnknownPlatform(platform.to_string()));
        }

        if *platform == LOCAL_PLATFORM {
            return match *cmd {
                "tx" | "transaction" => self.local_transaction(arg),
                "block" => self.local_block(arg),
                other => Err(OracleError::UnknownCommand(other.to_string())),
            };
        }

        match *cmd {
            "tx" | "transaction" => {
                let hash = Hash::from_hex(arg)
                    .ok_or_else(|| OracleError::MalformedUrl(arg.to_string()))?;
                self.host.pull_platform_transaction(platform, chain, &hash)
            }
            "block" => match parse_block_arg(arg) {
                Some(BlockArg::Height(height)) => {
                    self.host.pull_platform_block(platform, chain, None, Some(height))
                }
                Some(BlockArg::Hash(hash)) => {
                    self.host.pull_platform_block(platform, chain, Some(hash), None)
                }
                None => Err(OracleError::MalformedUrl(arg.to_string())),
            },
            other => Err(OracleError::UnknownCommand(other.to_string())),
        }
    }

    /// Reduces a local transaction to its interop transfers by pairing each
    /// TokenSend with a TokenReceive or TokenStake of the same symbol and
    /// value. Non-fungible symbols additionally attach their PackedNFT
    /// payload.
    fn local_transaction(&self, arg: &str) -> Result<Vec<u8>, OracleError> {
        let hash =
            Hash::from_hex(arg).ok_or_else(|| OracleError::MalformedUrl(arg.to_string()))?;
        let block_hash = self
            .chain
            .get_block_hash_of_transaction(&hash)
            .ok_or_else(|| OracleError::TransactionNotFound(arg.to_string()))?;
        self.chain
            .get_block_by_hash(&block_hash)
            .ok_or_else(|| OracleError::BlockNotFound(block_hash.to_string()))?;

        let events = self.chain.get_events_for_transaction(&hash);
        let transfers = synthesize_transfers(&events, |symbol| {
            self.nexus
                .get_token_info(symbol)
                .map(|info| info.fungible)
        })?;

        let result = InteropTransaction {
            platform: LOCAL_PLATFORM.to_string(),
            chain: ROOT_CHAIN.to_string(),
            hash,
            transfers,
        };
        Ok(result.to_bytes())
    }

    fn local_block(&self, arg: &str) -> Result<Vec<u8>, OracleError> {
        let block = match parse_block_arg(arg) {
            Some(BlockArg::Height(height)) => self.chain.get_block_by_height(height),
            Some(BlockArg::Hash(hash)) => self.chain.get_block_by_hash(&hash),
            None => return Err(OracleError::MalformedUrl(arg.to_string())),
        }
        .ok_or_else(|| OracleError::BlockNotFound(arg.to_string()))?;

        let result = InteropBlock {
            platform: LOCAL_PLATFORM.to_string(),
            chain: ROOT_CHAIN.to_string(),
            hash: block.hash,
            tx_hashes: block.tx_hashes,
        };
        Ok(result.to_bytes())
    }
}

enum BlockArg {
    Height(u64),
    Hash(Hash),
}

/// A block argument is a decimal height or a hex hash.
fn parse_block_arg(arg: &str) -> Option<BlockArg> {
    if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
        return arg.parse().ok().map(BlockArg::Height);
    }
    Hash::from_hex(arg).map(BlockArg::Hash)
}

/// Pairs the token events of one transaction into transfers.
///
/// `fungibility` resolves a symbol to `Some(is_fungible)`, or `None` for an
/// unregistered token.
fn synthesize_transfers(
    events: &[Event],
    fungibility: impl Fn(&str) -> Option<bool>,
) -> Result<Vec<InteropTransfer>, OracleError> {
    let mut consumed = vec![false; events.len()];
    let mut transfers = Vec::new();

    for (send_idx, send) in events.iter().enumerate() {
        if send.kind != EventKind::TokenSend {
            continue;
        }
        let send_data =
            TokenEventData::from_bytes(&send.data).map_err(|_| OracleError::MalformedEvent)?;

        let matched = events.iter().enumerate().find(|(idx, event)| {
            if consumed[*idx] || *idx == send_idx {
                return false;
            }
            if !matches!(event.kind, EventKind::TokenReceive | EventKind::TokenStake) {
                return false;
            }
            TokenEventData::from_bytes(&event.data)
                .is_ok_and(|data| data.symbol == send_data.symbol && data.value == send_data.value)
        });
        let (recv_idx, receive) = matched
            .ok_or_else(|| OracleError::UnmatchedTransfer(send_data.symbol.clone()))?;
        consumed[recv_idx] = true;

        let fungible = fungibility(&send_data.symbol)
            .ok_or_else(|| OracleError::UnknownToken(send_data.symbol.clone()))?;

        let data = if fungible {
            None
        } else {
            let payload = events
                .iter()
                .filter(|event| event.kind == EventKind::PackedNFT)
                .find_map(|event| {
                    PackedNFTData::from_bytes(&event.data)
                        .ok()
                        .filter(|nft| nft.symbol == send_data.symbol)
                        .map(|nft| nft.payload)
                })
                .ok_or_else(|| OracleError::MissingNftData(send_data.symbol.clone()))?;
            Some(payload)
        };

        transfers.push(InteropTransfer {
            source_address: send.address,
            destination_address: receive.address,
            symbol: send_data.symbol,
            value: send_data.value,
            data,
        });
    }

    Ok(transfers)
}
