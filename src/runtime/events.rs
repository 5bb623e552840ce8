//! Typed, addressed, contract-attributed event records.
//!
//! Events are the only side channel contract code has besides storage: gas
//! escrow and payment, block lifecycle, and token movements all surface as
//! events, and some kinds mutate runtime state when emitted. Emission is
//! restricted per kind to a designated contract.

use crate::core::nexus::contracts;
use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use chaincore_derive::Wire;
use num_bigint::BigInt;
use std::fmt;

/// First byte value of the custom event range.
pub const CUSTOM_EVENT_BASE: u8 = 64;

/// Largest custom event index: the wire byte is `CUSTOM_EVENT_BASE + n` and
/// must fit in the single kind byte.
pub const MAX_CUSTOM_EVENT: u8 = u8::MAX - CUSTOM_EVENT_BASE;

/// Closed set of event kinds, plus the open `Custom` range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    ChainCreate,
    BlockCreate,
    BlockClose,
    TokenCreate,
    TokenSend,
    TokenReceive,
    TokenMint,
    TokenBurn,
    TokenStake,
    TokenUnstake,
    TokenClaim,
    AddressRegister,
    AddressLink,
    AddressUnlink,
    RolePromote,
    RoleDemote,
    GasEscrow,
    GasPayment,
    GasLoan,
    OrderCreated,
    OrderCancelled,
    OrderFilled,
    OrderClosed,
    FeedCreate,
    FileCreate,
    FileDelete,
    ValidatorPropose,
    ValidatorElect,
    ValidatorRemove,
    ValidatorSwitch,
    BrokerRequest,
    ValueCreate,
    ValueUpdate,
    PollCreated,
    PollClosed,
    PollVote,
    ChannelCreate,
    ChannelRefill,
    ChannelSettle,
    LeaderboardCreate,
    LeaderboardInsert,
    Metadata,
    PackedNFT,
    /// Application-defined kind, serialized as `CUSTOM_EVENT_BASE + n`.
    Custom(u8),
}

impl EventKind {
    /// Builds a custom kind, rejecting indices whose wire byte would not
    /// fit in a `u8`.
    pub fn custom(n: u8) -> Option<EventKind> {
        if n > MAX_CUSTOM_EVENT {
            return None;
        }
        Some(EventKind::Custom(n))
    }

    /// Returns the wire byte of this kind, or `None` for a custom kind
    /// outside the representable range.
    pub fn to_byte(self) -> Option<u8> {
        let byte = match self {
            EventKind::ChainCreate => 1,
            EventKind::BlockCreate => 2,
            EventKind::BlockClose => 3,
            EventKind::TokenCreate => 4,
            EventKind::TokenSend => 5,
            EventKind::TokenReceive => 6,
            EventKind::TokenMint => 7,
            EventKind::TokenBurn => 8,
            EventKind::TokenStake => 9,
            EventKind::TokenUnstake => 10,
            EventKind::TokenClaim => 11,
            EventKind::AddressRegister => 12,
            EventKind::AddressLink => 13,
            EventKind::AddressUnlink => 14,
            EventKind::RolePromote => 15,
            EventKind::RoleDemote => 16,
            EventKind::GasEscrow => 17,
            EventKind::GasPayment => 18,
            EventKind::GasLoan => 19,
            EventKind::OrderCreated => 20,
            EventKind::OrderCancelled => 21,
            EventKind::OrderFilled => 22,
            EventKind::OrderClosed => 23,
            EventKind::FeedCreate => 24,
            EventKind::FileCreate => 25,
            EventKind::FileDelete => 26,
            EventKind::ValidatorPropose => 27,
            EventKind::ValidatorElect => 28,
            EventKind::ValidatorRemove => 29,
            EventKind::ValidatorSwitch => 30,
            EventKind::BrokerRequest => 31,
            EventKind::ValueCreate => 32,
            EventKind::ValueUpdate => 33,
            EventKind::PollCreated => 34,
            EventKind::PollClosed => 35,
            EventKind::PollVote => 36,
            EventKind::ChannelCreate => 37,
            EventKind::ChannelRefill => 38,
            EventKind::ChannelSettle => 39,
            EventKind::LeaderboardCreate => 40,
            EventKind::LeaderboardInsert => 41,
            EventKind::Metadata => 42,
            EventKind::PackedNFT => 43,
            EventKind::Custom(n) => return CUSTOM_EVENT_BASE.checked_add(n),
        };
        Some(byte)
    }

    /// Parses a wire byte back into a kind.
    pub fn from_byte(byte: u8) -> Option<EventKind> {
        let kind = match byte {
            1 => EventKind::ChainCreate,
            2 => EventKind::BlockCreate,
            3 => EventKind::BlockClose,
            4 => EventKind::TokenCreate,
            5 => EventKind::TokenSend,
            6 => EventKind::TokenReceive,
            7 => EventKind::TokenMint,
            8 => EventKind::TokenBurn,
            9 => EventKind::TokenStake,
            10 => EventKind::TokenUnstake,
            11 => EventKind::TokenClaim,
            12 => EventKind::AddressRegister,
            13 => EventKind::AddressLink,
            14 => EventKind::AddressUnlink,
            15 => EventKind::RolePromote,
            16 => EventKind::RoleDemote,
            17 => EventKind::GasEscrow,
            18 => EventKind::GasPayment,
            19 => EventKind::GasLoan,
            20 => EventKind::OrderCreated,
            21 => EventKind::OrderCancelled,
            22 => EventKind::OrderFilled,
            23 => EventKind::OrderClosed,
            24 => EventKind::FeedCreate,
            25 => EventKind::FileCreate,
            26 => EventKind::FileDelete,
            27 => EventKind::ValidatorPropose,
            28 => EventKind::ValidatorElect,
            29 => EventKind::ValidatorRemove,
            30 => EventKind::ValidatorSwitch,
            31 => EventKind::BrokerRequest,
            32 => EventKind::ValueCreate,
            33 => EventKind::ValueUpdate,
            34 => EventKind::PollCreated,
            35 => EventKind::PollClosed,
            36 => EventKind::PollVote,
            37 => EventKind::ChannelCreate,
            38 => EventKind::ChannelRefill,
            39 => EventKind::ChannelSettle,
            40 => EventKind::LeaderboardCreate,
            41 => EventKind::LeaderboardInsert,
            42 => EventKind::Metadata,
            43 => EventKind::PackedNFT,
            n if n >= CUSTOM_EVENT_BASE => EventKind::Custom(n - CUSTOM_EVENT_BASE),
            _ => return None,
        };
        Some(kind)
    }

    /// Returns the contract allowed to emit this kind, or `None` when any
    /// contract may.
    pub fn required_contract(&self) -> Option<&'static str> {
        match self {
            EventKind::GasEscrow | EventKind::GasPayment | EventKind::GasLoan => {
                Some(contracts::GAS)
            }
            EventKind::BlockCreate | EventKind::BlockClose | EventKind::ValidatorSwitch => {
                Some(contracts::BLOCK)
            }
            EventKind::PollCreated | EventKind::PollClosed | EventKind::PollVote => {
                Some(contracts::CONSENSUS)
            }
            EventKind::ChainCreate | EventKind::TokenCreate | EventKind::FeedCreate => {
                Some(contracts::NEXUS)
            }
            EventKind::FileCreate | EventKind::FileDelete => Some(contracts::STORAGE),
            EventKind::ValidatorPropose | EventKind::ValidatorElect | EventKind::ValidatorRemove => {
                Some(contracts::VALIDATOR)
            }
            EventKind::BrokerRequest => Some(contracts::INTEROP),
            EventKind::ValueCreate | EventKind::ValueUpdate => Some(contracts::GOVERNANCE),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Custom(n) => write!(f, "Custom+{n}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// One record in the per-transaction event log.
///
/// `contract` is the name of the context that emitted the event; the runtime
/// fills it in at emission time, contracts cannot spoof it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub address: Address,
    pub contract: String,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        address: Address,
        contract: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            address,
            contract: contract.into(),
            data,
        }
    }
}

// Wire layout: kind(u8) | address(34) | varstring(contract) | varbytes(data).
impl Encode for Event {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        // Emission and decoding both bound custom kinds, so every logged
        // event has a wire byte.
        let kind = self.kind.to_byte().expect("event kind within wire range");
        out.write(&[kind]);
        self.address.encode(out);
        self.contract.encode(out);
        self.data.encode(out);
    }
}

impl Decode for Event {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let byte = u8::decode(input)?;
        let kind = EventKind::from_byte(byte).ok_or(DecodeError::InvalidValue)?;
        Ok(Event {
            kind,
            address: Address::decode(input)?,
            contract: String::decode(input)?,
            data: Vec::decode(input)?,
        })
    }
}

/// Payload of the gas events: escrow installs `{price, amount}`, payment
/// accumulates `amount`. The affected address rides on the event itself.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct GasEventData {
    pub price: BigInt,
    pub amount: BigInt,
}

/// Payload of the token lifecycle events.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct TokenEventData {
    pub symbol: String,
    pub value: BigInt,
    pub chain_name: String,
}

/// Payload of a PackedNFT event: the serialized content of a non-fungible
/// item crossing chains.
#[derive(Clone, Debug, PartialEq, Eq, Wire)]
pub struct PackedNFTData {
    pub symbol: String,
    pub payload: Vec<u8>,
}
