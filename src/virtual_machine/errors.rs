use crate::types::address::Address;
use chaincore_derive::Error;

/// Errors that can occur during bytecode execution.
///
/// Every variant is terminal for the transaction: the VM transitions to the
/// Fault state, the change set is discarded, and the message is captured in
/// the receipt.
#[derive(Debug, Error)]
pub enum VMError {
    /// Unknown opcode encountered in the script.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    /// Script ended in the middle of an instruction.
    #[error("unexpected end of script")]
    UnexpectedEndOfScript,
    /// Pop or peek on an empty operand stack.
    #[error("stack underflow")]
    StackUnderflow,
    /// Operand stack grew past the per-frame limit.
    #[error("operand stack limit exceeded")]
    StackOverflow,
    /// Register index exceeds the frame's register count.
    #[error("register index {0} out of bounds")]
    InvalidRegister(u8),
    /// Jump or call target outside the script.
    #[error("jump target {0} out of bounds")]
    InvalidJumpTarget(u32),
    /// Operand type does not match what the opcode requires.
    #[error("opcode {opcode} expected {expected} but got {actual}")]
    TypeMismatch {
        opcode: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Value cannot be converted to the requested type.
    #[error("cannot cast {from} to {to}")]
    InvalidCast {
        from: &'static str,
        to: &'static str,
    },
    /// Malformed literal payload in a LOAD instruction or event data.
    #[error("malformed value payload")]
    DecodeFailed,
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Gas charge exceeded the remaining budget.
    #[error("gas budget exceeded")]
    OutOfGas,
    /// Transaction halted with less gas paid than used.
    #[error("gas not fully paid at halt")]
    UnpaidGas,
    /// Escrowed gas price below the chain's minimum fee.
    #[error("gas price below minimum fee")]
    GasPriceTooLow,
    /// Named contract could not be resolved to a context.
    #[error("context {0} not found")]
    ContextNotFound(String),
    /// Context switch forbidden while a block operation is in progress.
    #[error("context {0} not available in block operations")]
    ContextUnavailable(String),
    /// EXTCALL method missing from the host handler table.
    #[error("unknown interop method: {0}")]
    UnknownExtCall(String),
    /// Native contract method missing.
    #[error("method {method} not found in contract {contract}")]
    UnknownMethod { contract: String, method: String },
    /// Event kind emitted outside its designated contract.
    #[error("{kind} event kind only in {contract} contract")]
    UnauthorizedEvent {
        kind: String,
        contract: &'static str,
    },
    /// Custom event index whose wire byte does not fit the kind byte.
    #[error("custom event kind {0} exceeds the wire range")]
    InvalidEventKind(u8),
    /// Write attempted while the change set is read-only.
    #[error("state is read-only")]
    ReadOnlyWrite,
    /// Oracle failure surfaced into the VM.
    #[error("oracle error: {0}")]
    OracleFailure(String),
    /// Contract-level assertion failed.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// THROW opcode executed by the script.
    #[error("exception thrown: {0}")]
    Thrown(String),
    /// Witness check failed for an address that must authorize the action.
    #[error("witness check failed for {0}")]
    WitnessFailed(Address),
    /// Token symbol not registered with the nexus.
    #[error("token {0} not found")]
    TokenNotFound(String),
    /// Token movement rejected by the nexus.
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}
