//! Error taxonomy for the recompilation pipeline.
//!
//! Each pipeline stage owns an error enum; [`JitError`] wraps any of them
//! together with the 6502 address that triggered the failure, which is the
//! form the driver surfaces to its caller.

use thiserror::Error;

use crate::ir::Label;

/// Failures while decoding raw bytes into 6502 instructions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:#04x} at {address:#06x}")]
    UnknownOpcode { opcode: u8, address: u16 },

    #[error("instruction at {address:#06x} is truncated by the end of its code region")]
    Truncated { address: u16 },

    #[error("no code region covers address {address:#06x}")]
    Unmapped { address: u16 },

    #[error("JSR instruction with no target address")]
    JsrWithoutTarget { address: u16 },

    #[error("function at {entry:#06x} contains no decodable instructions")]
    EmptyFunction { entry: u16 },
}

/// Failures while mapping a decoded instruction onto its IR template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("no lowering for {mnemonic} in {mode:?} mode at {address:#06x}")]
    UnsupportedInstruction {
        mnemonic: &'static str,
        mode: crate::opcodes::Mode,
        address: u16,
    },

    #[error("instruction at {address:#06x} is missing its target address")]
    MissingTargetAddress { address: u16 },

    #[error("branch at {address:#06x} targets {target:#06x}, which is not part of the function")]
    MissingBranchLabel { address: u16, target: u16 },
}

/// Failures while executing IR, through either engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Raised by the HAL to unwind the run loop from a memory access or an
    /// interrupt poll.
    #[error("execution cancelled by the host")]
    Cancelled,

    #[error("jump to unresolved label {0:?}")]
    UnresolvedLabel(Label),

    #[error("a constant cannot be a copy or operation destination")]
    WriteToConstant,

    #[error("variable {index} is outside the function's temporary frame")]
    VariableOutOfRange { index: usize },
}

/// Any failure of a [`crate::jit::JitDriver::run`] invocation, carrying the
/// 6502 address at which it occurred.
#[derive(Debug, Error)]
#[error("at {address:#06x}: {kind}")]
pub struct JitError {
    pub address: u16,
    pub kind: JitErrorKind,
}

#[derive(Debug, Error)]
pub enum JitErrorKind {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Lowering(#[from] LoweringError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("method cache inconsistency: {0}")]
    CacheConsistency(String),
}

impl JitError {
    pub fn at(address: u16, kind: impl Into<JitErrorKind>) -> JitError {
        JitError {
            address,
            kind: kind.into(),
        }
    }

    /// True when the run ended because the host cancelled it rather than
    /// because of a pipeline failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind,
            JitErrorKind::Execution(ExecutionError::Cancelled)
        )
    }
}
