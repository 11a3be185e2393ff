//! A dynamic recompilation core for the MOS 6502.
//!
//! The crate decompiles 6502 machine code one function at a time into a
//! small typed intermediate representation, then executes each function
//! either through a compiled routine or through a direct IR interpreter.
//! Host platforms (an NES, a C64) supply the memory map and peripherals;
//! the core supplies everything between an entry address and the next one:
//!
//! * [`ir`] — the closed instruction/operand model shared by every stage.
//! * [`bus`] — a layered, 64 KiB device map with code-region enumeration.
//! * [`hal`] — the hardware abstraction the IR runs against: registers,
//!   flags, stack, memory, and interrupt polling.
//! * [`disassembler`] — decodes bytes and traces control flow into a
//!   [`disassembler::FunctionBody`].
//! * [`lowering`] — maps each opcode/addressing-mode pair onto an IR
//!   template with hardware-accurate flag behavior.
//! * [`interpreter`] / [`codegen`] — the two execution engines, observably
//!   identical by construction and by test.
//! * [`jit`] — the driver: decompile on miss, cache by entry address,
//!   evict on writes into a cached function's byte range, fall back to the
//!   interpreter for self-modifying code.
//! * [`asm`] — a small line assembler for building program fixtures.

pub mod asm;
pub mod bus;
pub mod codegen;
pub mod disassembler;
pub mod error;
pub mod hal;
pub mod interpreter;
pub mod ir;
pub mod jit;
pub mod lowering;
pub mod opcodes;

#[cfg(test)]
mod test_helpers;

pub use bus::{BusDevice, CodeRegion, MemoryBus, Ram, Rom};
pub use error::{DecodeError, ExecutionError, JitError, LoweringError};
pub use hal::{BusHal, CpuRegister, Hal, StatusFlag};
pub use jit::{DriverConfig, JitDriver};
