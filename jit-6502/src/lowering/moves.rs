//! IR templates for the load, store, transfer, and stack instructions.

use crate::disassembler::DisassembledInstruction;
use crate::error::LoweringError;
use crate::hal::{CpuRegister, STATUS_PUSH_MASK};
use crate::ir::{BinaryOp, Instruction, Value};
use crate::lowering::{constant, variable, Lowerer};

/// Load accumulator
/// Function: A:={adr}
/// Flags: N Z
pub fn lda(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    load(lowerer, instruction, CpuRegister::A)
}

/// Load X
/// Function: X:={adr}
/// Flags: N Z
pub fn ldx(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    load(lowerer, instruction, CpuRegister::X)
}

/// Load Y
/// Function: Y:={adr}
/// Flags: N Z
pub fn ldy(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    load(lowerer, instruction, CpuRegister::Y)
}

fn load(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    register: CpuRegister,
) -> Result<(), LoweringError> {
    let value = lowerer.operand_to_variable(instruction)?;
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: Value::Register(register),
    });
    lowerer.set_nz(variable(value));
    Ok(())
}

/// Store accumulator
/// Function: {adr}:=A
/// Flags:
pub fn sta(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    store(lowerer, instruction, CpuRegister::A)
}

/// Store X
/// Function: {adr}:=X
/// Flags:
pub fn stx(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    store(lowerer, instruction, CpuRegister::X)
}

/// Store Y
/// Function: {adr}:=Y
/// Flags:
pub fn sty(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    store(lowerer, instruction, CpuRegister::Y)
}

fn store(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    register: CpuRegister,
) -> Result<(), LoweringError> {
    let target = lowerer.operand(instruction)?;
    lowerer.emit(Instruction::Copy {
        src: Value::Register(register),
        dst: target,
    });
    Ok(())
}

/// Transfer A to X
/// Function: X:=A
/// Flags: N Z
pub fn tax(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    transfer(lowerer, Value::Register(CpuRegister::A), CpuRegister::X);
    Ok(())
}

/// Transfer A to Y
/// Function: Y:=A
/// Flags: N Z
pub fn tay(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    transfer(lowerer, Value::Register(CpuRegister::A), CpuRegister::Y);
    Ok(())
}

/// Transfer X to A
/// Function: A:=X
/// Flags: N Z
pub fn txa(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    transfer(lowerer, Value::Register(CpuRegister::X), CpuRegister::A);
    Ok(())
}

/// Transfer Y to A
/// Function: A:=Y
/// Flags: N Z
pub fn tya(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    transfer(lowerer, Value::Register(CpuRegister::Y), CpuRegister::A);
    Ok(())
}

/// Transfer the stack pointer to X
/// Function: X:=S
/// Flags: N Z
pub fn tsx(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    transfer(lowerer, Value::StackPointer, CpuRegister::X);
    Ok(())
}

/// Transfer X to the stack pointer. The only transfer that leaves the
/// flags alone.
/// Function: S:=X
/// Flags:
pub fn txs(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    lowerer.emit(Instruction::Copy {
        src: Value::Register(CpuRegister::X),
        dst: Value::StackPointer,
    });
    Ok(())
}

fn transfer(lowerer: &mut Lowerer, src: Value, register: CpuRegister) {
    lowerer.emit(Instruction::Copy {
        src,
        dst: Value::Register(register),
    });
    lowerer.set_nz(Value::Register(register));
}

/// Push accumulator
/// Function: (S)-:=A
/// Flags:
pub fn pha(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    lowerer.emit(Instruction::PushStack {
        src: Value::Register(CpuRegister::A),
    });
    Ok(())
}

/// Pull accumulator
/// Function: A:=+(S)
/// Flags: N Z
pub fn pla(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let value = lowerer.variable();
    lowerer.emit(Instruction::PopStack {
        dst: variable(value),
    });
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: Value::Register(CpuRegister::A),
    });
    lowerer.set_nz(variable(value));
    Ok(())
}

/// Push processor status. The pushed byte always has the B flag and the
/// unused bit set.
/// Function: (S)-:=P
/// Flags:
pub fn php(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let status = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: Value::AllFlags,
        dst: variable(status),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Or,
        left: variable(status),
        right: constant(STATUS_PUSH_MASK as i32),
        dst: variable(status),
    });
    lowerer.emit(Instruction::PushStack {
        src: variable(status),
    });
    Ok(())
}

/// Pull processor status. Bits 4 and 5 of the pulled byte are discarded
/// by the status-byte write path.
/// Function: P:=+(S)
/// Flags: N V D I Z C
pub fn plp(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let status = lowerer.variable();
    lowerer.emit(Instruction::PopStack {
        dst: variable(status),
    });
    lowerer.emit(Instruction::Copy {
        src: variable(status),
        dst: Value::AllFlags,
    });
    Ok(())
}
