//! IR templates for the logical and arithmetic instructions.

use crate::disassembler::DisassembledInstruction;
use crate::error::LoweringError;
use crate::hal::{CpuRegister, StatusFlag};
use crate::ir::{BinaryOp, Instruction, Value};
use crate::lowering::{constant, variable, Lowerer};
use crate::opcodes::Mode;

/// Apply the logical "or" operator on the accumulator.
/// Function: A:=A or {adr}
/// Flags: N Z
pub fn ora(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    accumulator_logic(lowerer, instruction, BinaryOp::Or)
}

/// Apply the logical "and" operator on the accumulator.
/// Function: A:=A&{adr}
/// Flags: N Z
pub fn and(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    accumulator_logic(lowerer, instruction, BinaryOp::And)
}

/// Logical Exclusive OR
/// Function: A:=A exor {adr}
/// Flags: N Z
pub fn eor(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    accumulator_logic(lowerer, instruction, BinaryOp::Xor)
}

fn accumulator_logic(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    op: BinaryOp,
) -> Result<(), LoweringError> {
    let operand = lowerer.operand(instruction)?;
    let result = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op,
        left: Value::Register(CpuRegister::A),
        right: operand,
        dst: variable(result),
    });
    lowerer.emit(Instruction::Copy {
        src: variable(result),
        dst: Value::Register(CpuRegister::A),
    });
    lowerer.set_nz(variable(result));
    Ok(())
}

/// Add with Carry
/// Function: A:=A+{adr}+C
/// Flags: N V Z C
pub fn adc(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let operand = lowerer.operand_to_variable(instruction)?;
    add_with_carry(lowerer, operand);
    Ok(())
}

/// Subtract with Carry
/// Function: A:=A-{adr}+C-1
/// Flags: N V Z C
pub fn sbc(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    // Binary subtraction is addition of the one's complement, with the
    // carry flag supplying the +1. The decimal flag is ignored.
    let operand = lowerer.operand_to_variable(instruction)?;
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Xor,
        left: variable(operand),
        right: constant(0xFF),
        dst: variable(operand),
    });
    add_with_carry(lowerer, operand);
    Ok(())
}

/// The shared ADC/SBC tail. `operand` holds an 8-bit value; the sum runs
/// in 32-bit space so the carry shows up as bit 8 and the overflow test
/// can compare operand signs against the truncated result:
/// `V = ((A^result) & (M^result) & 0x80) != 0`.
fn add_with_carry(lowerer: &mut Lowerer, operand: usize) {
    let a = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: Value::Register(CpuRegister::A),
        dst: variable(a),
    });

    let sum = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Add,
        left: variable(a),
        right: variable(operand),
        dst: variable(sum),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Add,
        left: variable(sum),
        right: Value::Flag(StatusFlag::Carry),
        dst: variable(sum),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Greater,
        left: variable(sum),
        right: constant(0xFF),
        dst: Value::Flag(StatusFlag::Carry),
    });

    let result = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: variable(sum),
        dst: variable(result),
    });
    lowerer.emit(Instruction::ConvertToByte { variable: result });
    lowerer.set_nz(variable(result));

    let overflow = lowerer.variable();
    let operand_sign = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Xor,
        left: variable(a),
        right: variable(result),
        dst: variable(overflow),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Xor,
        left: variable(operand),
        right: variable(result),
        dst: variable(operand_sign),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(overflow),
        right: variable(operand_sign),
        dst: variable(overflow),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(overflow),
        right: constant(0x80),
        dst: variable(overflow),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(overflow),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Overflow),
    });

    lowerer.emit(Instruction::Copy {
        src: variable(result),
        dst: Value::Register(CpuRegister::A),
    });
}

/// Compare A with source
/// Function: A-{adr}
/// Flags: N Z C
pub fn cmp(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    compare(lowerer, instruction, CpuRegister::A)
}

/// Compare X with source
/// Function: X-{adr}
/// Flags: N Z C
pub fn cpx(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    compare(lowerer, instruction, CpuRegister::X)
}

/// Compare Y with source
/// Function: Y-{adr}
/// Flags: N Z C
pub fn cpy(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    compare(lowerer, instruction, CpuRegister::Y)
}

/// The comparison runs in 16-bit-wide space and is not stored: only
/// `C <- reg >= M`, `Z <- reg == M`, and `N` from bit 7 of the low byte
/// survive. Overflow is unaffected.
fn compare(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    register: CpuRegister,
) -> Result<(), LoweringError> {
    let operand = lowerer.operand_to_variable(instruction)?;
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::GreaterOrEqual,
        left: Value::Register(register),
        right: variable(operand),
        dst: Value::Flag(StatusFlag::Carry),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Equal,
        left: Value::Register(register),
        right: variable(operand),
        dst: Value::Flag(StatusFlag::Zero),
    });
    let difference = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Sub,
        left: Value::Register(register),
        right: variable(operand),
        dst: variable(difference),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(difference),
        right: constant(0x80),
        dst: variable(difference),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(difference),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Negative),
    });
    Ok(())
}

/// Decrement at an address
/// Function: {adr}:={adr}-1
/// Flags: N Z
pub fn dec(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_memory(lowerer, instruction, BinaryOp::Sub)
}

/// Increment the address
/// Function: {adr}:={adr}+1
/// Flags: N Z
pub fn inc(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_memory(lowerer, instruction, BinaryOp::Add)
}

fn step_memory(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    op: BinaryOp,
) -> Result<(), LoweringError> {
    let operand = lowerer.operand(instruction)?;
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: operand,
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::ConvertToByte { variable: value });
    lowerer.set_nz(variable(value));
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: operand,
    });
    Ok(())
}

/// Decrement X
/// Function: X:=X-1
/// Flags: N Z
pub fn dex(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_register(lowerer, CpuRegister::X, BinaryOp::Sub)
}

/// Decrement Y
/// Function: Y:=Y-1
/// Flags: N Z
pub fn dey(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_register(lowerer, CpuRegister::Y, BinaryOp::Sub)
}

/// Increment X
/// Function: X:=X+1
/// Flags: N Z
pub fn inx(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_register(lowerer, CpuRegister::X, BinaryOp::Add)
}

/// Increment Y
/// Function: Y:=Y+1
/// Flags: N Z
pub fn iny(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    step_register(lowerer, CpuRegister::Y, BinaryOp::Add)
}

fn step_register(
    lowerer: &mut Lowerer,
    register: CpuRegister,
    op: BinaryOp,
) -> Result<(), LoweringError> {
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: Value::Register(register),
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::ConvertToByte { variable: value });
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: Value::Register(register),
    });
    lowerer.set_nz(variable(value));
    Ok(())
}

/// Arithmetic shift left
/// Function: {adr}:={adr}*2
/// Flags: N Z C
pub fn asl(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let target = shift_target(lowerer, instruction)?;
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: target,
        dst: variable(value),
    });
    // The carry flag receives the bit shifted out.
    let shifted_out = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(value),
        right: constant(0x80),
        dst: variable(shifted_out),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftLeft,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::ConvertToByte { variable: value });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(shifted_out),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Carry),
    });
    lowerer.set_nz(variable(value));
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: target,
    });
    Ok(())
}

/// Rotate left
/// Function: {adr}:={adr}*2+C
/// Flags: N Z C
pub fn rol(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let target = shift_target(lowerer, instruction)?;
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: target,
        dst: variable(value),
    });
    let shifted_out = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(value),
        right: constant(0x80),
        dst: variable(shifted_out),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftLeft,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Or,
        left: variable(value),
        right: Value::Flag(StatusFlag::Carry),
        dst: variable(value),
    });
    lowerer.emit(Instruction::ConvertToByte { variable: value });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(shifted_out),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Carry),
    });
    lowerer.set_nz(variable(value));
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: target,
    });
    Ok(())
}

/// Logical shift right
/// Function: {adr}:={adr}/2
/// Flags: N Z C
pub fn lsr(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let target = shift_target(lowerer, instruction)?;
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: target,
        dst: variable(value),
    });
    let shifted_out = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(value),
        right: constant(0x01),
        dst: variable(shifted_out),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftRight,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(shifted_out),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Carry),
    });
    lowerer.set_nz(variable(value));
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: target,
    });
    Ok(())
}

/// Rotate right
/// Function: {adr}:={adr}/2+C*128
/// Flags: N Z C
pub fn ror(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let target = shift_target(lowerer, instruction)?;
    let value = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: target,
        dst: variable(value),
    });
    let shifted_out = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(value),
        right: constant(0x01),
        dst: variable(shifted_out),
    });
    // The old carry rotates in at the top.
    let carry_in = lowerer.variable();
    lowerer.emit(Instruction::Copy {
        src: Value::Flag(StatusFlag::Carry),
        dst: variable(carry_in),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftLeft,
        left: variable(carry_in),
        right: constant(7),
        dst: variable(carry_in),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftRight,
        left: variable(value),
        right: constant(1),
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Or,
        left: variable(value),
        right: variable(carry_in),
        dst: variable(value),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(shifted_out),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Carry),
    });
    lowerer.set_nz(variable(value));
    lowerer.emit(Instruction::Copy {
        src: variable(value),
        dst: target,
    });
    Ok(())
}

/// Shifts work on the accumulator or on a memory operand; either way the
/// value is staged in a temporary, read once, written once.
fn shift_target(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<Value, LoweringError> {
    match instruction.info.mode {
        Mode::Accumulator => Ok(Value::Register(CpuRegister::A)),
        _ => lowerer.operand(instruction),
    }
}
