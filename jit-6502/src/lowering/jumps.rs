//! IR templates for branches, jumps, subroutine calls, and flag
//! instructions.

use crate::disassembler::DisassembledInstruction;
use crate::error::LoweringError;
use crate::hal::{CpuRegister, StatusFlag};
use crate::ir::{BinaryOp, CallTarget, Instruction, MemoryAddress, Value};
use crate::lowering::{constant, variable, Lowerer};
use crate::opcodes::Mode;

/// Branch if plus
/// Function: branch on N=0
/// Flags:
pub fn bpl(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Negative, false)
}

/// Branch if minus
/// Function: branch on N=1
/// Flags:
pub fn bmi(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Negative, true)
}

/// Branch if Overflow Clear
/// Function: branch on V=0
/// Flags:
pub fn bvc(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Overflow, false)
}

/// Branch if Overflow Set
/// Function: branch on V=1
/// Flags:
pub fn bvs(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Overflow, true)
}

/// Branch if Carry Clear
/// Function: branch on C=0
/// Flags:
pub fn bcc(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Carry, false)
}

/// Branch if Carry Set
/// Function: branch on C=1
/// Flags:
pub fn bcs(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Carry, true)
}

/// Branch if Not Equal
/// Function: branch on Z=0
/// Flags:
pub fn bne(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Zero, false)
}

/// Branch if Equal
/// Function: branch on Z=1
/// Flags:
pub fn beq(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    branch(lowerer, instruction, StatusFlag::Zero, true)
}

fn branch(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
    flag: StatusFlag,
    branch_when_set: bool,
) -> Result<(), LoweringError> {
    let target = lowerer.branch_label(instruction)?;
    let condition = Value::Flag(flag);
    if branch_when_set {
        lowerer.emit(Instruction::JumpIfNotZero { condition, target });
    } else {
        lowerer.emit(Instruction::JumpIfZero { condition, target });
    }
    Ok(())
}

/// Break - software interrupt through the IRQ/BRK vector, with the B
/// flag set in the pushed status byte.
/// Function: (S)-:=PC+2,P PC:=($FFFE)
/// Flags: B I
pub fn brk(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    lowerer.emit(Instruction::SoftwareInterrupt);
    Ok(())
}

/// Return from Interrupt
/// Function: P,PC:=+(S)
/// Flags: N V D I Z C
pub fn rti(
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
    let low = lowerer.variable();
    lowerer.emit(Instruction::PopStack { dst: variable(low) });
    let high = lowerer.variable();
    lowerer.emit(Instruction::PopStack {
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftLeft,
        left: variable(high),
        right: constant(8),
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Or,
        left: variable(high),
        right: variable(low),
        dst: variable(high),
    });
    // Unlike RTS, the popped address is used as-is.
    lowerer.emit(Instruction::Return { variable: high });
    Ok(())
}

/// Jump to subroutine. The pushed return address is the address of the
/// call's last byte (the hardware pushes PC+2, and RTS adds the missing
/// one); high byte first, so it pops back low-then-high.
/// Function: (S)-:=PC+2 PC:={adr}
/// Flags:
pub fn jsr(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let target = instruction
        .target_address
        .ok_or(LoweringError::MissingTargetAddress {
            address: instruction.address,
        })?;
    let return_address = instruction.next_address().wrapping_sub(1);
    lowerer.emit(Instruction::PushStack {
        src: constant((return_address >> 8) as i32),
    });
    lowerer.emit(Instruction::PushStack {
        src: constant((return_address & 0xFF) as i32),
    });
    lowerer.emit(Instruction::Call {
        target: CallTarget::Address(target),
    });
    Ok(())
}

/// Return from Sub Routine
/// Function: PC:=+(S)+1
/// Flags:
pub fn rts(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let low = lowerer.variable();
    lowerer.emit(Instruction::PopStack { dst: variable(low) });
    let high = lowerer.variable();
    lowerer.emit(Instruction::PopStack {
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::ShiftLeft,
        left: variable(high),
        right: constant(8),
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Or,
        left: variable(high),
        right: variable(low),
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Add,
        left: variable(high),
        right: constant(1),
        dst: variable(high),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(high),
        right: constant(0xFFFF),
        dst: variable(high),
    });
    lowerer.emit(Instruction::Return { variable: high });
    Ok(())
}

/// Jump
/// Function: PC:={adr}
/// Flags:
pub fn jmp(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    match instruction.info.mode {
        Mode::Absolute => {
            let target = lowerer.branch_label(instruction)?;
            lowerer.emit(Instruction::Jump(target));
            Ok(())
        }
        Mode::Indirect => {
            // The 6502 never carries the pointer read across a page: for
            // JMP ($xxFF) the high byte comes from $xx00. Both fetch
            // addresses are static, so the quirk resolves at lowering
            // time.
            let pointer = instruction.operand_u16();
            let high_pointer = (pointer & 0xFF00) | ((pointer as u8).wrapping_add(1) as u16);
            let low = lowerer.variable();
            lowerer.emit(Instruction::Copy {
                src: Value::Memory(MemoryAddress {
                    address: pointer,
                    index: None,
                    single_byte_address: false,
                }),
                dst: variable(low),
            });
            let high = lowerer.variable();
            lowerer.emit(Instruction::Copy {
                src: Value::Memory(MemoryAddress {
                    address: high_pointer,
                    index: None,
                    single_byte_address: false,
                }),
                dst: variable(high),
            });
            lowerer.emit(Instruction::Binary {
                op: BinaryOp::ShiftLeft,
                left: variable(high),
                right: constant(8),
                dst: variable(high),
            });
            lowerer.emit(Instruction::Binary {
                op: BinaryOp::Or,
                left: variable(high),
                right: variable(low),
                dst: variable(high),
            });
            lowerer.emit(Instruction::Call {
                target: CallTarget::Variable(high),
            });
            Ok(())
        }
        _ => Err(lowerer.unsupported(instruction)),
    }
}

/// Bit test
/// Function: N:=b7 V:=b6 Z:=A&{adr}
/// Flags: N V Z
pub fn bit(
    lowerer: &mut Lowerer,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    let operand = lowerer.operand_to_variable(instruction)?;
    let masked = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: Value::Register(CpuRegister::A),
        right: variable(operand),
        dst: variable(masked),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::Equal,
        left: variable(masked),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Zero),
    });
    let sign = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(operand),
        right: constant(0x80),
        dst: variable(sign),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(sign),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Negative),
    });
    let overflow = lowerer.variable();
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::And,
        left: variable(operand),
        right: constant(0x40),
        dst: variable(overflow),
    });
    lowerer.emit(Instruction::Binary {
        op: BinaryOp::NotEqual,
        left: variable(overflow),
        right: constant(0),
        dst: Value::Flag(StatusFlag::Overflow),
    });
    Ok(())
}

/// Clear Carry flag
/// Function: C:=0
/// Flags: C
pub fn clc(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::Carry, false);
    Ok(())
}

/// Set Carry flag
/// Function: C:=1
/// Flags: C
pub fn sec(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::Carry, true);
    Ok(())
}

/// Clear Decimal flag
/// Function: D:=0
/// Flags: D
pub fn cld(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::Decimal, false);
    Ok(())
}

/// Set Decimal flag. Decimal arithmetic itself is not implemented; the
/// flag is just a bit.
/// Function: D:=1
/// Flags: D
pub fn sed(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::Decimal, true);
    Ok(())
}

/// Clear Interrupt disable
/// Function: I:=0
/// Flags: I
pub fn cli(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::InterruptDisable, false);
    Ok(())
}

/// Set Interrupt disable
/// Function: I:=1
/// Flags: I
pub fn sei(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::InterruptDisable, true);
    Ok(())
}

/// Clear overflow flag
/// Function: V:=0
/// Flags: V
pub fn clv(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    set_flag(lowerer, StatusFlag::Overflow, false);
    Ok(())
}

fn set_flag(lowerer: &mut Lowerer, flag: StatusFlag, value: bool) {
    lowerer.emit(Instruction::Copy {
        src: constant(value as i32),
        dst: Value::Flag(flag),
    });
}

/// No operation
/// Function:
/// Flags:
pub fn nop(
    lowerer: &mut Lowerer,
    _instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    lowerer.emit(Instruction::Nop);
    Ok(())
}
