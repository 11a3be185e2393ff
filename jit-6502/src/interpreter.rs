//! Direct execution of an IR list against the HAL.
//!
//! The interpreter is the engine for self-modifying functions and the
//! correctness oracle for the compiled backend: both must leave the HAL
//! in the same state for any IR list. Values compute in 32-bit signed
//! space; writes truncate per destination kind.

use rustc_hash::FxHashMap;

use crate::error::ExecutionError;
use crate::hal::{CpuRegister, Hal, InterruptVector, StatusFlag, STATUS_PUSH_MASK};
use crate::ir::{
    BinaryOp, CallTarget, IndirectAddress, Instruction, Label, MemoryAddress, UnaryOp, Value,
    TERMINAL,
};

/// 32-bit evaluation of a binary operator. Comparisons produce 0 or 1.
pub(crate) fn apply_binary(op: BinaryOp, left: i32, right: i32) -> i32 {
    match op {
        BinaryOp::Add => left.wrapping_add(right),
        BinaryOp::Sub => left.wrapping_sub(right),
        BinaryOp::And => left & right,
        BinaryOp::Or => left | right,
        BinaryOp::Xor => left ^ right,
        BinaryOp::ShiftLeft => left.wrapping_shl(right as u32 & 31),
        // Logical shift: IR values that reach a shift are byte-sized and
        // non-negative, and sign extension would surprise everyone.
        BinaryOp::ShiftRight => ((left as u32).wrapping_shr(right as u32 & 31)) as i32,
        BinaryOp::Equal => (left == right) as i32,
        BinaryOp::NotEqual => (left != right) as i32,
        BinaryOp::Less => (left < right) as i32,
        BinaryOp::LessOrEqual => (left <= right) as i32,
        BinaryOp::Greater => (left > right) as i32,
        BinaryOp::GreaterOrEqual => (left >= right) as i32,
    }
}

pub(crate) fn apply_unary(op: UnaryOp, value: i32) -> i32 {
    match op {
        UnaryOp::BitwiseNot => !value,
        UnaryOp::LogicalNot => (value == 0) as i32,
    }
}

/// Effective address of a direct memory operand. Zero-page operands wrap
/// at 8 bits after indexing; absolute operands wrap at 16.
pub(crate) fn resolve_memory(memory: &MemoryAddress, hal: &dyn Hal) -> u16 {
    let index = memory
        .index
        .map(|register| hal.register(register))
        .unwrap_or(0);
    if memory.single_byte_address {
        (memory.address as u8).wrapping_add(index) as u16
    } else {
        memory.address.wrapping_add(index as u16)
    }
}

/// Fetch a zero-page pointer and apply the post-index. Both pointer
/// bytes come from zero page, with the byte addresses wrapping at 8 bits.
fn resolve_indirect(
    indirect: &IndirectAddress,
    hal: &mut dyn Hal,
) -> Result<u16, ExecutionError> {
    let mut zero_page = indirect.zero_page_address;
    if indirect.pre_index_x {
        zero_page = zero_page.wrapping_add(hal.register(CpuRegister::X));
    }
    let low = hal.read_memory(zero_page as u16)? as u16;
    let high = hal.read_memory(zero_page.wrapping_add(1) as u16)? as u16;
    let mut pointer = (high << 8) | low;
    if indirect.post_index_y {
        pointer = pointer.wrapping_add(hal.register(CpuRegister::Y) as u16);
    }
    Ok(pointer)
}

fn read_value(
    value: &Value,
    frame: &[i32],
    hal: &mut dyn Hal,
) -> Result<i32, ExecutionError> {
    match value {
        Value::Constant(constant) => Ok(*constant),
        Value::Register(register) => Ok(hal.register(*register) as i32),
        Value::Flag(flag) => Ok(hal.flag(*flag) as i32),
        Value::AllFlags => Ok(hal.status_byte() as i32),
        Value::StackPointer => Ok(hal.stack_pointer() as i32),
        Value::Variable(index) => frame
            .get(*index)
            .copied()
            .ok_or(ExecutionError::VariableOutOfRange { index: *index }),
        Value::Memory(memory) => {
            let address = resolve_memory(memory, hal);
            Ok(hal.read_memory(address)? as i32)
        }
        Value::Indirect(indirect) => {
            let address = resolve_indirect(indirect, hal)?;
            Ok(hal.read_memory(address)? as i32)
        }
    }
}

fn write_value(
    value: &Value,
    data: i32,
    frame: &mut [i32],
    hal: &mut dyn Hal,
) -> Result<(), ExecutionError> {
    match value {
        Value::Constant(_) => Err(ExecutionError::WriteToConstant),
        Value::Register(register) => {
            hal.set_register(*register, data as u8);
            Ok(())
        }
        Value::Flag(flag) => {
            hal.set_flag(*flag, data != 0);
            Ok(())
        }
        Value::AllFlags => {
            hal.set_status_byte(data as u8);
            Ok(())
        }
        Value::StackPointer => {
            hal.set_stack_pointer(data as u8);
            Ok(())
        }
        Value::Variable(index) => {
            let slot = frame
                .get_mut(*index)
                .ok_or(ExecutionError::VariableOutOfRange { index: *index })?;
            *slot = data;
            Ok(())
        }
        Value::Memory(memory) => {
            let address = resolve_memory(memory, hal);
            hal.write_memory(address, data as u8)
        }
        Value::Indirect(indirect) => {
            let address = resolve_indirect(indirect, hal)?;
            hal.write_memory(address, data as u8)
        }
    }
}

/// Save state for an interrupt and transfer: push the continuation
/// big-endian, push the status byte, set the interrupt-disable flag.
pub(crate) fn enter_interrupt(
    hal: &mut dyn Hal,
    continue_at: u16,
    pushed_status: u8,
) -> Result<(), ExecutionError> {
    hal.push((continue_at >> 8) as u8)?;
    hal.push(continue_at as u8)?;
    hal.push(pushed_status)?;
    hal.set_flag(StatusFlag::InterruptDisable, true);
    Ok(())
}

/// The BRK sequence. The pushed continuation skips the byte after the
/// BRK, and the pushed status carries the B flag.
pub(crate) fn software_interrupt(hal: &mut dyn Hal) -> Result<i32, ExecutionError> {
    let continue_at = hal.instruction_address().wrapping_add(2);
    let status = hal.status_byte() | STATUS_PUSH_MASK;
    enter_interrupt(hal, continue_at, status)?;
    let vector = InterruptVector::IrqBrk as u16;
    let low = hal.read_memory(vector)? as i32;
    let high = hal.read_memory(vector.wrapping_add(1))? as i32;
    Ok((high << 8) | low)
}

/// Execute `ir` until it calls, returns, transfers to an interrupt
/// handler, or runs off the end ([`TERMINAL`]). The result is the 6502
/// address to dispatch next, or a negative sentinel.
pub fn interpret(
    ir: &[Instruction],
    locals: usize,
    hal: &mut dyn Hal,
) -> Result<i32, ExecutionError> {
    let labels: FxHashMap<Label, usize> = ir
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect();
    let resolve = |label: &Label| -> Result<usize, ExecutionError> {
        labels
            .get(label)
            .copied()
            .ok_or(ExecutionError::UnresolvedLabel(*label))
    };

    let mut frame = vec![0i32; locals];
    let mut ip = 0usize;
    while let Some(instruction) = ir.get(ip) {
        ip += 1;
        match instruction {
            Instruction::Copy { src, dst } => {
                let data = read_value(src, &frame, hal)?;
                write_value(dst, data, &mut frame, hal)?;
            }
            Instruction::Binary {
                op,
                left,
                right,
                dst,
            } => {
                let left = read_value(left, &frame, hal)?;
                let right = read_value(right, &frame, hal)?;
                write_value(dst, apply_binary(*op, left, right), &mut frame, hal)?;
            }
            Instruction::Unary { op, src, dst } => {
                let value = read_value(src, &frame, hal)?;
                write_value(dst, apply_unary(*op, value), &mut frame, hal)?;
            }
            Instruction::ConvertToByte { variable } => {
                let slot = frame
                    .get_mut(*variable)
                    .ok_or(ExecutionError::VariableOutOfRange { index: *variable })?;
                *slot &= 0xFF;
            }
            Instruction::Label(_) | Instruction::Nop => {}
            Instruction::Jump(label) => ip = resolve(label)?,
            Instruction::JumpIfZero { condition, target } => {
                if read_value(condition, &frame, hal)? == 0 {
                    ip = resolve(target)?;
                }
            }
            Instruction::JumpIfNotZero { condition, target } => {
                if read_value(condition, &frame, hal)? != 0 {
                    ip = resolve(target)?;
                }
            }
            Instruction::PushStack { src } => {
                let data = read_value(src, &frame, hal)?;
                hal.push(data as u8)?;
            }
            Instruction::PopStack { dst } => {
                let data = hal.pop()?;
                write_value(dst, data as i32, &mut frame, hal)?;
            }
            Instruction::Call { target } => {
                return match target {
                    CallTarget::Address(address) => Ok(*address as i32),
                    CallTarget::Variable(index) => frame
                        .get(*index)
                        .copied()
                        .ok_or(ExecutionError::VariableOutOfRange { index: *index }),
                };
            }
            Instruction::Return { variable } => {
                return frame
                    .get(*variable)
                    .copied()
                    .ok_or(ExecutionError::VariableOutOfRange { index: *variable });
            }
            Instruction::SoftwareInterrupt => return software_interrupt(hal),
            Instruction::PollInterrupt { continue_at } => {
                let vector = hal.poll_interrupt()?;
                if vector != 0 {
                    let status = hal.status_byte();
                    enter_interrupt(hal, *continue_at, status)?;
                    return Ok(vector as i32);
                }
            }
            Instruction::PollRecompilation { resume_at } => {
                if hal.poll_recompilation() {
                    return Ok(*resume_at as i32);
                }
            }
            Instruction::RecordInstructionAddress { address } => {
                hal.set_instruction_address(*address);
            }
            Instruction::DebugValue { value } => {
                let data = read_value(value, &frame, hal)?;
                hal.debug_hook(&format!("debug value: {data:#x}"));
            }
            Instruction::DebugString { text } => hal.debug_hook(text),
        }
    }
    Ok(TERMINAL)
}
