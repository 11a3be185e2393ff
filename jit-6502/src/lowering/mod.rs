//! Lowering decoded 6502 instructions onto IR templates.
//!
//! Every opcode/addressing-mode pair expands to a deterministic IR
//! sequence. The templates live in three modules mirroring the
//! instruction groups: [`logical`] (arithmetic, shifts, compares),
//! [`moves`] (loads, stores, transfers, stack), and [`jumps`] (branches,
//! jumps, calls, flag set/clear).
//!
//! Each lowered instruction starts by recording its address and polling
//! for a pending interrupt; instructions that store to memory end with a
//! recompilation poll so a routine invalidated by its own write gives
//! control back to the driver after the writing instruction, not during
//! it.

pub mod jumps;
pub mod logical;
pub mod moves;
#[cfg(test)]
mod test;

use crate::disassembler::{ByteRange, DisassembledInstruction, FunctionBody};
use crate::error::LoweringError;
use crate::hal::{CpuRegister, StatusFlag};
use crate::ir::{
    max_locals, BinaryOp, IndirectAddress, Instruction, Label, MemoryAddress, Value, TERMINAL,
};
use crate::opcodes::{Mnemonic, Mode};

/// Shorthand used throughout the templates.
pub(crate) fn variable(index: usize) -> Value {
    Value::Variable(index)
}

pub(crate) fn constant(value: i32) -> Value {
    Value::Constant(value)
}

/// A function ready for either execution engine.
#[derive(Debug, Clone)]
pub struct LoweredFunction {
    pub entry: u16,
    pub ir: Vec<Instruction>,
    pub locals: usize,
    pub byte_range: ByteRange,
    pub is_self_modifying: bool,
}

/// Lower a whole decompiled function. With `trace` set, every 6502
/// instruction also emits its listing line through the debug hook.
pub fn lower_function(
    body: &FunctionBody,
    trace: bool,
) -> Result<LoweredFunction, LoweringError> {
    let mut lowerer = Lowerer::new(body);
    for (index, instruction) in body.instructions.iter().enumerate() {
        lowerer.reset_variables();
        if let Some(label) = body.label_at(instruction.address) {
            lowerer.emit(Instruction::Label(label));
        }
        lowerer.emit(Instruction::RecordInstructionAddress {
            address: instruction.address,
        });
        lowerer.emit(Instruction::PollInterrupt {
            continue_at: instruction.address,
        });
        if trace {
            lowerer.emit(Instruction::DebugString {
                text: format!(
                    "{:04X}  {} {}",
                    instruction.address,
                    instruction.info.mnemonic,
                    instruction.format_operand()
                ),
            });
        }

        lower_instruction(&mut lowerer, instruction)?;

        if instruction
            .info
            .mnemonic
            .writes_memory(instruction.info.mode)
        {
            lowerer.emit(Instruction::PollRecompilation {
                resume_at: instruction.next_address(),
            });
        }

        lowerer.patch_fallthrough(index)?;
    }

    let ir = lowerer.finish();
    let locals = max_locals(&ir);
    Ok(LoweredFunction {
        entry: body.entry,
        ir,
        locals,
        byte_range: body.byte_range,
        is_self_modifying: body.is_self_modifying,
    })
}

fn lower_instruction(
    lowerer: &mut Lowerer<'_>,
    instruction: &DisassembledInstruction,
) -> Result<(), LoweringError> {
    match instruction.info.mnemonic {
        Mnemonic::Adc => logical::adc(lowerer, instruction),
        Mnemonic::And => logical::and(lowerer, instruction),
        Mnemonic::Asl => logical::asl(lowerer, instruction),
        Mnemonic::Cmp => logical::cmp(lowerer, instruction),
        Mnemonic::Cpx => logical::cpx(lowerer, instruction),
        Mnemonic::Cpy => logical::cpy(lowerer, instruction),
        Mnemonic::Dec => logical::dec(lowerer, instruction),
        Mnemonic::Dex => logical::dex(lowerer, instruction),
        Mnemonic::Dey => logical::dey(lowerer, instruction),
        Mnemonic::Eor => logical::eor(lowerer, instruction),
        Mnemonic::Inc => logical::inc(lowerer, instruction),
        Mnemonic::Inx => logical::inx(lowerer, instruction),
        Mnemonic::Iny => logical::iny(lowerer, instruction),
        Mnemonic::Lsr => logical::lsr(lowerer, instruction),
        Mnemonic::Ora => logical::ora(lowerer, instruction),
        Mnemonic::Rol => logical::rol(lowerer, instruction),
        Mnemonic::Ror => logical::ror(lowerer, instruction),
        Mnemonic::Sbc => logical::sbc(lowerer, instruction),

        Mnemonic::Lda => moves::lda(lowerer, instruction),
        Mnemonic::Ldx => moves::ldx(lowerer, instruction),
        Mnemonic::Ldy => moves::ldy(lowerer, instruction),
        Mnemonic::Pha => moves::pha(lowerer, instruction),
        Mnemonic::Php => moves::php(lowerer, instruction),
        Mnemonic::Pla => moves::pla(lowerer, instruction),
        Mnemonic::Plp => moves::plp(lowerer, instruction),
        Mnemonic::Sta => moves::sta(lowerer, instruction),
        Mnemonic::Stx => moves::stx(lowerer, instruction),
        Mnemonic::Sty => moves::sty(lowerer, instruction),
        Mnemonic::Tax => moves::tax(lowerer, instruction),
        Mnemonic::Tay => moves::tay(lowerer, instruction),
        Mnemonic::Tsx => moves::tsx(lowerer, instruction),
        Mnemonic::Txa => moves::txa(lowerer, instruction),
        Mnemonic::Txs => moves::txs(lowerer, instruction),
        Mnemonic::Tya => moves::tya(lowerer, instruction),

        Mnemonic::Bcc => jumps::bcc(lowerer, instruction),
        Mnemonic::Bcs => jumps::bcs(lowerer, instruction),
        Mnemonic::Beq => jumps::beq(lowerer, instruction),
        Mnemonic::Bit => jumps::bit(lowerer, instruction),
        Mnemonic::Bmi => jumps::bmi(lowerer, instruction),
        Mnemonic::Bne => jumps::bne(lowerer, instruction),
        Mnemonic::Bpl => jumps::bpl(lowerer, instruction),
        Mnemonic::Brk => jumps::brk(lowerer, instruction),
        Mnemonic::Bvc => jumps::bvc(lowerer, instruction),
        Mnemonic::Bvs => jumps::bvs(lowerer, instruction),
        Mnemonic::Clc => jumps::clc(lowerer, instruction),
        Mnemonic::Cld => jumps::cld(lowerer, instruction),
        Mnemonic::Cli => jumps::cli(lowerer, instruction),
        Mnemonic::Clv => jumps::clv(lowerer, instruction),
        Mnemonic::Jmp => jumps::jmp(lowerer, instruction),
        Mnemonic::Jsr => jumps::jsr(lowerer, instruction),
        Mnemonic::Nop => jumps::nop(lowerer, instruction),
        Mnemonic::Rti => jumps::rti(lowerer, instruction),
        Mnemonic::Rts => jumps::rts(lowerer, instruction),
        Mnemonic::Sec => jumps::sec(lowerer, instruction),
        Mnemonic::Sed => jumps::sed(lowerer, instruction),
        Mnemonic::Sei => jumps::sei(lowerer, instruction),
    }
}

/// Builder state shared by the per-opcode templates.
pub struct Lowerer<'a> {
    body: &'a FunctionBody,
    ir: Vec<Instruction>,
    next_variable: usize,
}

impl<'a> Lowerer<'a> {
    fn new(body: &'a FunctionBody) -> Lowerer<'a> {
        Lowerer {
            body,
            ir: Vec::new(),
            next_variable: 0,
        }
    }

    pub(crate) fn emit(&mut self, instruction: Instruction) {
        self.ir.push(instruction);
    }

    /// Allocate a fresh temporary. Temporaries never carry machine state
    /// across a 6502 instruction boundary, so the counter resets per
    /// instruction and the frame stays small.
    pub(crate) fn variable(&mut self) -> usize {
        let index = self.next_variable;
        self.next_variable += 1;
        index
    }

    fn reset_variables(&mut self) {
        self.next_variable = 0;
    }

    fn finish(self) -> Vec<Instruction> {
        self.ir
    }

    /// The operand of the instruction as an IR value, per addressing mode.
    pub(crate) fn operand(
        &self,
        instruction: &DisassembledInstruction,
    ) -> Result<Value, LoweringError> {
        let value = match instruction.info.mode {
            Mode::Immediate => Value::Constant(instruction.operand_u8() as i32),
            Mode::Accumulator => Value::Register(CpuRegister::A),
            Mode::ZeroPage => Value::Memory(MemoryAddress {
                address: instruction.operand_u8() as u16,
                index: None,
                single_byte_address: true,
            }),
            Mode::ZeroPageX => Value::Memory(MemoryAddress {
                address: instruction.operand_u8() as u16,
                index: Some(CpuRegister::X),
                single_byte_address: true,
            }),
            Mode::ZeroPageY => Value::Memory(MemoryAddress {
                address: instruction.operand_u8() as u16,
                index: Some(CpuRegister::Y),
                single_byte_address: true,
            }),
            Mode::Absolute => Value::Memory(MemoryAddress {
                address: instruction.operand_u16(),
                index: None,
                single_byte_address: false,
            }),
            Mode::AbsoluteIndexedX => Value::Memory(MemoryAddress {
                address: instruction.operand_u16(),
                index: Some(CpuRegister::X),
                single_byte_address: false,
            }),
            Mode::AbsoluteIndexedY => Value::Memory(MemoryAddress {
                address: instruction.operand_u16(),
                index: Some(CpuRegister::Y),
                single_byte_address: false,
            }),
            Mode::IndirectX => Value::Indirect(IndirectAddress {
                zero_page_address: instruction.operand_u8(),
                pre_index_x: true,
                post_index_y: false,
            }),
            Mode::IndirectY => Value::Indirect(IndirectAddress {
                zero_page_address: instruction.operand_u8(),
                pre_index_x: false,
                post_index_y: true,
            }),
            Mode::Implied | Mode::Relative | Mode::Indirect => {
                return Err(self.unsupported(instruction))
            }
        };
        Ok(value)
    }

    /// Copy the operand into a fresh temporary, so templates that use the
    /// value more than once read memory exactly once.
    pub(crate) fn operand_to_variable(
        &mut self,
        instruction: &DisassembledInstruction,
    ) -> Result<usize, LoweringError> {
        let operand = self.operand(instruction)?;
        let value = self.variable();
        self.emit(Instruction::Copy {
            src: operand,
            dst: variable(value),
        });
        Ok(value)
    }

    /// Label of the in-function target of a branch or `JMP abs`.
    pub(crate) fn branch_label(
        &self,
        instruction: &DisassembledInstruction,
    ) -> Result<Label, LoweringError> {
        let target =
            instruction
                .target_address
                .ok_or(LoweringError::MissingTargetAddress {
                    address: instruction.address,
                })?;
        self.body
            .label_at(target)
            .ok_or(LoweringError::MissingBranchLabel {
                address: instruction.address,
                target,
            })
    }

    /// Zero and Negative from a re-readable value (a variable or
    /// register): `Z <- value == 0`, `N <- value & 0x80 != 0`.
    pub(crate) fn set_nz(&mut self, value: Value) {
        self.emit(Instruction::Binary {
            op: BinaryOp::Equal,
            left: value,
            right: constant(0),
            dst: Value::Flag(StatusFlag::Zero),
        });
        let sign = self.variable();
        self.emit(Instruction::Binary {
            op: BinaryOp::And,
            left: value,
            right: constant(0x80),
            dst: variable(sign),
        });
        self.emit(Instruction::Binary {
            op: BinaryOp::NotEqual,
            left: variable(sign),
            right: constant(0),
            dst: Value::Flag(StatusFlag::Negative),
        });
    }

    pub(crate) fn unsupported(&self, instruction: &DisassembledInstruction) -> LoweringError {
        LoweringError::UnsupportedInstruction {
            mnemonic: instruction.info.mnemonic.name(),
            mode: instruction.info.mode,
            address: instruction.address,
        }
    }

    /// Stitch linear fallthrough back together after the entry-first
    /// ordering: if the next instruction in the list is not the linear
    /// successor, jump to its label; if the successor was never decoded,
    /// the function ends here.
    fn patch_fallthrough(&mut self, index: usize) -> Result<(), LoweringError> {
        let body = self.body;
        let instruction = &body.instructions[index];
        if !instruction.falls_through() {
            return Ok(());
        }
        let next_linear = instruction.next_address();
        if let Some(next) = body.instructions.get(index + 1) {
            if next.address == next_linear {
                return Ok(());
            }
        }
        if let Some(label) = body.label_at(next_linear) {
            self.emit(Instruction::Jump(label));
            Ok(())
        } else if body.decodes(next_linear) {
            Err(LoweringError::MissingBranchLabel {
                address: instruction.address,
                target: next_linear,
            })
        } else {
            let successor = self.variable();
            self.emit(Instruction::Copy {
                src: constant(TERMINAL),
                dst: variable(successor),
            });
            self.emit(Instruction::Return {
                variable: successor,
            });
            Ok(())
        }
    }
}
