//! The compiled execution backend.
//!
//! [`compile`] turns an IR list into a [`CompiledRoutine`]: a sequence of
//! pre-resolved host thunks. All of the work the interpreter does per
//! step — matching on the instruction, resolving labels, deciding how an
//! operand is accessed — happens once, here; what remains at run time is
//! a straight walk over specialized closures. Unresolved labels and
//! constant destinations are rejected at compile time.
//!
//! The routine's frame is the function's temporaries plus
//! [`RESERVED_SLOTS`] staging slots at the top: two for the pointer bytes
//! of indirect-memory sequences and one for binary results.
//!
//! Semantics are shared with the interpreter down to the helper level;
//! for any IR list and starting state the two engines leave the HAL
//! identical, which the program-level tests assert wholesale.

use rustc_hash::FxHashMap;

use crate::error::ExecutionError;
use crate::hal::{CpuRegister, Hal};
use crate::interpreter::{
    apply_binary, apply_unary, enter_interrupt, resolve_memory, software_interrupt,
};
use crate::ir::{
    max_locals, CallTarget, IndirectAddress, Instruction, Label, Value, TERMINAL,
};

/// Codegen temporaries: pointer low, pointer high, binary staging.
pub const RESERVED_SLOTS: usize = 3;

enum Flow {
    Next,
    Goto(usize),
    Finish(i32),
}

type Thunk = Box<dyn Fn(&mut dyn Hal, &mut [i32]) -> Result<Flow, ExecutionError>>;
type Load = Box<dyn Fn(&mut dyn Hal, &mut [i32]) -> Result<i32, ExecutionError>>;
type Store = Box<dyn Fn(&mut dyn Hal, &mut [i32], i32) -> Result<(), ExecutionError>>;

/// A callable routine: takes the HAL, returns the successor address
/// (negative means terminal).
pub struct CompiledRoutine {
    thunks: Vec<Thunk>,
    frame_size: usize,
}

impl CompiledRoutine {
    pub fn run(&self, hal: &mut dyn Hal) -> Result<i32, ExecutionError> {
        let mut frame = vec![0i32; self.frame_size];
        let mut ip = 0usize;
        while let Some(thunk) = self.thunks.get(ip) {
            match thunk(hal, &mut frame)? {
                Flow::Next => ip += 1,
                Flow::Goto(target) => ip = target,
                Flow::Finish(successor) => return Ok(successor),
            }
        }
        Ok(TERMINAL)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Fetch a zero-page pointer, staging the pointer bytes in the reserved
/// slots. Same wrap rules as the interpreter's resolver.
fn fetch_pointer(
    indirect: &IndirectAddress,
    hal: &mut dyn Hal,
    frame: &mut [i32],
    scratch: usize,
) -> Result<u16, ExecutionError> {
    let mut zero_page = indirect.zero_page_address;
    if indirect.pre_index_x {
        zero_page = zero_page.wrapping_add(hal.register(CpuRegister::X));
    }
    frame[scratch] = hal.read_memory(zero_page as u16)? as i32;
    frame[scratch + 1] = hal.read_memory(zero_page.wrapping_add(1) as u16)? as i32;
    let mut pointer = ((frame[scratch + 1] as u16) << 8) | frame[scratch] as u16;
    if indirect.post_index_y {
        pointer = pointer.wrapping_add(hal.register(CpuRegister::Y) as u16);
    }
    Ok(pointer)
}

fn compile_load(value: &Value, scratch: usize) -> Load {
    match value {
        Value::Constant(constant) => {
            let constant = *constant;
            Box::new(move |_, _| Ok(constant))
        }
        Value::Register(register) => {
            let register = *register;
            Box::new(move |hal, _| Ok(hal.register(register) as i32))
        }
        Value::Flag(flag) => {
            let flag = *flag;
            Box::new(move |hal, _| Ok(hal.flag(flag) as i32))
        }
        Value::AllFlags => Box::new(move |hal, _| Ok(hal.status_byte() as i32)),
        Value::StackPointer => Box::new(move |hal, _| Ok(hal.stack_pointer() as i32)),
        Value::Variable(index) => {
            let index = *index;
            Box::new(move |_, frame| {
                frame
                    .get(index)
                    .copied()
                    .ok_or(ExecutionError::VariableOutOfRange { index })
            })
        }
        Value::Memory(memory) => {
            let memory = *memory;
            Box::new(move |hal, _| {
                let address = resolve_memory(&memory, hal);
                Ok(hal.read_memory(address)? as i32)
            })
        }
        Value::Indirect(indirect) => {
            let indirect = *indirect;
            Box::new(move |hal, frame| {
                let address = fetch_pointer(&indirect, hal, frame, scratch)?;
                Ok(hal.read_memory(address)? as i32)
            })
        }
    }
}

fn compile_store(value: &Value, scratch: usize) -> Result<Store, ExecutionError> {
    Ok(match value {
        Value::Constant(_) => return Err(ExecutionError::WriteToConstant),
        Value::Register(register) => {
            let register = *register;
            Box::new(move |hal: &mut dyn Hal, _: &mut [i32], data| {
                hal.set_register(register, data as u8);
                Ok(())
            })
        }
        Value::Flag(flag) => {
            let flag = *flag;
            Box::new(move |hal: &mut dyn Hal, _: &mut [i32], data| {
                hal.set_flag(flag, data != 0);
                Ok(())
            })
        }
        Value::AllFlags => Box::new(move |hal: &mut dyn Hal, _: &mut [i32], data| {
            hal.set_status_byte(data as u8);
            Ok(())
        }),
        Value::StackPointer => Box::new(move |hal: &mut dyn Hal, _: &mut [i32], data| {
            hal.set_stack_pointer(data as u8);
            Ok(())
        }),
        Value::Variable(index) => {
            let index = *index;
            Box::new(move |_: &mut dyn Hal, frame: &mut [i32], data| {
                let slot = frame
                    .get_mut(index)
                    .ok_or(ExecutionError::VariableOutOfRange { index })?;
                *slot = data;
                Ok(())
            })
        }
        Value::Memory(memory) => {
            let memory = *memory;
            Box::new(move |hal: &mut dyn Hal, _: &mut [i32], data| {
                let address = resolve_memory(&memory, hal);
                hal.write_memory(address, data as u8)
            })
        }
        Value::Indirect(indirect) => {
            let indirect = *indirect;
            Box::new(move |hal: &mut dyn Hal, frame: &mut [i32], data| {
                let address = fetch_pointer(&indirect, hal, frame, scratch)?;
                hal.write_memory(address, data as u8)
            })
        }
    })
}

/// Compile an IR list into a callable routine.
pub fn compile(ir: &[Instruction]) -> Result<CompiledRoutine, ExecutionError> {
    let locals = max_locals(ir);
    let frame_size = locals + RESERVED_SLOTS;
    let scratch = locals;
    let staging = locals + 2;

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

    let mut thunks: Vec<Thunk> = Vec::with_capacity(ir.len());
    for instruction in ir {
        let thunk: Thunk = match instruction {
            Instruction::Copy { src, dst } => {
                let load = compile_load(src, scratch);
                let store = compile_store(dst, scratch)?;
                Box::new(move |hal, frame| {
                    let data = load(hal, frame)?;
                    store(hal, frame, data)?;
                    Ok(Flow::Next)
                })
            }
            Instruction::Binary {
                op,
                left,
                right,
                dst,
            } => {
                let op = *op;
                let load_left = compile_load(left, scratch);
                let load_right = compile_load(right, scratch);
                let store = compile_store(dst, scratch)?;
                Box::new(move |hal, frame| {
                    let left = load_left(hal, frame)?;
                    let right = load_right(hal, frame)?;
                    frame[staging] = apply_binary(op, left, right);
                    let result = frame[staging];
                    store(hal, frame, result)?;
                    Ok(Flow::Next)
                })
            }
            Instruction::Unary { op, src, dst } => {
                let op = *op;
                let load = compile_load(src, scratch);
                let store = compile_store(dst, scratch)?;
                Box::new(move |hal, frame| {
                    let value = load(hal, frame)?;
                    frame[staging] = apply_unary(op, value);
                    let result = frame[staging];
                    store(hal, frame, result)?;
                    Ok(Flow::Next)
                })
            }
            Instruction::ConvertToByte { variable } => {
                let index = *variable;
                Box::new(move |_, frame| {
                    let slot = frame
                        .get_mut(index)
                        .ok_or(ExecutionError::VariableOutOfRange { index })?;
                    *slot &= 0xFF;
                    Ok(Flow::Next)
                })
            }
            Instruction::Label(_) | Instruction::Nop => Box::new(|_, _| Ok(Flow::Next)),
            Instruction::Jump(label) => {
                let target = resolve(label)?;
                Box::new(move |_, _| Ok(Flow::Goto(target)))
            }
            Instruction::JumpIfZero { condition, target } => {
                let load = compile_load(condition, scratch);
                let target = resolve(target)?;
                Box::new(move |hal, frame| {
                    if load(hal, frame)? == 0 {
                        Ok(Flow::Goto(target))
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            Instruction::JumpIfNotZero { condition, target } => {
                let load = compile_load(condition, scratch);
                let target = resolve(target)?;
                Box::new(move |hal, frame| {
                    if load(hal, frame)? != 0 {
                        Ok(Flow::Goto(target))
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            Instruction::PushStack { src } => {
                let load = compile_load(src, scratch);
                Box::new(move |hal, frame| {
                    let data = load(hal, frame)?;
                    hal.push(data as u8)?;
                    Ok(Flow::Next)
                })
            }
            Instruction::PopStack { dst } => {
                let store = compile_store(dst, scratch)?;
                Box::new(move |hal, frame| {
                    let data = hal.pop()?;
                    store(hal, frame, data as i32)?;
                    Ok(Flow::Next)
                })
            }
            Instruction::Call { target } => match target {
                CallTarget::Address(address) => {
                    let successor = *address as i32;
                    Box::new(move |_, _| Ok(Flow::Finish(successor)))
                }
                CallTarget::Variable(index) => {
                    let index = *index;
                    Box::new(move |_, frame| {
                        let successor = frame
                            .get(index)
                            .copied()
                            .ok_or(ExecutionError::VariableOutOfRange { index })?;
                        Ok(Flow::Finish(successor))
                    })
                }
            },
            Instruction::Return { variable } => {
                let index = *variable;
                Box::new(move |_, frame| {
                    let successor = frame
                        .get(index)
                        .copied()
                        .ok_or(ExecutionError::VariableOutOfRange { index })?;
                    Ok(Flow::Finish(successor))
                })
            }
            Instruction::SoftwareInterrupt => {
                Box::new(move |hal, _| software_interrupt(hal).map(Flow::Finish))
            }
            Instruction::PollInterrupt { continue_at } => {
                let continue_at = *continue_at;
                Box::new(move |hal, _| {
                    let vector = hal.poll_interrupt()?;
                    if vector != 0 {
                        let status = hal.status_byte();
                        enter_interrupt(hal, continue_at, status)?;
                        Ok(Flow::Finish(vector as i32))
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            Instruction::PollRecompilation { resume_at } => {
                let resume_at = *resume_at;
                Box::new(move |hal, _| {
                    if hal.poll_recompilation() {
                        Ok(Flow::Finish(resume_at as i32))
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            Instruction::RecordInstructionAddress { address } => {
                let address = *address;
                Box::new(move |hal, _| {
                    hal.set_instruction_address(address);
                    Ok(Flow::Next)
                })
            }
            Instruction::DebugValue { value } => {
                let load = compile_load(value, scratch);
                Box::new(move |hal, frame| {
                    let data = load(hal, frame)?;
                    hal.debug_hook(&format!("debug value: {data:#x}"));
                    Ok(Flow::Next)
                })
            }
            Instruction::DebugString { text } => {
                let text = text.clone();
                Box::new(move |hal, _| {
                    hal.debug_hook(&text);
                    Ok(Flow::Next)
                })
            }
        };
        thunks.push(thunk);
    }

    Ok(CompiledRoutine { thunks, frame_size })
}
