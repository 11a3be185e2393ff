//! Decoding and function decompilation.
//!
//! Given an entry address and the bus's code regions, [`decompile`] traces
//! control flow and produces the ordered instruction list the lowering
//! pass consumes. Tracing follows both sides of a conditional branch and
//! the target of `JMP abs`; a `JSR` continues at the instruction after the
//! call (the callee is its own function); `RTS`, `RTI`, `BRK`, and
//! `JMP (abs)` end a path. Undecodable bytes also end a path — with a
//! diagnostic rather than an error, since self-modifying programs stash
//! data and patch targets in places static tracing cannot understand.

use colored::Colorize;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::bus::CodeRegion;
use crate::error::DecodeError;
use crate::ir::Label;
use crate::opcodes::{Mnemonic, Mode, OpcodeInfo, OPCODE_TABLE};

/// One decoded 6502 instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledInstruction {
    pub address: u16,
    pub info: OpcodeInfo,
    /// The raw instruction bytes, opcode first.
    pub bytes: Vec<u8>,
    /// Where a branch, `JMP abs`, or `JSR` transfers to.
    pub target_address: Option<u16>,
}

impl DisassembledInstruction {
    pub fn size(&self) -> u16 {
        self.info.size as u16
    }

    /// Address of the linear successor.
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.size())
    }

    pub fn operand_u8(&self) -> u8 {
        self.bytes[1]
    }

    pub fn operand_u16(&self) -> u16 {
        (self.bytes[1] as u16) | ((self.bytes[2] as u16) << 8)
    }

    /// Whether execution can continue at the linear successor. `JSR` does
    /// not: in the IR a call is an unconditional transfer, and the
    /// post-call continuation is dispatched as its own function.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.info.mnemonic,
            Mnemonic::Jmp | Mnemonic::Jsr | Mnemonic::Rts | Mnemonic::Rti | Mnemonic::Brk
        )
    }

    pub(crate) fn format_operand(&self) -> String {
        match self.info.mode {
            Mode::Implied => String::new(),
            Mode::Accumulator => "A".to_string(),
            Mode::Immediate => format!("#${:02X}", self.operand_u8()),
            Mode::ZeroPage => format!("${:02X}", self.operand_u8()),
            Mode::ZeroPageX => format!("${:02X},X", self.operand_u8()),
            Mode::ZeroPageY => format!("${:02X},Y", self.operand_u8()),
            Mode::Absolute => format!("${:04X}", self.operand_u16()),
            Mode::AbsoluteIndexedX => format!("${:04X},X", self.operand_u16()),
            Mode::AbsoluteIndexedY => format!("${:04X},Y", self.operand_u16()),
            Mode::Indirect => format!("(${:04X})", self.operand_u16()),
            Mode::IndirectX => format!("(${:02X},X)", self.operand_u8()),
            Mode::IndirectY => format!("(${:02X}),Y", self.operand_u8()),
            Mode::Relative => format!("${:04X}", self.target_address.unwrap_or(0)),
        }
    }
}

/// The inclusive span of addresses a function's instructions occupy, used
/// for cache invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u16,
    pub last: u16,
}

impl ByteRange {
    pub fn contains(&self, address: u16) -> bool {
        self.first <= address && address <= self.last
    }
}

/// A decompiled function: ordered instructions, in-function jump targets,
/// the byte span it occupies, and whether it statically stores into that
/// span.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub entry: u16,
    /// Entry first, ascending; fragments that live before the entry are
    /// appended, also ascending. The IR for index 0 is where execution
    /// starts.
    pub instructions: Vec<DisassembledInstruction>,
    pub jump_targets: FxHashMap<u16, Label>,
    pub byte_range: ByteRange,
    pub is_self_modifying: bool,
    pub diagnostics: Vec<String>,
}

impl FunctionBody {
    pub fn label_at(&self, address: u16) -> Option<Label> {
        self.jump_targets.get(&address).copied()
    }

    /// Whether `address` holds a decoded instruction of this function.
    pub fn decodes(&self, address: u16) -> bool {
        self.instructions
            .iter()
            .any(|instruction| instruction.address == address)
    }
}

fn region_at(regions: &[CodeRegion], address: u16) -> Option<&CodeRegion> {
    regions.iter().find(|region| region.contains(address))
}

/// Decode the instruction at `address` out of the flattened code regions.
pub fn decode_at(
    regions: &[CodeRegion],
    address: u16,
) -> Result<DisassembledInstruction, DecodeError> {
    let region = region_at(regions, address).ok_or(DecodeError::Unmapped { address })?;
    let offset = (address - region.base) as usize;
    let opcode = region.bytes[offset];
    let info = OPCODE_TABLE[opcode as usize].ok_or(DecodeError::UnknownOpcode { opcode, address })?;

    let end = offset + info.size as usize;
    if end > region.bytes.len() {
        return Err(DecodeError::Truncated { address });
    }
    let bytes = region.bytes[offset..end].to_vec();

    let mut instruction = DisassembledInstruction {
        address,
        info,
        bytes,
        target_address: None,
    };
    instruction.target_address = match info.mode {
        Mode::Relative => {
            let offset = instruction.operand_u8() as i8;
            Some(
                instruction
                    .next_address()
                    .wrapping_add(offset as i16 as u16),
            )
        }
        Mode::Absolute if matches!(info.mnemonic, Mnemonic::Jmp | Mnemonic::Jsr) => {
            Some(instruction.operand_u16())
        }
        _ => None,
    };
    Ok(instruction)
}

/// Trace the function whose entry is `entry` and return its body.
pub fn decompile(entry: u16, regions: &[CodeRegion]) -> Result<FunctionBody, DecodeError> {
    let mut decoded: FxHashMap<u16, DisassembledInstruction> = FxHashMap::default();
    let mut branch_targets: FxHashSet<u16> = FxHashSet::default();
    let mut diagnostics = Vec::new();
    let mut worklist = vec![entry];

    while let Some(address) = worklist.pop() {
        if decoded.contains_key(&address) {
            continue;
        }
        let instruction = match decode_at(regions, address) {
            Ok(instruction) => instruction,
            Err(error) => {
                if address == entry {
                    return Err(error);
                }
                let note = format!("path ends at {address:#06x}: {error}");
                tracing::debug!(target: "jit6502::disassembler", "{note}");
                diagnostics.push(note);
                continue;
            }
        };

        match instruction.info.mnemonic {
            Mnemonic::Jsr => {
                if instruction.target_address.is_none() {
                    return Err(DecodeError::JsrWithoutTarget { address });
                }
                // The callee is not part of this function; continue at the
                // post-call successor.
                worklist.push(instruction.next_address());
            }
            Mnemonic::Jmp => {
                if let Some(target) = instruction.target_address {
                    branch_targets.insert(target);
                    worklist.push(target);
                }
                // JMP (abs) resolves at run time and ends the path.
            }
            Mnemonic::Rts | Mnemonic::Rti | Mnemonic::Brk => {}
            mnemonic if mnemonic.is_branch() => {
                if let Some(target) = instruction.target_address {
                    branch_targets.insert(target);
                    worklist.push(target);
                }
                worklist.push(instruction.next_address());
            }
            _ => worklist.push(instruction.next_address()),
        }
        decoded.insert(address, instruction);
    }

    if decoded.is_empty() {
        return Err(DecodeError::EmptyFunction { entry });
    }

    // Entry-first order: everything at or after the entry ascending, then
    // any pre-entry fragments, also ascending.
    let mut addresses: Vec<u16> = decoded.keys().copied().collect();
    addresses.sort_unstable();
    let ordered: Vec<DisassembledInstruction> = addresses
        .iter()
        .filter(|address| **address >= entry)
        .chain(addresses.iter().filter(|address| **address < entry))
        .map(|address| decoded[address].clone())
        .collect();

    let first = addresses[0];
    let last = addresses
        .iter()
        .map(|address| decoded[address].next_address().wrapping_sub(1))
        .max()
        .unwrap_or(first);
    let byte_range = ByteRange { first, last };

    // Label every in-function control-flow target, plus the linear
    // successor at every seam the entry-first ordering introduces, so the
    // lowering can stitch fallthrough back together with explicit jumps.
    // The last instruction counts too: a pre-entry fragment usually flows
    // back into the entry.
    for (position, instruction) in ordered.iter().enumerate() {
        let next_linear = instruction.next_address();
        let next_in_list = ordered.get(position + 1).map(|next| next.address);
        if instruction.falls_through()
            && next_in_list != Some(next_linear)
            && decoded.contains_key(&next_linear)
        {
            branch_targets.insert(next_linear);
        }
    }
    let mut label_addresses: Vec<u16> = branch_targets
        .into_iter()
        .filter(|target| decoded.contains_key(target))
        .collect();
    label_addresses.sort_unstable();
    let jump_targets: FxHashMap<u16, Label> = label_addresses
        .into_iter()
        .enumerate()
        .map(|(index, address)| (address, Label(index as u32)))
        .collect();

    let is_self_modifying = ordered.iter().any(|instruction| {
        static_store_target(instruction)
            .map(|target| byte_range.contains(target))
            .unwrap_or(false)
    });

    Ok(FunctionBody {
        entry,
        instructions: ordered,
        jump_targets,
        byte_range,
        is_self_modifying,
        diagnostics,
    })
}

/// The destination of a store whose address is statically provable.
/// Indexed and indirect stores resolve at run time; they are reported as
/// `None` and caught by the cache invalidator instead.
fn static_store_target(instruction: &DisassembledInstruction) -> Option<u16> {
    if !instruction
        .info
        .mnemonic
        .writes_memory(instruction.info.mode)
    {
        return None;
    }
    match instruction.info.mode {
        Mode::ZeroPage => Some(instruction.operand_u8() as u16),
        Mode::Absolute => Some(instruction.operand_u16()),
        _ => None,
    }
}

/// Render a decompiled function as a human-readable listing.
pub fn format_listing(body: &FunctionBody) -> String {
    let mut listing = String::new();
    for instruction in &body.instructions {
        let address = format!("{:04X}", instruction.address);
        let bytes = instruction
            .bytes
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let marker = if body.label_at(instruction.address).is_some() {
            "*"
        } else {
            " "
        };
        listing.push_str(&format!(
            "{}{} {:8} {} {}\n",
            marker,
            address.cyan(),
            bytes,
            instruction.info.mnemonic.name().bright_white(),
            instruction.format_operand()
        ));
    }
    for note in &body.diagnostics {
        listing.push_str(&format!("; {}\n", note.yellow()));
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions_from(base: u16, bytes: &[u8]) -> Vec<CodeRegion> {
        vec![CodeRegion {
            base,
            bytes: bytes.to_vec(),
        }]
    }

    #[test]
    fn decodes_a_straight_line_function() {
        // LDA #$01; STA $10; RTS
        let regions = regions_from(0x0600, &[0xA9, 0x01, 0x85, 0x10, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();

        assert_eq!(body.instructions.len(), 3);
        assert_eq!(body.instructions[0].info.mnemonic, Mnemonic::Lda);
        assert_eq!(body.instructions[1].info.mnemonic, Mnemonic::Sta);
        assert_eq!(body.instructions[2].info.mnemonic, Mnemonic::Rts);
        assert_eq!(body.byte_range, ByteRange { first: 0x0600, last: 0x0604 });
        assert!(!body.is_self_modifying);
        assert!(body.jump_targets.is_empty());
    }

    #[test]
    fn a_branch_traces_both_successors() {
        // 0600: BEQ $0604
        // 0602: LDA #$01
        // 0604: RTS
        let regions = regions_from(0x0600, &[0xF0, 0x02, 0xA9, 0x01, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();

        assert_eq!(body.instructions.len(), 3);
        assert!(body.label_at(0x0604).is_some());
        assert_eq!(body.jump_targets.len(), 1);
    }

    #[test]
    fn a_backward_branch_target_gets_a_label() {
        // 0600: INX
        // 0601: BNE $0600
        // 0603: RTS
        let regions = regions_from(0x0600, &[0xE8, 0xD0, 0xFD, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();

        assert!(body.label_at(0x0600).is_some());
        assert_eq!(body.instructions[0].address, 0x0600);
    }

    #[test]
    fn jsr_does_not_trace_into_the_callee() {
        // 0600: JSR $0700; RTS -- callee at 0700 is never decoded here
        let regions = regions_from(0x0600, &[0x20, 0x00, 0x07, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();

        assert_eq!(body.instructions.len(), 2);
        assert!(!body.decodes(0x0700));
        assert_eq!(body.instructions[0].target_address, Some(0x0700));
    }

    #[test]
    fn undecodable_bytes_end_a_path_with_a_diagnostic() {
        // LDA #$01 then the undocumented 0x02.
        let regions = regions_from(0x0600, &[0xA9, 0x01, 0x02]);
        let body = decompile(0x0600, &regions).unwrap();

        assert_eq!(body.instructions.len(), 1);
        assert_eq!(body.diagnostics.len(), 1);
        assert!(body.diagnostics[0].contains("0x0602"));
    }

    #[test]
    fn an_undecodable_entry_is_an_error() {
        let regions = regions_from(0x0600, &[0x02]);
        assert_eq!(
            decompile(0x0600, &regions),
            Err(DecodeError::UnknownOpcode {
                opcode: 0x02,
                address: 0x0600
            })
        );
    }

    #[test]
    fn an_unmapped_entry_is_an_error() {
        let regions = regions_from(0x0600, &[0xEA]);
        assert_eq!(
            decompile(0x8000, &regions),
            Err(DecodeError::Unmapped { address: 0x8000 })
        );
    }

    #[test]
    fn a_truncated_instruction_ends_the_path() {
        // LDA #$01 then a JMP with only one operand byte in the region.
        let regions = regions_from(0x0600, &[0xA9, 0x01, 0x4C, 0x00]);
        let body = decompile(0x0600, &regions).unwrap();
        assert_eq!(body.instructions.len(), 1);
        assert_eq!(body.diagnostics.len(), 1);
    }

    #[test]
    fn a_static_store_into_the_function_marks_it_self_modifying() {
        // 0600: LDA #$05
        // 0602: STA $0605  -- patches the operand of the RTS-adjacent byte
        // 0605: RTS
        let regions = regions_from(0x0600, &[0xA9, 0x05, 0x8D, 0x05, 0x06, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();
        assert!(body.is_self_modifying);
    }

    #[test]
    fn an_indexed_store_is_conservatively_not_self_modifying() {
        // 0600: STA $0600,X; RTS
        let regions = regions_from(0x0600, &[0x9D, 0x00, 0x06, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();
        assert!(!body.is_self_modifying);
    }

    #[test]
    fn a_store_outside_the_function_is_not_self_modifying() {
        // 0600: STA $1000; RTS
        let regions = regions_from(0x0600, &[0x8D, 0x00, 0x10, 0x60]);
        let body = decompile(0x0600, &regions).unwrap();
        assert!(!body.is_self_modifying);
    }

    #[test]
    fn decodes_across_region_boundaries_by_region() {
        let regions = vec![
            CodeRegion {
                base: 0x0600,
                bytes: vec![0x4C, 0x00, 0x08], // JMP $0800
            },
            CodeRegion {
                base: 0x0800,
                bytes: vec![0x60], // RTS
            },
        ];
        let body = decompile(0x0600, &regions).unwrap();
        assert_eq!(body.instructions.len(), 2);
        assert_eq!(body.byte_range, ByteRange { first: 0x0600, last: 0x0800 });
    }

    #[test]
    fn relative_targets_resolve_backwards_and_forwards() {
        let regions = regions_from(0x0600, &[0xF0, 0xFE, 0x60]); // BEQ $0600
        let body = decompile(0x0600, &regions).unwrap();
        assert_eq!(body.instructions[0].target_address, Some(0x0600));
    }

    #[test]
    fn the_listing_renders_addresses_mnemonics_and_diagnostics() {
        colored::control::set_override(false);
        let regions = regions_from(0x0600, &[0xA9, 0x01, 0x02]);
        let body = decompile(0x0600, &regions).unwrap();
        let listing = format_listing(&body);
        assert!(listing.contains("0600"));
        assert!(listing.contains("LDA"));
        assert!(listing.contains("#$01"));
        assert!(listing.contains("path ends"));
    }
}
