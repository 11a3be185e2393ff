//! A small two-pass line assembler for the documented instruction set.
//!
//! It exists so programs read as programs — in tests and in host
//! fixtures — instead of as opcode byte soup:
//!
//! ```
//! use jit_6502::asm::assemble;
//!
//! let program = assemble(
//!     0x0600,
//!     "
//!         ldx #$00
//!     loop:
//!         inx
//!         cpx #$03
//!         bne loop
//!     ",
//! )
//! .unwrap();
//! assert_eq!(program.label("loop"), Some(0x0602));
//! ```
//!
//! Syntax: one statement per line, optional `label:` prefix, `;` comments,
//! `.byte` directives, `$` for hex. Literals under 0x100 assemble to the
//! zero-page form when the instruction has one; labels always assemble to
//! the absolute form (except in branches, which are relative).

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::opcodes::{opcode_for, Mnemonic, Mode};

/// Assembled output: bytes to load at `origin`, plus the label table.
#[derive(Debug, Clone)]
pub struct Program {
    pub origin: u16,
    pub bytes: Vec<u8>,
    pub labels: FxHashMap<String, u16>,
}

impl Program {
    pub fn label(&self, name: &str) -> Option<u16> {
        self.labels.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct AssembleError {
    pub line: usize,
    pub message: String,
}

impl AssembleError {
    fn new(line: usize, message: impl Into<String>) -> AssembleError {
        AssembleError {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Literal { value: u16, zero_page: bool },
    Label(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Index {
    None,
    X,
    Y,
}

#[derive(Debug, Clone)]
enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    Indirect(u16),
    IndirectX(u8),
    IndirectY(u8),
    Direct { target: Target, index: Index },
}

#[derive(Debug, Clone)]
enum Statement {
    Bytes(Vec<u8>),
    Instruction { mnemonic: Mnemonic, operand: Operand },
}

struct Line {
    number: usize,
    address: u16,
    statement: Statement,
}

/// Assemble `source` for loading at `origin`.
pub fn assemble(origin: u16, source: &str) -> Result<Program, AssembleError> {
    let mut labels: FxHashMap<String, u16> = FxHashMap::default();
    let mut lines: Vec<Line> = Vec::new();
    let mut address = origin;

    // First pass: parse, size, and place everything; record labels.
    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;
        let mut text = raw.split(';').next().unwrap_or("").trim();

        if let Some(colon) = text.find(':') {
            let label = text[..colon].trim();
            if !is_identifier(label) {
                return Err(AssembleError::new(number, format!("bad label name {label:?}")));
            }
            if labels.insert(label.to_string(), address).is_some() {
                return Err(AssembleError::new(
                    number,
                    format!("label {label:?} is defined twice"),
                ));
            }
            text = text[colon + 1..].trim();
        }
        if text.is_empty() {
            continue;
        }

        let statement = parse_statement(number, text)?;
        let size = statement_size(number, &statement)?;
        lines.push(Line {
            number,
            address,
            statement,
        });
        address = address.wrapping_add(size as u16);
    }

    // Second pass: encode with the complete label table.
    let mut bytes = Vec::new();
    for line in &lines {
        match &line.statement {
            Statement::Bytes(data) => bytes.extend_from_slice(data),
            Statement::Instruction { mnemonic, operand } => {
                encode(line, *mnemonic, operand, &labels, &mut bytes)?;
            }
        }
    }

    Ok(Program {
        origin,
        bytes,
        labels,
    })
}

fn is_identifier(text: &str) -> bool {
    let mut characters = text.chars();
    match characters.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    characters.all(|character| character.is_ascii_alphanumeric() || character == '_')
}

fn parse_number(line: usize, text: &str) -> Result<u16, AssembleError> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix('$') {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse::<u32>()
    };
    match parsed {
        Ok(value) if value <= 0xFFFF => Ok(value as u16),
        _ => Err(AssembleError::new(line, format!("bad number {text:?}"))),
    }
}

fn parse_byte(line: usize, text: &str) -> Result<u8, AssembleError> {
    let value = parse_number(line, text)?;
    if value > 0xFF {
        return Err(AssembleError::new(
            line,
            format!("{text:?} does not fit in one byte"),
        ));
    }
    Ok(value as u8)
}

fn parse_statement(line: usize, text: &str) -> Result<Statement, AssembleError> {
    if let Some(rest) = text.strip_prefix(".byte") {
        let mut data = Vec::new();
        for item in rest.split(',') {
            data.push(parse_byte(line, item)?);
        }
        return Ok(Statement::Bytes(data));
    }

    let (head, tail) = match text.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (text, ""),
    };
    let mnemonic = Mnemonic::from_name(head)
        .ok_or_else(|| AssembleError::new(line, format!("unknown instruction {head:?}")))?;
    let operand = parse_operand(line, tail)?;
    Ok(Statement::Instruction { mnemonic, operand })
}

fn parse_operand(line: usize, text: &str) -> Result<Operand, AssembleError> {
    if text.is_empty() {
        return Ok(Operand::Implied);
    }
    if text.eq_ignore_ascii_case("a") {
        return Ok(Operand::Accumulator);
    }
    if let Some(rest) = text.strip_prefix('#') {
        return Ok(Operand::Immediate(parse_byte(line, rest)?));
    }
    if let Some(rest) = text.strip_prefix('(') {
        let rest = rest.trim();
        let lowered = rest.to_ascii_lowercase();
        if let Some(inner) = lowered.strip_suffix(",x)") {
            return Ok(Operand::IndirectX(parse_byte(line, inner)?));
        }
        if let Some(inner) = lowered.strip_suffix("),y") {
            return Ok(Operand::IndirectY(parse_byte(line, inner)?));
        }
        if let Some(inner) = lowered.strip_suffix(')') {
            return Ok(Operand::Indirect(parse_number(line, inner)?));
        }
        return Err(AssembleError::new(
            line,
            format!("bad indirect operand {text:?}"),
        ));
    }

    // Split a trailing ,X / ,Y off the original text: label case matters.
    let bytes = text.as_bytes();
    let (body, index) = match bytes {
        [.., b',', register] if register.eq_ignore_ascii_case(&b'x') => {
            (text[..text.len() - 2].trim(), Index::X)
        }
        [.., b',', register] if register.eq_ignore_ascii_case(&b'y') => {
            (text[..text.len() - 2].trim(), Index::Y)
        }
        _ => (text, Index::None),
    };

    let target = if body.starts_with('$') || body.starts_with(|c: char| c.is_ascii_digit()) {
        let value = parse_number(line, body)?;
        Target::Literal {
            value,
            zero_page: value < 0x100,
        }
    } else if is_identifier(body) {
        Target::Label(body.to_string())
    } else {
        return Err(AssembleError::new(line, format!("bad operand {text:?}")));
    };
    Ok(Operand::Direct { target, index })
}

/// The addressing mode a statement will encode with. Shared between the
/// sizing pass and the encoding pass so the two can never disagree.
fn choose_mode(
    line: usize,
    mnemonic: Mnemonic,
    operand: &Operand,
) -> Result<Mode, AssembleError> {
    let mode = match operand {
        Operand::Implied => {
            if opcode_for(mnemonic, Mode::Implied).is_some() {
                Mode::Implied
            } else {
                Mode::Accumulator
            }
        }
        Operand::Accumulator => Mode::Accumulator,
        Operand::Immediate(_) => Mode::Immediate,
        Operand::Indirect(_) => Mode::Indirect,
        Operand::IndirectX(_) => Mode::IndirectX,
        Operand::IndirectY(_) => Mode::IndirectY,
        Operand::Direct { target, index } => {
            if mnemonic.is_branch() {
                Mode::Relative
            } else {
                let zero_page = matches!(target, Target::Literal { zero_page: true, .. });
                let (narrow, wide) = match index {
                    Index::None => (Mode::ZeroPage, Mode::Absolute),
                    Index::X => (Mode::ZeroPageX, Mode::AbsoluteIndexedX),
                    Index::Y => (Mode::ZeroPageY, Mode::AbsoluteIndexedY),
                };
                if zero_page && opcode_for(mnemonic, narrow).is_some() {
                    narrow
                } else {
                    wide
                }
            }
        }
    };
    if opcode_for(mnemonic, mode).is_none() {
        return Err(AssembleError::new(
            line,
            format!("{} has no {mode:?} form", mnemonic.name()),
        ));
    }
    Ok(mode)
}

fn statement_size(line: usize, statement: &Statement) -> Result<usize, AssembleError> {
    match statement {
        Statement::Bytes(data) => Ok(data.len()),
        Statement::Instruction { mnemonic, operand } => {
            let mode = choose_mode(line, *mnemonic, operand)?;
            Ok(mode.instruction_size() as usize)
        }
    }
}

fn encode(
    line: &Line,
    mnemonic: Mnemonic,
    operand: &Operand,
    labels: &FxHashMap<String, u16>,
    bytes: &mut Vec<u8>,
) -> Result<(), AssembleError> {
    let mode = choose_mode(line.number, mnemonic, operand)?;
    let opcode = opcode_for(mnemonic, mode)
        .ok_or_else(|| AssembleError::new(line.number, "unencodable instruction"))?;
    bytes.push(opcode);

    let resolve = |target: &Target| -> Result<u16, AssembleError> {
        match target {
            Target::Literal { value, .. } => Ok(*value),
            Target::Label(name) => labels.get(name).copied().ok_or_else(|| {
                AssembleError::new(line.number, format!("unknown label {name:?}"))
            }),
        }
    };

    match (mode, operand) {
        (_, Operand::Implied) | (_, Operand::Accumulator) => {}
        (_, Operand::Immediate(value)) => bytes.push(*value),
        (_, Operand::Indirect(pointer)) => bytes.extend_from_slice(&pointer.to_le_bytes()),
        (_, Operand::IndirectX(zero_page)) | (_, Operand::IndirectY(zero_page)) => {
            bytes.push(*zero_page)
        }
        (Mode::Relative, Operand::Direct { target, .. }) => {
            let destination = resolve(target)?;
            let offset = destination as i32 - (line.address as i32 + 2);
            if !(-128..=127).contains(&offset) {
                return Err(AssembleError::new(
                    line.number,
                    format!("branch target {destination:#06x} is out of range"),
                ));
            }
            bytes.push(offset as i8 as u8);
        }
        (
            Mode::ZeroPage | Mode::ZeroPageX | Mode::ZeroPageY,
            Operand::Direct { target, .. },
        ) => {
            let value = resolve(target)?;
            bytes.push(value as u8);
        }
        (_, Operand::Direct { target, .. }) => {
            let value = resolve(target)?;
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}
