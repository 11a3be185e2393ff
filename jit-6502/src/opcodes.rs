//! The 256-entry opcode table: mnemonic, addressing mode, and byte length
//! for every documented 6502 opcode.
//!
//! The disassembler uses it to know how many operand bytes an instruction
//! consumes; the lowering pass switches on mnemonic and mode. Undocumented
//! opcodes have no entry and are treated as undecodable, which is also how
//! a program halts: running into a byte with no entry ends the decoded
//! path, so test fixtures traditionally stop at a stray 0x02.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
}

impl Mnemonic {
    pub const ALL: [Mnemonic; 56] = [
        Mnemonic::Adc,
        Mnemonic::And,
        Mnemonic::Asl,
        Mnemonic::Bcc,
        Mnemonic::Bcs,
        Mnemonic::Beq,
        Mnemonic::Bit,
        Mnemonic::Bmi,
        Mnemonic::Bne,
        Mnemonic::Bpl,
        Mnemonic::Brk,
        Mnemonic::Bvc,
        Mnemonic::Bvs,
        Mnemonic::Clc,
        Mnemonic::Cld,
        Mnemonic::Cli,
        Mnemonic::Clv,
        Mnemonic::Cmp,
        Mnemonic::Cpx,
        Mnemonic::Cpy,
        Mnemonic::Dec,
        Mnemonic::Dex,
        Mnemonic::Dey,
        Mnemonic::Eor,
        Mnemonic::Inc,
        Mnemonic::Inx,
        Mnemonic::Iny,
        Mnemonic::Jmp,
        Mnemonic::Jsr,
        Mnemonic::Lda,
        Mnemonic::Ldx,
        Mnemonic::Ldy,
        Mnemonic::Lsr,
        Mnemonic::Nop,
        Mnemonic::Ora,
        Mnemonic::Pha,
        Mnemonic::Php,
        Mnemonic::Pla,
        Mnemonic::Plp,
        Mnemonic::Rol,
        Mnemonic::Ror,
        Mnemonic::Rti,
        Mnemonic::Rts,
        Mnemonic::Sbc,
        Mnemonic::Sec,
        Mnemonic::Sed,
        Mnemonic::Sei,
        Mnemonic::Sta,
        Mnemonic::Stx,
        Mnemonic::Sty,
        Mnemonic::Tax,
        Mnemonic::Tay,
        Mnemonic::Tsx,
        Mnemonic::Txa,
        Mnemonic::Txs,
        Mnemonic::Tya,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Mnemonic::Adc => "ADC",
            Mnemonic::And => "AND",
            Mnemonic::Asl => "ASL",
            Mnemonic::Bcc => "BCC",
            Mnemonic::Bcs => "BCS",
            Mnemonic::Beq => "BEQ",
            Mnemonic::Bit => "BIT",
            Mnemonic::Bmi => "BMI",
            Mnemonic::Bne => "BNE",
            Mnemonic::Bpl => "BPL",
            Mnemonic::Brk => "BRK",
            Mnemonic::Bvc => "BVC",
            Mnemonic::Bvs => "BVS",
            Mnemonic::Clc => "CLC",
            Mnemonic::Cld => "CLD",
            Mnemonic::Cli => "CLI",
            Mnemonic::Clv => "CLV",
            Mnemonic::Cmp => "CMP",
            Mnemonic::Cpx => "CPX",
            Mnemonic::Cpy => "CPY",
            Mnemonic::Dec => "DEC",
            Mnemonic::Dex => "DEX",
            Mnemonic::Dey => "DEY",
            Mnemonic::Eor => "EOR",
            Mnemonic::Inc => "INC",
            Mnemonic::Inx => "INX",
            Mnemonic::Iny => "INY",
            Mnemonic::Jmp => "JMP",
            Mnemonic::Jsr => "JSR",
            Mnemonic::Lda => "LDA",
            Mnemonic::Ldx => "LDX",
            Mnemonic::Ldy => "LDY",
            Mnemonic::Lsr => "LSR",
            Mnemonic::Nop => "NOP",
            Mnemonic::Ora => "ORA",
            Mnemonic::Pha => "PHA",
            Mnemonic::Php => "PHP",
            Mnemonic::Pla => "PLA",
            Mnemonic::Plp => "PLP",
            Mnemonic::Rol => "ROL",
            Mnemonic::Ror => "ROR",
            Mnemonic::Rti => "RTI",
            Mnemonic::Rts => "RTS",
            Mnemonic::Sbc => "SBC",
            Mnemonic::Sec => "SEC",
            Mnemonic::Sed => "SED",
            Mnemonic::Sei => "SEI",
            Mnemonic::Sta => "STA",
            Mnemonic::Stx => "STX",
            Mnemonic::Sty => "STY",
            Mnemonic::Tax => "TAX",
            Mnemonic::Tay => "TAY",
            Mnemonic::Tsx => "TSX",
            Mnemonic::Txa => "TXA",
            Mnemonic::Txs => "TXS",
            Mnemonic::Tya => "TYA",
        }
    }

    pub fn from_name(name: &str) -> Option<Mnemonic> {
        Mnemonic::ALL
            .into_iter()
            .find(|mnemonic| mnemonic.name().eq_ignore_ascii_case(name))
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::Bcc
                | Mnemonic::Bcs
                | Mnemonic::Beq
                | Mnemonic::Bmi
                | Mnemonic::Bne
                | Mnemonic::Bpl
                | Mnemonic::Bvc
                | Mnemonic::Bvs
        )
    }

    /// Whether an instruction stores to memory, given its addressing mode.
    /// Used for self-modification analysis and recompilation polling.
    pub fn writes_memory(self, mode: Mode) -> bool {
        match self {
            Mnemonic::Sta | Mnemonic::Stx | Mnemonic::Sty => true,
            Mnemonic::Asl
            | Mnemonic::Lsr
            | Mnemonic::Rol
            | Mnemonic::Ror
            | Mnemonic::Inc
            | Mnemonic::Dec => mode != Mode::Accumulator,
            _ => false,
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Absolute,         // abs
    AbsoluteIndexedX, // abx
    AbsoluteIndexedY, // aby
    Accumulator,      // acc
    Immediate,        // imm
    Implied,          // imp
    Indirect,         // ind
    IndirectX,        // izx
    IndirectY,        // izy
    Relative,         // rel
    ZeroPage,         // zp
    ZeroPageX,        // zpx
    ZeroPageY,        // zpy
}

impl Mode {
    /// Total instruction length in bytes, opcode included.
    pub const fn instruction_size(self) -> u8 {
        match self {
            Mode::Implied | Mode::Accumulator => 1,
            Mode::Immediate
            | Mode::IndirectX
            | Mode::IndirectY
            | Mode::Relative
            | Mode::ZeroPage
            | Mode::ZeroPageX
            | Mode::ZeroPageY => 2,
            Mode::Absolute | Mode::AbsoluteIndexedX | Mode::AbsoluteIndexedY | Mode::Indirect => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeInfo {
    pub mnemonic: Mnemonic,
    pub mode: Mode,
    pub size: u8,
}

macro_rules! mode_to_type {
    (abs) => {
        Mode::Absolute
    };
    (abx) => {
        Mode::AbsoluteIndexedX
    };
    (aby) => {
        Mode::AbsoluteIndexedY
    };
    (acc) => {
        Mode::Accumulator
    };
    (imm) => {
        Mode::Immediate
    };
    (imp) => {
        Mode::Implied
    };
    (ind) => {
        Mode::Indirect
    };
    (izx) => {
        Mode::IndirectX
    };
    (izy) => {
        Mode::IndirectY
    };
    (rel) => {
        Mode::Relative
    };
    (zp) => {
        Mode::ZeroPage
    };
    (zpx) => {
        Mode::ZeroPageX
    };
    (zpy) => {
        Mode::ZeroPageY
    };
}

/// Usage:
/// opcode_table!([
///   { 0x69, Adc, imm },
/// ]);
macro_rules! opcode_table {
    ([ $({ $byte:literal, $mnemonic:ident, $mode:ident }),* $(,)? ]) => {{
        let mut table: [Option<OpcodeInfo>; 256] = [None; 256];
        $(
            table[$byte as usize] = Some(OpcodeInfo {
                mnemonic: Mnemonic::$mnemonic,
                mode: mode_to_type!($mode),
                size: mode_to_type!($mode).instruction_size(),
            });
        )*
        table
    }};
}

/// Every documented opcode. Gaps are the undocumented ones.
#[rustfmt::skip]
pub static OPCODE_TABLE: [Option<OpcodeInfo>; 256] = opcode_table!([
    { 0x00, Brk, imp },
    { 0x01, Ora, izx },
    { 0x05, Ora, zp  },
    { 0x06, Asl, zp  },
    { 0x08, Php, imp },
    { 0x09, Ora, imm },
    { 0x0a, Asl, acc },
    { 0x0d, Ora, abs },
    { 0x0e, Asl, abs },
    { 0x10, Bpl, rel },
    { 0x11, Ora, izy },
    { 0x15, Ora, zpx },
    { 0x16, Asl, zpx },
    { 0x18, Clc, imp },
    { 0x19, Ora, aby },
    { 0x1d, Ora, abx },
    { 0x1e, Asl, abx },
    { 0x20, Jsr, abs },
    { 0x21, And, izx },
    { 0x24, Bit, zp  },
    { 0x25, And, zp  },
    { 0x26, Rol, zp  },
    { 0x28, Plp, imp },
    { 0x29, And, imm },
    { 0x2a, Rol, acc },
    { 0x2c, Bit, abs },
    { 0x2d, And, abs },
    { 0x2e, Rol, abs },
    { 0x30, Bmi, rel },
    { 0x31, And, izy },
    { 0x35, And, zpx },
    { 0x36, Rol, zpx },
    { 0x38, Sec, imp },
    { 0x39, And, aby },
    { 0x3d, And, abx },
    { 0x3e, Rol, abx },
    { 0x40, Rti, imp },
    { 0x41, Eor, izx },
    { 0x45, Eor, zp  },
    { 0x46, Lsr, zp  },
    { 0x48, Pha, imp },
    { 0x49, Eor, imm },
    { 0x4a, Lsr, acc },
    { 0x4c, Jmp, abs },
    { 0x4d, Eor, abs },
    { 0x4e, Lsr, abs },
    { 0x50, Bvc, rel },
    { 0x51, Eor, izy },
    { 0x55, Eor, zpx },
    { 0x56, Lsr, zpx },
    { 0x58, Cli, imp },
    { 0x59, Eor, aby },
    { 0x5d, Eor, abx },
    { 0x5e, Lsr, abx },
    { 0x60, Rts, imp },
    { 0x61, Adc, izx },
    { 0x65, Adc, zp  },
    { 0x66, Ror, zp  },
    { 0x68, Pla, imp },
    { 0x69, Adc, imm },
    { 0x6a, Ror, acc },
    { 0x6c, Jmp, ind },
    { 0x6d, Adc, abs },
    { 0x6e, Ror, abs },
    { 0x70, Bvs, rel },
    { 0x71, Adc, izy },
    { 0x75, Adc, zpx },
    { 0x76, Ror, zpx },
    { 0x78, Sei, imp },
    { 0x79, Adc, aby },
    { 0x7d, Adc, abx },
    { 0x7e, Ror, abx },
    { 0x81, Sta, izx },
    { 0x84, Sty, zp  },
    { 0x85, Sta, zp  },
    { 0x86, Stx, zp  },
    { 0x88, Dey, imp },
    { 0x8a, Txa, imp },
    { 0x8c, Sty, abs },
    { 0x8d, Sta, abs },
    { 0x8e, Stx, abs },
    { 0x90, Bcc, rel },
    { 0x91, Sta, izy },
    { 0x94, Sty, zpx },
    { 0x95, Sta, zpx },
    { 0x96, Stx, zpy },
    { 0x98, Tya, imp },
    { 0x99, Sta, aby },
    { 0x9a, Txs, imp },
    { 0x9d, Sta, abx },
    { 0xa0, Ldy, imm },
    { 0xa1, Lda, izx },
    { 0xa2, Ldx, imm },
    { 0xa4, Ldy, zp  },
    { 0xa5, Lda, zp  },
    { 0xa6, Ldx, zp  },
    { 0xa8, Tay, imp },
    { 0xa9, Lda, imm },
    { 0xaa, Tax, imp },
    { 0xac, Ldy, abs },
    { 0xad, Lda, abs },
    { 0xae, Ldx, abs },
    { 0xb0, Bcs, rel },
    { 0xb1, Lda, izy },
    { 0xb4, Ldy, zpx },
    { 0xb5, Lda, zpx },
    { 0xb6, Ldx, zpy },
    { 0xb8, Clv, imp },
    { 0xb9, Lda, aby },
    { 0xba, Tsx, imp },
    { 0xbc, Ldy, abx },
    { 0xbd, Lda, abx },
    { 0xbe, Ldx, aby },
    { 0xc0, Cpy, imm },
    { 0xc1, Cmp, izx },
    { 0xc4, Cpy, zp  },
    { 0xc5, Cmp, zp  },
    { 0xc6, Dec, zp  },
    { 0xc8, Iny, imp },
    { 0xc9, Cmp, imm },
    { 0xca, Dex, imp },
    { 0xcc, Cpy, abs },
    { 0xcd, Cmp, abs },
    { 0xce, Dec, abs },
    { 0xd0, Bne, rel },
    { 0xd1, Cmp, izy },
    { 0xd5, Cmp, zpx },
    { 0xd6, Dec, zpx },
    { 0xd8, Cld, imp },
    { 0xd9, Cmp, aby },
    { 0xdd, Cmp, abx },
    { 0xde, Dec, abx },
    { 0xe0, Cpx, imm },
    { 0xe1, Sbc, izx },
    { 0xe4, Cpx, zp  },
    { 0xe5, Sbc, zp  },
    { 0xe6, Inc, zp  },
    { 0xe8, Inx, imp },
    { 0xe9, Sbc, imm },
    { 0xea, Nop, imp },
    { 0xec, Cpx, abs },
    { 0xed, Sbc, abs },
    { 0xee, Inc, abs },
    { 0xf0, Beq, rel },
    { 0xf1, Sbc, izy },
    { 0xf5, Sbc, zpx },
    { 0xf6, Inc, zpx },
    { 0xf8, Sed, imp },
    { 0xf9, Sbc, aby },
    { 0xfd, Sbc, abx },
    { 0xfe, Inc, abx },
]);

/// Reverse lookup for the assembler: the opcode byte encoding a
/// mnemonic/mode pair, if one exists.
pub fn opcode_for(mnemonic: Mnemonic, mode: Mode) -> Option<u8> {
    OPCODE_TABLE.iter().enumerate().find_map(|(byte, entry)| match entry {
        Some(info) if info.mnemonic == mnemonic && info.mode == mode => Some(byte as u8),
        _ => None,
    })
}
