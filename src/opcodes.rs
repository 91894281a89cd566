use std::fmt;

/// Operand layout of an instruction family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Two general addresses: `A @>8300,*R2+`
    TwoAddress,
    /// 8-bit signed displacement, jumps
    Jump,
    /// 8-bit signed CRU bit displacement
    CruBit,
    /// General source, workspace register destination: `COC`, `CZC`, `XOR`,
    /// `MPY`, `DIV`
    RegisterDestination,
    /// General source, 4-bit CRU transfer count
    CruMultiBit,
    /// General source, 4-bit extended operation number
    ExtendedOperation,
    /// Workspace register and 4-bit shift count
    Shift,
    /// Single general address
    SingleAddress,
    /// No operands
    Control,
    /// Workspace register followed by an immediate word
    RegisterImmediate,
    /// Immediate word only
    Immediate,
    /// Workspace register only
    Register,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    A,
    AB,
    ABS,
    AI,
    ANDI,
    B,
    BL,
    BLWP,
    C,
    CB,
    CI,
    CKOF,
    CKON,
    CLR,
    COC,
    CZC,
    DEC,
    DECT,
    DIV,
    IDLE,
    INC,
    INCT,
    INV,
    JEQ,
    JGT,
    JH,
    JHE,
    JL,
    JLE,
    JLT,
    JMP,
    JNC,
    JNE,
    JNO,
    JOC,
    JOP,
    LDCR,
    LI,
    LIMI,
    LREX,
    LWPI,
    MOV,
    MOVB,
    MPY,
    NEG,
    ORI,
    RSET,
    RTWP,
    S,
    SB,
    SBO,
    SBZ,
    SETO,
    SLA,
    SOC,
    SOCB,
    SRA,
    SRC,
    SRL,
    STCR,
    STST,
    STWP,
    SWPB,
    SZC,
    SZCB,
    TB,
    X,
    XOP,
    XOR,
    Invalid,
}

/// One instruction family: every word with `word & mask == pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub mnemonic: &'static str,
    pub pattern: u16,
    pub mask: u16,
    pub format: Format,
    pub op: Op,
    /// Base cost before addressing-mode and wait-state clocks.
    pub clocks: u32,
}

impl Opcode {
    pub fn matches(&self, word: u16) -> bool {
        word & self.mask == self.pattern
    }

    pub fn is_byte(&self) -> bool {
        matches!(
            self.op,
            Op::AB | Op::CB | Op::MOVB | Op::SB | Op::SOCB | Op::SZCB
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)
    }
}

const fn op(
    mnemonic: &'static str,
    pattern: u16,
    mask: u16,
    format: Format,
    op: Op,
    clocks: u32,
) -> Opcode {
    Opcode {
        mnemonic,
        pattern,
        mask,
        format,
        op,
        clocks,
    }
}

use Format::*;

/// The full instruction set. The four `Invalid` rows fill the holes so that
/// every one of the 65536 words matches exactly one row.
pub const OPCODES: [Opcode; 73] = [
    op("????", 0x0000, 0xFE00, Invalid, Op::Invalid, 6),
    op("LI", 0x0200, 0xFFE0, RegisterImmediate, Op::LI, 12),
    op("AI", 0x0220, 0xFFE0, RegisterImmediate, Op::AI, 14),
    op("ANDI", 0x0240, 0xFFE0, RegisterImmediate, Op::ANDI, 14),
    op("ORI", 0x0260, 0xFFE0, RegisterImmediate, Op::ORI, 14),
    op("CI", 0x0280, 0xFFE0, RegisterImmediate, Op::CI, 14),
    op("STWP", 0x02A0, 0xFFE0, Register, Op::STWP, 8),
    op("STST", 0x02C0, 0xFFE0, Register, Op::STST, 8),
    op("LWPI", 0x02E0, 0xFFE0, Immediate, Op::LWPI, 10),
    op("LIMI", 0x0300, 0xFFE0, Immediate, Op::LIMI, 16),
    op("????", 0x0320, 0xFFE0, Invalid, Op::Invalid, 6),
    op("IDLE", 0x0340, 0xFFE0, Control, Op::IDLE, 12),
    op("RSET", 0x0360, 0xFFE0, Control, Op::RSET, 12),
    op("RTWP", 0x0380, 0xFFE0, Control, Op::RTWP, 14),
    op("CKON", 0x03A0, 0xFFE0, Control, Op::CKON, 12),
    op("CKOF", 0x03C0, 0xFFE0, Control, Op::CKOF, 12),
    op("LREX", 0x03E0, 0xFFE0, Control, Op::LREX, 12),
    op("BLWP", 0x0400, 0xFFC0, SingleAddress, Op::BLWP, 26),
    op("B", 0x0440, 0xFFC0, SingleAddress, Op::B, 8),
    op("X", 0x0480, 0xFFC0, SingleAddress, Op::X, 8),
    op("CLR", 0x04C0, 0xFFC0, SingleAddress, Op::CLR, 10),
    op("NEG", 0x0500, 0xFFC0, SingleAddress, Op::NEG, 12),
    op("INV", 0x0540, 0xFFC0, SingleAddress, Op::INV, 10),
    op("INC", 0x0580, 0xFFC0, SingleAddress, Op::INC, 10),
    op("INCT", 0x05C0, 0xFFC0, SingleAddress, Op::INCT, 10),
    op("DEC", 0x0600, 0xFFC0, SingleAddress, Op::DEC, 10),
    op("DECT", 0x0640, 0xFFC0, SingleAddress, Op::DECT, 10),
    op("BL", 0x0680, 0xFFC0, SingleAddress, Op::BL, 12),
    op("SWPB", 0x06C0, 0xFFC0, SingleAddress, Op::SWPB, 10),
    op("SETO", 0x0700, 0xFFC0, SingleAddress, Op::SETO, 10),
    op("ABS", 0x0740, 0xFFC0, SingleAddress, Op::ABS, 12),
    op("????", 0x0780, 0xFF80, Invalid, Op::Invalid, 6),
    op("SRA", 0x0800, 0xFF00, Shift, Op::SRA, 12),
    op("SRL", 0x0900, 0xFF00, Shift, Op::SRL, 12),
    op("SLA", 0x0A00, 0xFF00, Shift, Op::SLA, 12),
    op("SRC", 0x0B00, 0xFF00, Shift, Op::SRC, 12),
    op("????", 0x0C00, 0xFC00, Invalid, Op::Invalid, 6),
    op("JMP", 0x1000, 0xFF00, Jump, Op::JMP, 10),
    op("JLT", 0x1100, 0xFF00, Jump, Op::JLT, 10),
    op("JLE", 0x1200, 0xFF00, Jump, Op::JLE, 10),
    op("JEQ", 0x1300, 0xFF00, Jump, Op::JEQ, 10),
    op("JHE", 0x1400, 0xFF00, Jump, Op::JHE, 10),
    op("JGT", 0x1500, 0xFF00, Jump, Op::JGT, 10),
    op("JNE", 0x1600, 0xFF00, Jump, Op::JNE, 10),
    op("JNC", 0x1700, 0xFF00, Jump, Op::JNC, 10),
    op("JOC", 0x1800, 0xFF00, Jump, Op::JOC, 10),
    op("JNO", 0x1900, 0xFF00, Jump, Op::JNO, 10),
    op("JL", 0x1A00, 0xFF00, Jump, Op::JL, 10),
    op("JH", 0x1B00, 0xFF00, Jump, Op::JH, 10),
    op("JOP", 0x1C00, 0xFF00, Jump, Op::JOP, 10),
    op("SBO", 0x1D00, 0xFF00, CruBit, Op::SBO, 12),
    op("SBZ", 0x1E00, 0xFF00, CruBit, Op::SBZ, 12),
    op("TB", 0x1F00, 0xFF00, CruBit, Op::TB, 12),
    op("COC", 0x2000, 0xFC00, RegisterDestination, Op::COC, 14),
    op("CZC", 0x2400, 0xFC00, RegisterDestination, Op::CZC, 14),
    op("XOR", 0x2800, 0xFC00, RegisterDestination, Op::XOR, 14),
    op("XOP", 0x2C00, 0xFC00, ExtendedOperation, Op::XOP, 36),
    op("LDCR", 0x3000, 0xFC00, CruMultiBit, Op::LDCR, 20),
    op("STCR", 0x3400, 0xFC00, CruMultiBit, Op::STCR, 42),
    op("MPY", 0x3800, 0xFC00, RegisterDestination, Op::MPY, 52),
    op("DIV", 0x3C00, 0xFC00, RegisterDestination, Op::DIV, 16),
    op("SZC", 0x4000, 0xF000, TwoAddress, Op::SZC, 14),
    op("SZCB", 0x5000, 0xF000, TwoAddress, Op::SZCB, 14),
    op("S", 0x6000, 0xF000, TwoAddress, Op::S, 14),
    op("SB", 0x7000, 0xF000, TwoAddress, Op::SB, 14),
    op("C", 0x8000, 0xF000, TwoAddress, Op::C, 14),
    op("CB", 0x9000, 0xF000, TwoAddress, Op::CB, 14),
    op("A", 0xA000, 0xF000, TwoAddress, Op::A, 14),
    op("AB", 0xB000, 0xF000, TwoAddress, Op::AB, 14),
    op("MOV", 0xC000, 0xF000, TwoAddress, Op::MOV, 14),
    op("MOVB", 0xD000, 0xF000, TwoAddress, Op::MOVB, 14),
    op("SOC", 0xE000, 0xF000, TwoAddress, Op::SOC, 14),
    op("SOCB", 0xF000, 0xF000, TwoAddress, Op::SOCB, 14),
];

/// Dense decode table: one byte per instruction word holding the index of
/// its row in `OPCODES`.
#[derive(Clone)]
pub struct OpcodeTable {
    lookup: Box<[u8]>,
}

impl fmt::Debug for OpcodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeTable")
            .field("entries", &self.lookup.len())
            .finish()
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeTable {
    pub fn new() -> Self {
        let mut lookup = vec![0u8; 0x10000].into_boxed_slice();
        for (index, entry) in OPCODES.iter().enumerate() {
            // walk every word that agrees with the pattern on the masked bits
            let free = !entry.mask;
            let mut bits: u16 = 0;
            loop {
                lookup[(entry.pattern | bits) as usize] = index as u8;
                if bits == free {
                    break;
                }
                bits = bits.wrapping_sub(free) & free;
            }
        }
        tracing::debug!("[CPU] Opcode table built from {} families", OPCODES.len());
        Self { lookup }
    }

    #[inline]
    pub fn decode(&self, word: u16) -> &'static Opcode {
        &OPCODES[self.lookup[word as usize] as usize]
    }
}
