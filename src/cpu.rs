use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::Trap,
    opcodes::{Format, Op, Opcode, OpcodeTable},
};

pub const ST_LGT: u16 = 0x8000;
pub const ST_AGT: u16 = 0x4000;
pub const ST_EQ: u16 = 0x2000;
pub const ST_C: u16 = 0x1000;
pub const ST_OV: u16 = 0x0800;
pub const ST_OP: u16 = 0x0400;
pub const ST_X: u16 = 0x0200;
pub const ST_MASK: u16 = 0x000F;
/// Bits the status register can actually hold.
pub const ST_DEFINED: u16 = 0xFE0F;

const INTERRUPT_CLOCKS: u32 = 22;
const IDLE_CLOCKS: u32 = 4;
/// `X` may target another `X`; give up after this many levels.
const MAX_EXECUTE_DEPTH: u8 = 8;

/// Everything the CPU reaches outside its own registers.
pub trait CpuIo {
    fn read_word(&mut self, address: u16) -> u16;
    fn write_word(&mut self, address: u16, value: u16);
    fn read_byte(&mut self, address: u16) -> u8;
    fn write_byte(&mut self, address: u16, value: u8);

    /// CRU bit access. `bit` is already the 12-bit bit address.
    fn read_cru(&mut self, bit: u16, clock: u64) -> bool;
    fn write_cru(&mut self, bit: u16, value: bool, clock: u64);

    /// Level presented on the interrupt inputs, if any.
    fn interrupt_level(&mut self, clock: u64) -> Option<u8>;

    /// Extra clocks spent on slow memory since the last call.
    fn take_wait_states(&mut self) -> u32 {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Halted,
    Running,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub pc: u16,
    pub wp: u16,
    pub st: u16,
    pub cycles: u64,
    pub run_state: RunState,
    /// Set by BLWP and XOP: the next interrupt check is skipped.
    pub skip_interrupt: bool,
    pub trap_count: u64,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            pc: 0,
            wp: 0,
            st: 0,
            cycles: 0,
            run_state: RunState::Halted,
            skip_interrupt: false,
            trap_count: 0,
        }
    }
}

pub struct TMS9900<I: CpuIo> {
    pub io: I,
    pub state: CpuState,
    table: OpcodeTable,
    last_trap: Option<Trap>,
}

impl<I: CpuIo> fmt::Debug for TMS9900<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TMS9900")
            .field("pc", &format_args!(">{:04X}", self.state.pc))
            .field("wp", &format_args!(">{:04X}", self.state.wp))
            .field("st", &format_args!(">{:04X}", self.state.st))
            .field("cycles", &self.state.cycles)
            .field("run_state", &self.state.run_state)
            .finish()
    }
}

impl<I: CpuIo> TMS9900<I> {
    pub fn new(io: I) -> Self {
        Self {
            io,
            state: CpuState::default(),
            table: OpcodeTable::new(),
            last_trap: None,
        }
    }

    pub fn pc(&self) -> u16 {
        self.state.pc
    }

    pub fn wp(&self) -> u16 {
        self.state.wp
    }

    pub fn st(&self) -> u16 {
        self.state.st
    }

    pub fn cycles(&self) -> u64 {
        self.state.cycles
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.state.pc = pc & !1;
    }

    pub fn set_wp(&mut self, wp: u16) {
        self.state.wp = wp & !1;
    }

    pub fn set_st(&mut self, st: u16) {
        self.state.st = st & ST_DEFINED;
    }

    pub fn interrupt_mask(&self) -> u16 {
        self.state.st & ST_MASK
    }

    pub fn opcodes(&self) -> &OpcodeTable {
        &self.table
    }

    pub fn halted(&self) -> bool {
        self.state.run_state == RunState::Halted
    }

    pub fn is_idle(&self) -> bool {
        self.state.run_state == RunState::Idle
    }

    /// Loads WP and PC from the reset vector. The CPU stays halted until
    /// `start`.
    pub fn reset(&mut self) {
        let cycles = self.state.cycles;
        let trap_count = self.state.trap_count;
        self.state = CpuState {
            cycles,
            trap_count,
            ..CpuState::default()
        };
        self.state.wp = self.io.read_word(0x0000) & !1;
        self.state.pc = self.io.read_word(0x0002) & !1;
        self.io.take_wait_states();
        self.last_trap = None;
        debug!(
            "[CPU] Reset: WP=>{:04X} PC=>{:04X}",
            self.state.wp, self.state.pc
        );
    }

    pub fn start(&mut self) {
        if self.state.run_state == RunState::Halted {
            self.state.run_state = RunState::Running;
        }
    }

    pub fn stop(&mut self) {
        self.state.run_state = RunState::Halted;
    }

    pub fn take_trap(&mut self) -> Option<Trap> {
        self.last_trap.take()
    }

    pub fn last_trap(&self) -> Option<Trap> {
        self.last_trap
    }

    fn trap(&mut self, trap: Trap) {
        warn!("[CPU] {}", trap);
        self.state.trap_count += 1;
        self.last_trap = Some(trap);
    }

    /// Runs one instruction (or one idle slice) and the interrupt check that
    /// follows it. Returns the clocks consumed.
    pub fn step(&mut self) -> u32 {
        let mut clocks = match self.state.run_state {
            RunState::Halted => return 0,
            RunState::Idle => IDLE_CLOCKS,
            RunState::Running => {
                let opcode = self.fetch();
                self.execute(opcode, 0)
            }
        };
        clocks += self.io.take_wait_states();
        self.state.cycles += clocks as u64;

        let service = self.check_interrupts();
        self.state.cycles += service as u64;
        clocks + service
    }

    fn check_interrupts(&mut self) -> u32 {
        if self.state.skip_interrupt {
            self.state.skip_interrupt = false;
            return 0;
        }
        if self.state.run_state == RunState::Halted {
            return 0;
        }
        let Some(level) = self.io.interrupt_level(self.state.cycles) else {
            return 0;
        };
        if level as u16 > self.interrupt_mask() {
            return 0;
        }
        self.service_interrupt(level);
        INTERRUPT_CLOCKS + self.io.take_wait_states()
    }

    fn service_interrupt(&mut self, level: u8) {
        let vector = (level as u16 & 0x0F) << 2;
        self.context_switch_to_vector(vector);
        self.state.st = (self.state.st & !ST_MASK) | (level.saturating_sub(1) as u16 & ST_MASK);
        if self.state.run_state == RunState::Idle {
            self.state.run_state = RunState::Running;
        }
    }

    fn fetch(&mut self) -> u16 {
        let word = self.io.read_word(self.state.pc);
        self.state.pc = self.state.pc.wrapping_add(2);
        word
    }

    #[inline]
    fn register_address(&self, register: u16) -> u16 {
        self.state.wp.wrapping_add(register << 1)
    }

    pub fn read_register(&mut self, register: u16) -> u16 {
        let address = self.register_address(register);
        self.io.read_word(address)
    }

    pub fn write_register(&mut self, register: u16, value: u16) {
        let address = self.register_address(register);
        self.io.write_word(address, value)
    }

    fn read_operand(&mut self, address: u16, byte: bool) -> u16 {
        if byte {
            self.io.read_byte(address) as u16
        } else {
            self.io.read_word(address)
        }
    }

    fn write_operand(&mut self, address: u16, byte: bool, value: u16) {
        if byte {
            self.io.write_byte(address, value as u8)
        } else {
            self.io.write_word(address, value)
        }
    }

    /// Effective address of a general operand, with its addressing clocks.
    fn resolve(&mut self, mode: u16, register: u16, byte: bool) -> (u16, u32) {
        match mode & 3 {
            0 => (self.register_address(register), 0),
            1 => (self.read_register(register), 4),
            2 => {
                let base = self.fetch();
                if register == 0 {
                    (base, 8)
                } else {
                    (base.wrapping_add(self.read_register(register)), 8)
                }
            }
            _ => {
                let address = self.read_register(register);
                let step = if byte { 1 } else { 2 };
                self.write_register(register, address.wrapping_add(step));
                (address, if byte { 6 } else { 8 })
            }
        }
    }

    /// Switches to the workspace and PC found at `vector`, saving the old
    /// context in the new R13-R15.
    fn context_switch_to_vector(&mut self, vector: u16) {
        let new_wp = self.io.read_word(vector);
        let new_pc = self.io.read_word(vector.wrapping_add(2));
        self.context_switch(new_wp, new_pc);
    }

    fn context_switch(&mut self, new_wp: u16, new_pc: u16) {
        let (old_wp, old_pc, old_st) = (self.state.wp, self.state.pc, self.state.st);
        self.state.wp = new_wp & !1;
        self.state.pc = new_pc & !1;
        self.write_register(13, old_wp);
        self.write_register(14, old_pc);
        self.write_register(15, old_st);
    }

    fn cru_base(&mut self) -> u16 {
        (self.read_register(12) >> 1) & 0x0FFF
    }

    // Status helpers

    fn set_flag(&mut self, flag: u16, on: bool) {
        if on {
            self.state.st |= flag;
        } else {
            self.state.st &= !flag;
        }
    }

    fn flag(&self, flag: u16) -> bool {
        self.state.st & flag != 0
    }

    fn set_lae(&mut self, value: u16) {
        self.state.st &= !(ST_LGT | ST_AGT | ST_EQ);
        if value != 0 {
            self.state.st |= ST_LGT;
        }
        if (value as i16) > 0 {
            self.state.st |= ST_AGT;
        }
        if value == 0 {
            self.state.st |= ST_EQ;
        }
    }

    fn set_lae_byte(&mut self, value: u8) {
        self.state.st &= !(ST_LGT | ST_AGT | ST_EQ);
        if value != 0 {
            self.state.st |= ST_LGT;
        }
        if (value as i8) > 0 {
            self.state.st |= ST_AGT;
        }
        if value == 0 {
            self.state.st |= ST_EQ;
        }
        self.set_parity(value);
    }

    fn set_parity(&mut self, value: u8) {
        self.set_flag(ST_OP, value.count_ones() & 1 == 1);
    }

    fn compare_words(&mut self, a: u16, b: u16) {
        self.state.st &= !(ST_LGT | ST_AGT | ST_EQ);
        if a > b {
            self.state.st |= ST_LGT;
        }
        if (a as i16) > (b as i16) {
            self.state.st |= ST_AGT;
        }
        if a == b {
            self.state.st |= ST_EQ;
        }
    }

    fn compare_bytes(&mut self, a: u8, b: u8) {
        self.state.st &= !(ST_LGT | ST_AGT | ST_EQ);
        if a > b {
            self.state.st |= ST_LGT;
        }
        if (a as i8) > (b as i8) {
            self.state.st |= ST_AGT;
        }
        if a == b {
            self.state.st |= ST_EQ;
        }
        self.set_parity(a);
    }

    fn add_words(&mut self, a: u16, b: u16) -> u16 {
        let (result, carry) = a.overflowing_add(b);
        self.set_lae(result);
        self.set_flag(ST_C, carry);
        self.set_flag(ST_OV, (a ^ result) & (b ^ result) & 0x8000 != 0);
        result
    }

    fn add_bytes(&mut self, a: u8, b: u8) -> u8 {
        let (result, carry) = a.overflowing_add(b);
        self.set_lae_byte(result);
        self.set_flag(ST_C, carry);
        self.set_flag(ST_OV, (a ^ result) & (b ^ result) & 0x80 != 0);
        result
    }

    /// `minuend - subtrahend`; carry means no borrow.
    fn sub_words(&mut self, minuend: u16, subtrahend: u16) -> u16 {
        let result = minuend.wrapping_sub(subtrahend);
        self.set_lae(result);
        self.set_flag(ST_C, minuend >= subtrahend);
        self.set_flag(
            ST_OV,
            (minuend ^ subtrahend) & (minuend ^ result) & 0x8000 != 0,
        );
        result
    }

    fn sub_bytes(&mut self, minuend: u8, subtrahend: u8) -> u8 {
        let result = minuend.wrapping_sub(subtrahend);
        self.set_lae_byte(result);
        self.set_flag(ST_C, minuend >= subtrahend);
        self.set_flag(
            ST_OV,
            (minuend ^ subtrahend) & (minuend ^ result) & 0x80 != 0,
        );
        result
    }

    /// Executes an already fetched instruction word.
    fn execute(&mut self, opcode: u16, depth: u8) -> u32 {
        let entry = self.table.decode(opcode);
        match entry.format {
            Format::TwoAddress => self.two_address(entry, opcode),
            Format::Jump => self.jump(entry, opcode),
            Format::CruBit => self.cru_bit(entry, opcode),
            Format::RegisterDestination => self.register_destination(entry, opcode),
            Format::CruMultiBit => self.cru_multi_bit(entry, opcode),
            Format::ExtendedOperation => self.extended_operation(entry, opcode),
            Format::Shift => self.shift(entry, opcode),
            Format::SingleAddress => self.single_address(entry, opcode, depth),
            Format::Control => self.control(entry, opcode),
            Format::RegisterImmediate => self.register_immediate(entry, opcode),
            Format::Immediate => self.immediate(entry),
            Format::Register => self.register_only(entry, opcode),
            Format::Invalid => {
                let pc = self.state.pc.wrapping_sub(2);
                self.trap(Trap::InvalidOpcode { pc, opcode });
                entry.clocks
            }
        }
    }

    fn two_address(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let byte = entry.is_byte();
        let (source_address, source_clocks) = self.resolve(opcode >> 4, opcode & 0x0F, byte);
        let source = self.read_operand(source_address, byte);
        let (dest_address, dest_clocks) =
            self.resolve(opcode >> 10, (opcode >> 6) & 0x0F, byte);

        match entry.op {
            Op::MOV => {
                self.set_lae(source);
                self.write_operand(dest_address, false, source);
            }
            Op::MOVB => {
                self.set_lae_byte(source as u8);
                self.write_operand(dest_address, true, source);
            }
            Op::C => {
                let dest = self.read_operand(dest_address, false);
                self.compare_words(source, dest);
            }
            Op::CB => {
                let dest = self.read_operand(dest_address, true);
                self.compare_bytes(source as u8, dest as u8);
            }
            op => {
                let dest = self.read_operand(dest_address, byte);
                let result = match op {
                    Op::A => self.add_words(dest, source),
                    Op::AB => self.add_bytes(dest as u8, source as u8) as u16,
                    Op::S => self.sub_words(dest, source),
                    Op::SB => self.sub_bytes(dest as u8, source as u8) as u16,
                    Op::SOC | Op::SOCB => dest | source,
                    _ => dest & !source,
                };
                if matches!(op, Op::SOC | Op::SZC) {
                    self.set_lae(result);
                } else if matches!(op, Op::SOCB | Op::SZCB) {
                    self.set_lae_byte(result as u8);
                }
                self.write_operand(dest_address, byte, result);
            }
        }
        entry.clocks + source_clocks + dest_clocks
    }

    fn jump(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let lgt = self.flag(ST_LGT);
        let agt = self.flag(ST_AGT);
        let eq = self.flag(ST_EQ);
        let taken = match entry.op {
            Op::JMP => true,
            Op::JLT => !agt && !eq,
            Op::JLE => !lgt || eq,
            Op::JEQ => eq,
            Op::JHE => lgt || eq,
            Op::JGT => agt,
            Op::JNE => !eq,
            Op::JNC => !self.flag(ST_C),
            Op::JOC => self.flag(ST_C),
            Op::JNO => !self.flag(ST_OV),
            Op::JL => !lgt && !eq,
            Op::JH => lgt && !eq,
            _ => self.flag(ST_OP),
        };
        if !taken {
            return entry.clocks - 2;
        }
        let displacement = (opcode as u8 as i8 as i16) << 1;
        self.state.pc = self.state.pc.wrapping_add(displacement as u16);
        entry.clocks
    }

    fn cru_bit(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let displacement = opcode as u8 as i8 as i16 as u16;
        let bit = self.cru_base().wrapping_add(displacement) & 0x0FFF;
        let clock = self.state.cycles;
        match entry.op {
            Op::SBO => self.io.write_cru(bit, true, clock),
            Op::SBZ => self.io.write_cru(bit, false, clock),
            _ => {
                let value = self.io.read_cru(bit, clock);
                self.set_flag(ST_EQ, value);
            }
        }
        entry.clocks
    }

    fn register_destination(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let (source_address, source_clocks) = self.resolve(opcode >> 4, opcode & 0x0F, false);
        let source = self.io.read_word(source_address);
        let register = (opcode >> 6) & 0x0F;
        let dest = self.read_register(register);

        let clocks = match entry.op {
            Op::COC => {
                self.set_flag(ST_EQ, source & dest == source);
                entry.clocks
            }
            Op::CZC => {
                self.set_flag(ST_EQ, source & dest == 0);
                entry.clocks
            }
            Op::XOR => {
                let result = source ^ dest;
                self.set_lae(result);
                self.write_register(register, result);
                entry.clocks
            }
            Op::MPY => {
                let product = source as u32 * dest as u32;
                self.write_register(register, (product >> 16) as u16);
                self.write_register(register + 1, product as u16);
                entry.clocks
            }
            _ => {
                if source <= dest {
                    self.set_flag(ST_OV, true);
                    entry.clocks
                } else {
                    let low = self.read_register(register + 1);
                    let dividend = ((dest as u32) << 16) | low as u32;
                    let divisor = source as u32;
                    self.write_register(register, (dividend / divisor) as u16);
                    self.write_register(register + 1, (dividend % divisor) as u16);
                    self.set_flag(ST_OV, false);
                    124
                }
            }
        };
        clocks + source_clocks
    }

    fn cru_multi_bit(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let count = match (opcode >> 6) & 0x0F {
            0 => 16,
            n => n,
        };
        let byte = count <= 8;
        let (address, address_clocks) = self.resolve(opcode >> 4, opcode & 0x0F, byte);
        let base = self.cru_base();
        let clock = self.state.cycles;

        let clocks = if entry.op == Op::LDCR {
            let value = self.read_operand(address, byte);
            for i in 0..count {
                let bit = base.wrapping_add(i) & 0x0FFF;
                self.io.write_cru(bit, (value >> i) & 1 != 0, clock);
            }
            self.set_transfer_flags(value, byte);
            entry.clocks + 2 * count as u32
        } else {
            let mut value = 0u16;
            for i in 0..count {
                let bit = base.wrapping_add(i) & 0x0FFF;
                if self.io.read_cru(bit, clock) {
                    value |= 1 << i;
                }
            }
            self.write_operand(address, byte, value);
            self.set_transfer_flags(value, byte);
            match count {
                1..=7 => 42,
                8 => 44,
                9..=15 => 58,
                _ => 60,
            }
        };
        clocks + address_clocks
    }

    fn set_transfer_flags(&mut self, value: u16, byte: bool) {
        if byte {
            self.set_lae_byte(value as u8);
        } else {
            self.set_lae(value);
        }
    }

    fn extended_operation(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let (address, address_clocks) = self.resolve(opcode >> 4, opcode & 0x0F, false);
        let number = (opcode >> 6) & 0x0F;
        self.context_switch_to_vector(0x0040 + (number << 2));
        self.write_register(11, address);
        self.state.st |= ST_X;
        self.state.skip_interrupt = true;
        entry.clocks + address_clocks
    }

    fn shift(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let register = opcode & 0x0F;
        let mut extra = 0;
        let count = match (opcode >> 4) & 0x0F {
            0 => {
                extra = 8;
                match self.read_register(0) & 0x0F {
                    0 => 16,
                    n => n,
                }
            }
            n => n,
        } as u32;
        let value = self.read_register(register);

        let (result, carry) = match entry.op {
            Op::SRA => {
                let wide = value as i16 as i32;
                ((wide >> count) as u16, (wide >> (count - 1)) & 1 != 0)
            }
            Op::SRL => {
                let wide = value as u32;
                ((wide >> count) as u16, (wide >> (count - 1)) & 1 != 0)
            }
            Op::SLA => {
                let mut shifted = value;
                let mut carry = false;
                let mut overflow = false;
                for _ in 0..count {
                    carry = shifted & 0x8000 != 0;
                    let next = shifted << 1;
                    overflow |= (next ^ shifted) & 0x8000 != 0;
                    shifted = next;
                }
                self.set_flag(ST_OV, overflow);
                (shifted, carry)
            }
            _ => {
                let rotated = value.rotate_right(count);
                (rotated, rotated & 0x8000 != 0)
            }
        };

        self.set_lae(result);
        self.set_flag(ST_C, carry);
        self.write_register(register, result);
        entry.clocks + 2 * count + extra
    }

    fn single_address(&mut self, entry: &Opcode, opcode: u16, depth: u8) -> u32 {
        let (address, address_clocks) = self.resolve(opcode >> 4, opcode & 0x0F, false);
        let mut clocks = entry.clocks + address_clocks;

        match entry.op {
            Op::BLWP => {
                self.context_switch_to_vector(address);
                self.state.skip_interrupt = true;
            }
            Op::B => self.state.pc = address & !1,
            Op::BL => {
                let link = self.state.pc;
                self.write_register(11, link);
                self.state.pc = address & !1;
            }
            Op::X => {
                let instruction = self.io.read_word(address);
                if depth >= MAX_EXECUTE_DEPTH {
                    let pc = self.state.pc.wrapping_sub(2);
                    self.trap(Trap::InvalidOpcode {
                        pc,
                        opcode: instruction,
                    });
                } else {
                    clocks += self.execute(instruction, depth + 1);
                }
            }
            Op::CLR => self.io.write_word(address, 0),
            Op::SETO => self.io.write_word(address, 0xFFFF),
            Op::SWPB => {
                let value = self.io.read_word(address);
                self.io.write_word(address, value.swap_bytes());
            }
            Op::INV => {
                let result = !self.io.read_word(address);
                self.set_lae(result);
                self.io.write_word(address, result);
            }
            Op::NEG => {
                let value = self.io.read_word(address);
                let result = self.sub_words(0, value);
                self.io.write_word(address, result);
            }
            Op::ABS => {
                let value = self.io.read_word(address);
                self.set_lae(value);
                self.set_flag(ST_C, false);
                self.set_flag(ST_OV, value == 0x8000);
                if value & 0x8000 != 0 {
                    self.io.write_word(address, value.wrapping_neg());
                    clocks += 2;
                }
            }
            op => {
                let value = self.io.read_word(address);
                let result = match op {
                    Op::INC => self.add_words(value, 1),
                    Op::INCT => self.add_words(value, 2),
                    Op::DEC => self.sub_words(value, 1),
                    _ => self.sub_words(value, 2),
                };
                self.io.write_word(address, result);
            }
        }
        clocks
    }

    fn control(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        match entry.op {
            Op::RTWP => {
                let st = self.read_register(15);
                let pc = self.read_register(14);
                let wp = self.read_register(13);
                self.state.st = st & ST_DEFINED;
                self.state.pc = pc & !1;
                self.state.wp = wp & !1;
            }
            Op::IDLE => {
                debug!("[CPU] IDLE at >{:04X}", self.state.pc.wrapping_sub(2));
                self.state.run_state = RunState::Idle;
            }
            Op::RSET => self.state.st &= !ST_MASK,
            op => {
                let pc = self.state.pc.wrapping_sub(2);
                let mnemonic = match op {
                    Op::CKON => "CKON",
                    Op::CKOF => "CKOF",
                    _ => "LREX",
                };
                self.trap(Trap::UnsupportedExtendedOperation {
                    pc,
                    opcode,
                    mnemonic,
                });
            }
        }
        entry.clocks
    }

    fn register_immediate(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let register = opcode & 0x0F;
        let immediate = self.fetch();
        match entry.op {
            Op::LI => {
                self.set_lae(immediate);
                self.write_register(register, immediate);
            }
            Op::CI => {
                let value = self.read_register(register);
                self.compare_words(value, immediate);
            }
            op => {
                let value = self.read_register(register);
                let result = match op {
                    Op::AI => self.add_words(value, immediate),
                    Op::ANDI => value & immediate,
                    _ => value | immediate,
                };
                if op != Op::AI {
                    self.set_lae(result);
                }
                self.write_register(register, result);
            }
        }
        entry.clocks
    }

    fn immediate(&mut self, entry: &Opcode) -> u32 {
        let immediate = self.fetch();
        if entry.op == Op::LWPI {
            self.state.wp = immediate & !1;
        } else {
            self.state.st = (self.state.st & !ST_MASK) | (immediate & ST_MASK);
        }
        entry.clocks
    }

    fn register_only(&mut self, entry: &Opcode, opcode: u16) -> u32 {
        let value = if entry.op == Op::STWP {
            self.state.wp
        } else {
            self.state.st
        };
        self.write_register(opcode & 0x0F, value);
        entry.clocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatIo {
        memory: Vec<u8>,
    }

    impl CpuIo for FlatIo {
        fn read_word(&mut self, address: u16) -> u16 {
            let address = (address & !1) as usize;
            u16::from_be_bytes([self.memory[address], self.memory[address + 1]])
        }

        fn write_word(&mut self, address: u16, value: u16) {
            let address = (address & !1) as usize;
            self.memory[address..address + 2].copy_from_slice(&value.to_be_bytes());
        }

        fn read_byte(&mut self, address: u16) -> u8 {
            self.memory[address as usize]
        }

        fn write_byte(&mut self, address: u16, value: u8) {
            self.memory[address as usize] = value;
        }

        fn read_cru(&mut self, _bit: u16, _clock: u64) -> bool {
            true
        }

        fn write_cru(&mut self, _bit: u16, _value: bool, _clock: u64) {}

        fn interrupt_level(&mut self, _clock: u64) -> Option<u8> {
            None
        }
    }

    fn cpu_with(program: &[u16]) -> TMS9900<FlatIo> {
        let mut memory = vec![0; 0x10000];
        memory[0..4].copy_from_slice(&[0x83, 0x00, 0x01, 0x00]);
        for (i, word) in program.iter().enumerate() {
            let address = 0x0100 + i * 2;
            memory[address..address + 2].copy_from_slice(&word.to_be_bytes());
        }
        let mut cpu = TMS9900::new(FlatIo { memory });
        cpu.reset();
        cpu.start();
        cpu
    }

    #[test]
    fn test_reset_vector() {
        let cpu = cpu_with(&[]);
        assert_eq!(cpu.wp(), 0x8300);
        assert_eq!(cpu.pc(), 0x0100);
    }

    #[test]
    fn test_halted_until_started() {
        let mut cpu = cpu_with(&[0x0201, 0x1234]);
        cpu.stop();
        assert_eq!(cpu.step(), 0);
        assert_eq!(cpu.pc(), 0x0100);
    }

    #[test]
    fn test_li_sets_flags_and_clocks() {
        let mut cpu = cpu_with(&[0x0201, 0x8000]);
        let clocks = cpu.step();

        assert_eq!(cpu.read_register(1), 0x8000);
        assert_eq!(cpu.st() & (ST_LGT | ST_AGT | ST_EQ), ST_LGT);
        assert_eq!(clocks, 12);
    }

    #[test]
    fn test_add_carry_and_overflow() {
        // LI R1,>7FFF ; AI R1,1
        let mut cpu = cpu_with(&[0x0201, 0x7FFF, 0x0221, 0x0001]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.read_register(1), 0x8000);
        assert!(cpu.st() & ST_OV != 0);
        assert!(cpu.st() & ST_C == 0);
    }

    #[test]
    fn test_shift_count_from_r0() {
        // LI R0,0 ; LI R1,>8001 ; SRC R1,0
        let mut cpu = cpu_with(&[0x0200, 0x0000, 0x0201, 0x8001, 0x0B01]);
        cpu.step();
        cpu.step();
        let clocks = cpu.step();
        // a count of zero in R0 rotates all sixteen bits
        assert_eq!(cpu.read_register(1), 0x8001);
        assert_eq!(clocks, 12 + 32 + 8);
    }

    #[test]
    fn test_invalid_opcode_is_trapped() {
        let mut cpu = cpu_with(&[0x0000, 0x0201, 0x0005]);
        cpu.step();
        assert_eq!(
            cpu.take_trap(),
            Some(Trap::InvalidOpcode {
                pc: 0x0100,
                opcode: 0
            })
        );
        cpu.step();
        assert_eq!(cpu.read_register(1), 5);
    }

    #[test]
    fn test_extended_operation_is_flagged_not_fatal() {
        let mut cpu = cpu_with(&[0x03A0, 0x0201, 0x0007]);
        cpu.step();
        assert!(matches!(
            cpu.take_trap(),
            Some(Trap::UnsupportedExtendedOperation { mnemonic: "CKON", .. })
        ));
        cpu.step();
        assert_eq!(cpu.read_register(1), 7);
        assert!(!cpu.halted());
    }
}
