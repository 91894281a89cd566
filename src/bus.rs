use std::fmt;

use tracing::{debug, trace};

use crate::{
    cartridge::{Cartridge, CartridgeType},
    grom::Grom,
    memory::{MemoryMap, MemoryType},
    sams::Sams,
    sound::SN76496,
    tms9901::{INT_VDP, TMS9901},
    vdp::TMS9918,
};

pub const ROM_SIZE: usize = 0x2000;
pub const SCRATCHPAD_SIZE: usize = 0x100;

/// CRU ranges claimed by the cards in the expansion box.
pub const TMS9901_CRU_END: u16 = 0x07FF;
pub const DISK_CRU_BASE: u16 = 0x0880;
pub const DISK_CRU_END: u16 = 0x0887;
pub const SAMS_CRU_BASE: u16 = 0x0F00;
pub const SAMS_CRU_END: u16 = 0x0F01;

/// Interrupt level the 9901 presents to the CPU for any of its sources.
const CPU_INTERRUPT_LEVEL: u8 = 1;

/// Disk controller card: its DSR ROM and controller registers both live in
/// the >4000->5FFF window while CRU bit 0 of the card is set.
pub trait DiskDsr {
    fn read_byte(&mut self, address: u16) -> u8;
    fn write_byte(&mut self, address: u16, value: u8);

    /// Card CRU bits 1-7 (motor, head select, ...). Bit 0 is handled by the
    /// bus.
    fn cru_write(&mut self, _bit: u16, _value: bool) {}

    fn cru_read(&mut self, _bit: u16) -> bool {
        true
    }
}

pub struct Bus {
    rom: Vec<u8>,
    pub scratchpad: [u8; SCRATCHPAD_SIZE],
    pub cartridge: Cartridge,
    pub sams: Sams,
    pub memory_map: MemoryMap,
    pub vdp: TMS9918,
    pub sound: SN76496,
    pub grom: Grom,
    pub tms9901: TMS9901,

    disk: Option<Box<dyn DiskDsr>>,
    disk_enabled: bool,
    wait_states: u32,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("cartridge", &self.cartridge)
            .field("sams", &self.sams)
            .field("disk", &self.disk.is_some())
            .field("disk_enabled", &self.disk_enabled)
            .finish()
    }
}

impl Bus {
    /// `rom` is the console ROM; anything past 8K is ignored and a short
    /// image is zero filled.
    pub fn new(rom: &[u8], grom: Grom, cartridge: Cartridge, sams: Sams) -> Self {
        let mut console_rom = vec![0; ROM_SIZE];
        let len = rom.len().min(ROM_SIZE);
        console_rom[..len].copy_from_slice(&rom[..len]);

        let mut bus = Self {
            rom: console_rom,
            scratchpad: [0; SCRATCHPAD_SIZE],
            cartridge,
            sams,
            memory_map: MemoryMap::new(),
            vdp: TMS9918::new(),
            sound: SN76496::new(),
            grom,
            tms9901: TMS9901::new(),
            disk: None,
            disk_enabled: false,
            wait_states: 0,
        };
        bus.map_cartridge();
        bus
    }

    pub fn reset(&mut self) {
        self.scratchpad = [0; SCRATCHPAD_SIZE];
        self.sams.reset();
        self.vdp.reset();
        self.sound.reset();
        self.grom.reset();
        self.tms9901.reset();
        self.cartridge.reset();
        self.disk_enabled = false;
        self.wait_states = 0;
        self.memory_map = MemoryMap::new();
        self.map_cartridge();
        self.refresh_peripheral_window();
    }

    pub fn attach_disk(&mut self, disk: Box<dyn DiskDsr>) {
        self.disk = Some(disk);
    }

    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        self.cartridge = cartridge;
        self.map_cartridge();
    }

    pub fn disk_enabled(&self) -> bool {
        self.disk_enabled
    }

    /// Only a machine with a card attached can have its DSR mapped.
    pub fn restore_disk_enabled(&mut self, enabled: bool) {
        self.disk_enabled = enabled && self.disk.is_some();
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    fn map_cartridge(&mut self) {
        if self.cartridge.is_empty() {
            self.memory_map
                .set_range(0x6000, 0x7FFF, MemoryType::Unused);
            return;
        }
        self.memory_map
            .set_range(0x6000, 0x7FFF, MemoryType::Cartridge);
        if self.cartridge.cart_type == CartridgeType::MiniMemory {
            self.memory_map
                .set_range(0x7000, 0x7FFF, MemoryType::CartridgeRam);
        }
    }

    /// Retags >4000->5FFF after a card changed its CRU enable.
    pub fn refresh_peripheral_window(&mut self) {
        let kind = if self.disk_enabled {
            MemoryType::DiskController
        } else {
            MemoryType::PeripheralRom
        };
        self.memory_map.set_range(0x4000, 0x5FFF, kind);
        if self.sams.registers_visible() {
            self.memory_map
                .set_range(0x4000, 0x401F, MemoryType::SamsRegisters);
        }
    }

    /// Clocks lost to the 8-bit multiplexer since the last call.
    pub fn take_wait_states(&mut self) -> u32 {
        std::mem::take(&mut self.wait_states)
    }

    /// Mirrors the VDP INT output onto 9901 pin 2.
    pub fn sync_vdp_interrupt(&mut self) {
        if self.vdp.interrupt_line() {
            self.tms9901.raise_interrupt(INT_VDP);
        } else {
            self.tms9901.clear_interrupt(INT_VDP);
        }
    }

    pub fn interrupt_level(&mut self, clock: u64) -> Option<u8> {
        self.tms9901.update_timer(clock);
        self.tms9901
            .interrupt_line()
            .then_some(CPU_INTERRUPT_LEVEL)
    }

    fn read_raw(&mut self, address: u16, kind: MemoryType) -> u8 {
        match kind {
            MemoryType::ConsoleRom => self.rom[address as usize & (ROM_SIZE - 1)],
            MemoryType::ExpansionRam => self.sams.read_byte(address),
            MemoryType::Scratchpad => self.scratchpad[address as usize & (SCRATCHPAD_SIZE - 1)],
            MemoryType::Cartridge | MemoryType::CartridgeRam => self.cartridge.read(address),
            MemoryType::SamsRegisters => self.sams.read_register(address),
            MemoryType::DiskController => match self.disk.as_mut() {
                Some(disk) => disk.read_byte(address),
                None => 0,
            },
            MemoryType::VdpRead if address & 1 == 0 => {
                let value = if address & 2 != 0 {
                    self.vdp.read_status()
                } else {
                    self.vdp.read_data()
                };
                self.sync_vdp_interrupt();
                value
            }
            MemoryType::GromRead if address & 1 == 0 => {
                if address & 2 != 0 {
                    self.grom.read_address()
                } else {
                    self.grom.read_data()
                }
            }
            _ => 0,
        }
    }

    fn write_raw(&mut self, address: u16, value: u8, kind: MemoryType) {
        match kind {
            MemoryType::ExpansionRam => self.sams.write_byte(address, value),
            MemoryType::Scratchpad => {
                self.scratchpad[address as usize & (SCRATCHPAD_SIZE - 1)] = value
            }
            MemoryType::Cartridge | MemoryType::CartridgeRam => {
                self.cartridge.write(address, value)
            }
            MemoryType::SamsRegisters if address & 1 == 0 => {
                self.sams.write_register(address, value)
            }
            MemoryType::DiskController => {
                if let Some(disk) = self.disk.as_mut() {
                    disk.write_byte(address, value);
                }
            }
            MemoryType::Sound if address & 1 == 0 => self.sound.write(value),
            MemoryType::VdpWrite if address & 1 == 0 => {
                if address & 2 != 0 {
                    self.vdp.write_address(value);
                } else {
                    self.vdp.write_data(value);
                }
                self.sync_vdp_interrupt();
            }
            MemoryType::GromWrite if address & 1 == 0 => {
                if address & 2 != 0 {
                    self.grom.write_address(value);
                } else {
                    self.grom.write_data(value);
                }
            }
            _ => trace!(
                "[BUS] Ignored write {:02X} to {:04X} ({})",
                value,
                address,
                kind
            ),
        }
    }

    pub fn read_byte(&mut self, address: u16) -> u8 {
        let kind = self.memory_map.classify(address);
        self.wait_states += kind.wait_states();
        self.read_raw(address, kind)
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        let kind = self.memory_map.classify(address);
        self.wait_states += kind.wait_states();
        self.write_raw(address, value, kind);
    }

    /// Word access ignores A15. Device ports see a single access carrying
    /// the high byte; the low byte of a port read is zero.
    pub fn read_word(&mut self, address: u16) -> u16 {
        let address = address & !1;
        let kind = self.memory_map.classify(address);
        self.wait_states += kind.wait_states();

        let high = self.read_raw(address, kind);
        if kind.is_port() {
            return (high as u16) << 8;
        }
        let low = self.read_raw(address | 1, kind);
        u16::from_be_bytes([high, low])
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let address = address & !1;
        let kind = self.memory_map.classify(address);
        self.wait_states += kind.wait_states();

        let [high, low] = value.to_be_bytes();
        if kind == MemoryType::SamsRegisters {
            self.sams.write_register(address, high);
            return;
        }
        self.write_raw(address, high, kind);
        if !kind.is_port() {
            self.write_raw(address | 1, low, kind);
        }
    }

    /// Side-effect free read for debuggers. Ports read as zero.
    pub fn peek_byte(&self, address: u16) -> u8 {
        match self.memory_map.classify(address) {
            MemoryType::ConsoleRom => self.rom[address as usize & (ROM_SIZE - 1)],
            MemoryType::ExpansionRam => self.sams.read_byte(address),
            MemoryType::Scratchpad => self.scratchpad[address as usize & (SCRATCHPAD_SIZE - 1)],
            MemoryType::Cartridge | MemoryType::CartridgeRam => self.cartridge.read(address),
            MemoryType::SamsRegisters => self.sams.read_register(address),
            _ => 0,
        }
    }

    pub fn peek_word(&self, address: u16) -> u16 {
        let address = address & !1;
        u16::from_be_bytes([self.peek_byte(address), self.peek_byte(address | 1)])
    }

    pub fn read_cru_bit(&mut self, bit: u16, clock: u64) -> bool {
        let bit = bit & 0x0FFF;
        match bit {
            0..=TMS9901_CRU_END => self.tms9901.read_bit(bit, clock),
            DISK_CRU_BASE..=DISK_CRU_END => match self.disk.as_mut() {
                Some(_) if bit == DISK_CRU_BASE => self.disk_enabled,
                Some(disk) => disk.cru_read(bit - DISK_CRU_BASE),
                None => true,
            },
            SAMS_CRU_BASE..=SAMS_CRU_END => self.sams.cru_read(bit - SAMS_CRU_BASE),
            _ => true,
        }
    }

    pub fn write_cru_bit(&mut self, bit: u16, value: bool, clock: u64) {
        let bit = bit & 0x0FFF;
        match bit {
            0..=TMS9901_CRU_END => self.tms9901.write_bit(bit, value, clock),
            DISK_CRU_BASE..=DISK_CRU_END => {
                let Some(disk) = self.disk.as_mut() else {
                    return;
                };
                if bit == DISK_CRU_BASE {
                    if self.disk_enabled != value {
                        debug!(
                            "[BUS] Disk DSR {}",
                            if value { "mapped" } else { "unmapped" }
                        );
                    }
                    self.disk_enabled = value;
                    self.refresh_peripheral_window();
                } else {
                    disk.cru_write(bit - DISK_CRU_BASE, value);
                }
            }
            SAMS_CRU_BASE..=SAMS_CRU_END => {
                if self.sams.cru_write(bit - SAMS_CRU_BASE, value) {
                    self.refresh_peripheral_window();
                }
            }
            _ => trace!("[BUS] Unclaimed CRU write {:03X} = {}", bit, value as u8),
        }
    }

    /// Multi-bit CRU read, least significant bit at `bit`.
    pub fn read_cru(&mut self, bit: u16, count: u8, clock: u64) -> u16 {
        let mut value = 0;
        for i in 0..count.min(16) as u16 {
            if self.read_cru_bit(bit.wrapping_add(i), clock) {
                value |= 1 << i;
            }
        }
        value
    }

    pub fn write_cru(&mut self, bit: u16, count: u8, value: u16, clock: u64) {
        for i in 0..count.min(16) as u16 {
            self.write_cru_bit(bit.wrapping_add(i), (value >> i) & 1 != 0, clock);
        }
    }

    pub fn key_down(&mut self, code: &str) -> bool {
        self.tms9901.keyboard.key_down(code)
    }

    pub fn key_up(&mut self, code: &str) -> bool {
        self.tms9901.keyboard.key_up(code)
    }
}
