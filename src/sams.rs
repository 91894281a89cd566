use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub const BANK_SIZE: usize = 0x1000;
pub const REGION_COUNT: usize = 16;

/// Smallest pool: exactly the 64K address space, enough for a plain 32K
/// expansion running in pass-through.
pub const MIN_BANKS: usize = 16;
pub const MAX_BANKS: usize = 256;

/// Regions that hold expansion RAM (>2000->3FFF and >A000->FFFF). Everything
/// else is console ROM, cartridge or I/O and keeps its identity mapping.
const SWAPPABLE: [bool; REGION_COUNT] = [
    false, false, true, true, false, false, false, false, false, false, true, true, true, true,
    true, true,
];

const CRU_REGISTERS_VISIBLE: usize = 0;
const CRU_MAPPING_ENABLED: usize = 1;

pub fn is_swappable(region: usize) -> bool {
    SWAPPABLE[region & 0x0F]
}

/// SAMS memory expansion: sixteen 4K page registers in front of a large
/// backing pool. The same structure also serves the plain 32K expansion,
/// which is a 16-bank pool that is never switched out of pass-through.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq)]
pub struct Sams {
    pub installed: bool,
    pub num_banks: u32,
    /// Bank in effect for each region.
    pub region_bank: [u16; REGION_COUNT],
    /// Last value written to each page register.
    pub bank_map: [u8; REGION_COUNT],
    pub cru: [bool; 2],
    pub highwater: u16,

    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    pool: Vec<u8>,
}

impl Sams {
    /// `num_banks` must be a power of two in `MIN_BANKS..=MAX_BANKS`; the
    /// machine configuration validates it before we get here.
    pub fn new(num_banks: usize, installed: bool) -> Self {
        let num_banks = num_banks.clamp(MIN_BANKS, MAX_BANKS);
        let mut sams = Self {
            installed,
            num_banks: num_banks as u32,
            region_bank: [0; REGION_COUNT],
            bank_map: [0; REGION_COUNT],
            cru: [false; 2],
            highwater: 0,
            pool: vec![0; num_banks * BANK_SIZE],
        };
        sams.reset();
        sams
    }

    pub fn reset(&mut self) {
        for region in 0..REGION_COUNT {
            self.region_bank[region] = region as u16;
            self.bank_map[region] = region as u8;
        }
        self.cru = [false; 2];
        self.highwater = 0;
        self.pool.iter_mut().for_each(|byte| *byte = 0);
    }

    pub fn registers_visible(&self) -> bool {
        self.cru[CRU_REGISTERS_VISIBLE]
    }

    pub fn mapping_enabled(&self) -> bool {
        self.cru[CRU_MAPPING_ENABLED]
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn pool(&self) -> &[u8] {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut [u8] {
        &mut self.pool
    }

    fn swap_bank(&mut self, region: usize, bank: u16) {
        let bank = bank & (self.num_banks as u16 - 1);
        if !is_swappable(region) {
            trace!("[SAMS] Region {:X} is not swappable, ignoring bank {}", region, bank);
            return;
        }
        self.region_bank[region] = bank;
        if bank > self.highwater {
            self.highwater = bank;
        }
    }

    /// Page register write from the >4000->401F window.
    pub fn write_register(&mut self, address: u16, bank: u8) {
        if !self.registers_visible() {
            return;
        }
        let region = ((address >> 1) & 0x0F) as usize;
        if self.mapping_enabled() {
            self.swap_bank(region, bank as u16);
        }
        self.bank_map[region] = bank;
        trace!("[SAMS] Region {:X} <- bank {:02X}", region, bank);
    }

    pub fn read_register(&self, address: u16) -> u8 {
        self.bank_map[((address & 0x1E) >> 1) as usize]
    }

    pub fn cru_read(&self, bit: u16) -> bool {
        if !self.installed {
            return true;
        }
        self.cru[(bit & 1) as usize]
    }

    /// Returns true when register visibility changed, so the caller can retag
    /// the register window.
    pub fn cru_write(&mut self, bit: u16, value: bool) -> bool {
        if !self.installed {
            return false;
        }
        let index = (bit & 1) as usize;
        let previous = self.cru[index];
        self.cru[index] = value;

        if index == CRU_MAPPING_ENABLED {
            debug!(
                "[SAMS] Mapping {}",
                if value { "enabled" } else { "pass-through" }
            );
            self.apply_mapping();
            false
        } else {
            debug!("[SAMS] Registers {}", if value { "visible" } else { "hidden" });
            previous != value
        }
    }

    /// Re-evaluates every swappable region against the mapping bit.
    pub fn apply_mapping(&mut self) {
        for region in (0..REGION_COUNT).filter(|r| is_swappable(*r)) {
            let bank = if self.mapping_enabled() {
                self.bank_map[region] as u16
            } else {
                region as u16
            };
            self.swap_bank(region, bank);
        }
    }

    #[inline]
    fn translate(&self, address: u16) -> usize {
        let region = (address >> 12) as usize;
        self.region_bank[region] as usize * BANK_SIZE + (address as usize & (BANK_SIZE - 1))
    }

    pub fn read_byte(&self, address: u16) -> u8 {
        self.pool[self.translate(address)]
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        let offset = self.translate(address);
        self.pool[offset] = value;
    }

    pub fn read_word(&self, address: u16) -> u16 {
        let address = address & !1;
        u16::from_be_bytes([self.read_byte(address), self.read_byte(address | 1)])
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let address = address & !1;
        let [high, low] = value.to_be_bytes();
        self.write_byte(address, high);
        self.write_byte(address | 1, low);
    }

    /// Takes the page registers and CRU bits from a decoded snapshot, then
    /// installs `pool` as the new backing store.
    pub fn restore(&mut self, registers: Sams, pool: Vec<u8>) {
        self.installed = registers.installed;
        self.num_banks = registers.num_banks;
        self.region_bank = registers.region_bank;
        self.bank_map = registers.bank_map;
        self.cru = registers.cru;
        self.highwater = registers.highwater;
        self.pool = pool;
    }

    /// Bank currently answering for `address`.
    pub fn effective_bank(&self, address: u16) -> u16 {
        self.region_bank[(address >> 12) as usize]
    }
}
