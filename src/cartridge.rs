use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

pub const BANK_SIZE: usize = 0x2000;
pub const MINI_MEMORY_RAM_SIZE: usize = 0x1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartridgeType {
    #[default]
    Normal,
    /// 4K of battery backed RAM at >7000->7FFF.
    MiniMemory,
}

/// Currently selected bank, as an offset into the ROM image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeBank {
    pub offset: u32,
    pub mask: u16,
}

#[derive(Clone, PartialEq)]
pub struct Cartridge {
    pub rom_path: Option<PathBuf>,
    pub cart_type: CartridgeType,
    pub bank: CartridgeBank,
    rom: Vec<u8>,
    ram: Vec<u8>,
}

impl fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cartridge")
            .field("rom_path", &self.rom_path)
            .field("cart_type", &self.cart_type)
            .field("banks", &self.bank_count())
            .field("bank", &self.bank)
            .finish()
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rom_path {
            Some(path) => write!(
                f,
                "{:?} path={:?} banks={}",
                self.cart_type,
                path,
                self.bank_count()
            ),
            None => write!(f, "{:?} banks={}", self.cart_type, self.bank_count()),
        }
    }
}

impl Cartridge {
    pub fn empty() -> Self {
        Self {
            rom_path: None,
            cart_type: CartridgeType::Normal,
            bank: CartridgeBank::default(),
            rom: Vec::new(),
            ram: Vec::new(),
        }
    }

    /// Pads the image to a power-of-two number of 8K banks.
    pub fn from_bytes(rom: &[u8], cart_type: CartridgeType) -> Self {
        let banks = rom.len().div_ceil(BANK_SIZE).max(1).next_power_of_two();
        let mut data = vec![0; banks * BANK_SIZE];
        data[..rom.len()].copy_from_slice(rom);

        let ram = match cart_type {
            CartridgeType::MiniMemory => vec![0; MINI_MEMORY_RAM_SIZE],
            CartridgeType::Normal => Vec::new(),
        };

        Self {
            rom_path: None,
            cart_type,
            bank: CartridgeBank {
                offset: 0,
                mask: (banks - 1) as u16,
            },
            rom: data,
            ram,
        }
    }

    pub fn load(path: impl AsRef<Path>, cart_type: CartridgeType) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .with_context(|| format!("opening cartridge image {}", path.display()))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("reading cartridge image {}", path.display()))?;

        let mut cartridge = Self::from_bytes(&buffer, cart_type);
        cartridge.rom_path = Some(path.to_path_buf());
        info!("[CART] Loaded {}", cartridge);
        Ok(cartridge)
    }

    pub fn is_empty(&self) -> bool {
        self.rom.is_empty()
    }

    pub fn bank_count(&self) -> usize {
        self.rom.len() / BANK_SIZE
    }

    pub fn reset(&mut self) {
        self.bank.offset = 0;
    }

    fn in_ram(&self, address: u16) -> bool {
        self.cart_type == CartridgeType::MiniMemory && address & 0x1000 != 0
    }

    pub fn read(&self, address: u16) -> u8 {
        if self.in_ram(address) {
            return self.ram[address as usize & (MINI_MEMORY_RAM_SIZE - 1)];
        }
        self.rom
            .get(self.bank.offset as usize + (address as usize & (BANK_SIZE - 1)))
            .copied()
            .unwrap_or(0)
    }

    /// Writes to ROM select a bank; the address lines carry the bank number.
    pub fn write(&mut self, address: u16, value: u8) {
        if self.in_ram(address) {
            self.ram[address as usize & (MINI_MEMORY_RAM_SIZE - 1)] = value;
            return;
        }
        if self.is_empty() {
            return;
        }
        let bank = (address >> 1) & self.bank.mask;
        self.bank.offset = bank as u32 * BANK_SIZE as u32;
        trace!("[CART] Bank {} selected", bank);
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// True if `bank` could have come from this image.
    pub fn accepts(&self, bank: &CartridgeBank) -> bool {
        if self.is_empty() {
            return bank.offset == 0;
        }
        bank.offset as usize % BANK_SIZE == 0
            && (bank.offset as usize) < self.rom.len()
            && bank.mask as usize == self.bank_count() - 1
    }

    pub fn restore(&mut self, bank: CartridgeBank, ram: &[u8]) {
        self.bank = bank;
        let len = ram.len().min(self.ram.len());
        self.ram[..len].copy_from_slice(&ram[..len]);
    }
}
