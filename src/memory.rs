use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of one classifier granule. Every device window is a multiple of it.
pub const GRANULE_SIZE: usize = 16;
const GRANULE_COUNT: usize = 0x10000 / GRANULE_SIZE;

/// What answers at a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    ConsoleRom,
    ExpansionRam,
    PeripheralRom,
    SamsRegisters,
    DiskController,
    Cartridge,
    CartridgeRam,
    Scratchpad,
    Sound,
    VdpRead,
    VdpWrite,
    Speech,
    GromRead,
    GromWrite,
    Unused,
}

impl MemoryType {
    /// Only the console ROM and the scratchpad sit on the 16-bit bus; all the
    /// rest goes through the 8-bit multiplexer.
    pub fn is_8bit(self) -> bool {
        !matches!(self, MemoryType::ConsoleRom | MemoryType::Scratchpad)
    }

    /// Memory-mapped device ports, decoded on even addresses only.
    pub fn is_port(self) -> bool {
        matches!(
            self,
            MemoryType::Sound
                | MemoryType::VdpRead
                | MemoryType::VdpWrite
                | MemoryType::Speech
                | MemoryType::GromRead
                | MemoryType::GromWrite
        )
    }

    pub fn wait_states(self) -> u32 {
        if self.is_8bit() {
            4
        } else {
            0
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryType::ConsoleRom => "Console ROM",
            MemoryType::ExpansionRam => "Expansion RAM",
            MemoryType::PeripheralRom => "Peripheral ROM",
            MemoryType::SamsRegisters => "SAMS registers",
            MemoryType::DiskController => "Disk controller",
            MemoryType::Cartridge => "Cartridge ROM",
            MemoryType::CartridgeRam => "Cartridge RAM",
            MemoryType::Scratchpad => "Scratchpad RAM",
            MemoryType::Sound => "Sound",
            MemoryType::VdpRead => "VDP read",
            MemoryType::VdpWrite => "VDP write",
            MemoryType::Speech => "Speech",
            MemoryType::GromRead => "GROM read",
            MemoryType::GromWrite => "GROM write",
            MemoryType::Unused => "Unused",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub start: u16,
    pub end: u16,
    pub kind: MemoryType,
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">{:04X}->{:04X} {}", self.start, self.end, self.kind)
    }
}

/// Flat address classifier, one tag per 16-byte granule.
#[derive(Clone, PartialEq)]
pub struct MemoryMap {
    blocks: Box<[MemoryType; GRANULE_COUNT]>,
}

impl fmt::Debug for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.regions()).finish()
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMap {
    /// Console layout with nothing plugged into the cartridge port.
    pub fn new() -> Self {
        let mut map = Self {
            blocks: Box::new([MemoryType::Unused; GRANULE_COUNT]),
        };
        map.set_range(0x0000, 0x1FFF, MemoryType::ConsoleRom);
        map.set_range(0x2000, 0x3FFF, MemoryType::ExpansionRam);
        map.set_range(0x4000, 0x5FFF, MemoryType::PeripheralRom);
        map.set_range(0x6000, 0x7FFF, MemoryType::Unused);
        map.set_range(0x8000, 0x83FF, MemoryType::Scratchpad);
        map.set_range(0x8400, 0x87FF, MemoryType::Sound);
        map.set_range(0x8800, 0x8BFF, MemoryType::VdpRead);
        map.set_range(0x8C00, 0x8FFF, MemoryType::VdpWrite);
        map.set_range(0x9000, 0x97FF, MemoryType::Speech);
        map.set_range(0x9800, 0x9BFF, MemoryType::GromRead);
        map.set_range(0x9C00, 0x9FFF, MemoryType::GromWrite);
        map.set_range(0xA000, 0xFFFF, MemoryType::ExpansionRam);
        map
    }

    #[inline]
    pub fn classify(&self, address: u16) -> MemoryType {
        self.blocks[address as usize / GRANULE_SIZE]
    }

    /// Retags every granule touched by `start..=end`.
    pub fn set_range(&mut self, start: u16, end: u16, kind: MemoryType) {
        let first = start as usize / GRANULE_SIZE;
        let last = end as usize / GRANULE_SIZE;
        for block in &mut self.blocks[first..=last] {
            *block = kind;
        }
    }

    /// Collapses consecutive granules with the same tag.
    pub fn regions(&self) -> Vec<MemoryRegion> {
        let mut regions: Vec<MemoryRegion> = Vec::new();
        for (index, kind) in self.blocks.iter().enumerate() {
            let start = (index * GRANULE_SIZE) as u16;
            let end = start + (GRANULE_SIZE as u16 - 1);
            match regions.last_mut() {
                Some(last) if last.kind == *kind => last.end = end,
                _ => regions.push(MemoryRegion {
                    start,
                    end,
                    kind: *kind,
                }),
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_layout() {
        let map = MemoryMap::new();

        assert_eq!(map.classify(0x0000), MemoryType::ConsoleRom);
        assert_eq!(map.classify(0x1FFF), MemoryType::ConsoleRom);
        assert_eq!(map.classify(0x2000), MemoryType::ExpansionRam);
        assert_eq!(map.classify(0x4010), MemoryType::PeripheralRom);
        assert_eq!(map.classify(0x8300), MemoryType::Scratchpad);
        assert_eq!(map.classify(0x8400), MemoryType::Sound);
        assert_eq!(map.classify(0x8802), MemoryType::VdpRead);
        assert_eq!(map.classify(0x8C02), MemoryType::VdpWrite);
        assert_eq!(map.classify(0x9000), MemoryType::Speech);
        assert_eq!(map.classify(0x9802), MemoryType::GromRead);
        assert_eq!(map.classify(0x9C02), MemoryType::GromWrite);
        assert_eq!(map.classify(0xFFFE), MemoryType::ExpansionRam);
    }

    #[test]
    fn test_set_range_is_granular() {
        let mut map = MemoryMap::new();
        map.set_range(0x4000, 0x401F, MemoryType::SamsRegisters);

        assert_eq!(map.classify(0x4000), MemoryType::SamsRegisters);
        assert_eq!(map.classify(0x401E), MemoryType::SamsRegisters);
        assert_eq!(map.classify(0x4020), MemoryType::PeripheralRom);
    }

    #[test]
    fn test_wait_states() {
        assert_eq!(MemoryType::ConsoleRom.wait_states(), 0);
        assert_eq!(MemoryType::Scratchpad.wait_states(), 0);
        assert_eq!(MemoryType::ExpansionRam.wait_states(), 4);
        assert_eq!(MemoryType::VdpRead.wait_states(), 4);
    }

    #[test]
    fn test_regions_cover_the_address_space() {
        let regions = MemoryMap::new().regions();

        assert_eq!(regions.first().map(|r| r.start), Some(0x0000));
        assert_eq!(regions.last().map(|r| r.end), Some(0xFFFF));
        for pair in regions.windows(2) {
            assert_eq!(pair[0].end.wrapping_add(1), pair[1].start);
        }
    }
}
