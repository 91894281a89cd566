use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use tracing::{debug, info};

use crate::{
    bus::{Bus, SCRATCHPAD_SIZE},
    cartridge::CartridgeBank,
    cpu::CpuState,
    error::SaveStateError,
    grom::GromState,
    sams::{is_swappable, Sams, BANK_SIZE, MAX_BANKS, MIN_BANKS, REGION_COUNT},
    sound::SN76496,
    tms9901::TMS9901,
    vdp::{TMS9918, VRAM_SIZE},
};

pub const SAVE_VERSION: u16 = 0x0007;
const SPARE_BYTES: usize = 512;

/// CPU registers plus the bits of bus state that ride along with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub cpu: CpuState,
    pub cartridge_bank: CartridgeBank,
    pub grom: GromState,
    /// CRU bit 0 of the disk card.
    pub disk_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatileRam {
    #[serde(with = "BigArray")]
    pub scratchpad: [u8; SCRATCHPAD_SIZE],
    pub cartridge_ram: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    pub emulated: u16,
    pub timing: u16,
}

/// Zero words collapse to `(0, run length)`; anything else is stored as is.
pub fn encode_pool(pool: &[u8]) -> Vec<u32> {
    let mut encoded = Vec::new();
    let mut zeros: u32 = 0;
    for chunk in pool.chunks_exact(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if word == 0 {
            zeros += 1;
            continue;
        }
        if zeros > 0 {
            encoded.extend_from_slice(&[0, zeros]);
            zeros = 0;
        }
        encoded.push(word);
    }
    if zeros > 0 {
        encoded.extend_from_slice(&[0, zeros]);
    }
    encoded
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, SaveStateError> {
    let mut bytes = [0; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Rebuilds a pool of `size` bytes. A run that would go past the end is
/// rejected rather than truncated.
pub fn decode_pool<R: Read>(reader: &mut R, size: usize) -> Result<Vec<u8>, SaveStateError> {
    let words = size / 4;
    let mut pool = vec![0; size];
    let mut index = 0;
    while index < words {
        let word = read_u32(reader)?;
        if word != 0 {
            pool[index * 4..index * 4 + 4].copy_from_slice(&word.to_le_bytes());
            index += 1;
            continue;
        }
        let run = read_u32(reader)? as usize;
        if run == 0 || index + run > words {
            return Err(SaveStateError::Corrupt(format!(
                "zero run of {} words at word {} overflows a {} word pool",
                run, index, words
            )));
        }
        index += run;
    }
    Ok(pool)
}

pub fn save<W: Write>(
    mut writer: W,
    cpu: &CpuState,
    bus: &Bus,
    frames: FrameCounters,
) -> Result<(), SaveStateError> {
    let snapshot = CpuSnapshot {
        cpu: cpu.clone(),
        cartridge_bank: bus.cartridge.bank,
        grom: bus.grom.state.clone(),
        disk_enabled: bus.disk_enabled(),
    };
    let volatile = VolatileRam {
        scratchpad: bus.scratchpad,
        cartridge_ram: bus.cartridge.ram().to_vec(),
    };

    bincode::serialize_into(&mut writer, &SAVE_VERSION)?;
    bincode::serialize_into(&mut writer, &snapshot)?;
    bincode::serialize_into(&mut writer, &bus.tms9901)?;
    bincode::serialize_into(&mut writer, &bus.sams)?;
    bincode::serialize_into(&mut writer, &volatile)?;
    bincode::serialize_into(&mut writer, &frames)?;
    bincode::serialize_into(&mut writer, &bus.vdp)?;
    writer.write_all(&bus.vdp.vram)?;
    bincode::serialize_into(&mut writer, &bus.sound)?;
    writer.write_all(&[0; SPARE_BYTES])?;

    let encoded = encode_pool(bus.sams.pool());
    for word in &encoded {
        writer.write_all(&word.to_le_bytes())?;
    }
    writer.flush()?;

    debug!(
        "[SAVE] Pool of {} bytes encoded as {} words (highwater bank {})",
        bus.sams.pool_size(),
        encoded.len(),
        bus.sams.highwater
    );
    Ok(())
}

/// Everything read back from a save, not yet applied to a machine.
#[derive(Debug)]
pub struct Snapshot {
    pub cpu: CpuSnapshot,
    pub tms9901: TMS9901,
    pub sams: Sams,
    pub volatile: VolatileRam,
    pub frames: FrameCounters,
    pub vdp: TMS9918,
    pub vram: Vec<u8>,
    pub sound: SN76496,
    pub pool: Vec<u8>,
}

impl Snapshot {
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, SaveStateError> {
        let version: u16 = bincode::deserialize_from(&mut reader)?;
        if version != SAVE_VERSION {
            return Err(SaveStateError::VersionMismatch {
                found: version,
                expected: SAVE_VERSION,
            });
        }

        let cpu: CpuSnapshot = bincode::deserialize_from(&mut reader)?;
        let tms9901: TMS9901 = bincode::deserialize_from(&mut reader)?;
        let sams: Sams = bincode::deserialize_from(&mut reader)?;
        let volatile: VolatileRam = bincode::deserialize_from(&mut reader)?;
        let frames: FrameCounters = bincode::deserialize_from(&mut reader)?;
        let vdp: TMS9918 = bincode::deserialize_from(&mut reader)?;
        let mut vram = vec![0; VRAM_SIZE];
        reader.read_exact(&mut vram)?;
        let sound: SN76496 = bincode::deserialize_from(&mut reader)?;
        let mut spare = [0; SPARE_BYTES];
        reader.read_exact(&mut spare)?;

        let banks = sams.num_banks as usize;
        if !banks.is_power_of_two() || !(MIN_BANKS..=MAX_BANKS).contains(&banks) {
            return Err(SaveStateError::Corrupt(format!(
                "invalid SAMS bank count {}",
                banks
            )));
        }
        let pool = decode_pool(&mut reader, banks * BANK_SIZE)?;

        Ok(Self {
            cpu,
            tms9901,
            sams,
            volatile,
            frames,
            vdp,
            vram,
            sound,
            pool,
        })
    }

    /// Checks that the snapshot fits the machine it is about to replace, and
    /// that every field later used as an index is in range.
    pub fn validate(&self, bus: &Bus) -> Result<(), SaveStateError> {
        self.check_ranges()?;
        if self.sams.installed != bus.sams.installed || self.sams.num_banks != bus.sams.num_banks {
            return Err(SaveStateError::ConfigMismatch(format!(
                "saved with {} banks (SAMS {}), machine has {} banks (SAMS {})",
                self.sams.num_banks,
                self.sams.installed,
                bus.sams.num_banks,
                bus.sams.installed
            )));
        }
        if !bus.cartridge.accepts(&self.cpu.cartridge_bank) {
            return Err(SaveStateError::ConfigMismatch(format!(
                "cartridge bank {:?} does not fit the inserted cartridge",
                self.cpu.cartridge_bank
            )));
        }
        if self.volatile.cartridge_ram.len() != bus.cartridge.ram().len() {
            return Err(SaveStateError::ConfigMismatch(
                "cartridge RAM size differs".to_string(),
            ));
        }
        Ok(())
    }

    fn check_ranges(&self) -> Result<(), SaveStateError> {
        let corrupt = |what: String| Err(SaveStateError::Corrupt(what));
        let cpu = &self.cpu.cpu;
        if cpu.pc & 1 != 0 || cpu.wp & 1 != 0 {
            return corrupt(format!("odd PC >{:04X} or WP >{:04X}", cpu.pc, cpu.wp));
        }
        for region in 0..REGION_COUNT {
            let bank = self.sams.region_bank[region];
            if bank as u32 >= self.sams.num_banks {
                return corrupt(format!(
                    "region {:X} maps bank {} of {}",
                    region, bank, self.sams.num_banks
                ));
            }
            if !is_swappable(region) && bank as usize != region {
                return corrupt(format!("fixed region {:X} maps bank {}", region, bank));
            }
        }
        if self.vdp.address as usize >= VRAM_SIZE {
            return corrupt(format!("VDP address >{:04X}", self.vdp.address));
        }
        if self.tms9901.column_select > 7 {
            return corrupt(format!(
                "keyboard column {}",
                self.tms9901.column_select
            ));
        }
        if self.sound.latched_channel() > 3 {
            return corrupt(format!(
                "sound channel {}",
                self.sound.latched_channel()
            ));
        }
        Ok(())
    }

    /// Replaces the machine state. Nothing here can fail.
    pub fn apply(self, cpu: &mut CpuState, bus: &mut Bus) -> FrameCounters {
        *cpu = self.cpu.cpu;
        bus.cartridge
            .restore(self.cpu.cartridge_bank, &self.volatile.cartridge_ram);
        bus.grom.state = self.cpu.grom;
        bus.tms9901 = self.tms9901;
        bus.tms9901.recount_interrupts();
        bus.restore_disk_enabled(self.cpu.disk_enabled);
        bus.sams.restore(self.sams, self.pool);
        bus.scratchpad = self.volatile.scratchpad;
        bus.vdp = self.vdp;
        bus.vdp.restore_vram(self.vram);
        bus.sound = self.sound;
        bus.refresh_peripheral_window();
        bus.sync_vdp_interrupt();
        info!("[SAVE] State restored, PC=>{:04X}", cpu.pc);
        self.frames
    }
}
