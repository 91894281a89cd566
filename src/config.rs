use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    cartridge::CartridgeType,
    clock::VideoStandard,
    error::ConfigError,
    sams::{MAX_BANKS, MIN_BANKS},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    /// Console with the plain 32K memory expansion.
    #[default]
    Standard32K,
    /// 32K expansion replaced by a SAMS card.
    Sams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub machine_type: MachineType,
    /// Number of 4K banks on the SAMS card. 256 is 1 MiB, 128 is 512 KiB.
    pub sams_banks: usize,
    pub video_standard: VideoStandard,
    pub cartridge_type: CartridgeType,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            machine_type: MachineType::Standard32K,
            sams_banks: MAX_BANKS,
            video_standard: VideoStandard::Ntsc,
            cartridge_type: CartridgeType::Normal,
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine_type == MachineType::Sams {
            let banks = self.sams_banks;
            if !banks.is_power_of_two() || !(MIN_BANKS..=MAX_BANKS).contains(&banks) {
                return Err(ConfigError::InvalidBankCount(banks));
            }
        }
        Ok(())
    }

    /// Bank count of the pool backing >2000-3FFF and >A000-FFFF.
    pub fn pool_banks(&self) -> usize {
        match self.machine_type {
            MachineType::Standard32K => MIN_BANKS,
            MachineType::Sams => self.sams_banks,
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing machine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading machine config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("loading {}", path.display()))
    }
}
