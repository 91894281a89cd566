use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Writes kept for the host mixer before the oldest are dropped.
const MAX_PENDING_WRITES: usize = 4096;

/// Register model of the SN76496 at >8400. The chip is write-only; samples
/// are produced by the host from the queued writes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SN76496 {
    /// 10-bit tone periods for channels 0-2.
    pub tone: [u16; 3],
    pub noise: u8,
    /// Attenuation per channel, noise last. 0x0F is silent.
    pub attenuation: [u8; 4],
    /// Channel and register type of the last latch byte.
    latched_channel: u8,
    latched_volume: bool,

    #[serde(skip)]
    pending: VecDeque<u8>,
}

impl Default for SN76496 {
    fn default() -> Self {
        Self::new()
    }
}

impl SN76496 {
    pub fn new() -> Self {
        Self {
            tone: [0; 3],
            noise: 0,
            attenuation: [0x0F; 4],
            latched_channel: 0,
            latched_volume: false,
            pending: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.tone = [0; 3];
        self.noise = 0;
        self.attenuation = [0x0F; 4];
        self.latched_channel = 0;
        self.latched_volume = false;
        self.pending.clear();
    }

    pub fn write(&mut self, data: u8) {
        if data & 0x80 != 0 {
            self.latched_channel = (data >> 5) & 0x03;
            self.latched_volume = data & 0x10 != 0;
            self.apply_low(data & 0x0F);
        } else {
            self.apply_high(data);
        }

        trace!("[SND] {:02X}", data);
        if self.pending.len() == MAX_PENDING_WRITES {
            warn!("[SND] Write queue full, dropping oldest write");
            self.pending.pop_front();
        }
        self.pending.push_back(data);
    }

    fn apply_low(&mut self, nibble: u8) {
        let channel = self.latched_channel as usize;
        if self.latched_volume {
            self.attenuation[channel] = nibble;
        } else if channel == 3 {
            self.noise = nibble & 0x07;
        } else {
            self.tone[channel] = (self.tone[channel] & 0x3F0) | nibble as u16;
        }
    }

    fn apply_high(&mut self, data: u8) {
        let channel = self.latched_channel as usize;
        if self.latched_volume {
            self.attenuation[channel] = data & 0x0F;
        } else if channel == 3 {
            self.noise = data & 0x07;
        } else {
            self.tone[channel] = (self.tone[channel] & 0x00F) | ((data as u16 & 0x3F) << 4);
        }
    }

    /// Channel selected by the last latch byte, 3 being noise.
    pub fn latched_channel(&self) -> u8 {
        self.latched_channel
    }

    /// Drains the raw writes since the last call, oldest first.
    pub fn take_writes(&mut self) -> Vec<u8> {
        self.pending.drain(..).collect()
    }

    pub fn frequency(&self, channel: usize, clock: u32) -> Option<f32> {
        let period = *self.tone.get(channel)?;
        let period = if period == 0 { 1024 } else { period as u32 };
        Some(clock as f32 / (32 * period) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_latch_and_data() {
        let mut chip = SN76496::new();
        // channel 1 tone, low nibble 0xE then high six bits 0x0F
        chip.write(0xAE);
        chip.write(0x0F);

        assert_eq!(chip.tone[1], 0x0FE);
    }

    #[test]
    fn test_attenuation_and_noise() {
        let mut chip = SN76496::new();
        chip.write(0x90);
        chip.write(0xE5);

        assert_eq!(chip.attenuation[0], 0);
        assert_eq!(chip.noise, 5);
    }

    #[test]
    fn test_writes_are_queued_for_the_mixer() {
        let mut chip = SN76496::new();
        chip.write(0x9F);
        chip.write(0xBF);

        assert_eq!(chip.take_writes(), vec![0x9F, 0xBF]);
        assert!(chip.take_writes().is_empty());
    }
}
