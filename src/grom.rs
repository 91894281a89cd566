use serde::{Deserialize, Serialize};
use tracing::trace;

pub const GROM_SIZE: usize = 0x10000;

/// Port registers of the GROM chips. Kept apart from the contents so it can
/// travel with the CPU snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GromState {
    pub address: u16,
    pub buffer: u8,
    /// High byte of a pending address write.
    pub write_latch: Option<u8>,
    /// Set after the high byte of the address has been read back.
    pub read_latch: bool,
}

#[derive(Debug, Clone)]
pub struct Grom {
    data: Vec<u8>,
    pub state: GromState,
}

impl Default for Grom {
    fn default() -> Self {
        Self::new()
    }
}

impl Grom {
    pub fn new() -> Self {
        Self {
            data: vec![0; GROM_SIZE],
            state: GromState::default(),
        }
    }

    /// Loads console GROM images starting at address 0. Anything beyond 64K is
    /// ignored.
    pub fn load(&mut self, image: &[u8]) {
        let len = image.len().min(GROM_SIZE);
        self.data[..len].copy_from_slice(&image[..len]);
    }

    /// Copies a cartridge GROM image in at `base`.
    pub fn load_at(&mut self, base: u16, image: &[u8]) {
        let base = base as usize;
        let len = image.len().min(GROM_SIZE - base);
        self.data[base..base + len].copy_from_slice(&image[..len]);
    }

    pub fn reset(&mut self) {
        self.state = GromState::default();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Each chip is 8K; the address counter wraps inside the current chip.
    fn advance(&mut self) {
        let address = self.state.address;
        self.state.address = (address & 0xE000) | (address.wrapping_add(1) & 0x1FFF);
    }

    fn prefetch(&mut self) {
        self.state.buffer = self.data[self.state.address as usize];
        self.advance();
    }

    /// >9800
    pub fn read_data(&mut self) -> u8 {
        let value = self.state.buffer;
        self.state.write_latch = None;
        self.state.read_latch = false;
        self.prefetch();
        value
    }

    /// >9802. The counter runs one ahead of the byte in the buffer, and that
    /// is what the console sees.
    pub fn read_address(&mut self) -> u8 {
        self.state.write_latch = None;
        let [high, low] = self.state.address.to_be_bytes();
        if self.state.read_latch {
            self.state.read_latch = false;
            low
        } else {
            self.state.read_latch = true;
            high
        }
    }

    /// >9C02
    pub fn write_address(&mut self, value: u8) {
        self.state.read_latch = false;
        let Some(high) = self.state.write_latch.take() else {
            self.state.write_latch = Some(value);
            return;
        };
        self.state.address = u16::from_be_bytes([high, value]);
        trace!("[GROM] Address set to {:04X}", self.state.address);
        self.prefetch();
    }

    /// >9C00. There is no GRAM in the console, so only the latches move.
    pub fn write_data(&mut self, value: u8) {
        trace!(
            "[GROM] Ignoring write of {:02X} to {:04X}",
            value,
            self.state.address
        );
        self.state.write_latch = None;
        self.state.read_latch = false;
        self.advance();
    }
}
