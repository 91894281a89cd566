use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

pub const VRAM_SIZE: usize = 0x4000;

pub const STATUS_F: u8 = 0x80;
pub const STATUS_5S: u8 = 0x40;
pub const STATUS_C: u8 = 0x20;
const STATUS_SPRITE_MASK: u8 = 0x1F;

const SPRITE_END: u8 = 0xD0;
const SPRITES_PER_LINE: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    Text1,
    #[default]
    Graphic1,
    Graphic2,
    Multicolor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sprite {
    pub y: u8,
    pub x: u8,
    pub pattern: u8,
    /// Bits 0-3 colour, bit 7 early clock.
    pub color: u8,
}

/// TMS9918A as the console sees it: four ports and a 16K VRAM. The table
/// bases are derived from the registers and recomputed after a restore.
#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq)]
pub struct TMS9918 {
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    pub vram: Vec<u8>,
    pub data_pre_read: u8,
    pub registers: [u8; 8],
    pub status: u8,
    pub address: u16,
    pub first_write: Option<u8>,
    pub line: u16,
    pub vblank: bool,

    #[serde(skip)]
    pub display_mode: DisplayMode,
    #[serde(skip)]
    pub layout_table_address: u16,
    #[serde(skip)]
    pub color_table_address: u16,
    #[serde(skip)]
    pub pattern_table_address: u16,
    #[serde(skip)]
    pub sprite_attribute_table_address: u16,
    #[serde(skip)]
    pub sprite_pattern_table_address: u16,
}

impl Default for TMS9918 {
    fn default() -> Self {
        Self::new()
    }
}

impl TMS9918 {
    pub fn new() -> Self {
        let mut vdp = Self {
            vram: vec![0; VRAM_SIZE],
            data_pre_read: 0,
            registers: [0; 8],
            status: 0,
            address: 0,
            first_write: None,
            line: 0,
            vblank: false,
            display_mode: DisplayMode::Graphic1,
            layout_table_address: 0,
            color_table_address: 0,
            pattern_table_address: 0,
            sprite_attribute_table_address: 0,
            sprite_pattern_table_address: 0,
        };
        vdp.refresh_tables();
        vdp
    }

    pub fn reset(&mut self) {
        self.vram.iter_mut().for_each(|byte| *byte = 0);
        self.data_pre_read = 0;
        self.registers = [0; 8];
        self.status = 0;
        self.address = 0;
        self.first_write = None;
        self.line = 0;
        self.vblank = false;
        self.refresh_tables();
    }

    /// Installs a VRAM image after a state restore and rebuilds the derived
    /// table bases.
    pub fn restore_vram(&mut self, vram: Vec<u8>) {
        self.vram = vram;
        self.refresh_tables();
    }

    pub fn refresh_tables(&mut self) {
        self.set_display_mode();
        self.update_layout_table_address();
        self.update_color_table_address();
        self.update_pattern_table_address();
        self.sprite_attribute_table_address = ((self.registers[5] & 0x7F) as u16) << 7;
        self.sprite_pattern_table_address = ((self.registers[6] & 0x07) as u16) << 11;
    }

    /// >8800
    pub fn read_data(&mut self) -> u8 {
        self.first_write = None;
        let data = self.data_pre_read;
        self.data_pre_read = self.vram[self.address as usize];
        self.address_wrapping_inc();
        data
    }

    /// >8802. Reading clears the frame flag, the collision and fifth sprite
    /// flags, and the address latch.
    pub fn read_status(&mut self) -> u8 {
        self.first_write = None;
        let status = self.status;
        self.status &= STATUS_SPRITE_MASK;
        status
    }

    /// >8C00
    pub fn write_data(&mut self, data: u8) {
        self.vram[self.address as usize] = data;
        self.data_pre_read = data;
        self.address_wrapping_inc();
        self.first_write = None;
    }

    /// >8C02. Two bytes: low address (or register value) first, then the
    /// high address bits or the register number.
    pub fn write_address(&mut self, val: u8) {
        let Some(data_first_write) = self.first_write else {
            self.first_write = Some(val);
            self.address = (self.address & !0xFF) | val as u16;
            return;
        };
        self.first_write = None;

        if val & 0x80 != 0 {
            self.write_register(val & 0x07, data_first_write);
            return;
        }

        self.address = (((val & 0x3F) as u16) << 8) | data_first_write as u16;
        if val & 0x40 == 0 {
            self.data_pre_read = self.vram[self.address as usize];
            self.address_wrapping_inc();
        }
        trace!("[VDP] Address set to {:04X}", self.address);
    }

    pub fn address_wrapping_inc(&mut self) {
        self.address = (self.address + 1) & 0x3FFF;
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.registers[1] & 0x20 != 0
    }

    /// Level of the INT output, wired to 9901 pin 2.
    pub fn interrupt_line(&self) -> bool {
        self.status & STATUS_F != 0 && self.interrupt_enabled()
    }

    pub fn set_vblank(&mut self, active: bool) {
        self.vblank = active;
        if active {
            self.status |= STATUS_F;
        }
    }

    pub fn set_current_scanline(&mut self, line: u16) {
        self.line = line;
    }

    pub fn display_enabled(&self) -> bool {
        self.registers[1] & 0x40 != 0
    }

    pub fn backdrop_color(&self) -> u8 {
        self.registers[7] & 0x0F
    }

    pub fn text_color(&self) -> u8 {
        self.registers[7] >> 4
    }

    pub fn sprite_size(&self) -> u8 {
        if self.registers[1] & 0x02 != 0 {
            16
        } else {
            8
        }
    }

    pub fn sprite_magnification(&self) -> u8 {
        if self.registers[1] & 0x01 != 0 {
            2
        } else {
            1
        }
    }

    /// Sprite attribute list up to the terminator.
    pub fn sprites(&self) -> Vec<Sprite> {
        let base = self.sprite_attribute_table_address as usize;
        let mut sprites = Vec::with_capacity(32);
        for i in 0..32 {
            let entry = base + i * 4;
            let y = self.vram[entry & 0x3FFF];
            if y == SPRITE_END {
                break;
            }
            sprites.push(Sprite {
                y,
                x: self.vram[(entry + 1) & 0x3FFF],
                pattern: self.vram[(entry + 2) & 0x3FFF],
                color: self.vram[(entry + 3) & 0x3FFF],
            });
        }
        sprites
    }

    /// Fifth-sprite check over the whole frame. Sets 5S and the sprite number
    /// the first time a line holds more than four sprites; otherwise the low
    /// bits report the last sprite examined.
    pub fn evaluate_sprites(&mut self) {
        if self.display_mode == DisplayMode::Text1 || self.status & STATUS_5S != 0 {
            return;
        }
        let sprites = self.sprites();
        let height = (self.sprite_size() * self.sprite_magnification()) as u16;

        for line in 0..192u16 {
            let mut on_line = 0;
            for (index, sprite) in sprites.iter().enumerate() {
                // Y is stored one line early; values above >E0 wrap to the top.
                let top = (sprite.y as u16 + 1) & 0xFF;
                let top = if top > 0xE0 { top as i16 - 256 } else { top as i16 };
                let line = line as i16;
                if line < top || line >= top + height as i16 {
                    continue;
                }
                on_line += 1;
                if on_line > SPRITES_PER_LINE {
                    self.status = (self.status & !STATUS_SPRITE_MASK) | STATUS_5S | index as u8;
                    debug!("[VDP] Fifth sprite {} on line {}", index, line);
                    return;
                }
            }
        }
        let last = sprites.len().min(31) as u8;
        self.status = (self.status & !STATUS_SPRITE_MASK) | last;
    }

    /// Name table size in bytes for the current mode.
    pub fn name_table_size(&self) -> usize {
        match self.display_mode {
            DisplayMode::Text1 => 960,
            _ => 768,
        }
    }

    pub fn name_table(&self) -> &[u8] {
        let base = self.layout_table_address as usize;
        &self.vram[base..(base + self.name_table_size()).min(VRAM_SIZE)]
    }

    fn set_display_mode(&mut self) {
        let m1 = (self.registers[1] >> 4) & 1;
        let m2 = (self.registers[1] >> 3) & 1;
        let m3 = (self.registers[0] >> 1) & 1;

        self.display_mode = match (m1 << 2) | (m2 << 1) | m3 {
            0b000 => DisplayMode::Graphic1,
            0b001 => DisplayMode::Graphic2,
            0b010 => DisplayMode::Multicolor,
            0b100 => DisplayMode::Text1,
            bits => {
                warn!("[VDP] Unsupported display mode: {:03b}", bits);
                DisplayMode::Text1
            }
        };
    }

    fn update_layout_table_address(&mut self) {
        self.layout_table_address = ((self.registers[2] & 0x0F) as u16) << 10;
    }

    fn update_color_table_address(&mut self) {
        self.color_table_address = match self.display_mode {
            DisplayMode::Graphic2 => ((self.registers[3] & 0x80) as u16) << 6,
            _ => (self.registers[3] as u16) << 6,
        };
    }

    fn update_pattern_table_address(&mut self) {
        self.pattern_table_address = match self.display_mode {
            DisplayMode::Graphic2 => ((self.registers[4] & 0x04) as u16) << 11,
            _ => ((self.registers[4] & 0x07) as u16) << 11,
        };
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        let modified = self.registers[reg as usize] ^ value;
        self.registers[reg as usize] = value;

        match reg {
            0 => {
                if modified & 0x02 != 0 {
                    self.refresh_tables();
                    info!("[VDP] 0 - 0x02 - Display mode {:?}", self.display_mode);
                }
                if modified & 0x01 != 0 {
                    debug!("[VDP] 0 - 0x01 - External video {}", value & 1);
                }
            }
            1 => {
                if modified & 0x20 != 0 {
                    debug!(
                        "[VDP] 1 - 0x20 - Interrupt {}",
                        if value & 0x20 != 0 { "enabled" } else { "disabled" }
                    );
                }
                if modified & 0x40 != 0 {
                    debug!(
                        "[VDP] 1 - 0x40 - Display {}",
                        if value & 0x40 != 0 { "on" } else { "blanked" }
                    );
                }
                if modified & 0x18 != 0 {
                    self.refresh_tables();
                    info!("[VDP] 1 - 0x18 - Display mode {:?}", self.display_mode);
                }
                if modified & 0x03 != 0 {
                    debug!(
                        "[VDP] 1 - 0x03 - Sprites {}x{} magnified {}",
                        self.sprite_size(),
                        self.sprite_size(),
                        self.sprite_magnification()
                    );
                }
            }
            2 => {
                self.update_layout_table_address();
                debug!(
                    "[VDP] 2 - Name table at {:04X}",
                    self.layout_table_address
                );
            }
            3 => {
                self.update_color_table_address();
                debug!("[VDP] 3 - Color table at {:04X}", self.color_table_address);
            }
            4 => {
                self.update_pattern_table_address();
                debug!(
                    "[VDP] 4 - Pattern table at {:04X}",
                    self.pattern_table_address
                );
            }
            5 => {
                self.sprite_attribute_table_address = ((value & 0x7F) as u16) << 7;
                debug!(
                    "[VDP] 5 - Sprite attribute table at {:04X}",
                    self.sprite_attribute_table_address
                );
            }
            6 => {
                self.sprite_pattern_table_address = ((value & 0x07) as u16) << 11;
                debug!(
                    "[VDP] 6 - Sprite pattern table at {:04X}",
                    self.sprite_pattern_table_address
                );
            }
            _ => {
                debug!(
                    "[VDP] 7 - Colors | FG: {} | BG: {}",
                    value >> 4,
                    value & 0x0F
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_register(vdp: &mut TMS9918, reg: u8, value: u8) {
        vdp.write_address(value);
        vdp.write_address(0x80 | reg);
    }

    fn set_write_address(vdp: &mut TMS9918, address: u16) {
        vdp.write_address(address as u8);
        vdp.write_address(0x40 | (address >> 8) as u8);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut vdp = TMS9918::new();
        set_write_address(&mut vdp, 0x0100);
        vdp.write_data(0x11);
        vdp.write_data(0x22);

        vdp.write_address(0x00);
        vdp.write_address(0x01);
        assert_eq!(vdp.read_data(), 0x11);
        assert_eq!(vdp.read_data(), 0x22);
    }

    #[test]
    fn test_register_write_shares_address_latch() {
        let mut vdp = TMS9918::new();
        set_write_address(&mut vdp, 0x0200);
        set_register(&mut vdp, 2, 0x06);

        assert_eq!(vdp.registers[2], 0x06);
        assert_eq!(vdp.layout_table_address, 0x1800);
        // the first byte already replaced the low address bits
        vdp.write_data(0x99);
        assert_eq!(vdp.vram[0x0206], 0x99);
    }

    #[test]
    fn test_status_read_clears_flag_and_latch() {
        let mut vdp = TMS9918::new();
        set_register(&mut vdp, 1, 0x20);
        vdp.set_vblank(true);
        assert!(vdp.interrupt_line());

        vdp.write_address(0x12);
        let status = vdp.read_status();
        assert_eq!(status & STATUS_F, STATUS_F);
        assert!(!vdp.interrupt_line());
        assert_eq!(vdp.first_write, None);
    }

    #[test]
    fn test_interrupt_needs_enable_bit() {
        let mut vdp = TMS9918::new();
        vdp.set_vblank(true);
        assert!(!vdp.interrupt_line());

        set_register(&mut vdp, 1, 0x20);
        assert!(vdp.interrupt_line());
    }

    #[test]
    fn test_display_modes() {
        let mut vdp = TMS9918::new();
        set_register(&mut vdp, 1, 0x10);
        assert_eq!(vdp.display_mode, DisplayMode::Text1);
        assert_eq!(vdp.name_table_size(), 960);

        set_register(&mut vdp, 1, 0x00);
        set_register(&mut vdp, 0, 0x02);
        assert_eq!(vdp.display_mode, DisplayMode::Graphic2);
    }

    #[test]
    fn test_fifth_sprite() {
        let mut vdp = TMS9918::new();
        set_register(&mut vdp, 5, 0x06);
        let base = 0x0300;
        for i in 0..5 {
            vdp.vram[base + i * 4] = 0x1F;
            vdp.vram[base + i * 4 + 1] = (i * 16) as u8;
        }
        vdp.vram[base + 20] = SPRITE_END;

        vdp.evaluate_sprites();
        assert_eq!(vdp.status & STATUS_5S, STATUS_5S);
        assert_eq!(vdp.status & STATUS_SPRITE_MASK, 4);
    }
}
