use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::keyboard::{Key, Keyboard, KEY_MATRIX};

pub const PIN_COUNT: usize = 32;

/// Interrupt inputs used by the console.
pub const INT_EXTERNAL: usize = 1;
pub const INT_VDP: usize = 2;
pub const INT_TIMER: usize = 3;

/// The decrementer counts down once every 64 CPU clocks.
pub const TIMER_PRESCALE: u64 = 64;

const MODE_BIT: u16 = 0;
const SOFTWARE_RESET_BIT: u16 = 15;
const COLUMN_SELECT_BITS: std::ops::RangeInclusive<u16> = 18..=20;
const ALPHA_LOCK_BIT: u16 = 21;
const ALPHA_LOCK_ROW: u16 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub requested: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joystick {
    pub x: i8,
    pub y: i8,
    pub fire: bool,
}

impl Joystick {
    /// Matrix rows 3-7 when the joystick column is selected.
    fn line_active(&self, row: u16) -> bool {
        match row {
            3 => self.fire,
            4 => self.x < 0,
            5 => self.x > 0,
            6 => self.y < 0,
            7 => self.y > 0,
            _ => false,
        }
    }
}

/// TMS9901 programmable systems interface: interrupt pins, the decrementer
/// and the keyboard/joystick scan lines, all seen through 32 CRU bits.
///
/// The decrementer is never clocked. Every access computes how many 64-clock
/// periods passed since it was loaded and subtracts only the periods it has
/// not yet accounted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TMS9901 {
    pub pins: [Pin; PIN_COUNT],
    pub timer_mode: bool,
    pub clock_register: u16,
    pub decrementer: u16,
    pub read_register: u16,
    pub decrement_clock: u64,
    pub last_delta: u64,
    pub interrupt_requested: u8,
    pub active_interrupts: u8,
    pub column_select: u8,
    pub caps_lock: bool,
    pub keyboard: Keyboard,
    pub joysticks: [Joystick; 2],
}

impl Default for TMS9901 {
    fn default() -> Self {
        Self::new()
    }
}

impl TMS9901 {
    pub fn new() -> Self {
        Self {
            pins: [Pin::default(); PIN_COUNT],
            timer_mode: false,
            clock_register: 0,
            decrementer: 0,
            read_register: 0,
            decrement_clock: 0,
            last_delta: 0,
            interrupt_requested: 0,
            active_interrupts: 0,
            column_select: 0,
            caps_lock: false,
            keyboard: Keyboard::new(),
            joysticks: [Joystick::default(); 2],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Bit 15 in timer mode. Turns the I/O pins back into inputs and forgets
    /// every held key; pending requests stay.
    fn software_reset(&mut self) {
        debug!("[9901] Software reset");
        for address in 16..PIN_COUNT {
            self.set_enable(address, false);
        }
        self.keyboard.reset();
    }

    /// Rebuilds both interrupt counters from the pins. A restored state only
    /// trusts the pins.
    pub fn recount_interrupts(&mut self) {
        let requested = self.pins.iter().filter(|pin| pin.requested);
        self.interrupt_requested = requested.clone().count() as u8;
        self.active_interrupts = requested.filter(|pin| pin.enabled).count() as u8;
    }

    pub fn interrupt_line(&self) -> bool {
        self.active_interrupts > 0
    }

    pub fn is_requested(&self, level: usize) -> bool {
        self.pins[level & 0x1F].requested
    }

    pub fn raise_interrupt(&mut self, level: usize) {
        let pin = &mut self.pins[level & 0x1F];
        if pin.requested {
            return;
        }
        pin.requested = true;
        self.interrupt_requested += 1;
        if pin.enabled {
            self.active_interrupts += 1;
        }
        if level != INT_VDP {
            trace!("[9901] Interrupt {} raised", level);
        }
    }

    pub fn clear_interrupt(&mut self, level: usize) {
        let pin = &mut self.pins[level & 0x1F];
        if !pin.requested {
            return;
        }
        pin.requested = false;
        self.interrupt_requested = self.interrupt_requested.saturating_sub(1);
        if pin.enabled {
            self.active_interrupts = self.active_interrupts.saturating_sub(1);
        }
    }

    /// Changing a mask bit while the pin is requested moves it in or out of
    /// the active count, so the count always equals requested-and-enabled.
    fn set_enable(&mut self, address: usize, enabled: bool) {
        let pin = &mut self.pins[address];
        if pin.enabled == enabled {
            return;
        }
        pin.enabled = enabled;
        if pin.requested {
            if enabled {
                self.active_interrupts += 1;
            } else {
                self.active_interrupts = self.active_interrupts.saturating_sub(1);
            }
        }
    }

    /// Brings the decrementer up to date with `clock`.
    pub fn update_timer(&mut self, clock: u64) {
        if self.timer_mode || self.clock_register == 0 {
            return;
        }
        let delta = clock.saturating_sub(self.decrement_clock) / TIMER_PRESCALE;
        if delta == self.last_delta {
            return;
        }
        let elapsed = delta.saturating_sub(self.last_delta);
        self.last_delta = delta;

        if self.decrementer as u64 > elapsed {
            self.decrementer -= elapsed as u16;
        } else {
            let over = elapsed - self.decrementer as u64;
            let period = self.clock_register as u64;
            self.decrementer = (period - over % period) as u16;
            self.raise_interrupt(INT_TIMER);
        }
    }

    fn restart_decrementer(&mut self, clock: u64) {
        self.decrementer = self.clock_register;
        self.decrement_clock = clock;
        self.last_delta = 0;
    }

    pub fn write_bit(&mut self, address: u16, value: bool, clock: u64) {
        // A4-A10 are not decoded
        let address = address & 0x1F;

        if address == MODE_BIT {
            self.update_timer(clock);
            self.timer_mode = value;
            if value {
                self.read_register = self.decrementer;
            } else {
                self.restart_decrementer(clock);
            }
            trace!("[9901] {} mode", if value { "Timer" } else { "I/O" });
            return;
        }

        self.update_timer(clock);

        if self.timer_mode {
            match address {
                1..=14 => {
                    let shift = address - 1;
                    self.clock_register &= !(1 << shift);
                    self.clock_register |= (value as u16) << shift;
                    self.restart_decrementer(clock);
                }
                SOFTWARE_RESET_BIT => self.software_reset(),
                _ => {}
            }
            return;
        }

        if address as usize == INT_TIMER {
            // Writing the timer mask also acknowledges a pending tick
            self.clear_interrupt(INT_TIMER);
        }
        self.set_enable(address as usize, value);

        if COLUMN_SELECT_BITS.contains(&address) {
            let shift = address - COLUMN_SELECT_BITS.start();
            self.column_select &= !(1 << shift);
            self.column_select |= (value as u8) << shift;
        } else if address == ALPHA_LOCK_BIT {
            self.caps_lock = value;
        }
    }

    pub fn read_bit(&mut self, address: u16, clock: u64) -> bool {
        let address = address & 0x1F;
        self.update_timer(clock);

        if self.timer_mode {
            return match address {
                0 => true,
                1..=14 => self.read_register & (1 << (address - 1)) != 0,
                15 => self.interrupt_requested > 0,
                _ => true,
            };
        }

        // P0-P8 show up a second time as bits 31 down to 23
        let address = if (23..=31).contains(&address) {
            38 - address
        } else {
            address
        };

        match address {
            0 => false,
            1 | 2 => !self.pins[address as usize].requested,
            3..=10 => !self.scan_line(address),
            _ => true,
        }
    }

    /// Active-low keyboard/joystick input for matrix row `address`.
    fn scan_line(&self, address: u16) -> bool {
        if !self.caps_lock && address == ALPHA_LOCK_ROW {
            return self.keyboard.is_pressed(Key::AlphaLock);
        }
        let row = address - 3;
        match self.column_select {
            6 => self.joysticks[0].line_active(address),
            7 => self.joysticks[1].line_active(address),
            column => {
                let Some(key) = KEY_MATRIX[row as usize][column as usize] else {
                    return false;
                };
                if key == Key::Shift && self.keyboard.shift_hidden() {
                    return false;
                }
                self.keyboard.is_pressed(key)
            }
        }
    }

    pub fn set_joystick_x(&mut self, index: usize, value: i8) {
        self.joysticks[index & 1].x = value;
    }

    pub fn set_joystick_y(&mut self, index: usize, value: i8) {
        self.joysticks[index & 1].y = value;
    }

    pub fn set_joystick_button(&mut self, index: usize, pressed: bool) {
        self.joysticks[index & 1].fire = pressed;
    }
}
