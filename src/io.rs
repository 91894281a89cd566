use std::{cell::RefCell, rc::Rc};

use crate::{bus::Bus, cpu::CpuIo};

/// CPU side of the bus. The machine keeps its own handle to the same bus for
/// host access between instructions.
pub struct Io {
    pub bus: Rc<RefCell<Bus>>,
}

impl Io {
    pub fn new(bus: Rc<RefCell<Bus>>) -> Self {
        Io { bus }
    }
}

impl CpuIo for Io {
    fn read_word(&mut self, address: u16) -> u16 {
        self.bus.borrow_mut().read_word(address)
    }

    fn write_word(&mut self, address: u16, value: u16) {
        self.bus.borrow_mut().write_word(address, value)
    }

    fn read_byte(&mut self, address: u16) -> u8 {
        self.bus.borrow_mut().read_byte(address)
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        self.bus.borrow_mut().write_byte(address, value)
    }

    fn read_cru(&mut self, bit: u16, clock: u64) -> bool {
        self.bus.borrow_mut().read_cru_bit(bit, clock)
    }

    fn write_cru(&mut self, bit: u16, value: bool, clock: u64) {
        self.bus.borrow_mut().write_cru_bit(bit, value, clock)
    }

    fn interrupt_level(&mut self, clock: u64) -> Option<u8> {
        self.bus.borrow_mut().interrupt_level(clock)
    }

    fn take_wait_states(&mut self) -> u32 {
        self.bus.borrow_mut().take_wait_states()
    }
}
