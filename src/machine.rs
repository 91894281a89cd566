use std::{
    cell::RefCell,
    collections::BTreeSet,
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
    rc::Rc,
    time::Duration,
};

use tracing::{debug, info, trace, warn};

use crate::{
    bus::{Bus, DiskDsr, ROM_SIZE},
    cartridge::Cartridge,
    clock::{Clock, ClockEvent},
    config::{MachineConfig, MachineType},
    cpu::TMS9900,
    error::{ConfigError, SaveStateError, Trap},
    grom::Grom,
    hexdump,
    instruction::Instruction,
    internal_state::{InternalState, ReportState},
    io::Io,
    keyboard::Key,
    sams::Sams,
    savestate::{self, FrameCounters, Snapshot},
};

/// Cartridge GROMs start at GROM address >6000.
const CARTRIDGE_GROM_BASE: u16 = 0x6000;

/// Why a run handed control back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    FrameComplete,
    CyclesElapsed,
    /// Stopped before executing the instruction at this address.
    Breakpoint(u16),
    Halted,
}

pub struct Machine {
    pub bus: Rc<RefCell<Bus>>,
    pub cpu: TMS9900<Io>,
    pub clock: Clock,
    pub config: MachineConfig,
    pub frames: FrameCounters,
    pub frame_ready: bool,
    breakpoints: BTreeSet<u16>,
    resume_from: Option<u16>,
}

impl Machine {
    pub fn new(bus: Bus, config: MachineConfig) -> Self {
        info!("[MACHINE] Initializing TI-99/4A with {:?}", config);
        let bus = Rc::new(RefCell::new(bus));
        let cpu = TMS9900::new(Io::new(bus.clone()));

        Self {
            bus,
            cpu,
            clock: Clock::new(config.video_standard),
            config,
            frames: FrameCounters::default(),
            frame_ready: false,
            breakpoints: BTreeSet::new(),
            resume_from: None,
        }
    }

    /// Power-on reset: peripherals first, then the CPU picks up the reset
    /// vector and starts running.
    pub fn reset(&mut self) {
        self.bus.borrow_mut().reset();
        self.cpu.reset();
        self.cpu.start();
        self.clock.reset();
        self.frames = FrameCounters::default();
        self.frame_ready = false;
        self.resume_from = None;
        info!(
            "[MACHINE] Reset, WP=>{:04X} PC=>{:04X}",
            self.cpu.wp(),
            self.cpu.pc()
        );
    }

    pub fn start(&mut self) {
        self.cpu.start();
    }

    pub fn stop(&mut self) {
        info!("[MACHINE] Stopped at >{:04X}", self.cpu.pc());
        self.cpu.stop();
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    pub fn halted(&self) -> bool {
        self.cpu.halted()
    }

    pub fn trap_count(&self) -> u64 {
        self.cpu.state.trap_count
    }

    pub fn take_trap(&mut self) -> Option<Trap> {
        self.cpu.take_trap()
    }

    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        info!("[MACHINE] Inserting cartridge {:?}", cartridge.rom_path);
        self.bus.borrow_mut().insert_cartridge(cartridge);
        self.reset();
    }

    /// Runs a single instruction. Returns the clocks it took, 0 when halted.
    pub fn step(&mut self) -> u32 {
        let cycles = self.cpu.step();
        let events = self.clock.tick(cycles);
        if !events.is_empty() {
            self.handle_clock_events(events);
        }
        cycles
    }

    /// Runs for at least `cycles` clocks unless a breakpoint or halt comes
    /// first.
    pub fn step_for(&mut self, cycles: u64) -> RunStatus {
        self.run(Some(cycles))
    }

    /// Runs to the end of the current video frame.
    pub fn step_frame(&mut self) -> RunStatus {
        self.frames.timing = self.frames.timing.wrapping_add(1);
        self.run(None)
    }

    fn run(&mut self, budget: Option<u64>) -> RunStatus {
        let start = self.cpu.cycles();
        self.frame_ready = false;

        loop {
            if self.cpu.halted() {
                return RunStatus::Halted;
            }

            let pc = self.cpu.pc();
            let resuming = self.resume_from.take() == Some(pc);
            if !resuming && !self.cpu.is_idle() && self.breakpoints.contains(&pc) {
                debug!("[MACHINE] Breakpoint at >{:04X}", pc);
                self.resume_from = Some(pc);
                return RunStatus::Breakpoint(pc);
            }

            self.step();

            match budget {
                Some(budget) if self.cpu.cycles().saturating_sub(start) >= budget => {
                    return RunStatus::CyclesElapsed;
                }
                None if self.frame_ready => return RunStatus::FrameComplete,
                _ => {}
            }
        }
    }

    fn handle_clock_events(&mut self, events: Vec<ClockEvent>) {
        let mut bus = self.bus.borrow_mut();
        for event in events {
            match event {
                ClockEvent::VBlankStart => {
                    bus.vdp.evaluate_sprites();
                    bus.vdp.set_vblank(true);
                    bus.sync_vdp_interrupt();
                }
                ClockEvent::VBlankEnd => {
                    bus.vdp.set_vblank(false);
                }
                ClockEvent::ScanlineStart(line) => {
                    bus.vdp.set_current_scanline(line as u16);
                }
                ClockEvent::FrameEnd => {
                    self.frame_ready = true;
                    self.frames.emulated = self.frames.emulated.wrapping_add(1);
                    trace!(
                        "[MACHINE] Frame {} completed, total cycles: {}",
                        self.clock.frame_count(),
                        self.clock.total_cycles()
                    );
                }
            }
        }
    }

    /// Real time one frame should take at `speed_percent` of normal speed.
    pub fn frame_duration(&self, speed_percent: u32) -> Duration {
        self.config.video_standard.frame_duration(speed_percent)
    }

    pub fn raise_interrupt(&mut self, level: usize) {
        self.bus.borrow_mut().tms9901.raise_interrupt(level);
    }

    pub fn clear_interrupt(&mut self, level: usize) {
        self.bus.borrow_mut().tms9901.clear_interrupt(level);
    }

    // Host memory access goes through the same decode as the CPU, so port
    // reads have their usual side effects. Wait states are discarded.

    pub fn read_byte(&mut self, address: u16) -> u8 {
        let mut bus = self.bus.borrow_mut();
        let value = bus.read_byte(address);
        bus.take_wait_states();
        value
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        let mut bus = self.bus.borrow_mut();
        bus.write_byte(address, value);
        bus.take_wait_states();
    }

    pub fn read_word(&mut self, address: u16) -> u16 {
        let mut bus = self.bus.borrow_mut();
        let value = bus.read_word(address);
        bus.take_wait_states();
        value
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let mut bus = self.bus.borrow_mut();
        bus.write_word(address, value);
        bus.take_wait_states();
    }

    pub fn read_cru(&mut self, bit: u16, count: u8) -> u16 {
        let clock = self.cpu.cycles();
        self.bus.borrow_mut().read_cru(bit, count, clock)
    }

    pub fn write_cru(&mut self, bit: u16, count: u8, value: u16) {
        let clock = self.cpu.cycles();
        self.bus.borrow_mut().write_cru(bit, count, value, clock);
    }

    /// Host key by `KeyboardEvent.code` name. Returns false for keys the
    /// console does not have.
    pub fn key_down(&mut self, code: &str) -> bool {
        self.bus.borrow_mut().key_down(code)
    }

    pub fn key_up(&mut self, code: &str) -> bool {
        self.bus.borrow_mut().key_up(code)
    }

    pub fn press_key(&mut self, key: Key) {
        self.bus.borrow_mut().tms9901.keyboard.press(key);
    }

    pub fn release_key(&mut self, key: Key) {
        self.bus.borrow_mut().tms9901.keyboard.release(key);
    }

    pub fn set_joystick(&mut self, index: usize, x: i8, y: i8, fire: bool) {
        let mut bus = self.bus.borrow_mut();
        bus.tms9901.set_joystick_x(index, x);
        bus.tms9901.set_joystick_y(index, y);
        bus.tms9901.set_joystick_button(index, fire);
    }

    /// Sound chip writes since the last call, for the host mixer.
    pub fn take_sound_writes(&mut self) -> Vec<u8> {
        self.bus.borrow_mut().sound.take_writes()
    }

    pub fn add_breakpoint(&mut self, address: u16) {
        self.breakpoints.insert(address & !1);
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.breakpoints.remove(&(address & !1))
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &u16> {
        self.breakpoints.iter()
    }

    /// Disassembles `count` instructions starting at `start`.
    pub fn program(&self, start: u16, count: usize) -> Vec<ProgramEntry> {
        let bus = self.bus.borrow();
        let mut entries = Vec::with_capacity(count);
        let mut pc = start;
        for _ in 0..count {
            let instruction =
                Instruction::decode_at(self.cpu.opcodes(), |address| bus.peek_word(address), pc);
            entries.push(ProgramEntry {
                address: instruction.address,
                data: instruction.as_hex_vector().join(" "),
                instruction: instruction.text.clone(),
            });
            pc = instruction.next_address();
        }
        entries
    }

    /// CPU view of the full 64K address space, without side effects.
    pub fn ram(&self) -> Vec<u8> {
        let bus = self.bus.borrow();
        (0..=0xFFFF).map(|address| bus.peek_byte(address)).collect()
    }

    pub fn memory_dump(&self, start: u16, end: u16) -> String {
        hexdump(&self.ram(), start, end)
    }

    pub fn vram(&self) -> Vec<u8> {
        self.bus.borrow().vdp.vram.clone()
    }

    pub fn vram_dump(&self) -> String {
        hexdump(&self.bus.borrow().vdp.vram, 0, 0x3FFF)
    }

    pub fn save_state<W: Write>(&self, writer: W) -> Result<(), SaveStateError> {
        let bus = self.bus.borrow();
        savestate::save(writer, &self.cpu.state, &bus, self.frames)?;
        info!("[MACHINE] State saved at >{:04X}", self.cpu.pc());
        Ok(())
    }

    pub fn save_state_bytes(&self) -> Result<Vec<u8>, SaveStateError> {
        let mut bytes = Vec::new();
        self.save_state(&mut bytes)?;
        Ok(bytes)
    }

    pub fn save_state_to_file(&self, path: impl AsRef<Path>) -> Result<(), SaveStateError> {
        let file = File::create(path)?;
        self.save_state(BufWriter::new(file))
    }

    /// Replaces the running state with a saved one. On any error the machine
    /// is left exactly as it was.
    pub fn load_state<R: Read>(&mut self, reader: R) -> Result<(), SaveStateError> {
        let result = self.try_load_state(reader);
        if let Err(err) = &result {
            warn!("[MACHINE] Load failed, state unchanged: {}", err);
        }
        result
    }

    fn try_load_state<R: Read>(&mut self, reader: R) -> Result<(), SaveStateError> {
        let snapshot = Snapshot::read_from(reader)?;
        let mut bus = self.bus.borrow_mut();
        snapshot.validate(&bus)?;
        self.frames = snapshot.apply(&mut self.cpu.state, &mut bus);
        self.cpu.take_trap();
        self.resume_from = None;
        Ok(())
    }

    pub fn load_state_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), SaveStateError> {
        let file = File::open(path)?;
        self.load_state(BufReader::new(file))
    }
}

impl ReportState for Machine {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        let bus = self.bus.borrow();
        let pc = self.cpu.pc();
        let wp = self.cpu.wp();
        let mut registers = [0; 16];
        for (n, register) in registers.iter_mut().enumerate() {
            *register = bus.peek_word(wp.wrapping_add(n as u16 * 2));
        }

        Ok(InternalState {
            pc,
            wp,
            st: self.cpu.st(),
            registers,
            opcode: bus.peek_word(pc),
            cycles: self.cpu.cycles(),
        })
    }
}

#[derive(Default)]
pub struct MachineBuilder {
    config: MachineConfig,
    system_rom: Vec<u8>,
    system_grom: Vec<u8>,
    cartridge: Option<Cartridge>,
    cartridge_grom: Option<Vec<u8>>,
    disk: Option<Box<dyn DiskDsr>>,
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&mut self, config: MachineConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn system_rom(&mut self, data: &[u8]) -> &mut Self {
        self.system_rom = data.to_vec();
        self
    }

    pub fn system_grom(&mut self, data: &[u8]) -> &mut Self {
        self.system_grom = data.to_vec();
        self
    }

    pub fn cartridge(&mut self, cartridge: Cartridge) -> &mut Self {
        self.cartridge = Some(cartridge);
        self
    }

    /// Loads a cartridge ROM file using the configured cartridge type, so set
    /// the config first.
    pub fn cartridge_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<&mut Self> {
        let cartridge = Cartridge::load(path, self.config.cartridge_type)?;
        self.cartridge = Some(cartridge);
        Ok(self)
    }

    pub fn cartridge_grom(&mut self, data: &[u8]) -> &mut Self {
        self.cartridge_grom = Some(data.to_vec());
        self
    }

    pub fn disk_dsr(&mut self, disk: Box<dyn DiskDsr>) -> &mut Self {
        self.disk = Some(disk);
        self
    }

    /// Assembles and resets the machine. The disk card and cartridge are
    /// moved into it.
    pub fn build(&mut self) -> Result<Machine, ConfigError> {
        self.config.validate()?;
        if self.system_rom.len() != ROM_SIZE {
            return Err(ConfigError::InvalidRomSize {
                expected: ROM_SIZE,
                found: self.system_rom.len(),
            });
        }

        let mut grom = Grom::new();
        grom.load(&self.system_grom);
        if let Some(image) = &self.cartridge_grom {
            grom.load_at(CARTRIDGE_GROM_BASE, image);
        }

        let cartridge = self.cartridge.take().unwrap_or_else(Cartridge::empty);
        let sams = Sams::new(
            self.config.pool_banks(),
            self.config.machine_type == MachineType::Sams,
        );
        let mut bus = Bus::new(&self.system_rom, grom, cartridge, sams);
        if let Some(disk) = self.disk.take() {
            bus.attach_disk(disk);
        }

        let mut machine = Machine::new(bus, self.config.clone());
        machine.reset();
        Ok(machine)
    }
}

/// One disassembled line: address, raw words and the instruction text.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramEntry {
    pub address: u16,
    pub instruction: String,
    pub data: String,
}

impl fmt::Display for ProgramEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ">{:04X}  {:<14}  {}",
            self.address, self.data, self.instruction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with(program: &[u16]) -> Vec<u8> {
        let mut rom = vec![0; ROM_SIZE];
        rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
        for (n, word) in program.iter().enumerate() {
            let offset = 0x0100 + n * 2;
            rom[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
        }
        rom
    }

    #[test]
    fn test_build_rejects_short_rom() {
        let result = MachineBuilder::new().system_rom(&[0; 16]).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRomSize { found: 16, .. })
        ));
    }

    #[test]
    fn test_reset_loads_vector_and_runs() {
        let machine = MachineBuilder::new()
            .system_rom(&rom_with(&[0x10FF]))
            .build()
            .unwrap();
        assert_eq!(machine.cpu.wp(), 0x83E0);
        assert_eq!(machine.pc(), 0x0100);
        assert!(!machine.halted());
    }

    #[test]
    fn test_breakpoint_stops_then_resumes() {
        // LI R1,>0001 ; INC R1 ; JMP $-2
        let mut machine = MachineBuilder::new()
            .system_rom(&rom_with(&[0x0201, 0x0001, 0x0581, 0x10FE]))
            .build()
            .unwrap();
        machine.add_breakpoint(0x0104);

        assert_eq!(machine.step_frame(), RunStatus::Breakpoint(0x0104));
        assert_eq!(machine.pc(), 0x0104);
        assert_eq!(machine.read_word(0x83E2), 0x0001);

        assert_eq!(machine.step_frame(), RunStatus::Breakpoint(0x0104));
        assert_eq!(machine.read_word(0x83E2), 0x0002);

        assert!(machine.remove_breakpoint(0x0104));
        assert_eq!(machine.step_frame(), RunStatus::FrameComplete);
    }

    #[test]
    fn test_program_listing() {
        let machine = MachineBuilder::new()
            .system_rom(&rom_with(&[0x0201, 0x1234, 0x10FF]))
            .build()
            .unwrap();
        let listing = machine.program(0x0100, 2);
        assert_eq!(listing[0].instruction, "LI   R1,>1234");
        assert_eq!(listing[0].data, "0201 1234");
        assert_eq!(listing[1].address, 0x0104);
        assert_eq!(listing[1].to_string(), ">0104  10FF            JMP  >0104");
    }
}
