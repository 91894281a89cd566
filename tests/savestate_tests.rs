use tracing_subscriber::fmt;
use wasm99::{
    savestate::SAVE_VERSION, tms9901::Pin, Bus, DiskDsr, Machine, MachineBuilder, MachineConfig,
    MachineType, SaveStateError,
};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

const SAMS_CRU: u16 = 0x0F00;

/// INC R1 ; JMP $-2 at >0100, so the state moves every frame.
fn machine_with(machine_type: MachineType) -> Machine {
    let mut rom = vec![0; 0x2000];
    rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
    rom[0x0100..0x0104].copy_from_slice(&[0x05, 0x81, 0x10, 0xFE]);
    MachineBuilder::new()
        .config(MachineConfig {
            machine_type,
            sams_banks: 128,
            ..Default::default()
        })
        .system_rom(&rom)
        .build()
        .unwrap()
}

struct EchoDisk;

impl DiskDsr for EchoDisk {
    fn read_byte(&mut self, address: u16) -> u8 {
        (address & 0xFF) as u8
    }

    fn write_byte(&mut self, _address: u16, _value: u8) {}
}

/// Saves `machine` after `corrupt` has scribbled over its live state.
fn save_with(machine: &Machine, corrupt: impl FnOnce(&mut Bus)) -> Vec<u8> {
    corrupt(&mut *machine.bus.borrow_mut());
    machine.save_state_bytes().unwrap()
}

/// Maps bank `bank` at >A000 and fills part of it.
fn scribble(machine: &mut Machine, bank: u8, fill: u8) {
    machine.write_cru(SAMS_CRU, 2, 3);
    machine.write_word(0x4014, (bank as u16) << 8);
    for offset in (0..0x0400).step_by(3) {
        machine.write_byte(0xA000 + offset, fill);
    }
}

#[test]
fn test_round_trip_restores_everything() {
    let mut machine = machine_with(MachineType::Sams);
    scribble(&mut machine, 0x45, 0xA5);
    machine.write_byte(0x8C02, 0x00);
    machine.write_byte(0x8C02, 0x40);
    machine.write_byte(0x8C00, 0x77);
    machine.step_frame();
    machine.step_frame();

    let saved = machine.save_state_bytes().unwrap();
    let cpu = machine.cpu.state.clone();
    let sams = machine.bus.borrow().sams.clone();
    let tms9901 = machine.bus.borrow().tms9901.clone();
    let frames = machine.frames;

    scribble(&mut machine, 0x46, 0x5A);
    machine.step_frame();
    assert_ne!(machine.cpu.state, cpu);

    machine.load_state(saved.as_slice()).unwrap();

    assert_eq!(machine.cpu.state, cpu);
    assert_eq!(machine.frames, frames);
    let bus = machine.bus.borrow();
    assert_eq!(bus.sams, sams);
    assert_eq!(bus.sams.pool(), sams.pool());
    assert_eq!(bus.tms9901, tms9901);
    assert_eq!(bus.vdp.vram[0], 0x77);
}

#[test]
fn test_all_zero_pool_round_trip() {
    let mut machine = machine_with(MachineType::Sams);
    let saved = machine.save_state_bytes().unwrap();

    scribble(&mut machine, 0x10, 0xFF);
    machine.load_state(saved.as_slice()).unwrap();

    let bus = machine.bus.borrow();
    assert!(bus.sams.pool().iter().all(|byte| *byte == 0));
    assert_eq!(bus.sams.pool_size(), 128 * 4096);
}

#[test]
fn test_version_mismatch_leaves_state_intact() {
    let mut machine = machine_with(MachineType::Sams);
    scribble(&mut machine, 0x20, 0x11);
    let mut saved = machine.save_state_bytes().unwrap();
    saved[0..2].copy_from_slice(&(SAVE_VERSION + 1).to_le_bytes());

    machine.step_frame();
    let cpu = machine.cpu.state.clone();
    let sams = machine.bus.borrow().sams.clone();

    let result = machine.load_state(saved.as_slice());
    assert!(matches!(
        result,
        Err(SaveStateError::VersionMismatch { found, expected })
            if found == SAVE_VERSION + 1 && expected == SAVE_VERSION
    ));
    assert_eq!(machine.cpu.state, cpu);
    assert_eq!(machine.bus.borrow().sams, sams);
}

#[test]
fn test_truncated_save_is_rejected() {
    let mut machine = machine_with(MachineType::Sams);
    let saved = machine.save_state_bytes().unwrap();
    machine.step_frame();
    let cpu = machine.cpu.state.clone();

    let result = machine.load_state(&saved[..saved.len() - 4]);
    assert!(result.is_err());
    assert_eq!(machine.cpu.state, cpu);
}

#[test]
fn test_save_from_other_configuration_is_rejected() {
    let sams_machine = machine_with(MachineType::Sams);
    let saved = sams_machine.save_state_bytes().unwrap();

    let mut plain = machine_with(MachineType::Standard32K);
    let result = plain.load_state(saved.as_slice());
    assert!(matches!(result, Err(SaveStateError::ConfigMismatch(_))));
}

#[test]
fn test_file_round_trip() {
    let path = std::env::temp_dir().join(format!("wasm99-{}.sav", std::process::id()));
    let mut machine = machine_with(MachineType::Standard32K);
    machine.step_frame();
    machine.save_state_to_file(&path).unwrap();
    let pc = machine.pc();
    let r1 = machine.read_word(0x83E2);

    machine.reset();
    machine.load_state_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(machine.pc(), pc);
    assert_eq!(machine.read_word(0x83E2), r1);
}

#[test]
fn test_out_of_range_fields_are_rejected() {
    let corruptions: [fn(&mut Bus); 5] = [
        |bus| bus.sams.region_bank[10] = 200,
        |bus| bus.sams.region_bank[0] = 3,
        |bus| bus.vdp.address = 0xFFFF,
        |bus| bus.tms9901.column_select = 9,
        |bus| bus.tms9901.column_select = 0xFF,
    ];

    for corrupt in corruptions {
        let source = machine_with(MachineType::Sams);
        let saved = save_with(&source, corrupt);

        let mut machine = machine_with(MachineType::Sams);
        scribble(&mut machine, 0x30, 0x42);
        machine.step_frame();
        let cpu = machine.cpu.state.clone();
        let sams = machine.bus.borrow().sams.clone();

        let result = machine.load_state(saved.as_slice());
        assert!(
            matches!(result, Err(SaveStateError::Corrupt(_))),
            "{:?}",
            result
        );
        assert_eq!(machine.cpu.state, cpu);
        assert_eq!(machine.bus.borrow().sams, sams);

        // the machine keeps running on its own state
        assert_eq!(machine.read_byte(0xA000), 0x42);
        assert_eq!(machine.read_byte(0x8800), 0);
        machine.step_frame();
    }
}

#[test]
fn test_interrupt_counters_follow_restored_pins() {
    let source = machine_with(MachineType::Standard32K);
    let saved = save_with(&source, |bus| {
        bus.tms9901.pins[1] = Pin {
            requested: true,
            enabled: true,
        };
        bus.tms9901.active_interrupts = 0;
        bus.tms9901.interrupt_requested = 0;
    });

    let mut machine = machine_with(MachineType::Standard32K);
    machine.load_state(saved.as_slice()).unwrap();
    {
        let bus = machine.bus.borrow();
        assert_eq!(bus.tms9901.active_interrupts, 1);
        assert_eq!(bus.tms9901.interrupt_requested, 1);
        assert!(bus.tms9901.interrupt_line());
    }

    machine.clear_interrupt(1);
    let bus = machine.bus.borrow();
    assert!(!bus.tms9901.interrupt_line());
    assert_eq!(bus.tms9901.interrupt_requested, 0);
}

#[test]
fn test_disk_window_is_restored() {
    let mut rom = vec![0; 0x2000];
    rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
    let mut machine = MachineBuilder::new()
        .system_rom(&rom)
        .disk_dsr(Box::new(EchoDisk))
        .build()
        .unwrap();

    machine.write_cru(0x0880, 1, 1);
    assert_eq!(machine.read_byte(0x4042), 0x42);
    let saved = machine.save_state_bytes().unwrap();

    machine.write_cru(0x0880, 1, 0);
    assert_eq!(machine.read_byte(0x4042), 0);

    machine.load_state(saved.as_slice()).unwrap();
    assert!(machine.bus.borrow().disk_enabled());
    assert_eq!(machine.read_byte(0x4042), 0x42);
}
