use tracing_subscriber::fmt;
use wasm99::{
    cpu::{ST_AGT, ST_C, ST_EQ, ST_LGT, ST_OV, ST_X},
    Machine, MachineBuilder, RunStatus, Trap,
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

const WP: u16 = 0x83E0;

/// Console ROM with the reset vector pointing at >0100 and `blocks` copied in
/// at their addresses.
fn machine_with(blocks: &[(u16, &[u16])]) -> Machine {
    let mut rom = vec![0; 0x2000];
    rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
    for (base, words) in blocks {
        for (n, word) in words.iter().enumerate() {
            let offset = *base as usize + n * 2;
            rom[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
        }
    }
    MachineBuilder::new().system_rom(&rom).build().unwrap()
}

fn register(machine: &mut Machine, n: u16) -> u16 {
    let wp = machine.cpu.wp();
    machine.read_word(wp + n * 2)
}

#[test]
fn test_blwp_rtwp_restores_context() {
    for new_wp in [0x2000, 0x8300, 0xB000, 0xFFE0] {
        let mut machine = machine_with(&[]);
        // BLWP @>A100 at >A000, vector at >A100, RTWP at >A200
        machine.write_word(0xA000, 0x0420);
        machine.write_word(0xA002, 0xA100);
        machine.write_word(0xA100, new_wp);
        machine.write_word(0xA102, 0xA200);
        machine.write_word(0xA200, 0x0380);

        machine.cpu.set_pc(0xA000);
        machine.cpu.set_wp(WP);
        machine.cpu.set_st(0xC000);

        machine.step();
        assert_eq!(machine.cpu.wp(), new_wp);
        assert_eq!(machine.pc(), 0xA200);
        assert_eq!(register(&mut machine, 13), WP);
        assert_eq!(register(&mut machine, 14), 0xA004);
        assert_eq!(register(&mut machine, 15), 0xC000);

        machine.step();
        assert_eq!(machine.cpu.wp(), WP, "WP after RTWP from >{:04X}", new_wp);
        assert_eq!(machine.pc(), 0xA004);
        assert_eq!(machine.cpu.st(), 0xC000);
    }
}

#[test]
fn test_compare_logical_and_arithmetic_independently() {
    // LI R1,>8000 ; LI R2,>0001 ; C R1,R2
    let mut machine = machine_with(&[(0x0100, &[0x0201, 0x8000, 0x0202, 0x0001, 0x8081])]);
    for _ in 0..3 {
        machine.step();
    }
    let st = machine.cpu.st();
    assert!(st & ST_LGT != 0, "unsigned >8000 is greater");
    assert!(st & ST_AGT == 0, "signed >8000 is less");
    assert!(st & ST_EQ == 0);
}

#[test]
fn test_div_and_overflow() {
    // LI R2,0 ; LI R3,7 ; LI R1,2 ; DIV R1,R2 ; CLR R1 ; DIV R1,R2
    let mut machine = machine_with(&[(
        0x0100,
        &[
            0x0202, 0x0000, 0x0203, 0x0007, 0x0201, 0x0002, 0x3C81, 0x04C1, 0x3C81,
        ],
    )]);
    for _ in 0..3 {
        machine.step();
    }
    assert_eq!(machine.step(), 124);
    assert_eq!(register(&mut machine, 2), 3);
    assert_eq!(register(&mut machine, 3), 1);
    assert!(machine.cpu.st() & ST_OV == 0);

    machine.step();
    assert_eq!(machine.step(), 16);
    assert!(machine.cpu.st() & ST_OV != 0);
    assert_eq!(register(&mut machine, 2), 3);
    assert_eq!(register(&mut machine, 3), 1);
}

#[test]
fn test_mpy() {
    // LI R1,>1000 ; LI R2,>0100 ; MPY R1,R2
    let mut machine = machine_with(&[(0x0100, &[0x0201, 0x1000, 0x0202, 0x0100, 0x3881])]);
    for _ in 0..3 {
        machine.step();
    }
    assert_eq!(register(&mut machine, 2), 0x0010);
    assert_eq!(register(&mut machine, 3), 0x0000);
}

#[test]
fn test_shifts() {
    // LI R1,>4000 ; SLA R1,1
    let mut machine = machine_with(&[(0x0100, &[0x0201, 0x4000, 0x0A11])]);
    machine.step();
    assert_eq!(machine.step(), 12 + 2);
    assert_eq!(register(&mut machine, 1), 0x8000);
    assert!(machine.cpu.st() & ST_OV != 0);
    assert!(machine.cpu.st() & ST_C == 0);

    // LI R1,>8000 ; SRA R1,4
    let mut machine = machine_with(&[(0x0100, &[0x0201, 0x8000, 0x0841])]);
    machine.step();
    machine.step();
    assert_eq!(register(&mut machine, 1), 0xF800);
    assert!(machine.cpu.st() & ST_C == 0);

    // LI R1,1 ; SRL R1,1
    let mut machine = machine_with(&[(0x0100, &[0x0201, 0x0001, 0x0911])]);
    machine.step();
    machine.step();
    assert_eq!(register(&mut machine, 1), 0);
    assert!(machine.cpu.st() & ST_C != 0);
    assert!(machine.cpu.st() & ST_EQ != 0);
}

#[test]
fn test_xop_switches_through_vector() {
    // XOP R5,1 with its vector at >0044
    let mut machine = machine_with(&[(0x0044, &[0x8300, 0x0300]), (0x0100, &[0x2C45])]);
    let old_st = machine.cpu.st();

    assert_eq!(machine.step(), 36);
    assert_eq!(machine.cpu.wp(), 0x8300);
    assert_eq!(machine.pc(), 0x0300);
    assert_eq!(register(&mut machine, 11), WP + 10);
    assert_eq!(register(&mut machine, 13), WP);
    assert_eq!(register(&mut machine, 14), 0x0102);
    assert_eq!(register(&mut machine, 15), old_st);
    assert!(machine.cpu.st() & ST_X != 0);
}

#[test]
fn test_invalid_opcode_continues() {
    // DATA >0000 ; LI R1,5
    let mut machine = machine_with(&[(0x0100, &[0x0000, 0x0201, 0x0005])]);
    machine.step();
    assert_eq!(
        machine.take_trap(),
        Some(Trap::InvalidOpcode {
            pc: 0x0100,
            opcode: 0
        })
    );
    machine.step();
    assert_eq!(register(&mut machine, 1), 5);
    assert_eq!(machine.trap_count(), 1);
    assert!(!machine.halted());
}

/// LI R12,0 ; SBO 2 ; LIMI mask ; JMP $ with the level 1 vector pointing at
/// a JMP $ at >0400.
fn interrupt_program(mask: u16) -> Machine {
    let mut machine = machine_with(&[
        (0x0004, &[0x8300, 0x0400]),
        (0x0100, &[0x020C, 0x0000, 0x1D02, 0x0300, mask, 0x10FF]),
        (0x0400, &[0x10FF]),
    ]);
    // VDP register 1: interrupt enable
    machine.write_byte(0x8C02, 0x20);
    machine.write_byte(0x8C02, 0x81);
    machine
}

#[test]
fn test_vdp_interrupt_is_serviced() {
    let mut machine = interrupt_program(2);
    assert_eq!(machine.step_frame(), RunStatus::FrameComplete);

    assert_eq!(machine.pc(), 0x0400);
    assert_eq!(machine.cpu.wp(), 0x8300);
    assert_eq!(machine.cpu.interrupt_mask(), 0);
    assert_eq!(register(&mut machine, 13), WP);
    assert_eq!(register(&mut machine, 14), 0x010A);
}

#[test]
fn test_masked_interrupt_is_ignored() {
    let mut machine = interrupt_program(0);
    machine.step_frame();

    assert_eq!(machine.pc(), 0x010A);
    assert_eq!(machine.cpu.wp(), WP);
    assert!(machine.bus.borrow().tms9901.interrupt_line());
}
