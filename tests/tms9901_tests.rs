use tracing_subscriber::fmt;
use wasm99::{
    tms9901::{INT_TIMER, INT_VDP, TIMER_PRESCALE},
    Key, Machine, MachineBuilder, TMS9901,
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

fn machine() -> Machine {
    let mut rom = vec![0; 0x2000];
    rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
    MachineBuilder::new().system_rom(&rom).build().unwrap()
}

/// Loads `reload` into the clock register and goes back to I/O mode, which
/// starts the decrementer at `clock`.
fn program_timer(tms9901: &mut TMS9901, reload: u16, clock: u64) {
    tms9901.write_bit(0, true, clock);
    for bit in 1..=14 {
        tms9901.write_bit(bit, (reload >> (bit - 1)) & 1 != 0, clock);
    }
    tms9901.write_bit(0, false, clock);
}

fn read_counter(tms9901: &mut TMS9901, clock: u64) -> u16 {
    tms9901.write_bit(0, true, clock);
    (1..=14).fold(0, |value, bit| {
        value | ((tms9901.read_bit(bit, clock) as u16) << (bit - 1))
    })
}

#[test]
fn test_timer_reaches_zero_after_reload_periods() {
    let mut machine = machine();
    let base = machine.cpu.cycles();
    let mut bus = machine.bus.borrow_mut();

    program_timer(&mut bus.tms9901, 100, base);
    bus.tms9901.update_timer(base + 99 * TIMER_PRESCALE);
    assert!(!bus.tms9901.is_requested(INT_TIMER));
    assert_eq!(bus.tms9901.decrementer, 1);

    bus.tms9901.update_timer(base + 100 * TIMER_PRESCALE);
    assert!(bus.tms9901.is_requested(INT_TIMER));
    assert_eq!(bus.tms9901.decrementer, 100);
    assert_eq!(bus.tms9901.interrupt_requested, 1);
}

#[test]
fn test_counter_read_back() {
    let mut tms9901 = TMS9901::new();
    program_timer(&mut tms9901, 100, 0);

    assert_eq!(read_counter(&mut tms9901, 40 * TIMER_PRESCALE), 60);
    assert!(!tms9901.is_requested(INT_TIMER));
}

#[test]
fn test_timer_interrupt_raised_once() {
    let mut tms9901 = TMS9901::new();
    program_timer(&mut tms9901, 10, 0);

    tms9901.update_timer(10 * TIMER_PRESCALE);
    tms9901.update_timer(20 * TIMER_PRESCALE + 5);
    assert_eq!(tms9901.interrupt_requested, 1);

    // writing the timer mask bit acknowledges the tick
    tms9901.write_bit(INT_TIMER as u16, true, 20 * TIMER_PRESCALE + 5);
    assert!(!tms9901.is_requested(INT_TIMER));
    assert_eq!(tms9901.interrupt_requested, 0);
}

#[test]
fn test_interrupt_line_counts_each_level_once() {
    let mut tms9901 = TMS9901::new();
    tms9901.write_bit(INT_VDP as u16, true, 0);

    tms9901.raise_interrupt(INT_VDP);
    tms9901.raise_interrupt(INT_VDP);
    assert!(tms9901.interrupt_line());
    assert_eq!(tms9901.active_interrupts, 1);

    tms9901.clear_interrupt(INT_VDP);
    assert!(!tms9901.interrupt_line());
    tms9901.clear_interrupt(INT_VDP);
    assert_eq!(tms9901.active_interrupts, 0);
}

#[test]
fn test_masked_pin_does_not_assert_line() {
    let mut tms9901 = TMS9901::new();
    tms9901.raise_interrupt(INT_VDP);
    assert!(!tms9901.interrupt_line());

    tms9901.write_bit(INT_VDP as u16, true, 0);
    assert!(tms9901.interrupt_line());
    tms9901.write_bit(INT_VDP as u16, false, 0);
    assert!(!tms9901.interrupt_line());
}

#[test]
fn test_keyboard_scan_through_cru() {
    let mut machine = machine();
    machine.press_key(Key::Enter);

    // column 0 selected by bits 18-20, Enter is on input line 5
    machine.write_cru(18, 3, 0);
    let rows = machine.read_cru(3, 8);
    assert_eq!(rows & 0x04, 0, "Enter reads low");
    assert_eq!(rows & 0xFB, 0xFB);

    machine.release_key(Key::Enter);
    assert_eq!(machine.read_cru(3, 8), 0xFF);
}

#[test]
fn test_unclaimed_cru_reads_high() {
    let mut machine = machine();
    assert_eq!(machine.read_cru(0x0900, 16), 0xFFFF);
}
