#[cfg(test)]
mod timing_tests {
    use std::time::Duration;

    use wasm99::{
        vdp::STATUS_F, Machine, MachineBuilder, MachineConfig, RunStatus, VideoStandard,
    };

    /// JMP $ at >0100.
    fn idle_loop(standard: VideoStandard) -> Machine {
        let mut rom = vec![0; 0x2000];
        rom[0..4].copy_from_slice(&[0x83, 0xE0, 0x01, 0x00]);
        rom[0x0100..0x0102].copy_from_slice(&[0x10, 0xFF]);
        MachineBuilder::new()
            .config(MachineConfig {
                video_standard: standard,
                ..Default::default()
            })
            .system_rom(&rom)
            .build()
            .unwrap()
    }

    #[test]
    fn test_ntsc_frame_length() {
        let mut machine = idle_loop(VideoStandard::Ntsc);
        assert_eq!(machine.step_frame(), RunStatus::FrameComplete);

        // each JMP is 10 clocks, so the frame overshoots by less than one
        let cycles = machine.cpu.cycles();
        assert!((50_042..50_052).contains(&cycles), "cycles: {}", cycles);
        assert_eq!(machine.clock.frame_count(), 1);
    }

    #[test]
    fn test_pal_frame_length() {
        let mut machine = idle_loop(VideoStandard::Pal);
        machine.step_frame();

        let cycles = machine.cpu.cycles();
        assert!((60_096..60_106).contains(&cycles), "cycles: {}", cycles);
    }

    #[test]
    fn test_vblank_raises_frame_flag() {
        let mut machine = idle_loop(VideoStandard::Ntsc);
        machine.step_frame();

        let bus = machine.bus.borrow();
        assert!(bus.vdp.status & STATUS_F != 0);
        // interrupts are disabled in VDP register 1, so the 9901 stays quiet
        assert!(!bus.tms9901.interrupt_line());
    }

    #[test]
    fn test_frame_counters() {
        let mut machine = idle_loop(VideoStandard::Ntsc);
        for _ in 0..3 {
            machine.step_frame();
        }
        assert_eq!(machine.frames.emulated, 3);
        assert_eq!(machine.frames.timing, 3);
    }

    #[test]
    fn test_cycle_budget() {
        let mut machine = idle_loop(VideoStandard::Ntsc);
        assert_eq!(machine.step_for(1000), RunStatus::CyclesElapsed);
        assert_eq!(machine.cpu.cycles(), 1000);
        assert!(!machine.frame_ready);
    }

    #[test]
    fn test_host_pacing() {
        let ntsc = idle_loop(VideoStandard::Ntsc);
        let pal = idle_loop(VideoStandard::Pal);

        assert_eq!(ntsc.frame_duration(100), Duration::from_micros(16_682));
        assert_eq!(ntsc.frame_duration(130), Duration::from_micros(12_833));
        assert_eq!(pal.frame_duration(100), Duration::from_micros(20_043));
    }
}
