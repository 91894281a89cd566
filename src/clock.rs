use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The VDP raises its frame flag when the beam leaves the 192 visible lines.
pub const VBLANK_START_LINE: u32 = 192;

/// Host pacing is counted in ticks of this clock.
const PACING_TICK_HZ: u64 = 32_728;
/// Frame length in pacing ticks at 100, 110, 120 and 130 percent speed.
const NTSC_FRAME_TICKS: [u32; 4] = [546, 496, 454, 420];
const PAL_FRAME_TICKS: [u32; 4] = [656, 596, 546, 504];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoStandard {
    #[default]
    Ntsc,
    Pal,
}

impl VideoStandard {
    pub fn scanlines_per_frame(self) -> u32 {
        match self {
            VideoStandard::Ntsc => 262,
            VideoStandard::Pal => 313,
        }
    }

    pub fn cycles_per_scanline(self) -> u32 {
        match self {
            VideoStandard::Ntsc => 191,
            VideoStandard::Pal => 192,
        }
    }

    pub fn cycles_per_frame(self) -> u32 {
        self.scanlines_per_frame() * self.cycles_per_scanline()
    }

    /// Frame length in pacing ticks. The four calibrated speeds come from a
    /// table; anything else is scaled from the 100% figure.
    pub fn frame_ticks(self, speed_percent: u32) -> u32 {
        let table = match self {
            VideoStandard::Ntsc => &NTSC_FRAME_TICKS,
            VideoStandard::Pal => &PAL_FRAME_TICKS,
        };
        match speed_percent {
            100 => table[0],
            110 => table[1],
            120 => table[2],
            130 => table[3],
            speed => table[0] * 100 / speed.max(1),
        }
    }

    pub fn frame_duration(self, speed_percent: u32) -> Duration {
        let ticks = self.frame_ticks(speed_percent) as u64;
        Duration::from_micros(ticks * 1_000_000 / PACING_TICK_HZ)
    }
}

/// Beam events produced while advancing the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    VBlankStart,
    VBlankEnd,
    ScanlineStart(u32),
    FrameEnd,
}

/// Turns CPU clocks into beam position. The CPU is the master clock; the VDP
/// only ever sees whole scanlines.
#[derive(Debug, Clone)]
pub struct Clock {
    standard: VideoStandard,
    elapsed: u64,
    line: u32,
    line_clocks: u32,
    frames: u64,
    in_vblank: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(VideoStandard::default())
    }
}

impl Clock {
    pub fn new(standard: VideoStandard) -> Self {
        Self {
            standard,
            elapsed: 0,
            line: 0,
            line_clocks: 0,
            frames: 0,
            in_vblank: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.standard);
    }

    pub fn tick(&mut self, cycles: u32) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        let per_line = self.standard.cycles_per_scanline();
        let lines = self.standard.scanlines_per_frame();

        self.elapsed += cycles as u64;
        self.line_clocks += cycles;

        while self.line_clocks >= per_line {
            self.line_clocks -= per_line;
            self.line += 1;

            if self.line == VBLANK_START_LINE && !self.in_vblank {
                self.in_vblank = true;
                events.push(ClockEvent::VBlankStart);
            }
            if self.line >= lines {
                self.line = 0;
                self.frames += 1;
                if std::mem::take(&mut self.in_vblank) {
                    events.push(ClockEvent::VBlankEnd);
                }
                events.push(ClockEvent::FrameEnd);
            }
            events.push(ClockEvent::ScanlineStart(self.line));
        }

        events
    }

    pub fn current_scanline(&self) -> u32 {
        self.line
    }

    pub fn total_cycles(&self) -> u64 {
        self.elapsed
    }

    pub fn is_vblank(&self) -> bool {
        self.in_vblank
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}
