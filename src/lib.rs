pub mod bus;
pub mod cartridge;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod error;
pub mod grom;
pub mod instruction;
pub mod internal_state;
pub mod io;
pub mod keyboard;
pub mod machine;
pub mod memory;
pub mod opcodes;
pub mod sams;
pub mod savestate;
pub mod sound;
pub mod tms9901;
pub mod utils;
pub mod vdp;

pub use bus::{Bus, DiskDsr};
pub use cartridge::{Cartridge, CartridgeType};
pub use clock::VideoStandard;
pub use config::{MachineConfig, MachineType};
pub use cpu::{CpuIo, CpuState, RunState, TMS9900};
pub use error::{ConfigError, SaveStateError, Trap};
pub use instruction::Instruction;
pub use internal_state::{InternalState, ReportState};
pub use keyboard::Key;
pub use machine::{Machine, MachineBuilder, ProgramEntry, RunStatus};
pub use memory::{MemoryMap, MemoryType};
pub use sams::Sams;
pub use tms9901::TMS9901;
pub use utils::hexdump;
pub use vdp::TMS9918;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wasm_bindgen::prelude::*;

/// Installs a stderr subscriber for native hosts. `filter` uses the
/// `RUST_LOG` syntax, e.g. `"wasm99=debug"`.
pub fn init_logging(filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn get_machine(rom: &[u8], grom: &[u8]) -> Result<Machine, ConfigError> {
    MachineBuilder::new().system_rom(rom).system_grom(grom).build()
}

#[wasm_bindgen(js_name = Machine)]
pub struct JsMachine(Machine);

#[wasm_bindgen(js_class = Machine)]
impl JsMachine {
    #[wasm_bindgen(constructor)]
    pub fn new(rom: &[u8], grom: &[u8]) -> Result<JsMachine, JsValue> {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();

        get_machine(rom, grom)
            .map(Self)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    #[wasm_bindgen(getter)]
    pub fn pc(&self) -> u16 {
        self.0.pc()
    }

    #[wasm_bindgen(getter)]
    pub fn ram(&self) -> Vec<u8> {
        self.0.ram()
    }

    #[wasm_bindgen(getter)]
    pub fn vram(&self) -> Vec<u8> {
        self.0.vram()
    }

    /// Returns true when a frame finished, false on a breakpoint or halt.
    #[wasm_bindgen(js_name = stepFrame)]
    pub fn step_frame(&mut self) -> bool {
        self.0.step_frame() == RunStatus::FrameComplete
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, code: &str) -> bool {
        self.0.key_down(code)
    }

    #[wasm_bindgen(js_name = keyUp)]
    pub fn key_up(&mut self, code: &str) -> bool {
        self.0.key_up(code)
    }

    #[wasm_bindgen(js_name = soundWrites)]
    pub fn sound_writes(&mut self) -> Vec<u8> {
        self.0.take_sound_writes()
    }

    /// Milliseconds the host should spend on one frame at normal speed.
    #[wasm_bindgen(getter, js_name = frameMillis)]
    pub fn frame_millis(&self) -> f64 {
        self.0.frame_duration(100).as_secs_f64() * 1000.0
    }

    #[wasm_bindgen(js_name = saveState)]
    pub fn save_state(&self) -> Result<Vec<u8>, JsValue> {
        self.0
            .save_state_bytes()
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    #[wasm_bindgen(js_name = loadState)]
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), JsValue> {
        self.0
            .load_state(data)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    #[wasm_bindgen(getter)]
    pub fn state(&mut self) -> Result<String, JsValue> {
        let state = self
            .0
            .report_state()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        serde_json::to_string(&state).map_err(|err| JsValue::from_str(&err.to_string()))
    }
}
