use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

/// Keys of the console keyboard, plus alpha lock which is wired to its own
/// input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Equals,
    Period,
    Comma,
    Slash,
    Semicolon,
    Space,
    Enter,
    Shift,
    Ctrl,
    Fctn,
    AlphaLock,
}

pub const KEY_COUNT: usize = Key::AlphaLock as usize + 1;

/// Keyboard matrix as seen through the 9901: eight rows (input lines 3-10)
/// by six columns (the column select latch).
pub const KEY_MATRIX: [[Option<Key>; 6]; 8] = [
    [
        Some(Key::Equals),
        Some(Key::Period),
        Some(Key::Comma),
        Some(Key::M),
        Some(Key::N),
        Some(Key::Slash),
    ],
    [
        Some(Key::Space),
        Some(Key::L),
        Some(Key::K),
        Some(Key::J),
        Some(Key::H),
        Some(Key::Semicolon),
    ],
    [
        Some(Key::Enter),
        Some(Key::O),
        Some(Key::I),
        Some(Key::U),
        Some(Key::Y),
        Some(Key::P),
    ],
    [
        None,
        Some(Key::D9),
        Some(Key::D8),
        Some(Key::D7),
        Some(Key::D6),
        Some(Key::D0),
    ],
    [
        Some(Key::Fctn),
        Some(Key::D2),
        Some(Key::D3),
        Some(Key::D4),
        Some(Key::D5),
        Some(Key::D1),
    ],
    [
        Some(Key::Shift),
        Some(Key::S),
        Some(Key::D),
        Some(Key::F),
        Some(Key::G),
        Some(Key::A),
    ],
    [
        Some(Key::Ctrl),
        Some(Key::W),
        Some(Key::E),
        Some(Key::R),
        Some(Key::T),
        Some(Key::Q),
    ],
    [
        None,
        Some(Key::X),
        Some(Key::C),
        Some(Key::V),
        Some(Key::B),
        Some(Key::Z),
    ],
];

/// Press/release table indexed by key, with a nesting counter that lets the
/// host press a key combination without the guest seeing the shift key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyboard {
    #[serde(with = "BigArray")]
    state: [u8; KEY_COUNT],
    hide_shift: u8,
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard {
            state: [0; KEY_COUNT],
            hide_shift: 0,
        }
    }
}

impl Keyboard {
    pub fn new() -> Self {
        Keyboard::default()
    }

    pub fn reset(&mut self) {
        self.state = [0; KEY_COUNT];
        self.hide_shift = 0;
    }

    pub fn press(&mut self, key: Key) {
        let slot = &mut self.state[key as usize];
        *slot = slot.saturating_add(1);
    }

    pub fn release(&mut self, key: Key) {
        let slot = &mut self.state[key as usize];
        *slot = slot.saturating_sub(1);
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.state[key as usize] != 0
    }

    pub fn hide_shift(&mut self) {
        self.hide_shift = self.hide_shift.saturating_add(1);
    }

    pub fn unhide_shift(&mut self) {
        self.hide_shift = self.hide_shift.saturating_sub(1);
    }

    pub fn shift_hidden(&self) -> bool {
        self.hide_shift != 0
    }

    /// Host key code (DOM `KeyboardEvent.code`). Returns false for codes with
    /// no console equivalent.
    pub fn key_down(&mut self, code: &str) -> bool {
        let Some(mapping) = find_mapping(code) else {
            return false;
        };
        if mapping.hide_shift {
            self.hide_shift();
        }
        mapping.keys.iter().for_each(|key| self.press(*key));
        true
    }

    pub fn key_up(&mut self, code: &str) -> bool {
        let Some(mapping) = find_mapping(code) else {
            return false;
        };
        mapping.keys.iter().for_each(|key| self.release(*key));
        if mapping.hide_shift {
            self.unhide_shift();
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    code: &'static str,
    keys: &'static [Key],
    hide_shift: bool,
}

const fn plain(code: &'static str, keys: &'static [Key]) -> Mapping {
    Mapping {
        code,
        keys,
        hide_shift: false,
    }
}

const fn unshifted(code: &'static str, keys: &'static [Key]) -> Mapping {
    Mapping {
        code,
        keys,
        hide_shift: true,
    }
}

fn find_mapping(code: &str) -> Option<&'static Mapping> {
    HOST_MAPPINGS.iter().find(|mapping| mapping.code == code)
}

const HOST_MAPPINGS: [Mapping; 59] = [
    plain("Digit0", &[Key::D0]),
    plain("Digit1", &[Key::D1]),
    plain("Digit2", &[Key::D2]),
    plain("Digit3", &[Key::D3]),
    plain("Digit4", &[Key::D4]),
    plain("Digit5", &[Key::D5]),
    plain("Digit6", &[Key::D6]),
    plain("Digit7", &[Key::D7]),
    plain("Digit8", &[Key::D8]),
    plain("Digit9", &[Key::D9]),
    plain("KeyA", &[Key::A]),
    plain("KeyB", &[Key::B]),
    plain("KeyC", &[Key::C]),
    plain("KeyD", &[Key::D]),
    plain("KeyE", &[Key::E]),
    plain("KeyF", &[Key::F]),
    plain("KeyG", &[Key::G]),
    plain("KeyH", &[Key::H]),
    plain("KeyI", &[Key::I]),
    plain("KeyJ", &[Key::J]),
    plain("KeyK", &[Key::K]),
    plain("KeyL", &[Key::L]),
    plain("KeyM", &[Key::M]),
    plain("KeyN", &[Key::N]),
    plain("KeyO", &[Key::O]),
    plain("KeyP", &[Key::P]),
    plain("KeyQ", &[Key::Q]),
    plain("KeyR", &[Key::R]),
    plain("KeyS", &[Key::S]),
    plain("KeyT", &[Key::T]),
    plain("KeyU", &[Key::U]),
    plain("KeyV", &[Key::V]),
    plain("KeyW", &[Key::W]),
    plain("KeyX", &[Key::X]),
    plain("KeyY", &[Key::Y]),
    plain("KeyZ", &[Key::Z]),
    plain("Equal", &[Key::Equals]),
    plain("Period", &[Key::Period]),
    plain("Comma", &[Key::Comma]),
    plain("Slash", &[Key::Slash]),
    plain("Semicolon", &[Key::Semicolon]),
    plain("Space", &[Key::Space]),
    plain("Enter", &[Key::Enter]),
    plain("NumpadEnter", &[Key::Enter]),
    plain("ShiftLeft", &[Key::Shift]),
    plain("ShiftRight", &[Key::Shift]),
    plain("ControlLeft", &[Key::Ctrl]),
    plain("ControlRight", &[Key::Ctrl]),
    plain("AltLeft", &[Key::Fctn]),
    plain("AltRight", &[Key::Fctn]),
    plain("CapsLock", &[Key::AlphaLock]),
    // Editing keys are FCTN combinations on the console.
    plain("ArrowUp", &[Key::Fctn, Key::E]),
    plain("ArrowDown", &[Key::Fctn, Key::X]),
    plain("ArrowLeft", &[Key::Fctn, Key::S]),
    plain("ArrowRight", &[Key::Fctn, Key::D]),
    plain("Backspace", &[Key::Fctn, Key::S]),
    plain("Escape", &[Key::Fctn, Key::D9]),
    plain("Delete", &[Key::Fctn, Key::D1]),
    unshifted("Quote", &[Key::Fctn, Key::O]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_covers_every_key_once() {
        let mut seen = Vec::new();
        for row in KEY_MATRIX.iter() {
            for key in row.iter().flatten() {
                assert!(!seen.contains(key), "{:?} appears twice", key);
                seen.push(*key);
            }
        }
        // every key except alpha lock lives in the matrix
        assert_eq!(seen.len(), KEY_COUNT - 1);
    }

    #[test]
    fn test_compound_key() {
        let mut keyboard = Keyboard::new();
        assert!(keyboard.key_down("ArrowUp"));
        assert!(keyboard.is_pressed(Key::Fctn));
        assert!(keyboard.is_pressed(Key::E));

        keyboard.key_up("ArrowUp");
        assert!(!keyboard.is_pressed(Key::Fctn));
        assert!(!keyboard.is_pressed(Key::E));
    }

    #[test]
    fn test_overlapping_presses_are_counted() {
        let mut keyboard = Keyboard::new();
        keyboard.key_down("AltLeft");
        keyboard.key_down("ArrowLeft");
        keyboard.key_up("ArrowLeft");

        assert!(keyboard.is_pressed(Key::Fctn));
        assert!(!keyboard.is_pressed(Key::S));
    }

    #[test]
    fn test_hide_shift_nests() {
        let mut keyboard = Keyboard::new();
        keyboard.hide_shift();
        keyboard.hide_shift();
        keyboard.unhide_shift();
        assert!(keyboard.shift_hidden());

        keyboard.unhide_shift();
        keyboard.unhide_shift();
        assert!(!keyboard.shift_hidden());
    }

    #[test]
    fn test_unknown_code() {
        let mut keyboard = Keyboard::new();
        assert!(!keyboard.key_down("F13"));
    }
}
