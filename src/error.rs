use thiserror::Error;

/// Conditions raised by guest code that the CPU survives. They are recorded
/// and logged, then execution carries on with the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("invalid opcode >{opcode:04X} at >{pc:04X}")]
    InvalidOpcode { pc: u16, opcode: u16 },

    #[error("unsupported extended operation {mnemonic} (>{opcode:04X}) at >{pc:04X}")]
    UnsupportedExtendedOperation {
        pc: u16,
        opcode: u16,
        mnemonic: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("save state version {found:#06X} does not match {expected:#06X}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("save state I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("save state encoding failure: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("corrupt save state: {0}")]
    Corrupt(String),

    #[error("save state does not match this machine: {0}")]
    ConfigMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("SAMS bank count {0} must be a power of two between 16 and 256")]
    InvalidBankCount(usize),

    #[error("system ROM must be {expected} bytes, got {found}")]
    InvalidRomSize { expected: usize, found: usize },
}
