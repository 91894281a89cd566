use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cpu::{ST_AGT, ST_C, ST_EQ, ST_LGT, ST_OP, ST_OV, ST_X};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub pc: u16,
    pub wp: u16,
    pub st: u16,
    pub registers: [u16; 16],

    /// Word at PC, the next instruction to run.
    pub opcode: u16,
    pub cycles: u64,
}

impl fmt::Display for InternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |mask: u16, name: char| if self.st & mask != 0 { name } else { '-' };
        let flags: String = [
            flag(ST_LGT, 'L'),
            flag(ST_AGT, 'A'),
            flag(ST_EQ, 'E'),
            flag(ST_C, 'C'),
            flag(ST_OV, 'O'),
            flag(ST_OP, 'P'),
            flag(ST_X, 'X'),
        ]
        .iter()
        .collect();

        write!(
            f,
            ">{:04X} >{:04X} - WP: >{:04X} ST: >{:04X} {} I{} -",
            self.pc,
            self.opcode,
            self.wp,
            self.st,
            flags,
            self.st & 0x0F
        )?;
        for (n, value) in self.registers.iter().enumerate() {
            write!(f, " R{}:{:04X}", n, value)?;
        }
        Ok(())
    }
}

pub trait ReportState {
    fn report_state(&mut self) -> anyhow::Result<InternalState>;
}
