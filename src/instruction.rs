use std::fmt;

use crate::opcodes::{Format, Op, Opcode, OpcodeTable};

/// A decoded instruction with its operand words, rendered in TI assembler
/// syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u16,
    pub opcode: &'static Opcode,
    pub words: Vec<u16>,
    pub text: String,
}

struct Reader<'a, F: Fn(u16) -> u16> {
    peek: &'a F,
    next: u16,
    words: Vec<u16>,
}

impl<'a, F: Fn(u16) -> u16> Reader<'a, F> {
    fn word(&mut self) -> u16 {
        let word = (self.peek)(self.next);
        self.words.push(word);
        self.next = self.next.wrapping_add(2);
        word
    }

    fn general(&mut self, mode: u16, register: u16) -> String {
        match mode & 3 {
            0 => format!("R{}", register),
            1 => format!("*R{}", register),
            2 => {
                let address = self.word();
                if register == 0 {
                    format!("@>{:04X}", address)
                } else {
                    format!("@>{:04X}(R{})", address, register)
                }
            }
            _ => format!("*R{}+", register),
        }
    }
}

impl Instruction {
    /// Decodes the instruction at `pc`. `peek` must not have side effects.
    pub fn decode_at<F: Fn(u16) -> u16>(table: &OpcodeTable, peek: F, pc: u16) -> Self {
        let pc = pc & !1;
        let mut reader = Reader {
            peek: &peek,
            next: pc,
            words: Vec::with_capacity(3),
        };
        let word = reader.word();
        let opcode = table.decode(word);

        let source = |reader: &mut Reader<F>| reader.general(word >> 4, word & 0x0F);
        let operands = match opcode.format {
            Format::TwoAddress => {
                let src = source(&mut reader);
                let dst = reader.general(word >> 10, (word >> 6) & 0x0F);
                format!("{},{}", src, dst)
            }
            Format::Jump => {
                let displacement = (word as u8 as i8 as i16) << 1;
                let target = pc.wrapping_add(2).wrapping_add(displacement as u16);
                format!(">{:04X}", target)
            }
            Format::CruBit => format!("{}", word as u8 as i8),
            Format::RegisterDestination => {
                let src = source(&mut reader);
                format!("{},R{}", src, (word >> 6) & 0x0F)
            }
            Format::ExtendedOperation => {
                let src = source(&mut reader);
                format!("{},{}", src, (word >> 6) & 0x0F)
            }
            Format::CruMultiBit => {
                let src = source(&mut reader);
                let count = match (word >> 6) & 0x0F {
                    0 => 16,
                    n => n,
                };
                format!("{},{}", src, count)
            }
            Format::Shift => format!("R{},{}", word & 0x0F, (word >> 4) & 0x0F),
            Format::SingleAddress => source(&mut reader),
            Format::Control => String::new(),
            Format::RegisterImmediate => {
                let immediate = reader.word();
                format!("R{},>{:04X}", word & 0x0F, immediate)
            }
            Format::Immediate => format!(">{:04X}", reader.word()),
            Format::Register => format!("R{}", word & 0x0F),
            Format::Invalid => format!(">{:04X}", word),
        };

        let mnemonic = if opcode.op == Op::Invalid {
            "DATA"
        } else {
            opcode.mnemonic
        };
        let text = if operands.is_empty() {
            mnemonic.to_string()
        } else {
            format!("{:<4} {}", mnemonic, operands)
        };

        Instruction {
            address: pc,
            opcode,
            words: reader.words,
            text,
        }
    }

    pub fn name(&self) -> &str {
        self.opcode.mnemonic
    }

    /// Length in bytes.
    pub fn len(&self) -> u16 {
        self.words.len() as u16 * 2
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.len())
    }

    pub fn as_hex_vector(&self) -> Vec<String> {
        self.words.iter().map(|word| format!("{:04X}", word)).collect()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
