// Error kinds surfaced to the host. Peripherals never fail: they log and return the 0xFF sentinel. The two fallible
// surfaces are the cartridge loader and the CPU, which faults on illegal opcodes and refuses to step afterwards.
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // The ROM stream is shorter than the 0x0150 bytes holding the cartridge header.
    RomUndersized(usize),
    // The ROM stream does not cover the bank count declared in the header.
    RomTruncated { expect: usize, got: usize },
    UnsupportedMbc(u8),
    UnsupportedRomSize(u8),
    UnsupportedRamSize(u8),
    HeaderChecksum { expect: u8, got: u8 },
    // The battery image is shorter than the cartridge RAM it should fill.
    SavTruncated { expect: usize, got: usize },
    IllegalOpcode { opcode: u8, pc: u16 },
    // A step was requested after a fatal fault.
    Faulted,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::RomUndersized(n) => write!(f, "rom is {} bytes, missing the header area at 0100-014f", n),
            Error::RomTruncated { expect, got } => {
                write!(f, "rom is {} bytes but the header declares {}", got, expect)
            }
            Error::UnsupportedMbc(n) => write!(f, "unsupported cartridge type {:#04x}", n),
            Error::UnsupportedRomSize(n) => write!(f, "unsupported rom size code {:#04x}", n),
            Error::UnsupportedRamSize(n) => write!(f, "unsupported ram size code {:#04x}", n),
            Error::HeaderChecksum { expect, got } => {
                write!(f, "header checksum is {:#04x} but {:#04x} was computed", expect, got)
            }
            Error::SavTruncated { expect, got } => {
                write!(f, "battery image is {} bytes, {} are required", got, expect)
            }
            Error::IllegalOpcode { opcode, pc } => write!(f, "illegal opcode {:#04x} at {:#06x}", opcode, pc),
            Error::Faulted => write!(f, "cpu is faulted and cannot continue"),
        }
    }
}

impl std::error::Error for Error {}
