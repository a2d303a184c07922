//! Error types of the BDM engine.
use std::fmt;

use crate::bdm::Width;
use crate::flashing::FlashState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Address,
    Data,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Address => write!(f, "address"),
            RegisterKind::Data => write!(f, "data"),
        }
    }
}

/// Caller supplied an argument the target can't accept. Nothing was sent.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("can't access {kind} register {index}, the ColdFire only has 8 of them")]
    RegisterIndex { kind: RegisterKind, index: u8 },
    #[error("control register encoding 0x{0:x} doesn't fit in 12 bits")]
    ControlRegister(u32),
    #[error("value 0x{value:x} out of range for a {width} access")]
    Value { value: u32, width: Width },
    #[error("{0}")]
    Argument(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("target responded to the last command with an error")]
    Target,
    #[error("target rejected the last command as illegal")]
    IllegalCommand,

    #[error("flash must be in {expected:?} state, but is {actual:?}")]
    ProtocolState {
        expected: FlashState,
        actual: FlashState,
    },

    #[error(
        "read all {} {kind} registers twice in a row but got different results, \
         the processor may still be running, be disconnected or be faulty. \
         first read: {}, second read: {}",
        .first.len(), HexList(.first), HexList(.second)
    )]
    InconsistentRead {
        kind: RegisterKind,
        first: Vec<u32>,
        second: Vec<u32>,
    },
    #[error(
        "wrote all {} {kind} registers but read back different values, \
         the processor may still be running, be disconnected or be faulty. \
         written: {}, read back: {}",
        .written.len(), HexList(.written), HexList(.read)
    )]
    WriteVerification {
        kind: RegisterKind,
        written: Vec<u32>,
        read: Vec<u32>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("unexpected line from bridge: {line:?} (expected {expected:?})")]
    Handshake { line: String, expected: &'static str },
    #[error("bridge answered ping with {response:02x?} instead of PONG")]
    Ping { response: Vec<u8> },

    #[error("flash chip was not erased, first words read: {words:04x?}")]
    EraseVerification { words: Vec<u16> },

    #[error("SRAM at 0x{address:08x} did not retain its value (read 0x{read:08x})")]
    SramRetention { address: u32, read: u32 },
    #[error("SRAM check failed: wrote 0x{wrote:08x} to 0x{address:08x}, read back 0x{read:08x}")]
    SramMismatch { address: u32, wrote: u32, read: u32 },

    #[error("invalid register map: {0}")]
    RegisterMap(#[from] serde_yaml::Error),
    #[error("firmware image: {0}")]
    Firmware(String),
}

impl Error {
    /// True for errors caused by bad caller input rather than the target.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

struct HexList<'a>(&'a [u32]);

impl fmt::Display for HexList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "0x{:08x}", v)?;
        }
        write!(f, "]")
    }
}
