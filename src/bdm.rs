//! BDM command set.

use std::fmt;
use std::time::Duration;

use crate::bridge::Bridge;
use crate::constants::{
    MAX_CONTROL_REGISTER, NUM_ADDRESS_REGISTERS, NUM_DATA_REGISTERS, commands,
};
use crate::csr::Csr;
use crate::error::{RegisterKind, Result, ValidationError};
use crate::flashing::FlashState;
use crate::transport::Transport;

/// How long a chip erase is given to finish. Not polled.
pub const DEFAULT_ERASE_WAIT: Duration = Duration::from_secs(30);

/// Operand size of a memory access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    Long,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Long => 4,
        }
    }

    pub const fn max_value(self) -> u32 {
        match self {
            Width::Byte => 0xff,
            Width::Word => 0xffff,
            Width::Long => 0xffff_ffff,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::Byte => write!(f, "byte"),
            Width::Word => write!(f, "word"),
            Width::Long => write!(f, "longword"),
        }
    }
}

/// Debugger session on one halted target.
///
/// Owns the bridge and every piece of state that mirrors the target: the
/// cached single-step flag and the flash command state.
pub struct Bdm<T: Transport> {
    pub(crate) bridge: Bridge<T>,
    step_mode: bool,
    pub(crate) flash_state: FlashState,
    pub(crate) erase_wait: Duration,
}

impl<T: Transport> Bdm<T> {
    pub fn new(bridge: Bridge<T>) -> Self {
        Bdm {
            bridge,
            step_mode: false,
            flash_state: FlashState::Locked,
            erase_wait: DEFAULT_ERASE_WAIT,
        }
    }

    pub fn bridge(&self) -> &Bridge<T> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<T> {
        &mut self.bridge
    }

    /// Override the chip-erase wait, for flash parts that are known to be faster.
    pub fn set_erase_wait(&mut self, wait: Duration) {
        self.erase_wait = wait;
    }

    /// Step mode as last written by this session. The CSR is not re-read.
    pub fn single_step_mode(&self) -> bool {
        self.step_mode
    }

    /// Send command words, checking but discarding the responses that come
    /// back meanwhile. The response to the last word stays in flight.
    fn send(&mut self, words: &[u16]) -> Result<()> {
        for &word in words {
            self.bridge.send_and_receive_packet(word)?;
        }
        Ok(())
    }

    /// Send command words, then collect one or two result words.
    fn send_then_receive(&mut self, words: &[u16], response_words: usize) -> Result<u32> {
        self.send(words)?;
        let mut data = 0u32;
        for _ in 0..response_words {
            data = (data << 16) | self.bridge.receive_packet()?.data as u32;
        }
        Ok(data)
    }

    pub fn noop(&mut self) -> Result<u16> {
        Ok(self.send_then_receive(&[commands::NOP], 1)? as u16)
    }

    /// Continue execution from the current PC.
    pub fn resume(&mut self) -> Result<()> {
        self.set_single_step_mode(false)?;
        log::debug!("resume");
        self.send_then_receive(&[commands::GO], 1)?;
        Ok(())
    }

    /// Execute exactly one instruction, then halt again.
    ///
    /// Same opcode as [`Bdm::resume`], the CSR step bit makes the difference.
    pub fn step(&mut self) -> Result<()> {
        self.set_single_step_mode(true)?;
        log::debug!("step");
        self.send_then_receive(&[commands::GO], 1)?;
        Ok(())
    }

    pub fn read_byte(&mut self, address: u32) -> Result<u8> {
        let (hi, lo) = split(address);
        Ok(self.send_then_receive(&[commands::READ_BYTE, hi, lo], 1)? as u8)
    }

    pub fn read_word(&mut self, address: u32) -> Result<u16> {
        let (hi, lo) = split(address);
        Ok(self.send_then_receive(&[commands::READ_WORD, hi, lo], 1)? as u16)
    }

    pub fn read_longword(&mut self, address: u32) -> Result<u32> {
        let (hi, lo) = split(address);
        self.send_then_receive(&[commands::READ_LONG, hi, lo], 2)
    }

    pub fn read_memory(&mut self, address: u32, width: Width) -> Result<u32> {
        match width {
            Width::Byte => self.read_byte(address).map(u32::from),
            Width::Word => self.read_word(address).map(u32::from),
            Width::Long => self.read_longword(address),
        }
    }

    pub fn write_byte(&mut self, address: u32, data: u8) -> Result<()> {
        let (hi, lo) = split(address);
        self.send(&[commands::WRITE_BYTE, hi, lo, data as u16])
    }

    pub fn write_word(&mut self, address: u32, data: u16) -> Result<()> {
        let (hi, lo) = split(address);
        self.send(&[commands::WRITE_WORD, hi, lo, data])
    }

    pub fn write_longword(&mut self, address: u32, data: u32) -> Result<()> {
        let (hi, lo) = split(address);
        let (dhi, dlo) = split(data);
        self.send(&[commands::WRITE_LONG, hi, lo, dhi, dlo])
    }

    /// Width-generic write, rejecting values that don't fit before sending.
    pub fn write_memory(&mut self, address: u32, width: Width, value: u32) -> Result<()> {
        if value > width.max_value() {
            return Err(ValidationError::Value { value, width }.into());
        }
        match width {
            Width::Byte => self.write_byte(address, value as u8),
            Width::Word => self.write_word(address, value as u16),
            Width::Long => self.write_longword(address, value),
        }
    }

    pub fn read_address_register(&mut self, n: u8) -> Result<u32> {
        check_register(RegisterKind::Address, n)?;
        self.send_then_receive(&[commands::READ_AREG | n as u16], 2)
    }

    pub fn read_data_register(&mut self, n: u8) -> Result<u32> {
        check_register(RegisterKind::Data, n)?;
        self.send_then_receive(&[commands::READ_DREG | n as u16], 2)
    }

    pub fn write_address_register(&mut self, n: u8, value: u32) -> Result<()> {
        check_register(RegisterKind::Address, n)?;
        let (hi, lo) = split(value);
        self.send(&[commands::WRITE_AREG | n as u16, hi, lo])
    }

    pub fn write_data_register(&mut self, n: u8, value: u32) -> Result<()> {
        check_register(RegisterKind::Data, n)?;
        let (hi, lo) = split(value);
        self.send(&[commands::WRITE_DREG | n as u16, hi, lo])
    }

    pub fn read_register(&mut self, kind: RegisterKind, n: u8) -> Result<u32> {
        match kind {
            RegisterKind::Address => self.read_address_register(n),
            RegisterKind::Data => self.read_data_register(n),
        }
    }

    pub fn write_register(&mut self, kind: RegisterKind, n: u8, value: u32) -> Result<()> {
        match kind {
            RegisterKind::Address => self.write_address_register(n, value),
            RegisterKind::Data => self.write_data_register(n, value),
        }
    }

    /// Read a system control register by its 12-bit `Rc` encoding.
    pub fn read_control_register(&mut self, encoding: u16) -> Result<u32> {
        check_control_register(encoding)?;
        self.send_then_receive(&[commands::READ_CREG, 0, encoding], 2)
    }

    pub fn write_control_register(&mut self, encoding: u16, value: u32) -> Result<()> {
        check_control_register(encoding)?;
        let (hi, lo) = split(value);
        self.send(&[commands::WRITE_CREG, 0, encoding, hi, lo])
    }

    pub fn read_csr(&mut self) -> Result<Csr> {
        self.send_then_receive(&[commands::READ_CSR], 2)
            .map(Csr::from)
    }

    pub fn write_csr(&mut self, csr: Csr) -> Result<()> {
        let (hi, lo) = split(csr.into());
        self.send(&[commands::WRITE_CSR, hi, lo])
    }

    /// Read-modify-write the CSR step bit, unless the cache says it's already set.
    pub fn set_single_step_mode(&mut self, enabled: bool) -> Result<()> {
        if self.step_mode == enabled {
            return Ok(());
        }
        let mut csr = self.read_csr()?;
        csr.set_single_step_mode(enabled);
        self.write_csr(csr)?;
        self.step_mode = enabled;
        log::debug!("single step mode: {}", enabled);
        Ok(())
    }
}

fn split(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

fn check_register(kind: RegisterKind, index: u8) -> Result<()> {
    let count = match kind {
        RegisterKind::Address => NUM_ADDRESS_REGISTERS,
        RegisterKind::Data => NUM_DATA_REGISTERS,
    };
    if index >= count {
        return Err(ValidationError::RegisterIndex { kind, index }.into());
    }
    Ok(())
}

fn check_control_register(encoding: u16) -> Result<()> {
    if encoding > MAX_CONTROL_REGISTER {
        return Err(ValidationError::ControlRegister(encoding.into()).into());
    }
    Ok(())
}
