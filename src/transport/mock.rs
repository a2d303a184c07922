//! Emulated bridge with a halted ColdFire behind it.
//!
//! Good enough to run every operation of this crate without hardware:
//! BDM result pipelining, register files, RAM, and an AMD-style boot flash
//! at address 0 that honours the unlock, unlock-bypass and chip-erase
//! command sequences.
use std::collections::{HashMap, VecDeque};
use std::io;

use super::Transport;
use crate::constants::{commands, control_registers, flash, frames};
use crate::error::RegisterKind;
use crate::protocol::{Frame, Response};

/// Flash occupies the bottom of the address space, RAM is everything else.
pub const FLASH_END: u32 = flash::SIZE;

const NOT_READY: Response = Response::new(true, 0x0000);
const COMPLETE: Response = Response::new(false, 0xffff);
const ILLEGAL: Response = Response::new(true, 0xffff);

const STEP_MODE_BIT: u32 = 1 << 4;

#[derive(Default)]
struct FlashEmu {
    cycles: Vec<(u32, u16)>,
    bypass: bool,
    bypass_exit: bool,
    program_next: bool,
    erase_count: usize,
}

pub struct MockTransport {
    rx: VecDeque<u8>,
    pending_tx: Vec<u8>,
    sent: Vec<u8>,
    frames: Vec<Frame>,
    executed: Vec<u16>,

    results: VecDeque<Response>,
    current: Vec<u16>,
    last_access: u32,
    halted: bool,

    address_registers: [u32; 8],
    data_registers: [u32; 8],
    csr: u32,
    control_registers: HashMap<u16, u32>,
    memory: HashMap<u32, u8>,
    flash: FlashEmu,

    running: bool,
    ticks: u32,
    stuck: Option<(RegisterKind, u8)>,
    faulty_address: Option<u32>,
    unimplemented_control_register: Option<u16>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A bridge that greets the host the way the real sketch does.
    pub fn new() -> Self {
        Self::with_banner(&format!("{}\r\n{}\r\n", frames::BANNER, frames::READY))
    }

    pub fn with_banner(banner: &str) -> Self {
        MockTransport {
            rx: banner.bytes().collect(),
            pending_tx: Vec::new(),
            sent: Vec::new(),
            frames: Vec::new(),
            executed: Vec::new(),
            results: VecDeque::new(),
            current: Vec::new(),
            last_access: 0,
            halted: false,
            address_registers: [0; 8],
            data_registers: [0; 8],
            csr: 0,
            control_registers: HashMap::new(),
            memory: HashMap::new(),
            flash: FlashEmu::default(),
            running: false,
            ticks: 0,
            stuck: None,
            faulty_address: None,
            unimplemented_control_register: None,
        }
    }

    /// Every byte the host wrote.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Every frame the host wrote.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Opcodes of every BDM command the target executed, in order.
    pub fn executed(&self) -> &[u16] {
        &self.executed
    }

    pub fn clear_log(&mut self) {
        self.sent.clear();
        self.frames.clear();
        self.executed.clear();
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn address_register(&self, n: usize) -> u32 {
        self.address_registers[n]
    }

    pub fn set_address_register(&mut self, n: usize, value: u32) {
        self.address_registers[n] = value;
    }

    pub fn data_register(&self, n: usize) -> u32 {
        self.data_registers[n]
    }

    pub fn set_data_register(&mut self, n: usize, value: u32) {
        self.data_registers[n] = value;
    }

    pub fn csr(&self) -> u32 {
        self.csr
    }

    pub fn set_csr(&mut self, value: u32) {
        self.csr = value;
    }

    pub fn control_register(&self, encoding: u16) -> u32 {
        self.control_registers.get(&encoding).copied().unwrap_or(0)
    }

    pub fn set_control_register(&mut self, encoding: u16, value: u32) {
        self.control_registers.insert(encoding, value);
    }

    /// Store a big-endian word, bypassing the flash command decoder.
    pub fn poke_word(&mut self, address: u32, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.memory.insert(address, hi);
        self.memory.insert(address.wrapping_add(1), lo);
    }

    pub fn peek_word(&self, address: u32) -> u16 {
        self.read_memory(address, 2) as u16
    }

    pub fn flash_bypass_active(&self) -> bool {
        self.flash.bypass
    }

    pub fn erase_count(&self) -> usize {
        self.flash.erase_count
    }

    /// Pretend the core was never halted: register reads drift.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Make writes to one register silently fail.
    pub fn set_stuck_register(&mut self, kind: RegisterKind, index: u8) {
        self.stuck = Some((kind, index));
    }

    /// Make writes to one RAM address silently fail.
    pub fn set_faulty_address(&mut self, address: u32) {
        self.faulty_address = Some(address);
    }

    /// Answer reads of one control register with an illegal command result.
    pub fn set_unimplemented_control_register(&mut self, encoding: u16) {
        self.unimplemented_control_register = Some(encoding);
    }

    /// Queue a raw response to be shifted out before anything else.
    pub fn inject_response(&mut self, response: Response) {
        self.results.push_front(response);
    }

    fn handle(&mut self, frame: Frame) {
        match frame {
            Frame::Send(word) => {
                self.shift(word);
            }
            Frame::Receive => {
                let resp = self.shift(commands::NOP);
                self.rx.extend(resp.encode());
            }
            Frame::SendReceive(word) => {
                let resp = self.shift(word);
                self.rx.extend(resp.encode());
            }
            Frame::Reset => {
                self.halted = true;
                self.csr = 0;
                self.control_registers.insert(control_registers::PC, 0);
            }
            Frame::Breakpoint => self.halted = true,
            Frame::Ping => self.rx.extend(frames::PONG),
        }
    }

    /// Clock one word in, return the packet clocked out alongside it.
    fn shift(&mut self, word: u16) -> Response {
        let out = self.results.pop_front().unwrap_or(NOT_READY);
        if self.current.is_empty() && word == commands::NOP {
            return out;
        }
        self.current.push(word);
        match extension_words(self.current[0]) {
            None => {
                self.current.clear();
                self.results.push_back(ILLEGAL);
            }
            Some(ext) if self.current.len() > ext => {
                let words = std::mem::take(&mut self.current);
                self.execute(&words);
            }
            Some(_) => (),
        }
        out
    }

    fn execute(&mut self, w: &[u16]) {
        let long = |hi: u16, lo: u16| ((hi as u32) << 16) | lo as u32;
        let op = w[0];
        self.executed.push(op);
        match op {
            commands::NOP => (),
            commands::GO => {
                if self.csr & STEP_MODE_BIT != 0 {
                    let pc = self.control_register(control_registers::PC);
                    self.set_control_register(control_registers::PC, pc.wrapping_add(2));
                } else {
                    self.halted = false;
                }
                self.results.push_back(COMPLETE);
            }
            0x1900 | 0x1940 | 0x1980 => {
                let address = long(w[1], w[2]);
                self.last_access = address;
                self.push_read(address, access_size(op));
            }
            0x1d00 | 0x1d40 | 0x1d80 => {
                let size = access_size(op);
                let address = self.last_access.wrapping_add(size);
                self.last_access = address;
                self.push_read(address, size);
            }
            0x1800 | 0x1840 => {
                let address = long(w[1], w[2]);
                self.last_access = address;
                self.write_memory(address, access_size(op), w[3] as u32);
                self.results.push_back(COMPLETE);
            }
            0x1880 => {
                let address = long(w[1], w[2]);
                self.last_access = address;
                self.write_memory(address, 4, long(w[3], w[4]));
                self.results.push_back(COMPLETE);
            }
            0x2180..=0x218f => {
                let (kind, n) = register(op);
                let mut value = match kind {
                    RegisterKind::Address => self.address_registers[n],
                    RegisterKind::Data => self.data_registers[n],
                };
                if self.running {
                    self.ticks = self.ticks.wrapping_add(1);
                    value = value.wrapping_add(self.ticks);
                }
                self.push_long(value);
            }
            0x2080..=0x208f => {
                let (kind, n) = register(op);
                if self.stuck != Some((kind, n as u8)) {
                    let value = long(w[1], w[2]);
                    match kind {
                        RegisterKind::Address => self.address_registers[n] = value,
                        RegisterKind::Data => self.data_registers[n] = value,
                    }
                }
                self.results.push_back(COMPLETE);
            }
            commands::READ_CREG => {
                let encoding = w[2] & 0x0fff;
                if self.unimplemented_control_register == Some(encoding) {
                    self.results.push_back(ILLEGAL);
                } else {
                    let value = self.control_register(encoding);
                    self.push_long(value);
                }
            }
            commands::WRITE_CREG => {
                self.set_control_register(w[2] & 0x0fff, long(w[3], w[4]));
                self.results.push_back(COMPLETE);
            }
            commands::READ_CSR => self.push_long(self.csr),
            commands::WRITE_CSR => {
                self.csr = long(w[1], w[2]);
                self.results.push_back(COMPLETE);
            }
            _ => self.results.push_back(ILLEGAL),
        }
    }

    fn push_long(&mut self, value: u32) {
        self.results
            .push_back(Response::new(false, (value >> 16) as u16));
        self.results.push_back(Response::new(false, value as u16));
    }

    fn push_read(&mut self, address: u32, size: u32) {
        let value = self.read_memory(address, size);
        match size {
            4 => self.push_long(value),
            _ => self.results.push_back(Response::new(false, value as u16)),
        }
    }

    fn read_memory(&self, address: u32, size: u32) -> u32 {
        (0..size).fold(0u32, |acc, i| {
            let a = address.wrapping_add(i);
            let blank = if a < FLASH_END { 0xff } else { 0x00 };
            (acc << 8) | self.memory.get(&a).copied().unwrap_or(blank) as u32
        })
    }

    fn write_memory(&mut self, address: u32, size: u32, value: u32) {
        if address < FLASH_END {
            if size == 2 {
                self.flash_cycle(address, value as u16);
            }
            return;
        }
        if self.faulty_address == Some(address) {
            return;
        }
        for i in 0..size {
            let shift = 8 * (size - 1 - i);
            self.memory
                .insert(address.wrapping_add(i), (value >> shift) as u8);
        }
    }

    fn flash_cycle(&mut self, address: u32, data: u16) {
        if self.flash.program_next {
            self.flash.program_next = false;
            // programming can only clear bits
            let word = self.peek_word(address) & data;
            self.poke_word(address, word);
            return;
        }
        if self.flash.bypass {
            match data {
                flash::PROGRAM => self.flash.program_next = true,
                flash::BYPASS_RESET_1 => self.flash.bypass_exit = true,
                flash::BYPASS_RESET_2 if self.flash.bypass_exit => {
                    self.flash.bypass = false;
                    self.flash.bypass_exit = false;
                }
                _ => (),
            }
            return;
        }

        let cycles = &mut self.flash.cycles;
        cycles.push((address, data));
        if cycles.len() > 6 {
            cycles.remove(0);
        }
        let unlock = [
            (flash::UNLOCK_ADDR_1, flash::UNLOCK_DATA_1),
            (flash::UNLOCK_ADDR_2, flash::UNLOCK_DATA_2),
        ];
        let keyed = |cmd: u16| -> Vec<(u32, u16)> {
            let mut seq = unlock.to_vec();
            seq.push((flash::UNLOCK_ADDR_1, cmd));
            seq
        };
        let mut erase = keyed(flash::ERASE);
        erase.extend(keyed(flash::CHIP_ERASE));

        if cycles.ends_with(&keyed(flash::UNLOCK_BYPASS)) {
            cycles.clear();
            self.flash.bypass = true;
        } else if cycles.ends_with(&keyed(flash::PROGRAM)) {
            cycles.clear();
            self.flash.program_next = true;
        } else if cycles.ends_with(&erase) {
            cycles.clear();
            self.memory.retain(|&a, _| a >= FLASH_END);
            self.flash.erase_count += 1;
        } else if data == flash::RESET {
            cycles.clear();
        }
    }
}

/// How many words follow the opcode, `None` for unknown opcodes.
fn extension_words(op: u16) -> Option<usize> {
    match op {
        commands::NOP | commands::GO | commands::READ_CSR => Some(0),
        0x1d00 | 0x1d40 | 0x1d80 | 0x2180..=0x218f => Some(0),
        0x1900 | 0x1940 | 0x1980 => Some(2),
        0x2080..=0x208f | commands::WRITE_CSR | commands::READ_CREG => Some(2),
        0x1800 | 0x1840 => Some(3),
        0x1880 | commands::WRITE_CREG => Some(4),
        _ => None,
    }
}

/// Operand size in bytes from bits 7:6 of a memory opcode.
fn access_size(op: u16) -> u32 {
    match (op >> 6) & 0b11 {
        0b00 => 1,
        0b01 => 2,
        _ => 4,
    }
}

fn register(op: u16) -> (RegisterKind, usize) {
    let kind = if op & 0x8 != 0 {
        RegisterKind::Address
    } else {
        RegisterKind::Data
    };
    (kind, (op & 0x7) as usize)
}

impl Transport for MockTransport {
    fn write_raw(&mut self, raw: &[u8]) -> io::Result<()> {
        self.sent.extend_from_slice(raw);
        self.pending_tx.extend_from_slice(raw);
        while let Some((frame, len)) = Frame::from_raw(&self.pending_tx) {
            self.pending_tx.drain(..len);
            self.frames.push(frame);
            self.handle(frame);
        }
        if self.pending_tx.len() >= 3 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown bridge command 0x{:02x}", self.pending_tx[0]),
            ));
        }
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.rx.len() < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock bridge has nothing more to say",
            ));
        }
        for b in buf.iter_mut() {
            *b = self.rx.pop_front().unwrap_or_default();
        }
        Ok(())
    }
}
