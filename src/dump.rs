//! Pipelined memory dump.
//!
//! After one addressed word read, `DUMP` reads the next word without an
//! address. Each `DUMP` is clocked in while the previous word clocks out,
//! which roughly triples throughput over individual reads.
use std::io::Write;

use clap::ValueEnum;

use crate::bdm::Bdm;
use crate::constants::commands;
use crate::error::Result;
use crate::transport::Transport;

/// Lazy sequence of words read from consecutive addresses.
///
/// Nothing is sent until the first word is pulled. Dropping it early is
/// fine; the one response left in flight is consumed by the next command.
pub struct DumpWords<'a, T: Transport> {
    bdm: &'a mut Bdm<T>,
    base: u32,
    remaining: u32,
    started: bool,
}

impl<T: Transport> Bdm<T> {
    pub fn dump_words(&mut self, base: u32, count: u32) -> DumpWords<'_, T> {
        DumpWords {
            bdm: self,
            base,
            remaining: count,
            started: false,
        }
    }
}

impl<T: Transport> DumpWords<'_, T> {
    fn next_word(&mut self) -> Result<u16> {
        let bridge = &mut self.bdm.bridge;
        if !self.started {
            self.started = true;
            bridge.send_packet(commands::READ_WORD)?;
            bridge.send_packet((self.base >> 16) as u16)?;
            bridge.send_packet(self.base as u16)?;
        }
        self.remaining -= 1;
        let resp = if self.remaining == 0 {
            bridge.receive_packet()?
        } else {
            bridge.send_and_receive_packet(commands::DUMP_WORD)?
        };
        Ok(resp.data)
    }
}

impl<T: Transport> Iterator for DumpWords<'_, T> {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let word = self.next_word();
        if word.is_err() {
            // the pipeline is in an unknown state, stop here
            self.remaining = 0;
        }
        Some(word)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

/// How dumped memory is rendered.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    /// Address-prefixed lines of hex words
    #[default]
    Words,
    /// Address-prefixed lines of bits
    Binary,
    /// Plain bytes, big-endian
    Raw,
    /// Classic hexdump with ASCII column
    Hex,
}

const WORDS_PER_LINE: u32 = 16;

/// Address of the `index`th word from `base`, wrapping at 4 GiB like the
/// target's address counter.
fn word_address(base: u32, index: usize) -> u32 {
    base.wrapping_add((index as u32).wrapping_mul(2))
}

/// Stream words from `words` into `out`. Returns the number of words written.
///
/// `words` is pulled lazily so a caller can stop a long dump by ending the
/// iterator; what was written so far stays valid.
pub fn write_dump<W: Write>(
    out: &mut W,
    base: u32,
    words: impl Iterator<Item = Result<u16>>,
    format: DumpFormat,
) -> anyhow::Result<usize> {
    let mut count = 0usize;
    let mut hex_buffer = Vec::new();
    for word in words {
        let word = word?;
        let address = word_address(base, count);
        let column = (count as u32) % WORDS_PER_LINE;
        match format {
            DumpFormat::Words | DumpFormat::Binary => {
                if column == 0 {
                    if count > 0 {
                        writeln!(out)?;
                    }
                    write!(out, "0x{:08x}: ", address)?;
                }
                if format == DumpFormat::Words {
                    write!(out, "{:04x}", word)?;
                } else {
                    write!(out, "{:08b} {:08b} ", word >> 8, word & 0xff)?;
                }
                if column % 2 == 1 {
                    write!(out, " ")?;
                }
            }
            DumpFormat::Raw => out.write_all(&word.to_be_bytes())?,
            DumpFormat::Hex => hex_buffer.extend_from_slice(&word.to_be_bytes()),
        }
        count += 1;
    }
    match format {
        DumpFormat::Words | DumpFormat::Binary if count > 0 => writeln!(out)?,
        DumpFormat::Hex => {
            hxdmp::hexdump(&hex_buffer, out)?;
            writeln!(out)?;
        }
        _ => (),
    }
    out.flush()?;
    Ok(count)
}
