//! External SRAM test through chip-select 1.
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressBar;

use crate::bdm::Bdm;
use crate::constants::{control_registers, sim};
use crate::error::{Error, Result, ValidationError};
use crate::transport::Transport;

/// Reads of the first longword that must all return the pattern.
pub const RETENTION_POLLS: usize = 200;
const RETENTION_PATTERN: u32 = 0xffff_ffff;

impl<T: Transport> Bdm<T> {
    /// Test `length` bytes of SRAM at `base`, returning the number of bytes
    /// verified (less than `length` if cancelled).
    ///
    /// Each longword gets its own address written and read back. The range is
    /// rounded down to whole longwords.
    pub fn sram_test(
        &mut self,
        base: u32,
        length: u32,
        progress: &ProgressBar,
        cancel: &AtomicBool,
    ) -> Result<u32> {
        if base != sim::SRAM_BASE {
            return Err(ValidationError::Argument(format!(
                "SRAM can only be mapped at 0x{:08x} via chip-select 1, not 0x{:08x}",
                sim::SRAM_BASE,
                base
            ))
            .into());
        }
        if base.checked_add(length).is_none() {
            return Err(ValidationError::Argument(format!(
                "0x{:x} bytes from 0x{:08x} overflows the address space",
                length, base
            ))
            .into());
        }

        self.map_chip_select()?;
        self.check_retention(base)?;

        let words = length / 4;
        log::info!(
            "Testing RAM from 0x{:08x} to 0x{:08x} ({} bytes)",
            base,
            base + words * 4,
            words * 4
        );
        progress.set_length(words as u64);
        for i in 0..words {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("SRAM test cancelled after {} bytes", i * 4);
                return Ok(i * 4);
            }
            let address = base + i * 4;
            self.write_longword(address, address)?;
            let read = self.read_longword(address)?;
            if read != address {
                return Err(Error::SramMismatch {
                    address,
                    wrote: address,
                    read,
                });
            }
            progress.inc(1);
        }
        progress.finish();
        log::info!("SRAM test passed");
        Ok(words * 4)
    }

    fn map_chip_select(&mut self) -> Result<()> {
        self.write_control_register(control_registers::MBAR, sim::MBAR_BASE | sim::MBAR_VALID)?;
        log::info!("Mapping SRAM for access at 0x{:08x}", sim::SRAM_BASE);
        self.write_word(sim::MBAR_BASE + sim::CSAR1, sim::CSAR1_VALUE)?;
        self.write_word(sim::MBAR_BASE + sim::CSCR1, sim::CSCR1_VALUE)?;
        self.write_longword(sim::MBAR_BASE + sim::CSMR1, sim::CSMR1_VALUE)
    }

    fn check_retention(&mut self, address: u32) -> Result<()> {
        self.write_longword(address, RETENTION_PATTERN)?;
        for _ in 0..RETENTION_POLLS {
            let read = self.read_longword(address)?;
            if read != RETENTION_PATTERN {
                return Err(Error::SramRetention { address, read });
            }
        }
        log::debug!("SRAM retains values");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdm::tests::{mock, session};
    use crate::transport::MockTransport;

    fn run(bdm: &mut Bdm<MockTransport>, base: u32, length: u32) -> Result<u32> {
        bdm.sram_test(base, length, &ProgressBar::hidden(), &AtomicBool::new(false))
    }

    #[test]
    fn passes_on_working_ram() {
        let mut bdm = session();
        assert_eq!(run(&mut bdm, 0x0020_0000, 66).unwrap(), 64);
        let m = mock(&mut bdm);
        assert_eq!(m.control_register(control_registers::MBAR), 0x1000_0001);
        assert_eq!(m.peek_word(0x1000_008c), 0x20);
        assert_eq!(m.peek_word(0x1000_0096), 0x120);
        assert_eq!(m.peek_word(0x1000_0090), 0x000f);
        assert_eq!(m.peek_word(0x1000_0092), 0x0001);
        assert_eq!(m.peek_word(0x0020_0010), 0x0020);
        assert_eq!(m.peek_word(0x0020_0012), 0x0010);
    }

    #[test]
    fn other_bases_are_rejected_untouched() {
        let mut bdm = session();
        let err = run(&mut bdm, 0x0040_0000, 16).unwrap_err();
        assert!(err.is_validation());
        assert!(mock(&mut bdm).sent().is_empty());
    }

    #[test]
    fn dead_first_word_fails_retention() {
        let mut bdm = session();
        mock(&mut bdm).set_faulty_address(0x0020_0000);
        assert!(matches!(
            run(&mut bdm, 0x0020_0000, 16),
            Err(Error::SramRetention {
                address: 0x0020_0000,
                read: 0
            })
        ));
    }

    #[test]
    fn bad_cell_is_reported() {
        let mut bdm = session();
        mock(&mut bdm).set_faulty_address(0x0020_0008);
        assert!(matches!(
            run(&mut bdm, 0x0020_0000, 16),
            Err(Error::SramMismatch {
                address: 0x0020_0008,
                wrote: 0x0020_0008,
                read: 0
            })
        ));
    }

    #[test]
    fn cancellation_reports_progress() {
        let mut bdm = session();
        let done = bdm
            .sram_test(0x0020_0000, 1024, &ProgressBar::hidden(), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(done, 0);
    }
}
