//! Boot flash programming.
//!
//! The board carries an AMD-style, word-wide flash at 0x00000000. Commands
//! are word writes of magic values to magic addresses; the sequences used
//! here are unlock (single word program), unlock bypass (two writes per
//! programmed word) and chip erase.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;

use indicatif::ProgressBar;

use crate::bdm::Bdm;
use crate::constants::flash::*;
use crate::error::{Error, Result, ValidationError};
use crate::format::FirmwareImage;
use crate::transport::Transport;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FlashState {
    #[default]
    Locked,
    UnlockBypassActive,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Program on top of whatever the chip holds.
    pub skip_erase: bool,
}

impl<T: Transport> Bdm<T> {
    pub fn flash_state(&self) -> FlashState {
        self.flash_state
    }

    /// Arm the flash for a single word program with the next memory write.
    ///
    /// Programming can only turn `1` bits into `0`, erase first if needed.
    pub fn flash_write_enable(&mut self) -> Result<()> {
        self.write_word(UNLOCK_ADDR_1, UNLOCK_DATA_1)?;
        self.write_word(UNLOCK_ADDR_2, UNLOCK_DATA_2)?;
        self.write_word(UNLOCK_ADDR_1, PROGRAM)
    }

    pub fn enter_unlock_bypass(&mut self) -> Result<()> {
        self.write_word(UNLOCK_ADDR_1, UNLOCK_DATA_1)?;
        self.write_word(UNLOCK_ADDR_2, UNLOCK_DATA_2)?;
        self.write_word(UNLOCK_ADDR_1, UNLOCK_BYPASS)?;
        self.flash_state = FlashState::UnlockBypassActive;
        log::debug!("flash: unlock bypass entered");
        Ok(())
    }

    /// Program one word. Only valid between [`Bdm::enter_unlock_bypass`]
    /// and [`Bdm::exit_unlock_bypass`].
    pub fn write_bypassed(&mut self, address: u32, data: u16) -> Result<()> {
        if self.flash_state != FlashState::UnlockBypassActive {
            return Err(Error::ProtocolState {
                expected: FlashState::UnlockBypassActive,
                actual: self.flash_state,
            });
        }
        self.write_word(0x00, PROGRAM)?;
        self.write_word(address, data)
    }

    pub fn exit_unlock_bypass(&mut self) -> Result<()> {
        self.write_word(0x00, BYPASS_RESET_1)?;
        self.write_word(0x00, BYPASS_RESET_2)?;
        self.flash_state = FlashState::Locked;
        log::debug!("flash: locked");
        Ok(())
    }

    /// Erase the whole chip.
    ///
    /// Blocks for the erase wait (30 s unless overridden) and can't be
    /// cancelled meanwhile. The chip's status is not polled, so a slow part
    /// may still be busy afterwards.
    pub fn chip_erase(&mut self) -> Result<()> {
        self.write_word(UNLOCK_ADDR_1, UNLOCK_DATA_1)?;
        self.write_word(UNLOCK_ADDR_2, UNLOCK_DATA_2)?;
        self.write_word(UNLOCK_ADDR_1, ERASE)?;
        self.write_word(UNLOCK_ADDR_1, UNLOCK_DATA_1)?;
        self.write_word(UNLOCK_ADDR_2, UNLOCK_DATA_2)?;
        self.write_word(UNLOCK_ADDR_1, CHIP_ERASE)?;
        log::info!("Chip erase started, waiting {:?}", self.erase_wait);
        sleep(self.erase_wait);
        self.write_word(UNLOCK_ADDR_1, RESET)
    }

    /// Check the first words of the chip read back as erased.
    pub fn verify_erased(&mut self) -> Result<()> {
        let words = (0..BLANK_CHECK_WORDS)
            .map(|i| self.read_word(i * 2))
            .collect::<Result<Vec<u16>>>()?;
        if words.iter().any(|&w| w != ERASED_WORD) {
            return Err(Error::EraseVerification { words });
        }
        Ok(())
    }

    /// Erase (unless skipped) and program `image`, returning the number of
    /// bytes written. Stops early when `cancel` is raised.
    ///
    /// The flash is always locked again afterwards, also on error. An image
    /// reaching past the end of the flash is rejected before anything is sent.
    pub fn load_flash(
        &mut self,
        image: &FirmwareImage,
        options: &LoadOptions,
        progress: &ProgressBar,
        cancel: &AtomicBool,
    ) -> Result<usize> {
        let end = u32::try_from(image.data.len())
            .ok()
            .and_then(|len| image.base.checked_add(len));
        if !matches!(end, Some(end) if end <= SIZE) {
            return Err(ValidationError::Argument(format!(
                "{} bytes at 0x{:08x} don't fit in the 0x{:x} byte flash",
                image.data.len(),
                image.base,
                SIZE
            ))
            .into());
        }

        if options.skip_erase {
            log::info!("Skipping chip erase");
        } else {
            self.chip_erase()?;
            self.verify_erased()?;
            log::info!("Flash erased");
        }

        self.enter_unlock_bypass()?;
        let written = self.program_words(image, progress, cancel);
        let locked = self.exit_unlock_bypass();
        let written = written?;
        locked?;
        progress.finish();
        log::info!("Loaded {} bytes into flash", written);
        Ok(written)
    }

    fn program_words(
        &mut self,
        image: &FirmwareImage,
        progress: &ProgressBar,
        cancel: &AtomicBool,
    ) -> Result<usize> {
        progress.set_length(image.data.len() as u64);
        let mut written = 0;
        let mut address = image.base;
        for pair in image.data.chunks(2) {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Flash load cancelled after {} bytes", written);
                break;
            }
            let word = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0xff)]);
            self.write_bypassed(address, word)?;
            address = address.wrapping_add(2);
            written += pair.len();
            progress.inc(pair.len() as u64);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdm::tests::{mock, session};
    use crate::constants::commands;

    #[test]
    fn bypassed_write_needs_unlock() {
        let mut bdm = session();
        assert!(matches!(
            bdm.write_bypassed(0x10, 0x1234),
            Err(Error::ProtocolState {
                expected: FlashState::UnlockBypassActive,
                actual: FlashState::Locked,
            })
        ));
        assert!(mock(&mut bdm).sent().is_empty());
    }

    #[test]
    fn bypass_sequence() {
        let mut bdm = session();
        bdm.enter_unlock_bypass().unwrap();
        assert_eq!(bdm.flash_state(), FlashState::UnlockBypassActive);
        assert!(mock(&mut bdm).flash_bypass_active());

        bdm.write_bypassed(0x10, 0x1234).unwrap();
        bdm.write_bypassed(0x12, 0xabcd).unwrap();
        bdm.exit_unlock_bypass().unwrap();
        assert_eq!(bdm.flash_state(), FlashState::Locked);
        assert!(!mock(&mut bdm).flash_bypass_active());

        assert_eq!(mock(&mut bdm).peek_word(0x10), 0x1234);
        assert_eq!(mock(&mut bdm).peek_word(0x12), 0xabcd);
        // 3 unlock + 2 per word + 2 exit
        let writes = mock(&mut bdm)
            .executed()
            .iter()
            .filter(|&&op| op == commands::WRITE_WORD)
            .count();
        assert_eq!(writes, 9);

        assert!(bdm.write_bypassed(0x14, 0).is_err());
    }

    #[test]
    fn unlock_key_on_the_wire() {
        let mut bdm = session();
        bdm.enter_unlock_bypass().unwrap();
        let expected: Vec<u8> = [
            (0x0aaa, 0xaa),
            (0x0554, 0x55),
            (0x0aaa, 0x20),
        ]
        .iter()
        .flat_map(|&(addr, data): &(u16, u16)| {
            [0x1840, 0, addr, data]
                .into_iter()
                .flat_map(|w: u16| [b'S', (w >> 8) as u8, w as u8])
        })
        .collect();
        assert_eq!(mock(&mut bdm).sent(), &expected[..]);
    }

    #[test]
    fn write_enable_programs_one_word() {
        let mut bdm = session();
        bdm.flash_write_enable().unwrap();
        let expected: Vec<u8> = [(0x0aaa, 0xaa), (0x0554, 0x55), (0x0aaa, 0xa0)]
            .iter()
            .flat_map(|&(addr, data): &(u16, u16)| {
                [0x1840, 0, addr, data]
                    .into_iter()
                    .flat_map(|w: u16| [b'S', (w >> 8) as u8, w as u8])
            })
            .collect();
        assert_eq!(mock(&mut bdm).sent(), &expected[..]);
        assert_eq!(bdm.flash_state(), FlashState::Locked);

        bdm.write_word(0x40, 0x1234).unwrap();
        bdm.write_word(0x42, 0x5678).unwrap();
        assert_eq!(bdm.read_word(0x40).unwrap(), 0x1234);
        assert_eq!(bdm.read_word(0x42).unwrap(), 0xffff);
    }

    #[test]
    fn programming_only_clears_bits() {
        let mut bdm = session();
        bdm.enter_unlock_bypass().unwrap();
        bdm.write_bypassed(0x20, 0xff00).unwrap();
        bdm.write_bypassed(0x20, 0x0ff0).unwrap();
        bdm.exit_unlock_bypass().unwrap();
        assert_eq!(bdm.read_word(0x20).unwrap(), 0x0f00);
    }

    #[test]
    fn chip_erase_keeps_flash_state() {
        let mut bdm = session();
        mock(&mut bdm).poke_word(0x0, 0x1234);
        bdm.chip_erase().unwrap();
        assert_eq!(bdm.flash_state(), FlashState::Locked);
        assert_eq!(mock(&mut bdm).erase_count(), 1);
        bdm.verify_erased().unwrap();

        bdm.enter_unlock_bypass().unwrap();
        bdm.chip_erase().unwrap();
        assert_eq!(bdm.flash_state(), FlashState::UnlockBypassActive);
    }

    #[test]
    fn unerased_chip_is_reported() {
        let mut bdm = session();
        mock(&mut bdm).poke_word(0x6, 0x0000);
        match bdm.verify_erased() {
            Err(Error::EraseVerification { words }) => {
                assert_eq!(words.len(), 8);
                assert_eq!(words[3], 0x0000);
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn load_programs_image_and_relocks() {
        let mut bdm = session();
        mock(&mut bdm).poke_word(0x100, 0x0000);
        let image = FirmwareImage {
            base: 0x100,
            data: vec![0xde, 0xad, 0xbe, 0xef, 0x42, 0xff],
        };
        let written = bdm
            .load_flash(
                &image,
                &LoadOptions::default(),
                &ProgressBar::hidden(),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(written, 6);
        assert_eq!(bdm.flash_state(), FlashState::Locked);
        let words: Vec<u16> = bdm.dump_words(0x100, 3).collect::<Result<_>>().unwrap();
        assert_eq!(words, vec![0xdead, 0xbeef, 0x42ff]);
    }

    #[test]
    fn image_outside_flash_is_rejected_untouched() {
        let mut bdm = session();
        for (base, len) in [(0xffff_fffe, 4), (0x001f_fffe, 4), (0x0040_0000, 2)] {
            let image = FirmwareImage {
                base,
                data: vec![0; len],
            };
            let err = bdm
                .load_flash(
                    &image,
                    &LoadOptions::default(),
                    &ProgressBar::hidden(),
                    &AtomicBool::new(false),
                )
                .unwrap_err();
            assert!(err.is_validation());
        }
        assert!(mock(&mut bdm).sent().is_empty());
        assert_eq!(mock(&mut bdm).erase_count(), 0);
    }

    #[test]
    fn cancelled_load_still_relocks() {
        let mut bdm = session();
        let image = FirmwareImage {
            base: 0,
            data: vec![0; 64],
        };
        let options = LoadOptions { skip_erase: true };
        let written = bdm
            .load_flash(&image, &options, &ProgressBar::hidden(), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(bdm.flash_state(), FlashState::Locked);
        assert!(!mock(&mut bdm).flash_bypass_active());
        assert_eq!(mock(&mut bdm).erase_count(), 0);
    }
}
