//! Register consistency self-test.
use rand::Rng;

use crate::bdm::Bdm;
use crate::constants::{NUM_ADDRESS_REGISTERS, NUM_DATA_REGISTERS};
use crate::error::{Error, RegisterKind, Result};
use crate::transport::Transport;

const KINDS: [RegisterKind; 2] = [RegisterKind::Address, RegisterKind::Data];

impl<T: Transport> Bdm<T> {
    /// Make sure the target is halted and listening.
    ///
    /// Reads all general registers twice, then writes random values and
    /// reads them back, then restores the original contents. Nothing is
    /// restored if a mismatch is found.
    pub fn consistency_check(&mut self) -> Result<()> {
        self.consistency_check_with(&mut rand::rng())
    }

    pub fn consistency_check_with<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let original = [
            self.read_registers(RegisterKind::Address)?,
            self.read_registers(RegisterKind::Data)?,
        ];
        for (kind, first) in KINDS.into_iter().zip(&original) {
            let second = self.read_registers(kind)?;
            if &second != first {
                return Err(Error::InconsistentRead {
                    kind,
                    first: first.clone(),
                    second,
                });
            }
        }

        let patterns = KINDS.map(|kind| {
            (0..register_count(kind))
                .map(|_| rng.random::<u32>())
                .collect::<Vec<_>>()
        });
        for (kind, values) in KINDS.into_iter().zip(&patterns) {
            self.write_registers(kind, values)?;
        }
        for (kind, written) in KINDS.into_iter().zip(&patterns) {
            let read = self.read_registers(kind)?;
            if &read != written {
                return Err(Error::WriteVerification {
                    kind,
                    written: written.clone(),
                    read,
                });
            }
        }

        for (kind, values) in KINDS.into_iter().zip(&original) {
            self.write_registers(kind, values)?;
        }
        log::debug!("consistency check passed");
        Ok(())
    }

    fn read_registers(&mut self, kind: RegisterKind) -> Result<Vec<u32>> {
        (0..register_count(kind))
            .map(|n| self.read_register(kind, n))
            .collect()
    }

    fn write_registers(&mut self, kind: RegisterKind, values: &[u32]) -> Result<()> {
        for (n, &value) in (0u8..).zip(values) {
            self.write_register(kind, n, value)?;
        }
        Ok(())
    }
}

fn register_count(kind: RegisterKind) -> u8 {
    match kind {
        RegisterKind::Address => NUM_ADDRESS_REGISTERS,
        RegisterKind::Data => NUM_DATA_REGISTERS,
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::bdm::tests::{mock, session};
    use crate::constants::commands;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    #[test]
    fn passes_and_restores() {
        let mut bdm = session();
        for n in 0..8 {
            mock(&mut bdm).set_address_register(n, 0xa000_0000 + n as u32);
            mock(&mut bdm).set_data_register(n, 0xd000_0000 + n as u32);
        }
        bdm.consistency_check_with(&mut seeded()).unwrap();
        for n in 0..8 {
            assert_eq!(mock(&mut bdm).address_register(n), 0xa000_0000 + n as u32);
            assert_eq!(mock(&mut bdm).data_register(n), 0xd000_0000 + n as u32);
        }
        // two reads + verify read, two writes
        let executed = mock(&mut bdm).executed();
        let reads = executed.iter().filter(|&&op| op & 0xfff0 == 0x2180).count();
        let writes = executed.iter().filter(|&&op| op & 0xfff0 == 0x2080).count();
        assert_eq!(reads, 48);
        assert_eq!(writes, 32);
    }

    #[test]
    fn running_target_fails_before_writing() {
        let mut bdm = session();
        mock(&mut bdm).set_running(true);
        match bdm.consistency_check_with(&mut seeded()) {
            Err(Error::InconsistentRead { kind, first, second }) => {
                assert_eq!(kind, RegisterKind::Address);
                assert_ne!(first, second);
            }
            other => panic!("unexpected {:?}", other.err()),
        }
        let executed = mock(&mut bdm).executed();
        assert!(
            !executed
                .iter()
                .any(|&op| op & 0xfff0 == commands::WRITE_DREG)
        );
    }

    #[test]
    fn stuck_register_fails_verification() {
        let mut bdm = session();
        mock(&mut bdm).set_stuck_register(RegisterKind::Data, 5);
        mock(&mut bdm).set_data_register(5, 0x1234_5678);
        match bdm.consistency_check_with(&mut seeded()) {
            Err(Error::WriteVerification { kind, written, read }) => {
                assert_eq!(kind, RegisterKind::Data);
                assert_eq!(read[5], 0x1234_5678);
                assert_eq!(read[..5], written[..5]);
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn default_rng_passes_on_halted_target() {
        let mut bdm = session();
        bdm.consistency_check().unwrap();
    }
}
