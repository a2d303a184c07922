//! Single-step instruction tracing.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bdm::Bdm;
use crate::constants::{control_registers, sim};
use crate::error::Result;
use crate::transport::Transport;

/// Column titles matching [`TraceRow`]'s `Display` output.
pub const TRACE_HEADER: &str = "PC        \tSP        \tD0        \tD1        \tD2        \tD3        \tA0        \tA1        \tA2        \tA3        \tMBAR      \tPADDR     \tPADAT     ";

/// Processor state captured before one instruction executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceRow {
    pub pc: u32,
    pub sp: u32,
    pub data: [u32; 4],
    pub address: [u32; 4],
    pub mbar: u32,
    pub paddr: u16,
    pub padat: u16,
}

impl fmt::Display for TraceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}\t0x{:08x}", self.pc, self.sp)?;
        for v in self.data.iter().chain(&self.address) {
            write!(f, "\t0x{:08x}", v)?;
        }
        write!(
            f,
            "\t0x{:08x}\t0x{:08x}\t0x{:08x}",
            self.mbar, self.paddr, self.padat
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub start: u32,
    pub max_steps: u64,
    /// Stop once the PC reads zero, which usually means a crash or reset.
    pub stop_on_zero: bool,
}

impl<T: Transport> Bdm<T> {
    pub fn trace_row(&mut self) -> Result<TraceRow> {
        let pc = self.read_control_register(control_registers::PC)?;
        let sp = self.read_address_register(7)?;
        let mut data = [0u32; 4];
        for (n, d) in (0u8..).zip(data.iter_mut()) {
            *d = self.read_data_register(n)?;
        }
        let mut address = [0u32; 4];
        for (n, a) in (0u8..).zip(address.iter_mut()) {
            *a = self.read_address_register(n)?;
        }
        let mbar = self.read_control_register(control_registers::MBAR)?;
        let peripherals = mbar & sim::MBAR_ADDRESS_MASK;
        let paddr = self.read_word(peripherals.wrapping_add(sim::PADDR))?;
        let padat = self.read_word(peripherals.wrapping_add(sim::PADAT))?;
        Ok(TraceRow {
            pc,
            sp,
            data,
            address,
            mbar,
            paddr,
            padat,
        })
    }

    /// Start at `options.start` and single-step, handing the state before
    /// each instruction to `on_row`. Returns the number of rows produced.
    pub fn trace_execution<F>(
        &mut self,
        options: &TraceOptions,
        cancel: &AtomicBool,
        mut on_row: F,
    ) -> Result<u64>
    where
        F: FnMut(&TraceRow) -> Result<()>,
    {
        log::info!("Starting execution from 0x{:08x}", options.start);
        self.write_control_register(control_registers::PC, options.start)?;

        let mut rows = 0;
        while rows < options.max_steps {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Trace cancelled after {} instructions", rows);
                break;
            }
            let row = self.trace_row()?;
            on_row(&row)?;
            rows += 1;
            if row.pc == 0 && options.stop_on_zero {
                log::info!("Program counter is 0, the processor has probably crashed");
                break;
            }
            self.step()?;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdm::tests::{mock, session};

    fn options(start: u32, max_steps: u64) -> TraceOptions {
        TraceOptions {
            start,
            max_steps,
            stop_on_zero: false,
        }
    }

    #[test]
    fn steps_through_instructions() {
        let mut bdm = session();
        mock(&mut bdm).set_address_register(7, 0x0030_0000);
        mock(&mut bdm).set_data_register(2, 0x42);
        let mut rows = vec![];
        let n = bdm
            .trace_execution(&options(0x400, 3), &AtomicBool::new(false), |row| {
                rows.push(*row);
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 3);
        let pcs: Vec<u32> = rows.iter().map(|r| r.pc).collect();
        assert_eq!(pcs, vec![0x400, 0x402, 0x404]);
        assert!(rows.iter().all(|r| r.sp == 0x0030_0000 && r.data[2] == 0x42));
        assert!(bdm.single_step_mode());
    }

    #[test]
    fn reads_port_registers_through_mbar() {
        let mut bdm = session();
        mock(&mut bdm).set_control_register(control_registers::MBAR, 0x1000_0001);
        mock(&mut bdm).poke_word(0x1000_0244, 0x00f0);
        mock(&mut bdm).poke_word(0x1000_0248, 0x0055);
        let row = bdm.trace_row().unwrap();
        assert_eq!(row.mbar, 0x1000_0001);
        assert_eq!((row.paddr, row.padat), (0x00f0, 0x0055));
    }

    #[test]
    fn stops_on_zero_pc() {
        let mut bdm = session();
        let opts = TraceOptions {
            stop_on_zero: true,
            ..options(0, 10)
        };
        let n = bdm
            .trace_execution(&opts, &AtomicBool::new(false), |_| Ok(()))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn cancelled_before_first_row() {
        let mut bdm = session();
        let n = bdm
            .trace_execution(&options(0x400, 10), &AtomicBool::new(true), |_| {
                panic!("no rows expected")
            })
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn callback_error_stops_trace() {
        let mut bdm = session();
        let mut seen = 0;
        let result = bdm.trace_execution(&options(0x400, 10), &AtomicBool::new(false), |_| {
            seen += 1;
            if seen == 2 {
                Err(crate::Error::Target)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(crate::Error::Target)));
        assert_eq!(seen, 2);
    }

    #[test]
    fn row_formatting() {
        let row = TraceRow {
            pc: 0x400,
            paddr: 0xff,
            ..Default::default()
        };
        let text = row.to_string();
        assert_eq!(text.split('\t').count(), TRACE_HEADER.split('\t').count());
        assert!(text.starts_with("0x00000400\t0x00000000\t"));
        assert!(text.ends_with("\t0x000000ff\t0x00000000"));
    }
}
