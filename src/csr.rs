//! Debug Configuration/Status Register.
use bitfield::bitfield;

bitfield! {
    /// The debug module's CSR, as read with `RDMREG`.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Csr(u32);
    impl Debug;

    u8;
    /// Breakpoint status.
    pub bstat, _: 31, 28;
    /// Hardware revision level.
    pub hrl, _: 23, 20;

    bool;
    /// Fault-on-fault.
    pub fof, _: 27;
    /// Hardware breakpoint trigger.
    pub trg, _: 26;
    /// Processor halted.
    pub halt, _: 25;
    /// BKPT asserted.
    pub bkpt, _: 24;
    /// Ignore pending interrupts while stepping.
    pub ipi, _: 5;
    /// Halt after every instruction.
    pub single_step_mode, set_single_step_mode: 4;
}

impl From<u32> for Csr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Csr> for u32 {
    fn from(value: Csr) -> Self {
        value.0
    }
}

impl std::fmt::Display for Csr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x} (bstat {}, hrl {}", self.0, self.bstat(), self.hrl())?;
        let flags = [
            (self.halt(), "halt"),
            (self.bkpt(), "bkpt"),
            (self.fof(), "fof"),
            (self.trg(), "trg"),
            (self.ipi(), "ipi"),
            (self.single_step_mode(), "ssm"),
        ];
        for (_, name) in flags.iter().filter(|(set, _)| *set) {
            write!(f, ", {}", name)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_bit() {
        assert!(Csr(0x0000_0010).single_step_mode());
        assert!(!Csr(0x0000_0000).single_step_mode());
        assert!(!Csr(0xffff_ffef).single_step_mode());
    }

    #[test]
    fn setting_step_mode_only_touches_bit_4() {
        let mut csr = Csr(0xa5a5_a5a5);
        csr.set_single_step_mode(true);
        assert_eq!(u32::from(csr), 0xa5a5_a5b5);
        csr.set_single_step_mode(false);
        assert_eq!(u32::from(csr), 0xa5a5_a5a5);
    }

    #[test]
    fn status_fields() {
        let csr = Csr(0x2220_0000);
        assert!(csr.halt());
        assert!(!csr.bkpt());
        assert_eq!(csr.bstat(), 0x2);
        assert_eq!(csr.hrl(), 0x2);
    }

    #[test]
    fn display_lists_set_flags() {
        assert_eq!(Csr(0).to_string(), "0x00000000 (bstat 0, hrl 0)");
        assert_eq!(
            Csr(0x1f10_0030).to_string(),
            "0x1f100030 (bstat 1, hrl 1, halt, bkpt, fof, trg, ipi, ssm)"
        );
        assert_eq!(
            Csr(0x0200_0010).to_string(),
            "0x02000010 (bstat 0, hrl 0, halt, ssm)"
        );
    }
}
