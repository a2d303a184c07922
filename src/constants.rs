//! Constants about the BDM protocol, the serial bridge and the target board.

pub const NUM_ADDRESS_REGISTERS: u8 = 8;
pub const NUM_DATA_REGISTERS: u8 = 8;

/// Control register encodings are a 12-bit field.
pub const MAX_CONTROL_REGISTER: u16 = 0x0fff;

/// BDM command opcodes (first word of each transaction).
pub mod commands {
    pub const NOP: u16 = 0x0000;
    pub const GO: u16 = 0x0c00;

    pub const READ_BYTE: u16 = 0x1900;
    pub const READ_WORD: u16 = 0x1940;
    pub const READ_LONG: u16 = 0x1980;
    pub const WRITE_BYTE: u16 = 0x1800;
    pub const WRITE_WORD: u16 = 0x1840;
    pub const WRITE_LONG: u16 = 0x1880;
    /// Read the word following the last accessed address.
    pub const DUMP_WORD: u16 = 0x1d40;

    pub const READ_AREG: u16 = 0x2188;
    pub const READ_DREG: u16 = 0x2180;
    pub const WRITE_AREG: u16 = 0x2088;
    pub const WRITE_DREG: u16 = 0x2080;

    pub const READ_CREG: u16 = 0x2980;
    pub const WRITE_CREG: u16 = 0x2880;

    pub const READ_CSR: u16 = 0x2d80;
    pub const WRITE_CSR: u16 = 0x2c80;
}

/// Single-byte commands understood by the Arduino bridge.
pub mod frames {
    pub const SEND: u8 = b's';
    pub const RECEIVE: u8 = b'r';
    pub const SEND_RECEIVE: u8 = b'S';
    pub const RESET: u8 = b'R';
    pub const BREAKPOINT: u8 = b'B';
    pub const PING: u8 = b'P';

    pub const PONG: &[u8; 4] = b"PONG";
    /// Marker byte for a response whose status bit is set.
    pub const STATUS_SET: u8 = b'N';
    pub const RESPONSE_LEN: usize = 3;

    pub const BANNER: &str = "Motorola Coldfire Debug Interface";
    pub const READY: &str = "Ready";
}

/// Response data values that carry meaning when the status bit is set.
pub mod sentinels {
    pub const ERROR: u16 = 0x0001;
    pub const ILLEGAL: u16 = 0xffff;
}

/// AMD-style command set of the boot flash mapped at 0x00000000.
pub mod flash {
    /// Boot flash size in bytes, mapped from address 0.
    pub const SIZE: u32 = 0x0020_0000;

    pub const UNLOCK_ADDR_1: u32 = 0x555 << 1;
    pub const UNLOCK_ADDR_2: u32 = 0x2aa << 1;

    pub const UNLOCK_DATA_1: u16 = 0xaa;
    pub const UNLOCK_DATA_2: u16 = 0x55;

    pub const PROGRAM: u16 = 0xa0;
    pub const UNLOCK_BYPASS: u16 = 0x20;
    pub const BYPASS_RESET_1: u16 = 0x90;
    pub const BYPASS_RESET_2: u16 = 0x00;
    pub const ERASE: u16 = 0x80;
    pub const CHIP_ERASE: u16 = 0x10;
    pub const RESET: u16 = 0xf0;

    pub const ERASED_WORD: u16 = 0xffff;
    /// Words checked after a chip erase.
    pub const BLANK_CHECK_WORDS: u32 = 8;
}

/// Encodings of the control registers the library itself relies on.
pub mod control_registers {
    pub const SR: u16 = 0x80e;
    pub const PC: u16 = 0x80f;
    pub const MBAR: u16 = 0xc0f;
}

/// MCF5307 system integration module offsets, relative to MBAR.
pub mod sim {
    /// Where the SRAM test places the on-chip peripherals.
    pub const MBAR_BASE: u32 = 0x1000_0000;
    /// MBAR valid bit.
    pub const MBAR_VALID: u32 = 0x1;
    /// The only SRAM mapping the chip-select setup below produces.
    pub const SRAM_BASE: u32 = 0x0020_0000;
    pub const CSAR1_VALUE: u16 = 0x20;
    pub const CSCR1_VALUE: u16 = 0x120;
    /// 1 MiB mask plus the valid bit.
    pub const CSMR1_VALUE: u32 = 0xf_0001;

    pub const CSAR1: u32 = 0x8c;
    pub const CSMR1: u32 = 0x90;
    pub const CSCR1: u32 = 0x96;
    pub const PADDR: u32 = 0x244;
    pub const PADAT: u32 = 0x248;

    /// The low bits of MBAR are status/mask bits, not address bits.
    pub const MBAR_ADDRESS_MASK: u32 = 0xffff_fffe;
}
