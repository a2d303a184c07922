//! ColdFire Background Debug Mode over an Arduino serial bridge.

pub mod bdm;
pub mod bridge;
pub mod check;
pub mod constants;
pub mod csr;
pub mod dump;
pub mod error;
pub mod flashing;
pub mod format;
pub mod protocol;
pub mod registers;
pub mod sram;
pub mod trace;
pub mod transport;

pub use self::bdm::{Bdm, Width};
pub use self::bridge::Bridge;
pub use self::csr::Csr;
pub use self::error::{Error, RegisterKind, Result, ValidationError};
pub use self::flashing::{FlashState, LoadOptions};
pub use self::protocol::{Frame, Response};
pub use self::registers::{RegisterMap, RegisterName};
pub use self::transport::Transport;
