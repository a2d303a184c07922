//! Abstract bridge transport interface.
use std::io;

pub use self::mock::MockTransport;
pub use self::serial::{Baudrate, SerialTransport};

mod mock;
mod serial;

/// Abstraction of the byte channel to the bridge.
/// A serial port in practice, or an emulated target for dry runs and tests.
pub trait Transport {
    fn write_raw(&mut self, raw: &[u8]) -> io::Result<()>;
    /// Block until `buf` is filled, or fail with a timeout.
    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_raw(&mut self, raw: &[u8]) -> io::Result<()> {
        (**self).write_raw(raw)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_raw(buf)
    }
}
