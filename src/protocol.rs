//! Byte framing between host and the Arduino BDM bridge.

use std::fmt;

use scroll::{Pread, Pwrite};

use crate::constants::{frames, sentinels};
use crate::error::{Error, Result};

/// One request to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Shift a 16-bit word into the target, discarding what comes back.
    Send(u16),
    /// Shift a NOP into the target and return the 17-bit packet shifted out.
    Receive,
    /// Shift a word into the target and return the packet shifted out.
    ///
    /// The packet belongs to the *previous* command, BDM is pipelined.
    SendReceive(u16),
    /// Assert BKPT while resetting the target.
    Reset,
    /// Assert BKPT without reset.
    Breakpoint,
    /// Liveness check, the bridge answers `PONG`.
    Ping,
}

impl Frame {
    pub fn into_raw(self) -> Vec<u8> {
        match self {
            Frame::Send(word) => with_word(frames::SEND, word),
            Frame::SendReceive(word) => with_word(frames::SEND_RECEIVE, word),
            Frame::Receive => vec![frames::RECEIVE],
            Frame::Reset => vec![frames::RESET],
            Frame::Breakpoint => vec![frames::BREAKPOINT],
            Frame::Ping => vec![frames::PING],
        }
    }

    /// Number of bytes the bridge sends back for this frame.
    pub fn reply_len(&self) -> usize {
        match self {
            Frame::Receive | Frame::SendReceive(_) => frames::RESPONSE_LEN,
            Frame::Ping => frames::PONG.len(),
            _ => 0,
        }
    }

    /// Parse one frame from the head of `raw`, returning it and its length.
    pub fn from_raw(raw: &[u8]) -> Option<(Frame, usize)> {
        let word = || raw.pread_with::<u16>(1, scroll::BE).ok();
        let frame = match *raw.first()? {
            frames::SEND => (Frame::Send(word()?), 3),
            frames::SEND_RECEIVE => (Frame::SendReceive(word()?), 3),
            frames::RECEIVE => (Frame::Receive, 1),
            frames::RESET => (Frame::Reset, 1),
            frames::BREAKPOINT => (Frame::Breakpoint, 1),
            frames::PING => (Frame::Ping, 1),
            _ => return None,
        };
        Some(frame)
    }
}

// Commands go out big-endian.
fn with_word(cmd: u8, word: u16) -> Vec<u8> {
    let mut buf = [cmd, 0, 0];
    // a u16 always fits in the two trailing bytes
    let _ = buf.pwrite_with(word, 1, scroll::BE);
    buf.to_vec()
}

/// A 17-bit BDM response: a status bit and a data word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Response {
    pub status: bool,
    pub data: u16,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:04x}]", if self.status { "S" } else { "-" }, self.data)
    }
}

impl Response {
    pub const fn new(status: bool, data: u16) -> Self {
        Response { status, data }
    }

    /// Decode the bridge's 3-byte encoding: a status marker, then the
    /// data word in little-endian order.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let data = raw
            .pread_with::<u16>(1, scroll::LE)
            .map_err(|e| Error::Transport(std::io::Error::other(e.to_string())))?;
        Response::new(raw[0] == frames::STATUS_SET, data).check()
    }

    /// Encode as the bridge would.
    pub fn encode(&self) -> [u8; 3] {
        let [lo, hi] = self.data.to_le_bytes();
        let marker = if self.status { frames::STATUS_SET } else { b'Y' };
        [marker, lo, hi]
    }

    /// Only two data values are meaningful under a set status bit, anything
    /// else (e.g. "not ready") is passed through untouched.
    pub fn check(self) -> Result<Self> {
        match (self.status, self.data) {
            (true, sentinels::ERROR) => Err(Error::Target),
            (true, sentinels::ILLEGAL) => Err(Error::IllegalCommand),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_big_endian() {
        assert_eq!(Frame::Send(0x1940).into_raw(), b"s\x19\x40");
        assert_eq!(Frame::SendReceive(0x2d80).into_raw(), b"S\x2d\x80");
        assert_eq!(Frame::Receive.into_raw(), b"r");
        assert_eq!(Frame::Reset.into_raw(), b"R");
        assert_eq!(Frame::Breakpoint.into_raw(), b"B");
        assert_eq!(Frame::Ping.into_raw(), b"P");
    }

    #[test]
    fn frame_parsing() {
        assert_eq!(
            Frame::from_raw(b"S\x0c\x00r"),
            Some((Frame::SendReceive(0x0c00), 3))
        );
        assert_eq!(Frame::from_raw(b"r"), Some((Frame::Receive, 1)));
        assert_eq!(Frame::from_raw(b"s\x00"), None);
        assert_eq!(Frame::from_raw(b"x"), None);
        assert_eq!(Frame::from_raw(b""), None);
    }

    #[test]
    fn response_words_are_little_endian() {
        let resp = Response::decode(&[b'Y', 0x34, 0x12]).unwrap();
        assert_eq!(resp, Response::new(false, 0x1234));
        let resp = Response::decode(&[b'N', 0x00, 0x00]).unwrap();
        assert_eq!(resp, Response::new(true, 0x0000));
    }

    #[test]
    fn sentinels_only_under_status() {
        assert!(matches!(
            Response::decode(&[b'N', 0x01, 0x00]),
            Err(Error::Target)
        ));
        assert!(matches!(
            Response::decode(&[b'N', 0xff, 0xff]),
            Err(Error::IllegalCommand)
        ));
        // status set, other data: returned verbatim
        for data in [0x0000u16, 0x0002, 0x1234, 0xfffe] {
            let resp = Response::new(true, data);
            assert_eq!(Response::decode(&resp.encode()).unwrap(), resp);
        }
        // status clear: sentinel values are plain data
        assert_eq!(
            Response::decode(&[b'Y', 0xff, 0xff]).unwrap().data,
            0xffff
        );
        assert_eq!(Response::decode(&[0, 0x01, 0x00]).unwrap().data, 0x0001);
    }

    #[test]
    fn short_response_is_transport_error() {
        assert!(matches!(
            Response::decode(&[b'N', 0x01]),
            Err(Error::Transport(_))
        ));
    }
}
