//! Packet codec on top of a bridge transport.
//!
//! BDM is a pipelined serial protocol: the 17-bit packet clocked out while a
//! command word is clocked in is the answer to the *previous* word. The
//! bridge exposes that directly, so callers of [`Bridge::send_and_receive_packet`]
//! get the previous command's response and have to drain the last one with
//! [`Bridge::receive_packet`].
use crate::constants::frames;
use crate::error::{Error, Result};
use crate::protocol::{Frame, Response};
use crate::transport::Transport;

pub struct Bridge<T: Transport> {
    transport: T,
}

impl<T: Transport> Bridge<T> {
    /// Wait for the bridge to introduce itself. No command is sent before
    /// both greeting lines have been seen.
    pub fn connect(mut transport: T) -> Result<Self> {
        for expected in [frames::BANNER, frames::READY] {
            let line = read_line(&mut transport)?;
            if !line.contains(expected) {
                return Err(Error::Handshake { line, expected });
            }
        }
        log::info!("Bridge ready");
        Ok(Bridge { transport })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn ping(&mut self) -> Result<()> {
        let mut buf = [0u8; 4];
        self.transfer(Frame::Ping, &mut buf)?;
        if &buf != frames::PONG {
            return Err(Error::Ping {
                response: buf.to_vec(),
            });
        }
        Ok(())
    }

    /// Pull the target into background debug mode, resetting it first if asked.
    pub fn enter_debug_mode(&mut self, reset: bool) -> Result<()> {
        log::debug!("entering debug mode (reset: {})", reset);
        let frame = if reset { Frame::Reset } else { Frame::Breakpoint };
        self.transfer(frame, &mut [])
    }

    /// Send a command word without collecting anything.
    pub fn send_packet(&mut self, word: u16) -> Result<()> {
        self.transfer(Frame::Send(word), &mut [])
    }

    /// Clock in a NOP and return the pending response.
    pub fn receive_packet(&mut self) -> Result<Response> {
        self.exchange(Frame::Receive)
    }

    /// Send a command word, returning the response to the previous one.
    pub fn send_and_receive_packet(&mut self, word: u16) -> Result<Response> {
        self.exchange(Frame::SendReceive(word))
    }

    fn exchange(&mut self, frame: Frame) -> Result<Response> {
        let mut buf = [0u8; frames::RESPONSE_LEN];
        self.transfer(frame, &mut buf)?;
        Response::decode(&buf)
    }

    fn transfer(&mut self, frame: Frame, reply: &mut [u8]) -> Result<()> {
        let req = frame.into_raw();
        log::trace!("=> {}", hex::encode(&req));
        self.transport.write_raw(&req)?;
        if !reply.is_empty() {
            self.transport.read_raw(reply)?;
            log::trace!("<= {}", hex::encode(&reply));
        }
        Ok(())
    }
}

fn read_line<T: Transport>(transport: &mut T) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        transport.read_raw(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn handshake_accepts_bridge_banner() {
        let bridge = Bridge::connect(MockTransport::new()).unwrap();
        assert!(bridge.transport().sent().is_empty());
    }

    #[test]
    fn handshake_rejects_wrong_first_line() {
        let mock = MockTransport::with_banner("Hello\r\nReady\r\n");
        match Bridge::connect(mock) {
            Err(Error::Handshake { line, expected }) => {
                assert_eq!(line, "Hello");
                assert_eq!(expected, frames::BANNER);
            }
            _ => panic!("handshake should fail"),
        }
    }

    #[test]
    fn handshake_rejects_wrong_second_line() {
        let mock = MockTransport::with_banner("Motorola Coldfire Debug Interface v2\r\nBusy\r\n");
        assert!(matches!(
            Bridge::connect(mock),
            Err(Error::Handshake { expected: frames::READY, .. })
        ));
    }

    #[test]
    fn silent_bridge_times_out() {
        let mock = MockTransport::with_banner("");
        assert!(matches!(Bridge::connect(mock), Err(Error::Transport(_))));
    }

    #[test]
    fn ping_and_debug_mode() {
        let mut bridge = Bridge::connect(MockTransport::new()).unwrap();
        bridge.ping().unwrap();
        bridge.enter_debug_mode(true).unwrap();
        bridge.enter_debug_mode(false).unwrap();
        assert_eq!(bridge.transport().sent(), b"PRB");
        assert!(bridge.transport().is_halted());
    }

    #[test]
    fn send_and_receive_returns_previous_response() {
        let mut bridge = Bridge::connect(MockTransport::new()).unwrap();
        bridge.transport_mut().set_csr(0x1234_5678);
        // not ready while the command is being clocked in
        assert_eq!(
            bridge.send_and_receive_packet(0x2d80).unwrap(),
            Response::new(true, 0)
        );
        assert_eq!(bridge.receive_packet().unwrap().data, 0x1234);
        assert_eq!(bridge.receive_packet().unwrap().data, 0x5678);
        assert_eq!(bridge.transport().sent(), b"S\x2d\x80rr");
    }

    #[test]
    fn error_sentinel_aborts() {
        let mut bridge = Bridge::connect(MockTransport::new()).unwrap();
        bridge
            .transport_mut()
            .inject_response(Response::new(true, 0x0001));
        assert!(matches!(
            bridge.send_and_receive_packet(0x0000),
            Err(Error::Target)
        ));
    }
}
