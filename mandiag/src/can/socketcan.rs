//! Linux SocketCAN backend.

use std::io;
use std::time::Duration;

use log::{debug, info, trace};
use socketcan::{CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};

use crate::can::{CanBus, CanFrame, MAX_EXTENDED_ID};
use crate::error::{Error, Result};

/// Shortest read timeout handed to the socket; zero is rejected by the OS.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Raw CAN socket bound to one interface.
pub struct SocketCanBus {
    socket: Option<CanSocket>,
    interface: String,
}

impl SocketCanBus {
    /// Open a raw CAN socket on `interface` (e.g. `can0`, `vcan0`).
    pub fn open(interface: &str) -> Result<Self> {
        let socket = CanSocket::open(interface).map_err(|e| {
            Error::Can(format!(
                "Failed to open raw CAN socket on {interface}: {e}"
            ))
        })?;

        info!("Opened CAN interface {interface}");
        Ok(Self {
            socket: Some(socket),
            interface: interface.to_string(),
        })
    }

    /// Interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn socket(&self) -> Result<&CanSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| Error::Can(format!("CAN interface {} is closed", self.interface)))
    }
}

/// Convert a received frame, skipping error frames and 11-bit frames.
fn from_raw(raw: &RawFrame) -> Result<Option<CanFrame>> {
    if raw.is_error_frame() {
        debug!("Ignoring CAN error frame 0x{:X}", raw.raw_id());
        return Ok(None);
    }
    if !raw.is_extended() {
        debug!("Ignoring standard CAN frame 0x{:03X}", raw.raw_id());
        return Ok(None);
    }

    let frame = CanFrame::new(raw.raw_id() & MAX_EXTENDED_ID, raw.data())?;
    trace!("RX: {frame}");
    Ok(Some(frame))
}

impl CanBus for SocketCanBus {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let raw = ExtendedId::new(frame.id())
            .and_then(|id| RawFrame::new(id, frame.data()))
            .ok_or_else(|| {
                Error::InvalidCanFrame(format!(
                    "Failed to create extended frame with ID 0x{:X}",
                    frame.id()
                ))
            })?;

        self.socket()?
            .write_frame(&raw)
            .map_err(|e| Error::Can(format!("CAN TX failed for ID=0x{:X}: {e}", frame.id())))?;

        trace!("TX: {frame}");
        Ok(())
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        let socket = self.socket()?;
        socket
            .set_read_timeout(timeout.max(MIN_READ_TIMEOUT))
            .map_err(|e| Error::Can(format!("Failed to set read timeout: {e}")))?;

        match socket.read_frame() {
            Ok(raw) => from_raw(&raw),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            },
            Err(e) => Err(Error::Can(format!("CAN RX failed: {e}"))),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            info!("Closed CAN interface {}", self.interface);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socketcan::StandardId;

    #[test]
    fn test_extended_frame_is_received() {
        let id = ExtendedId::new(0x18DA_F110).unwrap();
        let raw = RawFrame::new(id, &[0x62, 0xF1, 0x90]).unwrap();

        let frame = from_raw(&raw).unwrap().unwrap();
        assert_eq!(frame.id(), 0x18DA_F110);
        assert_eq!(frame.data(), [0x62, 0xF1, 0x90]);
    }

    #[test]
    fn test_standard_frame_is_skipped() {
        // Same low bits as an extended reply ID would have
        let id = StandardId::new(0x110).unwrap();
        let raw = RawFrame::new(id, &[0x62]).unwrap();

        assert!(from_raw(&raw).unwrap().is_none());
    }

    #[test]
    fn test_open_missing_interface_fails() {
        assert!(matches!(
            SocketCanBus::open("mandiag-nocan0"),
            Err(Error::Can(_))
        ));
    }
}
