//! CAN variant of the diagnostic exchange.
//!
//! One request frame out, then frames are polled until one arrives with the
//! response arbitration ID. Responses are single-frame and synchronous, so
//! there is no pending cycle at this layer.
//!
//! ```text
//! TX  ID=0x18DA10F1 DLC=3 Data=[22 F1 90]
//! RX  ID=0x18DAF110 DLC=8 Data=[..]        <- discarded, other ECU traffic
//! RX  ID=0x18DAF110 ...                     <- matched by response_id
//! ```

#[cfg(all(target_os = "linux", feature = "socketcan"))]
mod socketcan;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use self::socketcan::SocketCanBus;

use std::fmt;
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::protocol::hex::{bytes_to_hex, tokenize_hex, tokens_to_bytes};

/// Largest 29-bit extended arbitration ID.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Classic CAN payload limit.
pub const MAX_PAYLOAD: usize = 8;

/// Default slice of time handed to one `receive_timeout` call.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A classic CAN frame with an extended ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: [u8; MAX_PAYLOAD],
    len: u8,
}

impl CanFrame {
    /// Build a frame, rejecting IDs above 29 bits and payloads above 8 bytes.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        check_id(id)?;
        if data.len() > MAX_PAYLOAD {
            return Err(Error::InvalidCanFrame(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD}",
                data.len()
            )));
        }

        let mut fixed = [0u8; MAX_PAYLOAD];
        fixed[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            data: fixed,
            // Bounded by MAX_PAYLOAD above
            len: data.len() as u8,
        })
    }

    /// Arbitration ID.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Data length code.
    pub fn dlc(&self) -> usize {
        usize::from(self.len)
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_can_frame(self))
    }
}

fn check_id(id: u32) -> Result<()> {
    if id > MAX_EXTENDED_ID {
        return Err(Error::InvalidCanFrame(format!(
            "ID 0x{id:X} exceeds 29 bits"
        )));
    }
    Ok(())
}

/// Render a frame for logs: `ID=0x18DA10F1 DLC=3 Data=[22 F1 90]`.
pub fn format_can_frame(frame: &CanFrame) -> String {
    format!(
        "ID=0x{:08X} DLC={} Data=[{}]",
        frame.id,
        frame.dlc(),
        bytes_to_hex(frame.data())
    )
}

/// Parse payload bytes from hex text such as `"10 03 22 F1 90"`.
pub fn parse_can_payload(text: &str) -> Result<Vec<u8>> {
    let bytes = tokens_to_bytes(&tokenize_hex(text, false)?)?;
    if bytes.len() > MAX_PAYLOAD {
        return Err(Error::InvalidCanFrame(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Frame-level CAN access.
pub trait CanBus {
    /// Transmit one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;

    /// Wait up to `timeout` for the next frame.
    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>>;

    /// Release the bus. Safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: CanBus + ?Sized> CanBus for &mut T {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        (**self).receive_timeout(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Request/response over a [`CanBus`].
pub struct CanDiagnostics<B: CanBus, C: Clock = SystemClock> {
    bus: B,
    clock: C,
    poll_interval: Duration,
}

impl<B: CanBus> CanDiagnostics<B, SystemClock> {
    /// Use the wall clock.
    pub fn new(bus: B) -> Self {
        Self::with_clock(bus, SystemClock)
    }
}

impl<B: CanBus, C: Clock> CanDiagnostics<B, C> {
    /// Use an explicit time source.
    pub fn with_clock(bus: B, clock: C) -> Self {
        Self {
            bus,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Change the per-receive poll slice.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Borrow the bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Close the bus.
    pub fn close(&mut self) -> Result<()> {
        self.bus.close()
    }

    /// Send one frame and wait for the first frame carrying `response_id`.
    ///
    /// Frames with other IDs are dropped. `Ok(None)` on timeout.
    pub fn send_and_receive(
        &mut self,
        request_id: u32,
        response_id: u32,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Option<CanFrame>> {
        let request = CanFrame::new(request_id, payload)?;
        check_id(response_id)?;

        self.bus.send(&request)?;
        debug!("TX >> {request}");

        let start = self.clock.now();
        loop {
            let elapsed = self.clock.elapsed(start);
            if elapsed >= timeout {
                break;
            }
            let slice = (timeout - elapsed).min(self.poll_interval);

            match self.bus.receive_timeout(slice)? {
                Some(frame) if frame.id() == response_id => {
                    debug!("RX << {frame}");
                    return Ok(Some(frame));
                },
                Some(frame) => trace!("Discarding {frame}"),
                None => {},
            }
        }

        warn!("Timeout waiting for CAN ID 0x{response_id:X}");
        Ok(None)
    }

    /// Send one frame and compare the response payload byte for byte.
    ///
    /// `expected: None` accepts any payload. Timeout is `Ok(false)`.
    pub fn send_and_validate(
        &mut self,
        request_id: u32,
        response_id: u32,
        payload: &[u8],
        expected: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<bool> {
        let Some(frame) = self.send_and_receive(request_id, response_id, payload, timeout)? else {
            return Ok(false);
        };

        match expected {
            Some(expected) if frame.data() != expected => {
                error!(
                    "CAN payload mismatch. Received: [{}], Expected: [{}]",
                    bytes_to_hex(frame.data()),
                    bytes_to_hex(expected)
                );
                Ok(false)
            },
            _ => Ok(true),
        }
    }
}
