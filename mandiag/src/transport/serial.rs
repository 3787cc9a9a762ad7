//! Line transport over a byte-level [`Port`].

use std::io::{self, Read};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::encode;
use crate::transport::{LineIo, OpenOptions, Pattern, scan_until_pattern};

/// Shortest read timeout handed to the port; zero would turn reads non-blocking.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Call `connect` until it succeeds or `options.retries` attempts are spent.
///
/// At least one attempt is always made. The last driver error is carried in
/// the returned [`Error::Connection`].
pub fn open_with_retries<P, C, F>(
    port_name: &str,
    options: &OpenOptions,
    clock: &C,
    mut connect: F,
) -> Result<P>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<P>,
{
    let attempts = options.retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match connect() {
            Ok(port) => {
                debug!("[Attempt {attempt}] Connected to {port_name}");
                return Ok(port);
            },
            Err(e) => {
                warn!("Failed to open {port_name} (attempt {attempt}/{attempts}): {e}");
                last_error = e.to_string();

                if attempt < attempts {
                    info!(
                        "Retrying in {:.1} seconds...",
                        options.retry_delay.as_secs_f64()
                    );
                    clock.sleep(options.retry_delay);
                }
            },
        }
    }

    Err(Error::Connection {
        port: port_name.to_string(),
        attempts,
        reason: last_error,
    })
}

/// Newline-delimited text connection on top of a [`Port`].
pub struct LineTransport<P: Port> {
    port: P,
    buffer: Vec<u8>,
}

impl<P: Port> LineTransport<P> {
    /// Wrap an already open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Whether the underlying port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Scan with the wall clock.
    pub fn scan_until_pattern(
        &mut self,
        pattern: &Pattern,
        max_duration: Duration,
    ) -> Result<Option<String>> {
        scan_until_pattern(self, &crate::clock::SystemClock, pattern, max_duration)
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.port.is_open() {
            info!("Closed connection to {}", self.port.name());
        }
        self.buffer.clear();
        self.port.close()
    }

    fn take_line(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        let line: String = String::from_utf8_lossy(&raw)
            .chars()
            .filter(|&c| c != char::REPLACEMENT_CHARACTER)
            .collect();
        Some(line.trim().to_string())
    }
}

#[cfg(feature = "native")]
impl LineTransport<crate::port::NativePort> {
    /// Open a serial line with connection retries.
    ///
    /// A port missing from the enumerated list only produces a warning; the
    /// open is still attempted.
    pub fn open(config: &crate::port::SerialConfig, options: &OpenOptions) -> Result<Self> {
        use crate::port::{NativePort, NativePortEnumerator, PortEnumerator};

        if !NativePortEnumerator::is_available(&config.port_name) {
            warn!(
                "Requested port {} not found in available ports",
                config.port_name
            );
        }

        let port = open_with_retries(
            &config.port_name,
            options,
            &crate::clock::SystemClock,
            || NativePort::open(config),
        )?;

        debug!(
            "Connected to {} at {} baud (parity={}, stop_bits={:?}, data_bits={:?})",
            config.port_name, config.baud_rate, config.parity, config.stop_bits, config.data_bits
        );
        Ok(Self::new(port))
    }
}

impl<P: Port> LineIo for LineTransport<P> {
    fn write_line(&mut self, text: &str) -> Result<()> {
        if !self.port.is_open() {
            return Err(Error::Write(format!(
                "serial port {} is not open",
                self.port.name()
            )));
        }

        trace!("TX: {text}");
        self.port
            .write_all_bytes(&encode(text))
            .map_err(|e| Error::Write(format!("failed to write '{text}': {e}")))
    }

    fn read_line_within(&mut self, limit: Duration) -> Result<Option<String>> {
        let configured = self.port.timeout();
        if limit >= configured {
            return self.read_line();
        }

        self.port.set_timeout(limit.max(MIN_READ_TIMEOUT))?;
        let line = self.read_line();
        self.port.set_timeout(configured)?;
        line
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let deadline = self.port.timeout();
        let start = Instant::now();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Ok(self.take_line()),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        return Ok(self.take_line().or_else(|| Some(String::new())));
                    }
                    self.buffer.push(byte[0]);
                },
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(self.take_line()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }

            if start.elapsed() >= deadline {
                return Ok(self.take_line());
            }
        }
    }
}

impl<P: Port> Drop for LineTransport<P> {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Write;

    use super::*;
    use crate::testing::FakeClock;

    #[derive(Debug)]
    struct MockSerial {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
        open: bool,
        timeout: Duration,
        timeouts_set: Vec<Duration>,
    }

    impl MockSerial {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                write_buf: Vec::new(),
                open: true,
                timeout: Duration::from_millis(100),
                timeouts_set: Vec::new(),
            }
        }
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.read_buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockSerial {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            self.timeouts_set.push(timeout);
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.read_buf.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    #[test]
    fn test_write_line_appends_crlf() {
        let mut t = LineTransport::new(MockSerial::new(b""));
        t.write_line("6D643E 6E 03 00 00 00").unwrap();
        assert_eq!(t.port().write_buf, b"6D643E 6E 03 00 00 00\r\n");
    }

    #[test]
    fn test_read_lines_trimmed() {
        let mut t = LineTransport::new(MockSerial::new(
            b"boot ok\r\n  6D643C 6E 03 00 01 01 00 \r\npartial",
        ));
        assert_eq!(t.read_line().unwrap().as_deref(), Some("boot ok"));
        assert_eq!(
            t.read_line().unwrap().as_deref(),
            Some("6D643C 6E 03 00 01 01 00")
        );
        // Timeout hands back what arrived so far
        assert_eq!(t.read_line().unwrap().as_deref(), Some("partial"));
        assert_eq!(t.read_line().unwrap(), None);
    }

    #[test]
    fn test_read_line_within_shortens_and_restores_timeout() {
        let mut t = LineTransport::new(MockSerial::new(b"6D643C 6E 03 00 01 00\n"));

        assert_eq!(
            t.read_line_within(Duration::from_millis(20))
                .unwrap()
                .as_deref(),
            Some("6D643C 6E 03 00 01 00")
        );
        assert_eq!(
            t.port().timeouts_set,
            [Duration::from_millis(20), Duration::from_millis(100)]
        );
        assert_eq!(t.port().timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_read_line_within_longer_limit_keeps_timeout() {
        let mut t = LineTransport::new(MockSerial::new(b"boot ok\n"));

        assert_eq!(
            t.read_line_within(Duration::from_secs(5))
                .unwrap()
                .as_deref(),
            Some("boot ok")
        );
        assert!(t.port().timeouts_set.is_empty());

        t.read_line_within(Duration::ZERO).unwrap();
        assert_eq!(t.port().timeouts_set[0], MIN_READ_TIMEOUT);
    }

    #[test]
    fn test_read_line_drops_invalid_bytes() {
        let mut t = LineTransport::new(MockSerial::new(b"6D\xFF643C\n"));
        assert_eq!(t.read_line().unwrap().as_deref(), Some("6D643C"));
    }

    #[test]
    fn test_blank_line_is_empty_string() {
        let mut t = LineTransport::new(MockSerial::new(b"\r\n"));
        assert_eq!(t.read_line().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut t = LineTransport::new(MockSerial::new(b""));
        t.close().unwrap();
        t.close().unwrap();
        assert!(!t.is_open());

        let err = t.write_line("6D643E 00 01 00 00 00").unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn test_open_with_retries_succeeds_late() {
        let clock = FakeClock::new();
        let options = OpenOptions::default()
            .with_retries(3)
            .with_retry_delay(Duration::from_secs(1));
        let mut calls = 0;

        let port = open_with_retries("mock", &options, &clock, || {
            calls += 1;
            if calls < 3 {
                Err(Error::Io(io::Error::new(io::ErrorKind::NotFound, "busy")))
            } else {
                Ok(MockSerial::new(b""))
            }
        })
        .unwrap();

        assert!(port.is_open());
        assert_eq!(calls, 3);
        assert_eq!(clock.slept(), Duration::from_secs(2));
    }

    #[test]
    fn test_open_with_retries_exhausted() {
        let clock = FakeClock::new();
        let options = OpenOptions::default().with_retries(2);

        let err = open_with_retries::<MockSerial, _, _>("/dev/ttyX", &options, &clock, || {
            Err(Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone")))
        })
        .unwrap_err();

        match err {
            Error::Connection {
                port,
                attempts,
                reason,
            } => {
                assert_eq!(port, "/dev/ttyX");
                assert_eq!(attempts, 2);
                assert!(reason.contains("gone"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_retries_still_tries_once() {
        let clock = FakeClock::new();
        let options = OpenOptions::default().with_retries(0);
        let mut calls = 0;
        let _ = open_with_retries::<MockSerial, _, _>("x", &options, &clock, || {
            calls += 1;
            Err(Error::Config("nope".into()))
        });
        assert_eq!(calls, 1);
        assert_eq!(clock.slept(), Duration::ZERO);
    }
}
