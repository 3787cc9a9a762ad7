//! Line-oriented transport.
//!
//! The diagnostic unit shares its console with unrelated log output, so the
//! transport exposes lines rather than bytes, and [`scan_until_pattern`]
//! discards everything that does not match until a deadline passes.
//!
//! Anything implementing [`LineIo`] can sit under the engine: the serial
//! [`LineTransport`] in production, a scripted line source in tests.

mod serial;

pub use self::serial::{LineTransport, open_with_retries};

use std::fmt;
use std::time::Duration;

use log::{debug, error, warn};
use regex::Regex;

use crate::clock::Clock;
use crate::error::Result;

/// A connection that moves whole lines.
pub trait LineIo {
    /// Write `text` followed by the line terminator.
    ///
    /// Fails with [`Error::Write`](crate::Error::Write) when the connection
    /// is closed.
    fn write_line(&mut self, text: &str) -> Result<()>;

    /// Read one line, bounded by the connection's read timeout.
    ///
    /// Returns the trimmed line, or `None` when nothing complete arrived.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Like [`read_line`](Self::read_line), but never waits longer than
    /// `limit`.
    fn read_line_within(&mut self, limit: Duration) -> Result<Option<String>>;
}

impl<T: LineIo + ?Sized> LineIo for &mut T {
    fn write_line(&mut self, text: &str) -> Result<()> {
        (**self).write_line(text)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        (**self).read_line()
    }

    fn read_line_within(&mut self, limit: Duration) -> Result<Option<String>> {
        (**self).read_line_within(limit)
    }
}

impl<T: LineIo + ?Sized> LineIo for Box<T> {
    fn write_line(&mut self, text: &str) -> Result<()> {
        (**self).write_line(text)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        (**self).read_line()
    }

    fn read_line_within(&mut self, limit: Duration) -> Result<Option<String>> {
        (**self).read_line_within(limit)
    }
}

/// How a scan pattern is applied to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Plain substring search.
    #[default]
    Substring,
    /// Regular expression search anywhere in the line.
    Regex,
}

/// A compiled scan pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Substring search.
    Substring(String),
    /// Regex search.
    Regex(Regex),
}

impl Pattern {
    /// Compile `pattern` in the given mode.
    pub fn new(pattern: &str, mode: MatchMode) -> Result<Self> {
        Ok(match mode {
            MatchMode::Substring => Self::Substring(pattern.to_string()),
            MatchMode::Regex => Self::Regex(Regex::new(pattern)?),
        })
    }

    /// Substring pattern.
    pub fn substring(pattern: impl Into<String>) -> Self {
        Self::Substring(pattern.into())
    }

    /// Whether `line` matches.
    pub fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Substring(s) => line.contains(s.as_str()),
            Self::Regex(re) => re.is_match(line),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substring(s) => f.write_str(s),
            Self::Regex(re) => f.write_str(re.as_str()),
        }
    }
}

/// Read lines until one matches `pattern` or `max_duration` elapses.
///
/// Each read is limited to the time left in the window, and a line that
/// completes after the window has closed is dropped. Blank lines and
/// non-matching chatter are skipped. A read failure ends the scan early and
/// is reported the same way as a timeout.
pub fn scan_until_pattern<L, C>(
    link: &mut L,
    clock: &C,
    pattern: &Pattern,
    max_duration: Duration,
) -> Result<Option<String>>
where
    L: LineIo + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();

    loop {
        let remaining = max_duration.saturating_sub(clock.elapsed(start));
        if remaining.is_zero() {
            break;
        }

        let line = match link.read_line_within(remaining) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                error!("Error reading line: {e}");
                break;
            },
        };
        if clock.elapsed(start) > max_duration {
            debug!("Dropping line completed after the scan window: {line}");
            break;
        }
        if line.is_empty() {
            continue;
        }

        debug!("LogLine: {line}");
        if pattern.is_match(&line) {
            debug!("Matched pattern '{pattern}' in line: {line}");
            return Ok(Some(line));
        }
    }

    warn!(
        "No match for pattern '{pattern}' within {:.1} seconds",
        max_duration.as_secs_f64()
    );
    Ok(None)
}

/// Connection retry settings for [`LineTransport::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenOptions {
    /// Total open attempts (at least one is always made).
    pub retries: u32,
    /// Delay between failed attempts.
    pub retry_delay: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl OpenOptions {
    /// Set the number of attempts.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
