//! Test doubles: a manually driven clock and a scripted line source.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::transport::LineIo;

/// Clock that only moves when slept on or advanced.
pub(crate) struct FakeClock {
    base: Instant,
    offset: Cell<Duration>,
    slept: Cell<Duration>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            slept: Cell::new(Duration::ZERO),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    /// Total time spent in `sleep`.
    pub(crate) fn slept(&self) -> Duration {
        self.slept.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
        self.advance(duration);
    }
}

/// Line source that replays canned lines against a [`FakeClock`].
///
/// Lines queued with [`line`](Self::line) are available immediately; each
/// [`reply`](Self::reply) batch is released by the next `write_line`. An
/// empty queue costs one read timeout of fake time and yields `None`.
pub(crate) struct ScriptedLink<'a> {
    clock: &'a FakeClock,
    incoming: VecDeque<String>,
    replies: VecDeque<Vec<String>>,
    fallback_reply: Option<Vec<String>>,
    written: Vec<String>,
    read_timeout: Duration,
    line_delay: Duration,
    fail_reads: bool,
    fail_writes: bool,
}

/// Route `log` output through the test harness; `RUST_LOG` picks the level.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl<'a> ScriptedLink<'a> {
    pub(crate) fn new(clock: &'a FakeClock) -> Self {
        init_logger();
        Self {
            clock,
            incoming: VecDeque::new(),
            replies: VecDeque::new(),
            fallback_reply: None,
            written: Vec::new(),
            read_timeout: Duration::from_secs(1),
            line_delay: Duration::from_millis(10),
            fail_reads: false,
            fail_writes: false,
        }
    }

    /// Queue a line that is readable right away.
    pub(crate) fn line(mut self, line: &str) -> Self {
        self.incoming.push_back(line.to_string());
        self
    }

    /// Queue the lines released by the next unanswered write.
    pub(crate) fn reply(mut self, lines: &[&str]) -> Self {
        self.replies
            .push_back(lines.iter().map(|l| (*l).to_string()).collect());
        self
    }

    /// Lines released by every write once the reply queue is exhausted.
    pub(crate) fn always_reply(mut self, lines: &[&str]) -> Self {
        self.fallback_reply = Some(lines.iter().map(|l| (*l).to_string()).collect());
        self
    }

    /// Fake time consumed by each delivered line.
    pub(crate) fn line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    pub(crate) fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Lines not yet read.
    pub(crate) fn remaining(&self) -> usize {
        self.incoming.len()
    }

    /// Every line written so far.
    pub(crate) fn written(&self) -> &[String] {
        &self.written
    }
}

impl LineIo for ScriptedLink<'_> {
    fn write_line(&mut self, text: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Write("scripted write failure".into()));
        }
        self.written.push(text.to_string());

        let batch = self
            .replies
            .pop_front()
            .or_else(|| self.fallback_reply.clone());
        if let Some(batch) = batch {
            self.incoming.extend(batch);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.read_line_within(Duration::MAX)
    }

    /// A queued line slower than `limit` stays queued.
    fn read_line_within(&mut self, limit: Duration) -> Result<Option<String>> {
        if self.fail_reads {
            self.clock.advance(self.line_delay.min(limit));
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted read failure",
            )));
        }

        if self.incoming.is_empty() {
            self.clock.advance(self.read_timeout.min(limit));
            return Ok(None);
        }
        if self.line_delay > limit {
            self.clock.advance(limit);
            return Ok(None);
        }

        self.clock.advance(self.line_delay);
        Ok(self.incoming.pop_front())
    }
}
