//! Request/response engine with bounded pending retries.
//!
//! ## Dispatch
//!
//! ```text
//!            +------+    +-------------------+
//! start ---> | Sent | -> | AwaitingResponse  |
//!            +------+    +---------+---------+
//!               ^                  |
//!               |   +--------------+---------------+----------------+
//!               |   v              v               v                v
//!          +--------------+   +---------+   +---------------+  +------------+
//!          | PendingRetry |   | Success |   | OtherTerminal |  | NoResponse |
//!          +--------------+   +---------+   +---------------+  +------------+
//! ```
//!
//! A pending (`AA`) reply sends the same request again after a fixed wait.
//! The pending deadline is measured from the first send of the dispatch and
//! is never reset, so a device that stays pending costs at most the deadline
//! plus one scan window.
//!
//! Outer attempts resend the whole dispatch when nothing matched at all.
//! Each outer attempt starts a fresh pending budget.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::protocol::frame::{RESPONSE_PREFIX, Response, StatusKind, extract_frame, parse};
use crate::transport::{LineIo, Pattern, scan_until_pattern};
use crate::validate::{Expectation, ResponsePattern, validate};

/// Timing and retry settings for one logical command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Outer attempts when no response line matches at all.
    pub attempts: u32,
    /// How long each scan for a response line may take.
    pub scan_timeout: Duration,
    /// Total budget for pending replies, from the first send.
    pub pending_deadline: Duration,
    /// Length of one pending sub-wait.
    pub pending_interval: Duration,
    /// Number of sub-waits between pending re-sends.
    pub pending_checks: u32,
    /// Pause before a validated send.
    pub settle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            scan_timeout: Duration::from_secs(5),
            pending_deadline: Duration::from_secs(15),
            pending_interval: Duration::from_millis(500),
            pending_checks: 10,
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Set the outer attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the per-scan timeout.
    #[must_use]
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the pending deadline.
    #[must_use]
    pub fn with_pending_deadline(mut self, deadline: Duration) -> Self {
        self.pending_deadline = deadline;
        self
    }

    /// Set the pending sub-wait interval and count.
    #[must_use]
    pub fn with_pending_wait(mut self, interval: Duration, checks: u32) -> Self {
        self.pending_interval = interval;
        self.pending_checks = checks;
        self
    }

    /// Set the settle delay before validated sends.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Full wait between two pending re-sends, saturating at [`Duration::MAX`].
    pub fn pending_wait(&self) -> Duration {
        self.pending_interval
            .checked_mul(self.pending_checks)
            .unwrap_or(Duration::MAX)
    }
}

/// Dispatch states, reported at `trace` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Request written.
    Sent,
    /// Scanning for a response line.
    AwaitingResponse,
    /// Status `01`.
    Success,
    /// Status `AA` with budget left; the request will be sent again.
    PendingRetry,
    /// Any other status, or pending past the deadline.
    OtherTerminal,
    /// No response line matched within the scan window.
    NoResponse,
}

/// How a logical command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DispatchOutcome {
    /// The device reported success.
    Success,
    /// The device was still pending when the deadline ran out.
    Pending,
    /// The device answered with another status.
    OtherTerminal,
    /// Nothing matched on any attempt.
    NoResponse,
}

impl DispatchOutcome {
    /// Classify a logical command result.
    pub fn of(response: Option<&Response>) -> Self {
        match response.map(Response::status_kind) {
            None => Self::NoResponse,
            Some(StatusKind::Success) => Self::Success,
            Some(StatusKind::Pending) => Self::Pending,
            Some(StatusKind::Other) => Self::OtherTerminal,
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Pending => write!(f, "pending (gave up)"),
            Self::OtherTerminal => write!(f, "other status"),
            Self::NoResponse => write!(f, "no response"),
        }
    }
}

/// Diagnostic session: one link, one clock, one retry policy.
///
/// Requests are strictly sequential; the engine holds the link mutably for
/// the whole exchange.
pub struct Engine<L: LineIo, C: Clock = SystemClock> {
    link: L,
    clock: C,
    policy: RetryPolicy,
    response_prefix: String,
    response_pattern: Pattern,
}

impl<L: LineIo> Engine<L, SystemClock> {
    /// Create an engine on the wall clock with the default policy.
    pub fn new(link: L) -> Self {
        Self::with_clock(link, SystemClock)
    }
}

impl<L: LineIo, C: Clock> Engine<L, C> {
    /// Create an engine with an explicit time source.
    pub fn with_clock(link: L, clock: C) -> Self {
        Self {
            link,
            clock,
            policy: RetryPolicy::default(),
            response_prefix: RESPONSE_PREFIX.to_string(),
            response_pattern: Pattern::substring(RESPONSE_PREFIX),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scan for a different response prefix.
    #[must_use]
    pub fn with_response_prefix(mut self, prefix: &str) -> Self {
        self.response_prefix = prefix.to_string();
        self.response_pattern = Pattern::substring(prefix);
        self
    }

    /// Scan with a custom pattern; frames are still cut at the prefix.
    #[must_use]
    pub fn with_response_pattern(mut self, pattern: Pattern) -> Self {
        self.response_pattern = pattern;
        self
    }

    /// Current retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Mutable access to the retry policy.
    pub fn policy_mut(&mut self) -> &mut RetryPolicy {
        &mut self.policy
    }

    /// Borrow the link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Release the link.
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Send `command` and return the first response.
    ///
    /// `Ok(None)` means no response line matched on any outer attempt; a
    /// non-success status is still `Some`.
    pub fn send_and_get_response(&mut self, command: impl AsRef<str>) -> Result<Option<Response>> {
        let command = command.as_ref();
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                info!("Resending '{command}' (attempt {attempt}/{attempts})");
            }
            if let Some(response) = self.dispatch(command)? {
                return Ok(Some(response));
            }
        }

        warn!("No response to '{command}' after {attempts} attempt(s)");
        Ok(None)
    }

    /// Send `command` and classify how it ended.
    pub fn send_and_classify(
        &mut self,
        command: impl AsRef<str>,
    ) -> Result<(DispatchOutcome, Option<Response>)> {
        let response = self.send_and_get_response(command)?;
        Ok((DispatchOutcome::of(response.as_ref()), response))
    }

    /// Send `command` and validate the response.
    ///
    /// A missing response or any mismatch is `Ok(false)`.
    pub fn send_and_validate(
        &mut self,
        command: impl AsRef<str>,
        expected: &Expectation,
    ) -> Result<bool> {
        let command = command.as_ref();
        self.settle();

        match self.send_and_get_response(command)? {
            Some(response) => Ok(validate(&response, expected)),
            None => {
                error!("No response received for command '{command}'");
                Ok(false)
            },
        }
    }

    /// Send `command` and match the response against a wildcard pattern.
    pub fn send_and_match(
        &mut self,
        command: impl AsRef<str>,
        expected: &ResponsePattern,
    ) -> Result<bool> {
        let command = command.as_ref();
        self.settle();

        match self.send_and_get_response(command)? {
            Some(response) => Ok(expected.matches(&response)),
            None => {
                error!("No response received for command '{command}'");
                Ok(false)
            },
        }
    }

    /// Run the validated send `repetitions` times, stopping at the first
    /// failure. Returns how many passed.
    pub fn send_repeated(
        &mut self,
        command: impl AsRef<str>,
        repetitions: u32,
        expected: &Expectation,
    ) -> Result<u32> {
        let command = command.as_ref();
        let mut passed = 0;

        for round in 1..=repetitions {
            if !self.send_and_validate(command, expected)? {
                error!("Repetition {round}/{repetitions} of '{command}' failed");
                break;
            }
            passed += 1;
        }

        Ok(passed)
    }

    fn settle(&self) {
        if !self.policy.settle_delay.is_zero() {
            self.clock.sleep(self.policy.settle_delay);
        }
    }

    fn enter(state: DispatchState, command: &str) {
        trace!("[{command}] -> {state:?}");
    }

    /// One dispatch: send, scan, and re-send while pending.
    fn dispatch(&mut self, command: &str) -> Result<Option<Response>> {
        let start = self.clock.now();
        let mut pending_rounds = 0u32;

        loop {
            self.link.write_line(command)?;
            Self::enter(DispatchState::Sent, command);

            Self::enter(DispatchState::AwaitingResponse, command);
            let Some(line) = scan_until_pattern(
                &mut self.link,
                &self.clock,
                &self.response_pattern,
                self.policy.scan_timeout,
            )?
            else {
                Self::enter(DispatchState::NoResponse, command);
                return Ok(None);
            };

            let frame = extract_frame(&line, &self.response_prefix).unwrap_or(line.as_str());
            let response = match parse(frame) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Discarding malformed response '{line}': {e}");
                    Self::enter(DispatchState::NoResponse, command);
                    return Ok(None);
                },
            };

            match response.status_kind() {
                StatusKind::Success => {
                    Self::enter(DispatchState::Success, command);
                    return Ok(Some(response));
                },
                StatusKind::Other => {
                    debug!("Terminal status {} for '{command}'", response.status);
                    Self::enter(DispatchState::OtherTerminal, command);
                    return Ok(Some(response));
                },
                StatusKind::Pending => {
                    let elapsed = self.clock.elapsed(start);
                    if elapsed >= self.policy.pending_deadline {
                        warn!(
                            "'{command}' still pending after {:.1}s, giving up",
                            elapsed.as_secs_f64()
                        );
                        Self::enter(DispatchState::OtherTerminal, command);
                        return Ok(Some(response));
                    }

                    pending_rounds += 1;
                    info!(
                        "'{command}' pending (round {pending_rounds}), retrying in {:.1}s",
                        self.policy.pending_wait().as_secs_f64()
                    );
                    Self::enter(DispatchState::PendingRetry, command);
                    self.wait_pending(start);
                },
            }
        }
    }

    /// Sub-waits never run past the deadline.
    fn wait_pending(&self, start: Instant) {
        for _ in 0..self.policy.pending_checks {
            let remaining = self
                .policy
                .pending_deadline
                .saturating_sub(self.clock.elapsed(start));
            if remaining.is_zero() {
                break;
            }
            self.clock.sleep(remaining.min(self.policy.pending_interval));
        }
    }
}
