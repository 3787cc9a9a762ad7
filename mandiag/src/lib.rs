//! # mandiag
//!
//! A library for manufacturer-diagnostic exchanges with an embedded unit.
//!
//! Requests and responses are lines of hex tokens on a shared serial
//! console. This crate provides:
//!
//! - Frame encoding and response parsing
//! - A line transport that picks response lines out of unrelated log chatter
//! - A retry engine with a bounded wait for "pending" replies
//! - Field-by-field and wildcard response validation
//! - A CAN variant addressed by arbitration ID
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `socketcan` (default, Linux only): SocketCAN backend for the CAN variant
//! - `serde`: Serialization support for configuration and response types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mandiag::{Command, Engine, Expectation, LineTransport, OpenOptions, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let link = LineTransport::open(&config, &OpenOptions::default())?;
//!         let mut engine = Engine::new(link);
//!
//!         let cmd = Command::new(0x6E, 0x03, 0x00).build()?;
//!         let passed = engine.send_and_validate(&cmd, &Expectation::new("01", "01"))?;
//!         println!("{cmd}: {}", if passed { "PASS" } else { "FAIL" });
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod can;
pub mod clock;
pub mod engine;
pub mod error;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use can::SocketCanBus;
pub use {
    can::{CanBus, CanDiagnostics, CanFrame, format_can_frame, parse_can_payload},
    clock::{Clock, SystemClock},
    engine::{DispatchOutcome, DispatchState, Engine, RetryPolicy},
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        Command, RESPONSE_PREFIX, REQUEST_PREFIX, Response, StatusKind, encode, normalize_command,
        parse,
    },
    transport::{LineIo, LineTransport, MatchMode, OpenOptions, Pattern, scan_until_pattern},
    validate::{Expectation, ResponsePattern, matches_fixed_frame, validate},
};
