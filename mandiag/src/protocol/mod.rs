//! Diagnostic frame codec and hex helpers.

pub mod frame;
pub mod hex;

// Re-export common types
pub use frame::{
    Command, CommandBuilder, REQUEST_PREFIX, RESPONSE_PREFIX, Response, StatusKind, encode,
    extract_frame, normalize_command, parse,
};
