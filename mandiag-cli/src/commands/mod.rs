//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod can;
pub(crate) mod diag;
pub(crate) mod ports;
pub(crate) mod settings;
