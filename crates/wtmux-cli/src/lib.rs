//! wtmux-cli: Command-line interface for wtmux
//!
//! Provides the `wtmux` binary: a loopback demo of session multiplexing over
//! the in-memory transport, and configuration management.

pub mod commands;
pub mod output;
