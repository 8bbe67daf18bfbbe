//! Heychess Console Library Crate
//!
//! Configuration, the terminal display and the stdin-backed recognition front
//! end used by the `heychess` binary, which is a thin wrapper around this
//! library.

pub mod config;
pub mod console;
