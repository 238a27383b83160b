//! I/O helpers for escalator commands.

pub mod config;
