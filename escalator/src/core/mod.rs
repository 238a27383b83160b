//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O and async. They operate on in-memory data
//! and return deterministic outputs suitable for tests.

pub mod attempt;
pub mod feedback;
pub mod json;
pub mod retry_config;
pub mod tools;
pub mod types;
pub mod validation;
