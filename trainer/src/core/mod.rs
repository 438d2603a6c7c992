//! Deterministic, pure logic shared by the trainer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod debounce;
pub mod diagnostic;
pub mod generation;
pub mod path_map;
pub mod selector;
pub mod types;
