//! Watch-mode exercise trainer.
//!
//! A learner works through an ordered catalog of small exercises. Saving an
//! exercise file triggers a check; passing moves the cursor to the next open
//! exercise and progress survives restarts. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (catalog validation, cursor
//!   selection, debouncing, generations, diagnostics). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, progress persistence,
//!   process execution, watching). Isolated to enable doubles in tests.
//!
//! Orchestration modules ([`start`], [`engine`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod cancel;
pub mod core;
pub mod engine;
pub mod error;
pub mod exercise;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
