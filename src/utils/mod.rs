//! The `utils` module provides the ambient pieces shared across `tickwire`:
//! the error type, logging setup, listener sets and the clock abstraction.

pub mod clock;
pub mod error;
pub mod listeners;
pub mod logging;
