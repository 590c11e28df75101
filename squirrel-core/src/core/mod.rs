//! Core error types shared by every subsystem.

pub mod error;

pub use error::{Result, SquirrelError};
