//! Common types and errors shared across the relay crates.

pub mod error;
pub mod relay;

pub use error::{IoCondition, SessionError};
pub use relay::{Direction, DumpFormat, SessionEnd, Side};
