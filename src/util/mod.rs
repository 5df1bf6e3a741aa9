//! Basic utility types (errors).

pub mod error;

pub use error::{Error, Result};
