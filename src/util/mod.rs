//! Utility types and functions for the pipeline.
//!
//! - [`Error`] / [`Result`] / [`ErrorKind`] / [`Stage`] - Error handling
//! - Math type re-exports from glam, hashing, shading frames

mod error;
mod math;

pub use error::*;
pub use math::*;
