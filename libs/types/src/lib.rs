//! Types library for the cross-asset matrix engine
//!
//! This library provides the core type definitions shared by the matrix
//! engine and its read API, ensuring type safety and deterministic behavior.
//!
//! # Modules
//! - `symbol`: Asset symbols and ordered pair keys (Symbol, PairKey)
//! - `matrix`: Matrix taxonomy, frames, grids, and cell annotations
//! - `time`: Millisecond timestamps and UTC day windows

// Public modules
pub mod matrix;
pub mod symbol;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::matrix::*;
    pub use crate::symbol::*;
    pub use crate::time::*;
}
