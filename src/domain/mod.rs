//! Domain layer: pure models and ports, no I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
