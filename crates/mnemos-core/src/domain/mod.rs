//! Domain models for Mnemos.
//!
//! - `error`: engine error taxonomy (`EngineError`, `ValidationError`)
//! - `clock`: injectable time source
//! - `memory`: ingestion input and boundary validation
//! - `text`: tokenization and lexical similarity

pub mod clock;
pub mod error;
pub mod memory;
pub mod text;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EngineError, Result, ValidationError};
pub use memory::NewMemory;
