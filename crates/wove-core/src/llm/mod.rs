//! Generation backend abstractions for Wove.
//!
//! - `GenerationBackend`: RPITIT trait for concrete backend implementations
//! - `BoxGenerationBackend`: Object-safe wrapper for dynamic dispatch

pub mod backend;
pub mod box_backend;

pub use backend::{ByteStream, GenerationBackend};
pub use box_backend::BoxGenerationBackend;
