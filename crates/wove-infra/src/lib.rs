//! Infrastructure layer for Wove.
//!
//! Implementations of the ports defined in `wove-core`: the SQLite chat
//! repository, the generation backends, plus config loading and data
//! directory resolution.

pub mod config;
pub mod filesystem;
pub mod llm;
pub mod sqlite;
