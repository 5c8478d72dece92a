//! Interactive terminal chat for Wove.
//!
//! Drives the sync engine from a readline loop: streamed deltas are printed
//! as they arrive on the event bus, slash commands manage sessions. Entry
//! point: `loop_runner::run_chat_loop`.

pub mod banner;
pub mod commands;
pub mod input;
pub mod loop_runner;
