//! acquireQ - fair, time-bounded exclusive access to shared resources
//!
//! Command-line front end and JSON-lines transport over `acquireq-core`.

pub mod cli;
pub mod commands;
