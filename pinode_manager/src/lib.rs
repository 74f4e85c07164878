//! PINODE Manager Library
//!
//! Command implementations behind the `pinode` binary.

pub mod commands;
