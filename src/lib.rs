//! Codex Bridge - Run the Codex CLI as a cancellable stream of structured events.

pub mod config;
pub mod display;
pub mod exec;
