//! Shared infrastructure for the arena
//!
//! Small building blocks used across the orchestration and resolution
//! layers.

pub mod cache;

pub use cache::*;
