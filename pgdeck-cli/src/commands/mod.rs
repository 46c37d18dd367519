//! Command implementations for the pgdeck CLI

pub mod serve;

pub use serve::run_serve;
