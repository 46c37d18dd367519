//! Route handlers organized by resource

pub mod connections;
pub mod health;
