//! Core types and constants for the observer consensus service

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
