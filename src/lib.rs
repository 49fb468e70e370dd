// Core modules
pub mod config;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use strategy::Strategy;
