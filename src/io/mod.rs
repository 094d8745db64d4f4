//! IO module - configuration and file handling for RGN runs.

mod config;

pub use config::RgnConfig;
