//! clflops CLI library
//!
//! This library exposes the CLI's modules for testing purposes.

pub mod config;
pub mod exit;
pub mod logging;
pub mod output;
pub mod size;
