//! Core configuration for the redline orchestrator.
//!
//! Every other crate in the workspace receives its settings from the
//! [`AppConfig`] loaded here; nothing reads the environment directly.

pub mod config;

pub use config::*;
