//! Configuration module for keepsake
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Settings persistence (what to back up, audit table shape, replay policy)

pub mod paths;
pub mod settings;

pub use paths::KeepsakePaths;
pub use settings::Settings;
