//! Utility functions and helpers
//!
//! Filesystem locations and logging setup shared by the library and the CLI.

pub mod app_paths;
pub mod logging;
