//! Testbed Common Library
//!
//! Configuration layering, environment classification and the SQL
//! execution harness shared by Testbed suites.

pub mod classification;
pub mod config;
pub mod db;
pub mod error;

// Re-export commonly used types
pub use classification::EnvironmentFlags;
pub use config::{EnvironmentConfig, RuntimeContext};
pub use db::{DatabaseConfig, DatabaseFixture, Dialect, ResultSet, SqlScript};
pub use error::{Error, Result};

/// Testbed version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for user-level Testbed files
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".testbed")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
