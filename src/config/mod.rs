//! Layered configuration.
//!
//! Merges configuration field-by-field from these tiers, lowest first:
//! 1. **Defaults** - built into the binary
//! 2. **Project** - `$CWD/nested-todo/config.yaml`
//! 3. **User** - `~/.nested-todo/config.yaml`
//! 4. **Environment** - variables listed below
//!
//! Command-line flags are applied on top by the binary.
//!
//! ## Environment Variables
//! - `NESTED_TODO_CONFIG_PATH` - Explicit config file (replaces the file tiers)
//! - `NESTED_TODO_DB_PATH` - Database path
//! - `NESTED_TODO_PORT` - HTTP port
//! - `NESTED_TODO_USER_DIR` - User config dir (default: `~/.nested-todo`)
//! - `NESTED_TODO_PROJECT_DIR` - Project config dir (default: `./nested-todo`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::deep_merge;
pub use types::*;
