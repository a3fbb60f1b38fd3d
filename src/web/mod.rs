//! Web UI and JSON API.
//!
//! The page at `/` is a single htmx document. Task rows and header counts
//! are rendered server-side as fragments; mutations go through the JSON API
//! and then fire a `tasks-changed` event so the fragments reload.

pub mod render;
mod server;
pub mod templates;

pub use server::{ServerHandle, TodoServer, build_router, start_server};
