//! folio: a staged build engine for Markdown documentation volumes.

pub mod config;
pub mod docs;
pub mod engine;
pub mod util;
