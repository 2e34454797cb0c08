//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`download`] - Download a striped file, resuming where a token exists
//! - [`stream`] - Stream a byte range to stdout
//! - [`split`] - Lay a local file out as striped parts
//! - [`token`] - Show a saved resume token

pub mod common;
pub mod download;
pub mod split;
pub mod stream;
pub mod token;
