//! # tiermem-core
//!
//! Shared vocabulary for the tiermem workspace: the error type and exit codes,
//! crash-safe JSON state files, short content hashes, and the text tokenizer
//! used by every tier for keyword matching.

pub mod error;
pub mod hash;
pub mod state;
pub mod text;

pub use error::{ErrorKind, MemError, Result, exit};
pub use state::{Loaded, load_json_or_default, write_bytes_atomic, write_json_atomic};
