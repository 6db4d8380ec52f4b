//! Storage Module
//!
//! File access layer for the single backing file.
//!
//! ## Responsibilities
//! - Open or create the file with read-write access
//! - Positional reads and writes (the engine never streams)
//! - Durability (fsync) on request
//! - Advisory exclusive lock so two handles never share a file

mod file;

pub use file::DataFile;
