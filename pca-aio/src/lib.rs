// pca-aio/src/lib.rs
//! Asynchronous IO operations for pca (filesystem, json, checksums, archives, process)

// Declare modules
pub mod checksum;
pub mod extract;
pub mod fs;
pub mod json_io;
pub mod process;

// Re-export the primary async functions
pub use checksum::{sha256_file_async, verify_checksum_async};
pub use extract::extract_zip_async;
pub use fs::*;
pub use json_io::{read_json_async, write_json_async};
pub use process::run_command_async;
