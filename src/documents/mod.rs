//! Source Document Handling
//!
//! Loading raw documents from disk and splitting them into chunks.

pub mod chunker;
pub mod loader;

pub use chunker::{split, split_all, Chunk, ChunkerError};
pub use loader::{is_supported, list_source_files, load_directory, load_file, Document, LoaderError};
