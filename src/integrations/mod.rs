//! External collaborators of the workflow engine.
//!
//! Document rendering and blob storage used by submission steps.

pub mod documents;

pub use documents::{
    Blob, BlobStore, DocumentError, DocumentRenderer, DocumentResult, JsonRenderer,
    MarkdownRenderer, MemoryBlobStore, RenderedDocument,
};
