//! Storage abstractions for the forcing collector.
//!
//! Provides:
//! - [`ObjectStorage`]: listing, whole-object and byte-range reads over any
//!   `object_store` backend (S3, HTTP, local files, memory)
//! - [`StoreRouter`]: maps `s3://`, `http(s)://`, `file://` and `memory://`
//!   URLs to the store that serves them

pub mod error;
pub mod object_store;
pub mod router;

pub use self::object_store::ObjectStorage;
pub use error::{StorageError, StorageResult};
pub use router::{S3Options, StoreRouter};
