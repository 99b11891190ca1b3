//! Remote chunk catalog access.
//!
//! Builds a virtual, time-concatenated array index from kerchunk-style
//! reference descriptors and reads partitions of it with byte-range
//! requests. No array values are held by the index itself.
//!
//! # Architecture
//!
//! ```text
//! CatalogResolver::resolve(range)
//!      │
//!      ├─► List {root}/{YYYY}/ per year (streamed, stops past range end)
//!      │
//!      ├─► Fetch descriptors concurrently, parse reference sets
//!      │
//!      └─► VirtualIndexBuilder ──► VirtualArrayIndex
//!                                        │
//! SliceReader::read_slice(partition, window)
//!      │
//!      ├─► Calculate needed chunks per variable and time step
//!      │
//!      ├─► Fetch via byte-range requests, decode (zlib/gzip/shuffle)
//!      │
//!      └─► Assemble into RasterSlice
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod reader;
pub mod reference;
pub mod resolver;

pub use codec::{ArrayMeta, Codec, DataType};
pub use config::{ReaderConfig, ResolverConfig};
pub use error::{GridProcessorError, Result};
pub use index::{ChunkRef, FragmentEntry, VariableLayout, VirtualArrayIndex, VirtualIndexBuilder};
pub use reader::SliceReader;
pub use reference::{ReferenceSet, ReferenceValue};
pub use resolver::{parse_fragment, CatalogResolver, ParsedFragment};
