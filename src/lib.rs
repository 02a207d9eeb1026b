//! # gics — lossless columnar time-series container format
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every section is self-describing: stream id, outer codec, block
//!   manifest, sizes, SHA-256 hash-chain contribution
//! - Every segment carries a mandatory CRC32 over its header+body+index;
//!   corrupt segments are isolated rather than taking the whole file down
//! - Two independent codec layers: an inner numeric transform chosen per
//!   block (see [`inner`]) and an outer byte compressor chosen per section
//!   (see [`codec`])
//! - The segment index (bloom filter + sorted item ids) lives at the end of
//!   each segment; [`reader::Reader::query`] uses it to skip whole segments
//! - Encryption (AES-256-GCM, PBKDF2-derived key) is optional and, when
//!   enabled, applies independently to every section's payload

pub mod bloom;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod file;
pub mod hashchain;
pub mod inner;
pub mod perf;
pub mod reader;
pub mod recovery;
pub mod schema;
pub mod section;
pub mod segment;
pub mod snapshot;
pub mod varint;
pub mod writer;

pub use error::{GicsError, Result};
pub use reader::{Reader, ReaderOptions};
pub use recovery::{scan, scan_file, RecoveryQuality, RecoveryReport, SegmentHealth};
pub use schema::{CodecStrategy, FieldSpec, FieldType, ItemIdType, SchemaProfile};
pub use snapshot::{FieldValue, GenericSnapshot, ItemKey, LegacyRecord, LegacySnapshot, Snapshot};
pub use writer::{Writer, WriterOptions};
