//! Binary scene graph cache.
//!
//! The cache stores one Transform tree per file: an 8-byte magic and a
//! format version, followed by the root record. Each record is framed by
//! the node's name tag (`[TXFM_1]`) and contains its fixed fields, the
//! owned child records in a fixed order, and the names of referenced
//! nodes. Writing linearizes the graph first (see
//! [`linearize`](write::linearize)) so every reference resolves against
//! nodes already read.

mod read;
pub mod stream;
mod write;

pub use read::read_cache;
pub use write::{linearize, write_cache};

/// File magic, first 8 bytes of every cache file.
pub const CACHE_MAGIC: &[u8; 8] = b"SG3DCACH";

/// Current format version.
pub const CACHE_VERSION: u32 = 1;

/// Upper bound on any serialized item count; a count beyond this is
/// treated as corruption rather than an allocation request.
pub(crate) const MAX_ITEMS: u32 = 1 << 26;
