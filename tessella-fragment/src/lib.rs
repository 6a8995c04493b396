//! # Tessella Fragment
//!
//! The fragment read engine of the Tessella array store.
//!
//! A fragment is an immutable snapshot of array data, partitioned into
//! fixed-shape tiles per attribute. This crate answers range queries over
//! one fragment: it maps a subarray to the tiles that overlap it, fetches
//! and decompresses them on demand, classifies each tile's overlap, and
//! copies the qualifying cells into caller-provided buffers — resumable
//! across calls when a buffer fills up.
//!
//! ```ignore
//! let fragment = Fragment::new("/data/arr/frag_0", schema);
//! let mut rs = ReadState::new(fragment, book_keeping, subarray, ReadConfig::default())?;
//! let mut buffers = [ReadBuffer::fixed(&mut out)];
//! loop {
//!     rs.read(&mut buffers)?;
//!     consume(&out[..buffers[0].bytes_written()]);
//!     if !rs.overflow(0) {
//!         break;
//!     }
//! }
//! ```
//!
//! Out of scope here: subarray parsing, book-keeping persistence, fragment
//! writers, multi-fragment merge (the caller orchestrates fragments).

pub mod book_keeping;
mod copy;
pub mod error;
pub mod fragment;
pub mod overlap;
pub mod read_state;
mod search;
pub mod tile_io;

// ── Key read-side types ──────────────────────────────────────────────────────
pub use book_keeping::{AttributeTiles, BookKeeping, Codec};
pub use error::{FragmentError, Result};
pub use fragment::{Fragment, IoMode, ReadConfig, COORDS_FILE};
pub use overlap::{Overlap, OverlappingTile};
pub use read_state::{ReadBuffer, ReadState};
pub use tile_io::ReadStats;
