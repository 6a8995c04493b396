//! # Tessella Core
//!
//! Schema and geometry primitives for the Tessella array store.
//!
//! This crate provides:
//! - The array schema oracle: attributes, domain, tile extents, cell order,
//!   dense/sparse kind, tile capacity
//! - Coordinate capability traits (`Coord`, `DenseCoord`) that parameterize
//!   the read engine over the four coordinate types
//! - `Subarray`, the typed inclusive query hyper-rectangle
//! - Hilbert keys for the sparse Hilbert cell order
//!
//! ## Design principles
//!
//! 1. **Pure data**: no I/O, no async, no storage dependency
//! 2. **Dispatch once**: dynamic coordinate types are resolved to a generic
//!    parameter at engine construction, never per cell
//! 3. **Validated up front**: `ArraySchema::new` rejects every combination
//!    the engine cannot serve

pub mod coords;
pub mod error;
pub mod hilbert;
pub mod schema;
pub mod subarray;

// ── Key types ────────────────────────────────────────────────────────────────
pub use coords::{Coord, DenseCoord};
pub use error::SchemaError;
pub use hilbert::HilbertKey;
pub use schema::{ArrayKind, ArraySchema, Attribute, CellOrder, CoordType, DomainSpec};
pub use subarray::Subarray;

/// Byte width of one entry in a variable-size attribute's offsets tile.
pub const VAR_OFFSET_SIZE: usize = std::mem::size_of::<u64>();
