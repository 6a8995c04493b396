//! The fragment's book-keeping oracle.
//!
//! `BookKeeping` is the read engine's only source of physical facts about a
//! fragment: where each tile starts in its attribute file, how large its
//! compressed payload is, the per-tile MBRs and bounding coordinates of a
//! sparse fragment, and the cell count of the (possibly short) last sparse
//! tile. It is immutable for the engine's lifetime; how it is persisted and
//! loaded is outside this crate.
//!
//! Coordinate payloads (MBRs, bounding coordinates) are stored as opaque
//! native-endian bytes and decoded by the typed geometry code:
//!
//! ```text
//! MBR:              [d0_lo, d0_hi, d1_lo, d1_hi, ...]   (2 × dim_num values)
//! bounding coords:  [first_cell..., last_cell...]        (2 × dim_num values)
//! ```

use crate::error::{FragmentError, Result};
use tessella_core::{ArrayKind, ArraySchema};

/// Compression codec applied to every tile of the fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Physical tile addressing for one attribute file.
#[derive(Debug, Clone, Default)]
pub struct AttributeTiles {
    /// Byte offset of each tile in `<attr>.tdb` (or `__coords.tdb`).
    pub tile_offsets: Vec<u64>,
    /// On-disk payload size per tile. Required when the codec is not
    /// [`Codec::None`]; empty otherwise.
    pub tile_compressed_sizes: Vec<u64>,
    /// Byte offset of each values tile in `<attr>_var.tdb`. Variable-size
    /// attributes only.
    pub var_tile_offsets: Vec<u64>,
    /// Uncompressed size of each values tile. Variable-size attributes only.
    pub var_tile_sizes: Vec<u64>,
    /// On-disk values-tile payload sizes when compressed.
    pub var_tile_compressed_sizes: Vec<u64>,
}

/// Read-only physical metadata for one fragment.
#[derive(Debug, Clone)]
pub struct BookKeeping {
    tile_num: usize,
    codec: Codec,
    /// One entry per schema attribute; sparse fragments carry one more for
    /// the coordinates pseudo-attribute.
    attrs: Vec<AttributeTiles>,
    /// Sparse per-tile MBRs (see module docs for the layout).
    mbrs: Vec<Box<[u8]>>,
    /// Sparse per-tile first/last cell coordinates.
    bounding_coords: Vec<Box<[u8]>>,
    /// Cell count of the last sparse tile (all others hold `capacity`).
    last_tile_cell_num: u64,
}

impl BookKeeping {
    /// Assemble and cross-check the oracle against a schema.
    pub fn new(
        schema: &ArraySchema,
        codec: Codec,
        tile_num: usize,
        attrs: Vec<AttributeTiles>,
        mbrs: Vec<Box<[u8]>>,
        bounding_coords: Vec<Box<[u8]>>,
        last_tile_cell_num: u64,
    ) -> Result<Self> {
        let sparse = schema.kind() == ArrayKind::Sparse;
        let expected_attrs = schema.attribute_num() + if sparse { 1 } else { 0 };
        if attrs.len() != expected_attrs {
            return Err(FragmentError::invariant(format!(
                "expected {} attribute entries, got {}",
                expected_attrs,
                attrs.len()
            )));
        }

        for (slot, a) in attrs.iter().enumerate() {
            if a.tile_offsets.len() != tile_num {
                return Err(FragmentError::invariant(format!(
                    "attribute slot {}: {} tile offsets for {} tiles",
                    slot,
                    a.tile_offsets.len(),
                    tile_num
                )));
            }
            if codec != Codec::None && a.tile_compressed_sizes.len() != tile_num {
                return Err(FragmentError::invariant(format!(
                    "attribute slot {}: missing compressed tile sizes",
                    slot
                )));
            }
            let var = slot < schema.attribute_num() && schema.attribute(slot).is_var();
            if var {
                if a.var_tile_offsets.len() != tile_num || a.var_tile_sizes.len() != tile_num {
                    return Err(FragmentError::invariant(format!(
                        "variable attribute slot {}: missing values-tile addressing",
                        slot
                    )));
                }
                if codec != Codec::None && a.var_tile_compressed_sizes.len() != tile_num {
                    return Err(FragmentError::invariant(format!(
                        "variable attribute slot {}: missing compressed values-tile sizes",
                        slot
                    )));
                }
            }
        }

        if sparse {
            if mbrs.len() != tile_num || bounding_coords.len() != tile_num {
                return Err(FragmentError::invariant(format!(
                    "sparse fragment: {} MBRs / {} bounding coords for {} tiles",
                    mbrs.len(),
                    bounding_coords.len(),
                    tile_num
                )));
            }
            let mbr_len = 2 * schema.coords_cell_size();
            if mbrs.iter().any(|m| m.len() != mbr_len)
                || bounding_coords.iter().any(|b| b.len() != mbr_len)
            {
                return Err(FragmentError::invariant(
                    "sparse fragment: coordinate payload with wrong width",
                ));
            }
            if tile_num > 0
                && (last_tile_cell_num == 0 || last_tile_cell_num > schema.tile_cell_num())
            {
                return Err(FragmentError::invariant(format!(
                    "last tile cell count {} outside 1..={}",
                    last_tile_cell_num,
                    schema.tile_cell_num()
                )));
            }
        }

        Ok(Self { tile_num, codec, attrs, mbrs, bounding_coords, last_tile_cell_num })
    }

    pub fn tile_num(&self) -> usize {
        self.tile_num
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Tile addressing for an internal attribute slot (user attributes in
    /// schema order; the sparse coordinates slot last).
    pub fn attr(&self, slot: usize) -> &AttributeTiles {
        &self.attrs[slot]
    }

    /// Sparse per-tile MBR, opaque bytes.
    pub fn mbr(&self, pos: usize) -> &[u8] {
        &self.mbrs[pos]
    }

    /// Sparse per-tile first/last cell coordinates, opaque bytes.
    pub fn bounding_coords(&self, pos: usize) -> &[u8] {
        &self.bounding_coords[pos]
    }

    /// Cells in tile `pos`: full capacity except for the last sparse tile.
    pub fn cell_num(&self, pos: usize, schema: &ArraySchema) -> u64 {
        if schema.kind() == ArrayKind::Sparse && pos + 1 == self.tile_num {
            self.last_tile_cell_num
        } else {
            schema.tile_cell_num()
        }
    }

    /// Cell count of the last sparse tile.
    pub fn last_tile_cell_num(&self) -> u64 {
        self.last_tile_cell_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::{Attribute, CellOrder, DomainSpec};

    fn sparse_schema() -> ArraySchema {
        ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Sparse,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 99), (0, 99)], extents: vec![10, 10] },
            4,
        )
        .unwrap()
    }

    fn tiles(n: usize) -> AttributeTiles {
        AttributeTiles { tile_offsets: vec![0; n], ..Default::default() }
    }

    #[test]
    fn sparse_requires_coords_slot() {
        let schema = sparse_schema();
        let err = BookKeeping::new(&schema, Codec::None, 1, vec![tiles(1)], vec![], vec![], 1)
            .unwrap_err();
        assert!(matches!(err, FragmentError::Invariant(_)));
    }

    #[test]
    fn sparse_checks_mbr_width() {
        let schema = sparse_schema();
        let err = BookKeeping::new(
            &schema,
            Codec::None,
            1,
            vec![tiles(1), tiles(1)],
            vec![vec![0u8; 4].into()],
            vec![vec![0u8; 16].into()],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, FragmentError::Invariant(_)));
    }

    #[test]
    fn last_tile_cell_num_bounds() {
        let schema = sparse_schema();
        let err = BookKeeping::new(
            &schema,
            Codec::None,
            1,
            vec![tiles(1), tiles(1)],
            vec![vec![0u8; 16].into()],
            vec![vec![0u8; 16].into()],
            9,
        )
        .unwrap_err();
        assert!(matches!(err, FragmentError::Invariant(_)));

        let ok = BookKeeping::new(
            &schema,
            Codec::None,
            1,
            vec![tiles(1), tiles(1)],
            vec![vec![0u8; 16].into()],
            vec![vec![0u8; 16].into()],
            3,
        )
        .unwrap();
        assert_eq!(ok.cell_num(0, &schema), 3);
    }

    #[test]
    fn compressed_sizes_required_with_codec() {
        let schema = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9)], extents: vec![5] },
            0,
        )
        .unwrap();
        let err =
            BookKeeping::new(&schema, Codec::Gzip, 2, vec![tiles(2)], vec![], vec![], 0)
                .unwrap_err();
        assert!(matches!(err, FragmentError::Invariant(_)));
    }
}
