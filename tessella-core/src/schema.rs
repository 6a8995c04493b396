//! Array schema: the read engine's description of what is stored.
//!
//! Pure data, validated at construction. The schema is the oracle the
//! engine consults for attribute shapes, geometry kind, cell order, domain
//! and tile extents; it performs no I/O itself.

use crate::error::SchemaError;
use crate::Coord;

// ============================================================================
// Enums
// ============================================================================

/// Coordinate type of the array domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordType {
    I32,
    I64,
    F32,
    F64,
}

impl CoordType {
    /// Byte width of one coordinate value.
    pub fn size(self) -> usize {
        match self {
            CoordType::I32 | CoordType::F32 => 4,
            CoordType::I64 | CoordType::F64 => 8,
        }
    }
}

/// Dense (every cell exists) vs sparse (only written cells exist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Dense,
    Sparse,
}

/// Traversal order of cells within a tile, and of tiles within a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    RowMajor,
    ColMajor,
    Hilbert,
}

// ============================================================================
// Attribute
// ============================================================================

/// One named attribute of the array.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    cell_size: usize,
    var: bool,
}

impl Attribute {
    /// A fixed-size attribute storing `cell_size` bytes per cell.
    pub fn fixed(name: impl Into<String>, cell_size: usize) -> Self {
        Self { name: name.into(), cell_size, var: false }
    }

    /// A variable-size attribute (offsets tile + values tile).
    pub fn var(name: impl Into<String>) -> Self {
        Self { name: name.into(), cell_size: 0, var: true }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes per cell for a fixed-size attribute; for variable-size
    /// attributes the fixed part stores [`crate::VAR_OFFSET_SIZE`] bytes per
    /// cell instead.
    pub fn cell_size(&self) -> usize {
        if self.var { crate::VAR_OFFSET_SIZE } else { self.cell_size }
    }

    pub fn is_var(&self) -> bool {
        self.var
    }
}

// ============================================================================
// Domain
// ============================================================================

/// Typed domain bounds and tile extents, one entry per dimension.
///
/// Ranges are inclusive `(lo, hi)` pairs in the dimension's coordinate type;
/// extents are the tile side lengths in the same type.
#[derive(Debug, Clone)]
pub enum DomainSpec {
    I32 { ranges: Vec<(i32, i32)>, extents: Vec<i32> },
    I64 { ranges: Vec<(i64, i64)>, extents: Vec<i64> },
    F32 { ranges: Vec<(f32, f32)>, extents: Vec<f32> },
    F64 { ranges: Vec<(f64, f64)>, extents: Vec<f64> },
}

impl DomainSpec {
    pub fn dim_num(&self) -> usize {
        match self {
            DomainSpec::I32 { ranges, .. } => ranges.len(),
            DomainSpec::I64 { ranges, .. } => ranges.len(),
            DomainSpec::F32 { ranges, .. } => ranges.len(),
            DomainSpec::F64 { ranges, .. } => ranges.len(),
        }
    }

    pub fn coord_type(&self) -> CoordType {
        match self {
            DomainSpec::I32 { .. } => CoordType::I32,
            DomainSpec::I64 { .. } => CoordType::I64,
            DomainSpec::F32 { .. } => CoordType::F32,
            DomainSpec::F64 { .. } => CoordType::F64,
        }
    }

    fn validate(&self, kind: ArrayKind) -> Result<(), SchemaError> {
        fn check<T: Coord>(
            ranges: &[(T, T)],
            extents: &[T],
            zero: T,
        ) -> Result<(), SchemaError> {
            if extents.len() != ranges.len() {
                return Err(SchemaError::ExtentDimMismatch);
            }
            for (dim, &(lo, hi)) in ranges.iter().enumerate() {
                if !lo.is_finite_coord() || !hi.is_finite_coord() {
                    return Err(SchemaError::NonFiniteDomain { dim });
                }
                if hi < lo {
                    return Err(SchemaError::EmptyDomain { dim });
                }
            }
            for (dim, &e) in extents.iter().enumerate() {
                if !e.is_finite_coord() || e <= zero {
                    return Err(SchemaError::BadTileExtent { dim });
                }
            }
            Ok(())
        }

        match self {
            DomainSpec::I32 { ranges, extents } => {
                check(ranges, extents, 0)?;
                if kind == ArrayKind::Dense {
                    aligned_i64(
                        ranges.iter().map(|&(l, h)| (l as i64, h as i64)),
                        extents.iter().map(|&e| e as i64),
                    )?;
                }
            }
            DomainSpec::I64 { ranges, extents } => {
                check(ranges, extents, 0)?;
                if kind == ArrayKind::Dense {
                    aligned_i64(ranges.iter().copied(), extents.iter().copied())?;
                }
            }
            DomainSpec::F32 { ranges, extents } => {
                check(ranges, extents, 0.0)?;
                if kind == ArrayKind::Dense {
                    return Err(SchemaError::DenseFloatDomain);
                }
            }
            DomainSpec::F64 { ranges, extents } => {
                check(ranges, extents, 0.0)?;
                if kind == ArrayKind::Dense {
                    return Err(SchemaError::DenseFloatDomain);
                }
            }
        }
        Ok(())
    }

    /// Cells per tile for a dense domain (product of the extents).
    fn dense_tile_cells(&self) -> Result<u64, SchemaError> {
        let extents: Vec<u64> = match self {
            DomainSpec::I32 { extents, .. } => extents.iter().map(|&e| e as u64).collect(),
            DomainSpec::I64 { extents, .. } => extents.iter().map(|&e| e as u64).collect(),
            _ => return Err(SchemaError::DenseFloatDomain),
        };
        extents
            .iter()
            .try_fold(1u64, |acc, &e| acc.checked_mul(e))
            .ok_or(SchemaError::TileTooLarge)
    }
}

fn aligned_i64(
    ranges: impl Iterator<Item = (i64, i64)>,
    extents: impl Iterator<Item = i64>,
) -> Result<(), SchemaError> {
    for (dim, ((lo, hi), e)) in ranges.zip(extents).enumerate() {
        let side = (hi - lo + 1) as u64;
        if side % (e as u64) != 0 {
            return Err(SchemaError::UnalignedDomain { dim });
        }
    }
    Ok(())
}

// ============================================================================
// ArraySchema
// ============================================================================

/// Validated array schema.
#[derive(Debug, Clone)]
pub struct ArraySchema {
    attributes: Vec<Attribute>,
    kind: ArrayKind,
    cell_order: CellOrder,
    domain: DomainSpec,
    /// Sparse tile capacity in cells. For dense arrays this is derived from
    /// the tile extents.
    capacity: u64,
}

impl ArraySchema {
    pub fn new(
        attributes: Vec<Attribute>,
        kind: ArrayKind,
        cell_order: CellOrder,
        domain: DomainSpec,
        capacity: u64,
    ) -> Result<Self, SchemaError> {
        if domain.dim_num() == 0 {
            return Err(SchemaError::NoDimensions);
        }
        if attributes.is_empty() {
            return Err(SchemaError::NoAttributes);
        }
        for (i, a) in attributes.iter().enumerate() {
            if !a.is_var() && a.cell_size == 0 {
                return Err(SchemaError::ZeroCellSize(a.name.clone()));
            }
            if attributes[..i].iter().any(|b| b.name == a.name) {
                return Err(SchemaError::DuplicateAttribute(a.name.clone()));
            }
        }
        if kind == ArrayKind::Dense && cell_order == CellOrder::Hilbert {
            return Err(SchemaError::DenseHilbertOrder);
        }
        domain.validate(kind)?;

        let capacity = match kind {
            ArrayKind::Dense => domain.dense_tile_cells()?,
            ArrayKind::Sparse => {
                if capacity == 0 {
                    return Err(SchemaError::ZeroCapacity);
                }
                capacity
            }
        };

        Ok(Self { attributes, kind, cell_order, domain, capacity })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute_num(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute(&self, id: usize) -> &Attribute {
        &self.attributes[id]
    }

    pub fn kind(&self) -> ArrayKind {
        self.kind
    }

    pub fn cell_order(&self) -> CellOrder {
        self.cell_order
    }

    pub fn domain(&self) -> &DomainSpec {
        &self.domain
    }

    pub fn dim_num(&self) -> usize {
        self.domain.dim_num()
    }

    pub fn coord_type(&self) -> CoordType {
        self.domain.coord_type()
    }

    /// Cells per full tile (dense: product of extents; sparse: capacity).
    pub fn tile_cell_num(&self) -> u64 {
        self.capacity
    }

    /// Bytes per cell of the sparse coordinates pseudo-attribute.
    pub fn coords_cell_size(&self) -> usize {
        self.dim_num() * self.coord_type().size()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_2d() -> DomainSpec {
        DomainSpec::I32 { ranges: vec![(0, 9), (0, 9)], extents: vec![5, 5] }
    }

    #[test]
    fn dense_schema_derives_capacity() {
        let s = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            dense_2d(),
            0,
        )
        .unwrap();
        assert_eq!(s.tile_cell_num(), 25);
        assert_eq!(s.dim_num(), 2);
        assert_eq!(s.coords_cell_size(), 8);
    }

    #[test]
    fn dense_rejects_hilbert_and_floats() {
        let err = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::Hilbert,
            dense_2d(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DenseHilbertOrder));

        let err = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            DomainSpec::F64 { ranges: vec![(0.0, 1.0)], extents: vec![0.5] },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DenseFloatDomain));
    }

    #[test]
    fn dense_rejects_unaligned_domain() {
        let err = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9)], extents: vec![4] },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnalignedDomain { dim: 0 }));
    }

    #[test]
    fn sparse_requires_capacity() {
        let err = ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Sparse,
            CellOrder::RowMajor,
            dense_2d(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ZeroCapacity));
    }

    #[test]
    fn duplicate_attribute_rejected() {
        let err = ArraySchema::new(
            vec![Attribute::fixed("v", 4), Attribute::var("v")],
            ArrayKind::Sparse,
            CellOrder::RowMajor,
            dense_2d(),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateAttribute(_)));
    }

    #[test]
    fn var_attribute_fixed_part_is_offset_sized() {
        let a = Attribute::var("s");
        assert_eq!(a.cell_size(), crate::VAR_OFFSET_SIZE);
        assert!(a.is_var());
    }
}
