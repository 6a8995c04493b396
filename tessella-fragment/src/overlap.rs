//! Overlap records and dense tile geometry.
//!
//! A candidate tile's intersection with the subarray is classified as NONE,
//! FULL, PARTIAL_CONTIG or PARTIAL_NON_CONTIG, and reduced to a list of
//! *cell runs*: inclusive `[start, end]` cell-position intervals in the
//! tile's cell order. Runs are the one shape the copier understands — a
//! FULL tile is a single run over every cell, a contiguous partial overlap
//! is a single shorter run, a non-contiguous dense overlap is one run per
//! innermost slab, and a sparse partial tile gets its runs from the
//! coordinates scan.
//!
//! The dense half of tile search also lives here: the subarray mapped to
//! tile-domain coordinates and walked tile by tile in cell order.

use tessella_core::{CellOrder, DenseCoord};
use tracing::trace;

// ============================================================================
// Overlap records
// ============================================================================

/// How a tile overlaps the query subarray. `PartialContig` means the
/// qualifying cells form one contiguous range of cell positions;
/// `PartialNonContig` means they do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    None,
    Full,
    PartialContig,
    PartialNonContig,
}

/// One tile overlapping the subarray, in global tile order.
#[derive(Debug, Clone)]
pub struct OverlappingTile {
    /// Position of the tile in the fragment's global tile order.
    pub pos: usize,
    /// Cells the tile holds (capacity except a short last sparse tile).
    pub cell_num: u64,
    pub overlap: Overlap,
    /// Qualifying cell runs, inclusive `[start, end]`, sorted.
    pub runs: Vec<(u64, u64)>,
    /// Whether `runs` is final. Dense tiles and fully-covered sparse tiles
    /// are born prepared; a partially-covered sparse tile stays unprepared
    /// until its coordinates tile has been consulted.
    pub prepared: bool,
}

impl OverlappingTile {
    /// Total qualifying cells across the runs.
    pub fn qualifying_cells(&self) -> u64 {
        self.runs.iter().map(|&(s, e)| e - s + 1).sum()
    }
}

// ============================================================================
// Cell-order walking
// ============================================================================

/// Dimension indices from slowest- to fastest-varying for a cell order.
fn traversal(dim_num: usize, order: CellOrder) -> Vec<usize> {
    match order {
        CellOrder::RowMajor => (0..dim_num).collect(),
        CellOrder::ColMajor => (0..dim_num).rev().collect(),
        CellOrder::Hilbert => unreachable!("Hilbert order has no dense geometry"),
    }
}

/// Per-dimension strides (in cells) for linearizing under a cell order.
fn strides(extents: &[u64], order: CellOrder) -> Vec<u64> {
    let n = extents.len();
    let mut s = vec![1u64; n];
    match order {
        CellOrder::RowMajor => {
            for d in (0..n.saturating_sub(1)).rev() {
                s[d] = s[d + 1] * extents[d + 1];
            }
        }
        CellOrder::ColMajor => {
            for d in 1..n {
                s[d] = s[d - 1] * extents[d - 1];
            }
        }
        CellOrder::Hilbert => unreachable!("Hilbert order has no dense geometry"),
    }
    s
}

fn linearize(coords: &[u64], strides: &[u64]) -> u64 {
    coords.iter().zip(strides).map(|(&c, &s)| c * s).sum()
}

/// Advance an odometer over inclusive per-dimension ranges, fastest
/// dimension first per the cell order. Returns false when it wraps.
fn advance(coords: &mut [i64], ranges: &[(i64, i64)], order: CellOrder) -> bool {
    let seq = traversal(coords.len(), order);
    for &d in seq.iter().rev() {
        if coords[d] < ranges[d].1 {
            coords[d] += 1;
            return true;
        }
        coords[d] = ranges[d].0;
    }
    false
}

// ============================================================================
// Dense geometry
// ============================================================================

/// Dense tile search and overlap classification for one subarray.
pub(crate) struct DenseGeometry<T: DenseCoord> {
    subarray: Vec<(T, T)>,
    domain: Vec<(T, T)>,
    extents: Vec<T>,
    extent_cells: Vec<u64>,
    order: CellOrder,
    /// The subarray mapped to tile-domain coordinates, inclusive per dim.
    range_in_tile_domain: Vec<(i64, i64)>,
    /// Cell strides within a tile, per the cell order.
    cell_strides: Vec<u64>,
    /// Tile strides within the tile grid, per the cell order.
    tile_strides: Vec<u64>,
    cell_num: u64,
    /// Odometer over `range_in_tile_domain`; None once exhausted.
    next_coords: Option<Vec<i64>>,
}

impl<T: DenseCoord> DenseGeometry<T> {
    pub(crate) fn new(
        subarray: Vec<(T, T)>,
        domain: Vec<(T, T)>,
        extents: Vec<T>,
        order: CellOrder,
    ) -> Self {
        let dim_num = domain.len();
        let extent_cells: Vec<u64> =
            extents.iter().map(|&e| T::extent_cells(e)).collect();
        let cell_num = extent_cells.iter().product();
        let tiles_per_dim: Vec<u64> = (0..dim_num)
            .map(|d| {
                let (lo, hi) = domain[d];
                (hi.cells_from(lo) + 1) / extent_cells[d]
            })
            .collect();

        // Clip the subarray to the domain, then map to tile coordinates.
        let mut empty = false;
        let mut range_in_tile_domain = Vec::with_capacity(dim_num);
        for d in 0..dim_num {
            let (slo, shi) = subarray[d];
            let (dlo, dhi) = domain[d];
            let lo = if slo < dlo { dlo } else { slo };
            let hi = if shi > dhi { dhi } else { shi };
            if hi < lo {
                empty = true;
                range_in_tile_domain.push((0, -1));
                continue;
            }
            range_in_tile_domain.push((
                lo.tile_index(dlo, extents[d]),
                hi.tile_index(dlo, extents[d]),
            ));
        }

        let next_coords = if empty {
            None
        } else {
            Some(range_in_tile_domain.iter().map(|&(lo, _)| lo).collect())
        };
        trace!(?range_in_tile_domain, empty, "dense tile search range");

        Self {
            subarray,
            domain,
            extents,
            cell_strides: strides(&extent_cells, order),
            tile_strides: strides(&tiles_per_dim, order),
            extent_cells,
            order,
            range_in_tile_domain,
            cell_num,
            next_coords,
        }
    }

    /// The next overlapping tile in cell order, classified.
    pub(crate) fn next_tile(&mut self) -> Option<OverlappingTile> {
        let coords = self.next_coords.as_ref()?.clone();
        let tile = self.classify(&coords);
        let more = {
            let cur = self.next_coords.as_mut().expect("checked above");
            advance(cur, &self.range_in_tile_domain, self.order)
        };
        if !more {
            self.next_coords = None;
        }
        Some(tile)
    }

    /// Classify the tile at the given tile-domain coordinates. Every tile
    /// inside `range_in_tile_domain` overlaps the subarray, so the result
    /// is never `Overlap::None`.
    fn classify(&self, coords: &[i64]) -> OverlappingTile {
        let dim_num = coords.len();
        let mut rel = Vec::with_capacity(dim_num);
        let mut full = true;
        for d in 0..dim_num {
            let (dlo, _) = self.domain[d];
            let tile_lo = T::tile_low(dlo, self.extents[d], coords[d]);
            let tile_hi = tile_lo.add_cells(self.extent_cells[d] - 1);
            let (slo, shi) = self.subarray[d];
            let lo = if slo < tile_lo { tile_lo } else { slo };
            let hi = if shi > tile_hi { tile_hi } else { shi };
            let r = (lo.cells_from(tile_lo), hi.cells_from(tile_lo));
            full &= r.0 == 0 && r.1 == self.extent_cells[d] - 1;
            rel.push(r);
        }

        let pos = self.global_pos(coords);
        if full {
            return OverlappingTile {
                pos,
                cell_num: self.cell_num,
                overlap: Overlap::Full,
                runs: vec![(0, self.cell_num - 1)],
                prepared: true,
            };
        }

        let (overlap, runs) = if self.is_contiguous(&rel) {
            let start: Vec<u64> = rel.iter().map(|&(lo, _)| lo).collect();
            let end: Vec<u64> = rel.iter().map(|&(_, hi)| hi).collect();
            (
                Overlap::PartialContig,
                vec![(
                    linearize(&start, &self.cell_strides),
                    linearize(&end, &self.cell_strides),
                )],
            )
        } else {
            (Overlap::PartialNonContig, self.slab_runs(&rel))
        };

        OverlappingTile { pos, cell_num: self.cell_num, overlap, runs, prepared: true }
    }

    /// A partial overlap is contiguous iff, walking dimensions from slowest
    /// to fastest, every dimension before the first non-singleton is a
    /// singleton and every dimension after it spans the full tile extent.
    fn is_contiguous(&self, rel: &[(u64, u64)]) -> bool {
        let seq = traversal(rel.len(), self.order);
        let first_range = seq.iter().position(|&d| rel[d].0 != rel[d].1);
        match first_range {
            None => true,
            Some(k) => seq[k + 1..]
                .iter()
                .all(|&d| rel[d].0 == 0 && rel[d].1 == self.extent_cells[d] - 1),
        }
    }

    /// One run per innermost slab of the overlap box.
    fn slab_runs(&self, rel: &[(u64, u64)]) -> Vec<(u64, u64)> {
        let dim_num = rel.len();
        let seq = traversal(dim_num, self.order);
        let fastest = *seq.last().expect("at least one dimension");
        let run_len = rel[fastest].1 - rel[fastest].0;

        let outer_ranges: Vec<(i64, i64)> =
            rel.iter().map(|&(lo, hi)| (lo as i64, hi as i64)).collect();
        let mut cursor: Vec<i64> = rel.iter().map(|&(lo, _)| lo as i64).collect();
        // Pin the fastest dimension; the odometer walks the outer dims only.
        let mut pinned = outer_ranges.clone();
        pinned[fastest] = (rel[fastest].0 as i64, rel[fastest].0 as i64);

        let mut runs = Vec::new();
        loop {
            let cell: Vec<u64> = cursor.iter().map(|&c| c as u64).collect();
            let start = linearize(&cell, &self.cell_strides);
            runs.push((start, start + run_len));
            if !advance(&mut cursor, &pinned, self.order) {
                break;
            }
        }
        runs.sort_unstable();
        runs
    }

    /// Global tile position: the tile's rank in the whole domain's tile
    /// grid under the cell order.
    fn global_pos(&self, coords: &[i64]) -> usize {
        let c: Vec<u64> = coords.iter().map(|&v| v as u64).collect();
        linearize(&c, &self.tile_strides) as usize
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Domain [0,9]x[0,9], 5x5 tiles, row-major: four tiles in positions
    // 0: rows 0-4 / cols 0-4, 1: rows 0-4 / cols 5-9,
    // 2: rows 5-9 / cols 0-4, 3: rows 5-9 / cols 5-9.
    fn geom(subarray: Vec<(i32, i32)>, order: CellOrder) -> DenseGeometry<i32> {
        DenseGeometry::new(subarray, vec![(0, 9), (0, 9)], vec![5, 5], order)
    }

    fn collect(mut g: DenseGeometry<i32>) -> Vec<OverlappingTile> {
        let mut out = Vec::new();
        while let Some(t) = g.next_tile() {
            out.push(t);
        }
        out
    }

    #[test]
    fn full_tile_single_run() {
        let tiles = collect(geom(vec![(0, 4), (0, 4)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].pos, 0);
        assert_eq!(tiles[0].overlap, Overlap::Full);
        assert_eq!(tiles[0].runs, vec![(0, 24)]);
    }

    #[test]
    fn first_row_is_partial_contig_across_two_tiles() {
        let tiles = collect(geom(vec![(0, 0), (0, 9)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].pos, 0);
        assert_eq!(tiles[1].pos, 1);
        for t in &tiles {
            assert_eq!(t.overlap, Overlap::PartialContig);
            assert_eq!(t.runs, vec![(0, 4)]);
        }
    }

    #[test]
    fn column_band_is_non_contig() {
        // Columns 2-3 of every row: two cells per row slab.
        let tiles = collect(geom(vec![(0, 9), (2, 3)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].pos, 0);
        assert_eq!(tiles[1].pos, 2);
        for t in &tiles {
            assert_eq!(t.overlap, Overlap::PartialNonContig);
            assert_eq!(
                t.runs,
                vec![(2, 3), (7, 8), (12, 13), (17, 18), (22, 23)]
            );
        }
    }

    #[test]
    fn interior_row_band_spanning_cols_is_contig() {
        // Rows 1-2, all columns of tile 0: narrowing only at the slowest
        // level, so one contiguous range of cell positions.
        let tiles = collect(geom(vec![(1, 2), (0, 4)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].overlap, Overlap::PartialContig);
        assert_eq!(tiles[0].runs, vec![(5, 14)]);
    }

    #[test]
    fn col_major_mirrors_row_major() {
        // Same column band under column-major order: cells within a tile
        // are stored column by column, so the band is contiguous.
        let tiles = collect(geom(vec![(0, 9), (2, 3)], CellOrder::ColMajor));
        assert_eq!(tiles.len(), 2);
        for t in &tiles {
            assert_eq!(t.overlap, Overlap::PartialContig);
            assert_eq!(t.runs, vec![(10, 19)]);
        }
        // Tiles are walked in column-major tile order too: (0,0) then (1,0).
        assert_eq!(tiles[0].pos, 0);
        assert_eq!(tiles[1].pos, 1);
    }

    #[test]
    fn subarray_clipped_to_domain() {
        let tiles = collect(geom(vec![(-5, 2), (8, 20)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].pos, 1);
        assert_eq!(tiles[0].overlap, Overlap::PartialNonContig);
        // Rows 0-2, cols 8-9 relative to tile 1 → cols 3-4 of each row slab.
        assert_eq!(tiles[0].runs, vec![(3, 4), (8, 9), (13, 14)]);
    }

    #[test]
    fn disjoint_subarray_yields_nothing() {
        let tiles = collect(geom(vec![(20, 30), (0, 9)], CellOrder::RowMajor));
        assert!(tiles.is_empty());
    }

    #[test]
    fn unary_cell_is_contiguous() {
        let tiles = collect(geom(vec![(7, 7), (3, 3)], CellOrder::RowMajor));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].pos, 2);
        assert_eq!(tiles[0].overlap, Overlap::PartialContig);
        assert_eq!(tiles[0].runs, vec![(13, 13)]);
    }

    #[test]
    fn qualifying_cells_counts_runs() {
        let t = OverlappingTile {
            pos: 0,
            cell_num: 25,
            overlap: Overlap::PartialNonContig,
            runs: vec![(2, 3), (7, 8)],
            prepared: true,
        };
        assert_eq!(t.qualifying_cells(), 4);
    }
}
