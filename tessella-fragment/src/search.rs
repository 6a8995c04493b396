//! Sparse tile search and cell-position computation.
//!
//! Sparse tiles are identified by position in the fragment's global tile
//! order. The search maps the subarray to a contiguous candidate range
//! `[lo, hi]` of positions by pruning against book-keeping metadata:
//!
//! - row-/column-major orders binary-search the per-tile MBR bounds of the
//!   major dimension;
//! - a unary subarray (all dimensions collapsed to a point) binary-searches
//!   the per-tile bounding coordinates under the fragment's cell-order
//!   comparator (row, column or Hilbert);
//! - a non-unary Hilbert subarray falls back to the full tile list and lets
//!   per-tile MBR classification prune to NONE.
//!
//! For a partially covered tile, the qualifying cell positions are computed
//! from the coordinates tile exactly once — a linear scan emitting maximal
//! runs, or a single binary search for a unary subarray — and reused by
//! every attribute.

use std::cmp::Ordering;

use tessella_core::{CellOrder, Coord, HilbertKey};
use tracing::trace;

use crate::book_keeping::{BookKeeping, Codec};
use crate::error::Result;
use crate::overlap::{Overlap, OverlappingTile};
use crate::tile_io::{AttrTiles, TileReader};

/// Sparse tile search and overlap preparation for one subarray.
pub(crate) struct SparseGeometry<T: Coord> {
    subarray: Vec<(T, T)>,
    domain: Vec<(T, T)>,
    order: CellOrder,
    hilbert: Option<HilbertKey>,
    dim_num: usize,
    /// Bytes per stored cell in the coordinates tile.
    cell_size: usize,
    capacity: u64,
    last_tile_cell_num: u64,
    /// Internal slot of the coordinates pseudo-attribute.
    coords_slot: usize,
    /// Inclusive candidate range in global tile order; None when empty.
    search_range: Option<(usize, usize)>,
    next_pos: usize,
    /// The collapsed point of a unary subarray.
    unary_point: Option<Vec<T>>,
    /// Cache slot for the coordinates tile (shared by all attributes).
    coords_cache: AttrTiles,
}

impl<T: Coord> SparseGeometry<T> {
    pub(crate) fn new(
        subarray: Vec<(T, T)>,
        domain: Vec<(T, T)>,
        order: CellOrder,
        capacity: u64,
        coords_slot: usize,
        bk: &BookKeeping,
    ) -> Self {
        let dim_num = domain.len();
        let hilbert =
            (order == CellOrder::Hilbert).then(|| HilbertKey::new(dim_num));
        let unary_point = subarray
            .iter()
            .all(|&(lo, hi)| lo == hi)
            .then(|| subarray.iter().map(|&(lo, _)| lo).collect());

        let mut geom = Self {
            subarray,
            domain,
            order,
            hilbert,
            dim_num,
            cell_size: dim_num * T::SIZE,
            capacity,
            last_tile_cell_num: 0,
            coords_slot,
            search_range: None,
            next_pos: 0,
            unary_point,
            coords_cache: AttrTiles::default(),
        };
        geom.last_tile_cell_num = bk.last_tile_cell_num();
        geom.search_range = geom.init_search_range(bk);
        geom.next_pos = geom.search_range.map(|(lo, _)| lo).unwrap_or(0);
        trace!(range = ?geom.search_range, "sparse tile search range");
        geom
    }

    fn cell_num(&self, pos: usize, tile_num: usize) -> u64 {
        if pos + 1 == tile_num {
            self.last_tile_cell_num
        } else {
            self.capacity
        }
    }

    // ------------------------------------------------------------------
    // Tile search
    // ------------------------------------------------------------------

    fn init_search_range(&self, bk: &BookKeeping) -> Option<(usize, usize)> {
        let tile_num = bk.tile_num();
        if tile_num == 0 {
            return None;
        }

        if let Some(point) = &self.unary_point {
            // First tile whose last cell is not below the point, last tile
            // whose first cell is not above it.
            let lo = partition(tile_num, |t| {
                self.cmp_cells(last_cell(bk.bounding_coords(t), self.cell_size), point)
                    == Ordering::Less
            });
            let hi = partition(tile_num, |t| {
                self.cmp_cells(first_cell(bk.bounding_coords(t), self.cell_size), point)
                    != Ordering::Greater
            });
            if lo >= tile_num || hi == 0 || hi - 1 < lo {
                return None;
            }
            return Some((lo, hi - 1));
        }

        match self.order {
            CellOrder::RowMajor | CellOrder::ColMajor => {
                let major = if self.order == CellOrder::RowMajor {
                    0
                } else {
                    self.dim_num - 1
                };
                let (sub_lo, sub_hi) = self.subarray[major];
                let lo = partition(tile_num, |t| {
                    mbr_val::<T>(bk.mbr(t), 2 * major + 1).total_cmp(&sub_lo)
                        == Ordering::Less
                });
                let hi = partition(tile_num, |t| {
                    mbr_val::<T>(bk.mbr(t), 2 * major).total_cmp(&sub_hi)
                        != Ordering::Greater
                });
                if lo >= tile_num || hi == 0 || hi - 1 < lo {
                    None
                } else {
                    Some((lo, hi - 1))
                }
            }
            // No usable total order on MBRs along the curve: consider every
            // tile and let MBR classification prune.
            CellOrder::Hilbert => Some((0, tile_num - 1)),
        }
    }

    /// The next candidate tile, classified against its MBR.
    pub(crate) fn next_tile(&mut self, bk: &BookKeeping) -> Result<Option<OverlappingTile>> {
        let Some((_, hi)) = self.search_range else {
            return Ok(None);
        };
        if self.next_pos > hi {
            return Ok(None);
        }
        let pos = self.next_pos;
        self.next_pos += 1;

        let mbr = bk.mbr(pos);
        let mut disjoint = false;
        let mut contained = true;
        for d in 0..self.dim_num {
            let m_lo = mbr_val::<T>(mbr, 2 * d);
            let m_hi = mbr_val::<T>(mbr, 2 * d + 1);
            let (s_lo, s_hi) = self.subarray[d];
            // A dimension overlaps when the intervals intersect; NaN bounds
            // fail both comparisons and exclude the tile.
            if !(m_lo <= s_hi && m_hi >= s_lo) {
                disjoint = true;
                break;
            }
            contained &= s_lo <= m_lo && m_hi <= s_hi;
        }

        let cell_num = self.cell_num(pos, bk.tile_num());
        let tile = if disjoint {
            OverlappingTile {
                pos,
                cell_num,
                overlap: Overlap::None,
                runs: Vec::new(),
                prepared: true,
            }
        } else if contained {
            OverlappingTile {
                pos,
                cell_num,
                overlap: Overlap::Full,
                runs: vec![(0, cell_num - 1)],
                prepared: true,
            }
        } else {
            // Overlap kind is settled once the coordinates are consulted.
            OverlappingTile {
                pos,
                cell_num,
                overlap: Overlap::PartialNonContig,
                runs: Vec::new(),
                prepared: false,
            }
        };
        trace!(pos, overlap = ?tile.overlap, prepared = tile.prepared, "sparse candidate tile");
        Ok(Some(tile))
    }

    // ------------------------------------------------------------------
    // Cell-position computation
    // ------------------------------------------------------------------

    /// Fetch the coordinates tile and settle the tile's qualifying cell
    /// runs. Called at most once per tile; every attribute reuses the
    /// result.
    pub(crate) fn prepare(
        &mut self,
        tile: &mut OverlappingTile,
        io: &mut TileReader,
        bk: &BookKeeping,
    ) -> Result<()> {
        let pos = tile.pos;
        let tile_size = tile.cell_num as usize * self.cell_size;
        let full_size = self.capacity as usize * self.cell_size;
        let at = bk.attr(self.coords_slot);
        let disk_size = match bk.codec() {
            Codec::None => tile_size,
            _ => at.tile_compressed_sizes[pos] as usize,
        };
        io.fetch_fixed(
            &mut self.coords_cache,
            self.coords_slot,
            pos,
            at.tile_offsets[pos],
            tile_size,
            full_size,
            disk_size,
        )?;
        let bytes = self.coords_cache.fixed_bytes();

        let runs = if let Some(point) = &self.unary_point {
            unary_runs::<T>(
                bytes,
                tile.cell_num,
                self.cell_size,
                point,
                |a, b| self.cmp_cells(a, b),
            )
        } else {
            scan_runs::<T>(bytes, tile.cell_num, self.cell_size, &self.subarray)
        };

        tile.overlap = match runs.len() {
            0 => Overlap::None,
            1 => Overlap::PartialContig,
            _ => Overlap::PartialNonContig,
        };
        tile.runs = runs;
        tile.prepared = true;
        trace!(pos, overlap = ?tile.overlap, runs = tile.runs.len(), "sparse cell positions");
        Ok(())
    }

    /// Release the coordinates cache once every attribute has moved past
    /// the tile it holds.
    pub(crate) fn release_before(&mut self, min_pos: usize) {
        if matches!(self.coords_cache.fetched, Some(p) if p < min_pos) {
            self.coords_cache.release();
        }
    }

    // ------------------------------------------------------------------
    // Comparators
    // ------------------------------------------------------------------

    /// Compare two stored cells under the fragment's cell order. `a` is a
    /// raw cell from a coordinates payload; `b` is a decoded point.
    fn cmp_cells(&self, a: &[u8], b: &[T]) -> Ordering {
        match self.order {
            CellOrder::RowMajor => self.cmp_lex(a, b, false),
            CellOrder::ColMajor => self.cmp_lex(a, b, true),
            CellOrder::Hilbert => {
                let h = self.hilbert.expect("set for Hilbert order");
                let ka = self.hilbert_key(&h, |d| T::read_ne(coord_slice::<T>(a, d)));
                let kb = self.hilbert_key(&h, |d| b[d]);
                ka.cmp(&kb).then_with(|| self.cmp_lex(a, b, false))
            }
        }
    }

    fn cmp_lex(&self, a: &[u8], b: &[T], reversed: bool) -> Ordering {
        let dims: Box<dyn Iterator<Item = usize>> = if reversed {
            Box::new((0..self.dim_num).rev())
        } else {
            Box::new(0..self.dim_num)
        };
        for d in dims {
            let va = T::read_ne(coord_slice::<T>(a, d));
            let ord = va.total_cmp(&b[d]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn hilbert_key(&self, h: &HilbertKey, coord: impl Fn(usize) -> T) -> u64 {
        let buckets: Vec<u64> = (0..self.dim_num)
            .map(|d| {
                let (lo, hi) = self.domain[d];
                coord(d).hilbert_bucket(lo, hi, h.bits())
            })
            .collect();
        h.index(&buckets)
    }
}

// ============================================================================
// Raw coordinate payload helpers
// ============================================================================

fn coord_slice<T: Coord>(cell: &[u8], dim: usize) -> &[u8] {
    &cell[dim * T::SIZE..(dim + 1) * T::SIZE]
}

fn cell_at(bytes: &[u8], c: u64, cell_size: usize) -> &[u8] {
    let start = c as usize * cell_size;
    &bytes[start..start + cell_size]
}

fn first_cell(bounding: &[u8], cell_size: usize) -> &[u8] {
    &bounding[..cell_size]
}

fn last_cell(bounding: &[u8], cell_size: usize) -> &[u8] {
    &bounding[cell_size..]
}

/// Decode the `i`-th value of an MBR payload
/// (`[d0_lo, d0_hi, d1_lo, d1_hi, ...]`).
fn mbr_val<T: Coord>(mbr: &[u8], i: usize) -> T {
    T::read_ne(&mbr[i * T::SIZE..(i + 1) * T::SIZE])
}

/// First index in `[0, n)` where `pred` turns false; `pred` must be
/// monotone (true prefix, false suffix).
fn partition(n: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Linear scan of a coordinates tile, emitting maximal runs of cells
/// inside the subarray.
fn scan_runs<T: Coord>(
    bytes: &[u8],
    cell_num: u64,
    cell_size: usize,
    subarray: &[(T, T)],
) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut start: Option<u64> = None;
    for c in 0..cell_num {
        let cell = cell_at(bytes, c, cell_size);
        let inside = subarray.iter().enumerate().all(|(d, &(lo, hi))| {
            T::read_ne(coord_slice::<T>(cell, d)).in_range(lo, hi)
        });
        if inside {
            start.get_or_insert(c);
        } else if let Some(s) = start.take() {
            runs.push((s, c - 1));
        }
    }
    if let Some(s) = start {
        runs.push((s, cell_num - 1));
    }
    runs
}

/// Binary search for the cells equal to a unary subarray's point, under
/// the fragment's cell-order comparator.
fn unary_runs<T: Coord>(
    bytes: &[u8],
    cell_num: u64,
    cell_size: usize,
    point: &[T],
    cmp: impl Fn(&[u8], &[T]) -> Ordering,
) -> Vec<(u64, u64)> {
    let idx = partition(cell_num as usize, |c| {
        cmp(cell_at(bytes, c as u64, cell_size), point) == Ordering::Less
    }) as u64;
    if idx == cell_num || cmp(cell_at(bytes, idx, cell_size), point) != Ordering::Equal {
        return Vec::new();
    }
    let mut end = idx;
    while end + 1 < cell_num
        && cmp(cell_at(bytes, end + 1, cell_size), point) == Ordering::Equal
    {
        end += 1;
    }
    vec![(idx, end)]
}

// ============================================================================
// Tests
// ============================================================================
