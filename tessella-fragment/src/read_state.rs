//! The fragment read state: per-attribute cursors over the overlapping
//! tiles of one subarray.
//!
//! A `ReadState` is a long-lived object bound to (fragment, book-keeping,
//! subarray). Each `read` call drives every attribute's cursor through the
//! shared overlapping-tile list — classify, fetch, copy — until the
//! attribute's buffer is out of space (overflow, resumable on the next
//! call) or the tiles are exhausted. The list is append-only and processed
//! in global tile order; cursors never move backwards.
//!
//! Per tile and attribute the state machine is:
//!
//! ```text
//! UNVISITED → CLASSIFIED(overlap)
//! CLASSIFIED(NONE) → DONE
//! CLASSIFIED(_)    → FETCHED → COPYING → DONE | PAUSED (overflow)
//! ```
//!
//! Only DONE advances the cursor; PAUSED pins the attribute's cache slot
//! (and any mmap region) across calls. After each call, housekeeping
//! releases every tile record all attributes have moved past and compacts
//! the list from the front.

use std::sync::Arc;

use tessella_core::{
    ArrayKind, ArraySchema, Coord, DenseCoord, DomainSpec, Subarray,
};
use tracing::{debug, trace};

use crate::book_keeping::{BookKeeping, Codec};
use crate::copy::{
    copy_fixed_runs, copy_var_runs, shift_var_offsets, CopyCursor, CopyOutcome,
};
use crate::error::{FragmentError, Result};
use crate::fragment::{Fragment, ReadConfig};
use crate::overlap::{DenseGeometry, Overlap, OverlappingTile};
use crate::search::SparseGeometry;
use crate::tile_io::{AttrTiles, FilePart, ReadStats, TileReader};

// ============================================================================
// Caller buffers
// ============================================================================

/// One output buffer per schema attribute, in schema order. Capacities are
/// the caller's; the engine reports bytes written back through the
/// `written` fields on every call.
pub enum ReadBuffer<'a> {
    Fixed {
        data: &'a mut [u8],
        written: usize,
    },
    Var {
        /// Receives one u64 offset per cell, relative to the start of
        /// `values` for this call.
        offsets: &'a mut [u8],
        values: &'a mut [u8],
        offsets_written: usize,
        values_written: usize,
    },
}

impl<'a> ReadBuffer<'a> {
    pub fn fixed(data: &'a mut [u8]) -> Self {
        ReadBuffer::Fixed { data, written: 0 }
    }

    pub fn var(offsets: &'a mut [u8], values: &'a mut [u8]) -> Self {
        ReadBuffer::Var { offsets, values, offsets_written: 0, values_written: 0 }
    }

    /// Bytes written to the primary buffer (cell data, or offsets for a
    /// variable-size attribute) by the last call.
    pub fn bytes_written(&self) -> usize {
        match self {
            ReadBuffer::Fixed { written, .. } => *written,
            ReadBuffer::Var { offsets_written, .. } => *offsets_written,
        }
    }

    /// Bytes written to the values buffer by the last call (variable-size
    /// attributes only).
    pub fn values_written(&self) -> usize {
        match self {
            ReadBuffer::Fixed { .. } => 0,
            ReadBuffer::Var { values_written, .. } => *values_written,
        }
    }
}

// ============================================================================
// Geometry dispatch
// ============================================================================

/// What dense and sparse tile geometry expose to the driver.
trait Geometry: Send {
    /// Produce the next overlapping tile in global order, classified.
    fn next_tile(&mut self, bk: &BookKeeping) -> Result<Option<OverlappingTile>>;

    /// Finalize a tile's qualifying cell runs (sparse coordinates scan);
    /// no-op for tiles born prepared.
    fn prepare(
        &mut self,
        tile: &mut OverlappingTile,
        io: &mut TileReader,
        bk: &BookKeeping,
    ) -> Result<()>;

    /// Drop geometry-owned caches for tiles below `min_pos`.
    fn release_before(&mut self, min_pos: usize);
}

impl<T: DenseCoord> Geometry for DenseGeometry<T> {
    fn next_tile(&mut self, _bk: &BookKeeping) -> Result<Option<OverlappingTile>> {
        Ok(DenseGeometry::next_tile(self))
    }

    fn prepare(
        &mut self,
        _tile: &mut OverlappingTile,
        _io: &mut TileReader,
        _bk: &BookKeeping,
    ) -> Result<()> {
        Ok(())
    }

    fn release_before(&mut self, _min_pos: usize) {}
}

impl<T: Coord> Geometry for SparseGeometry<T> {
    fn next_tile(&mut self, bk: &BookKeeping) -> Result<Option<OverlappingTile>> {
        SparseGeometry::next_tile(self, bk)
    }

    fn prepare(
        &mut self,
        tile: &mut OverlappingTile,
        io: &mut TileReader,
        bk: &BookKeeping,
    ) -> Result<()> {
        SparseGeometry::prepare(self, tile, io, bk)
    }

    fn release_before(&mut self, min_pos: usize) {
        SparseGeometry::release_before(self, min_pos)
    }
}

// ============================================================================
// ReadState
// ============================================================================

/// Reads cells of one fragment that fall inside one subarray.
pub struct ReadState {
    inner: Box<dyn FragmentReader + Send>,
}

impl std::fmt::Debug for ReadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadState").finish_non_exhaustive()
    }
}

impl ReadState {
    /// Bind a read state to a fragment, its book-keeping and a subarray.
    pub fn new(
        fragment: Fragment,
        book_keeping: BookKeeping,
        subarray: Subarray,
        config: ReadConfig,
    ) -> Result<Self> {
        let schema = fragment.schema().clone();
        if subarray.dim_num() != schema.dim_num() {
            return Err(FragmentError::invariant(format!(
                "subarray has {} dimensions, schema has {}",
                subarray.dim_num(),
                schema.dim_num()
            )));
        }
        if subarray.coord_type() != schema.coord_type() {
            return Err(FragmentError::invariant(
                "subarray coordinate type does not match the array domain",
            ));
        }

        let kind = schema.kind();
        let domain = schema.domain().clone();
        let inner: Box<dyn FragmentReader + Send> = match (kind, domain, subarray) {
            (ArrayKind::Dense, DomainSpec::I32 { ranges, extents }, Subarray::I32(sub)) => {
                Box::new(dense_engine(fragment, book_keeping, config, sub, ranges, extents)?)
            }
            (ArrayKind::Dense, DomainSpec::I64 { ranges, extents }, Subarray::I64(sub)) => {
                Box::new(dense_engine(fragment, book_keeping, config, sub, ranges, extents)?)
            }
            (ArrayKind::Sparse, DomainSpec::I32 { ranges, .. }, Subarray::I32(sub)) => {
                Box::new(sparse_engine(fragment, book_keeping, config, sub, ranges)?)
            }
            (ArrayKind::Sparse, DomainSpec::I64 { ranges, .. }, Subarray::I64(sub)) => {
                Box::new(sparse_engine(fragment, book_keeping, config, sub, ranges)?)
            }
            (ArrayKind::Sparse, DomainSpec::F32 { ranges, .. }, Subarray::F32(sub)) => {
                Box::new(sparse_engine(fragment, book_keeping, config, sub, ranges)?)
            }
            (ArrayKind::Sparse, DomainSpec::F64 { ranges, .. }, Subarray::F64(sub)) => {
                Box::new(sparse_engine(fragment, book_keeping, config, sub, ranges)?)
            }
            _ => {
                return Err(FragmentError::invariant(
                    "unsupported geometry for this array kind",
                ))
            }
        };
        Ok(Self { inner })
    }

    /// Read qualifying cells into the caller's buffers, one per attribute
    /// in schema order.
    ///
    /// Overflow is not an error: when an attribute's buffer fills before
    /// its tiles are exhausted, [`overflow`](Self::overflow) reports it and
    /// the next call resumes where this one stopped. An empty result is
    /// also success, with zero bytes written.
    pub fn read(&mut self, buffers: &mut [ReadBuffer<'_>]) -> Result<()> {
        self.inner.read(buffers)
    }

    /// Whether the attribute's buffer overflowed on the last call.
    pub fn overflow(&self, attribute: usize) -> bool {
        self.inner.overflow(attribute)
    }

    /// Whether any attribute still has qualifying cells to deliver.
    pub fn has_more_cells(&self) -> bool {
        self.inner.has_more_cells()
    }

    /// I/O counters accumulated over the engine's lifetime.
    pub fn stats(&self) -> ReadStats {
        self.inner.stats()
    }
}

fn dense_engine<T: DenseCoord>(
    fragment: Fragment,
    bk: BookKeeping,
    config: ReadConfig,
    subarray: Vec<(T, T)>,
    domain: Vec<(T, T)>,
    extents: Vec<T>,
) -> Result<Engine<DenseGeometry<T>>> {
    let schema = fragment.schema().clone();
    let mut expected_tiles = 1u64;
    for (d, &(lo, hi)) in domain.iter().enumerate() {
        expected_tiles *= (hi.cells_from(lo) + 1) / T::extent_cells(extents[d]);
    }
    if bk.tile_num() as u64 != expected_tiles {
        return Err(FragmentError::invariant(format!(
            "dense fragment has {} tiles, domain expects {}",
            bk.tile_num(),
            expected_tiles
        )));
    }
    let geom = DenseGeometry::new(subarray, domain, extents, schema.cell_order());
    Engine::new(fragment, schema, bk, config, geom, false)
}

fn sparse_engine<T: Coord>(
    fragment: Fragment,
    bk: BookKeeping,
    config: ReadConfig,
    subarray: Vec<(T, T)>,
    domain: Vec<(T, T)>,
) -> Result<Engine<SparseGeometry<T>>> {
    let schema = fragment.schema().clone();
    let geom = SparseGeometry::new(
        subarray,
        domain,
        schema.cell_order(),
        schema.tile_cell_num(),
        schema.attribute_num(),
        &bk,
    );
    Engine::new(fragment, schema, bk, config, geom, true)
}

// ============================================================================
// Engine
// ============================================================================

trait FragmentReader {
    fn read(&mut self, buffers: &mut [ReadBuffer<'_>]) -> Result<()>;
    fn overflow(&self, attribute: usize) -> bool;
    fn has_more_cells(&self) -> bool;
    fn stats(&self) -> ReadStats;
}

/// Per-attribute read cursor.
#[derive(Debug, Default)]
struct AttrCursor {
    /// Index into the (compacted) overlapping-tile list.
    tile_idx: usize,
    copy: CopyCursor,
    overflow: bool,
    done: bool,
    /// Lazily probed: attribute file absent or zero-length.
    empty: Option<bool>,
}

struct Engine<G: Geometry> {
    schema: Arc<ArraySchema>,
    bk: BookKeeping,
    geom: G,
    io: TileReader,
    /// Shared overlapping-tile list, append-only within a query.
    tiles: Vec<OverlappingTile>,
    /// Whether the geometry has produced its last tile.
    exhausted: bool,
    cursors: Vec<AttrCursor>,
    /// One cache slot per user attribute (coordinates live in the geometry).
    slots: Vec<AttrTiles>,
}

impl<G: Geometry> Engine<G> {
    fn new(
        fragment: Fragment,
        schema: Arc<ArraySchema>,
        bk: BookKeeping,
        config: ReadConfig,
        geom: G,
        sparse: bool,
    ) -> Result<Self> {
        let attribute_num = schema.attribute_num();
        let slot_num = attribute_num + sparse as usize;
        let io = TileReader::new(fragment, config.io_mode, bk.codec(), slot_num);
        Ok(Self {
            schema,
            bk,
            geom,
            io,
            tiles: Vec::new(),
            exhausted: false,
            cursors: (0..attribute_num).map(|_| AttrCursor::default()).collect(),
            slots: (0..attribute_num).map(|_| AttrTiles::default()).collect(),
        })
    }

    fn read_attribute(&mut self, a: usize, buf: &mut ReadBuffer<'_>) -> Result<()> {
        if self.cursors[a].empty.is_none() {
            let empty = self.io.attr_len(FilePart::Fixed, a)? == 0;
            self.cursors[a].empty = Some(empty);
            if empty {
                debug!(attribute = a, "attribute never written; reads yield no cells");
                self.cursors[a].done = true;
            }
        }
        if self.cursors[a].done {
            return Ok(());
        }

        loop {
            // Materialize the tile record under the cursor.
            while self.cursors[a].tile_idx == self.tiles.len() && !self.exhausted {
                match self.geom.next_tile(&self.bk)? {
                    Some(t) => {
                        trace!(pos = t.pos, overlap = ?t.overlap, "overlapping tile");
                        self.tiles.push(t);
                    }
                    None => self.exhausted = true,
                }
            }
            if self.cursors[a].tile_idx >= self.tiles.len() {
                self.cursors[a].done = true;
                return Ok(());
            }

            let idx = self.cursors[a].tile_idx;
            if self.tiles[idx].overlap == Overlap::None {
                self.advance(a);
                continue;
            }
            if !self.tiles[idx].prepared {
                self.geom.prepare(&mut self.tiles[idx], &mut self.io, &self.bk)?;
                if self.tiles[idx].runs.is_empty() {
                    self.advance(a);
                    continue;
                }
            }

            match self.copy_step(a, idx, buf)? {
                CopyOutcome::TileDone => self.advance(a),
                CopyOutcome::BufferFull => {
                    self.cursors[a].overflow = true;
                    trace!(attribute = a, tile = self.tiles[idx].pos, "buffer overflow");
                    return Ok(());
                }
            }
        }
    }

    /// Copy as much of the cursor's tile as fits. Dispatches between the
    /// direct file→buffer paths and the cached-tile copier.
    fn copy_step(
        &mut self,
        a: usize,
        idx: usize,
        buf: &mut ReadBuffer<'_>,
    ) -> Result<CopyOutcome> {
        let attr = self.schema.attribute(a);
        let cell_size = attr.cell_size();
        let is_var = attr.is_var();
        let pos = self.tiles[idx].pos;
        let cell_num = self.tiles[idx].cell_num;
        let overlap = self.tiles[idx].overlap;
        let tile_size = cell_num as usize * cell_size;
        let full_tile_size = self.schema.tile_cell_num() as usize * cell_size;

        let codec = self.bk.codec();
        let at = self.bk.attr(a);
        let offset = at.tile_offsets[pos];
        let disk_size = match codec {
            Codec::None => tile_size,
            _ => at.tile_compressed_sizes[pos] as usize,
        };
        let fresh = self.cursors[a].copy.is_fresh();

        if !is_var {
            let ReadBuffer::Fixed { data, written } = buf else {
                return Err(FragmentError::invariant(format!(
                    "attribute {} is fixed-size but got a Var buffer",
                    a
                )));
            };

            // Direct path: a single untouched run of an uncompressed tile
            // that fits the free space goes file → caller buffer, skipping
            // the cache slot.
            if codec == Codec::None && fresh && self.tiles[idx].runs.len() == 1 {
                let (start, end) = self.tiles[idx].runs[0];
                let run_bytes = (end - start + 1) as usize * cell_size;
                let free = data.len() - *written;
                if run_bytes <= free {
                    let run_offset = offset + start * cell_size as u64;
                    self.io.read_direct(
                        FilePart::Fixed,
                        a,
                        run_offset,
                        &mut data[*written..*written + run_bytes],
                    )?;
                    self.io.stats.direct_copies += 1;
                    *written += run_bytes;
                    trace!(attribute = a, pos, bytes = run_bytes, "direct copy");
                    return Ok(CopyOutcome::TileDone);
                }
            }

            self.io.fetch_fixed(
                &mut self.slots[a],
                a,
                pos,
                offset,
                tile_size,
                full_tile_size,
                disk_size,
            )?;
            Ok(copy_fixed_runs(
                self.slots[a].fixed_bytes(),
                cell_size,
                &self.tiles[idx].runs,
                &mut self.cursors[a].copy,
                data,
                written,
            ))
        } else {
            let ReadBuffer::Var { offsets, values, offsets_written, values_written } = buf
            else {
                return Err(FragmentError::invariant(format!(
                    "attribute {} is variable-size but got a Fixed buffer",
                    a
                )));
            };

            let var_offset = at.var_tile_offsets[pos];
            let var_size = at.var_tile_sizes[pos] as usize;
            let var_disk_size = match codec {
                Codec::None => var_size,
                _ => at.var_tile_compressed_sizes[pos] as usize,
            };

            // Direct path for a fully overlapping uncompressed tile whose
            // two parts both fit: raw offsets land in the caller buffer and
            // are rebased in place.
            if codec == Codec::None
                && fresh
                && overlap == Overlap::Full
                && tile_size <= offsets.len() - *offsets_written
                && var_size <= values.len() - *values_written
            {
                self.io.read_direct(
                    FilePart::Fixed,
                    a,
                    offset,
                    &mut offsets[*offsets_written..*offsets_written + tile_size],
                )?;
                self.io.read_direct(
                    FilePart::Var,
                    a,
                    var_offset,
                    &mut values[*values_written..*values_written + var_size],
                )?;
                shift_var_offsets(
                    &mut offsets[*offsets_written..*offsets_written + tile_size],
                    cell_num,
                    *values_written as u64,
                );
                self.io.stats.direct_copies += 1;
                *offsets_written += tile_size;
                *values_written += var_size;
                trace!(attribute = a, pos, bytes = tile_size + var_size, "direct var copy");
                return Ok(CopyOutcome::TileDone);
            }

            self.io.fetch_fixed(
                &mut self.slots[a],
                a,
                pos,
                offset,
                tile_size,
                full_tile_size,
                disk_size,
            )?;
            self.io.fetch_var(&mut self.slots[a], a, pos, var_offset, var_size, var_disk_size)?;
            let slot = &self.slots[a];
            Ok(copy_var_runs(
                slot.fixed_bytes(),
                slot.var_bytes(),
                cell_num,
                &self.tiles[idx].runs,
                &mut self.cursors[a].copy,
                offsets,
                offsets_written,
                values,
                values_written,
            ))
        }
    }

    /// Move an attribute's cursor past its current tile, releasing the
    /// cache slot (and any pinned mmap) that tile occupied.
    fn advance(&mut self, a: usize) {
        let idx = self.cursors[a].tile_idx;
        let pos = self.tiles[idx].pos;
        if self.slots[a].fetched == Some(pos) || self.slots[a].var_fetched == Some(pos) {
            self.slots[a].release();
        }
        self.cursors[a].tile_idx += 1;
        self.cursors[a].copy.reset();
    }

    /// Release tile records every attribute has moved past and compact the
    /// list from the front, rebasing cursor indices.
    fn housekeeping(&mut self) {
        let min_idx = self
            .cursors
            .iter()
            .filter(|c| !c.done)
            .map(|c| c.tile_idx)
            .min()
            .unwrap_or(self.tiles.len());
        if min_idx > 0 {
            self.tiles.drain(..min_idx);
            for c in &mut self.cursors {
                c.tile_idx = c.tile_idx.saturating_sub(min_idx);
            }
        }
        let min_pos = self.tiles.first().map(|t| t.pos).unwrap_or(usize::MAX);
        self.geom.release_before(min_pos);
        trace!(retained = self.tiles.len(), "housekeeping");
    }
}

impl<G: Geometry> FragmentReader for Engine<G> {
    fn read(&mut self, buffers: &mut [ReadBuffer<'_>]) -> Result<()> {
        let attribute_num = self.schema.attribute_num();
        if buffers.len() != attribute_num {
            return Err(FragmentError::invariant(format!(
                "expected {} buffers, got {}",
                attribute_num,
                buffers.len()
            )));
        }
        for (a, buf) in buffers.iter_mut().enumerate() {
            let is_var = self.schema.attribute(a).is_var();
            match buf {
                ReadBuffer::Fixed { written, .. } if !is_var => *written = 0,
                ReadBuffer::Var { offsets_written, values_written, .. } if is_var => {
                    *offsets_written = 0;
                    *values_written = 0;
                }
                _ => {
                    return Err(FragmentError::invariant(format!(
                        "buffer kind mismatch for attribute {}",
                        a
                    )))
                }
            }
        }
        for c in &mut self.cursors {
            c.overflow = false;
        }

        for a in 0..attribute_num {
            self.read_attribute(a, &mut buffers[a])?;
        }
        self.housekeeping();
        Ok(())
    }

    fn overflow(&self, attribute: usize) -> bool {
        self.cursors[attribute].overflow
    }

    fn has_more_cells(&self) -> bool {
        self.cursors.iter().any(|c| !c.done)
    }

    fn stats(&self) -> ReadStats {
        self.io.stats
    }
}
