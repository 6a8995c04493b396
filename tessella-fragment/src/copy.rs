//! The cell copier: cached tile bytes → caller buffers.
//!
//! Every overlap kind reduces to a sorted list of qualifying cell runs
//! (see `overlap`), so copying is one loop: walk the runs from the
//! attribute's resume cursor, copy as much as the free buffer space allows,
//! and report whether the tile was exhausted or the buffer filled up.
//!
//! Fixed-size attributes copy at byte granularity — a run may be split in
//! the middle of a cell and resumed on the next call. Variable-size
//! attributes copy at cell granularity: a cell is emitted only when its
//! offset slot and its value bytes both fit, the emitted offset being
//! relative to the start of the caller's values buffer for this call.

use tessella_core::VAR_OFFSET_SIZE;

/// Resume position within a tile's run list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CopyCursor {
    /// Index of the run being copied.
    pub run_pos: usize,
    /// Bytes of the run's primary stream (cell data, or offset slots for a
    /// variable-size attribute) already consumed.
    pub run_byte: usize,
}

impl CopyCursor {
    pub(crate) fn is_fresh(&self) -> bool {
        self.run_pos == 0 && self.run_byte == 0
    }

    pub(crate) fn reset(&mut self) {
        *self = CopyCursor::default();
    }
}

/// Outcome of one copy step over a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyOutcome {
    /// Every qualifying cell of the tile has been emitted.
    TileDone,
    /// The buffer filled before the tile was exhausted.
    BufferFull,
}

/// Copy a fixed-size attribute's qualifying runs into `out`.
pub(crate) fn copy_fixed_runs(
    tile: &[u8],
    cell_size: usize,
    runs: &[(u64, u64)],
    cur: &mut CopyCursor,
    out: &mut [u8],
    written: &mut usize,
) -> CopyOutcome {
    while cur.run_pos < runs.len() {
        let (start, end) = runs[cur.run_pos];
        let run_bytes = (end - start + 1) as usize * cell_size;
        let remaining = run_bytes - cur.run_byte;
        let free = out.len() - *written;
        let n = remaining.min(free);
        let src = start as usize * cell_size + cur.run_byte;
        out[*written..*written + n].copy_from_slice(&tile[src..src + n]);
        *written += n;
        if n < remaining {
            cur.run_byte += n;
            return CopyOutcome::BufferFull;
        }
        cur.run_pos += 1;
        cur.run_byte = 0;
    }
    CopyOutcome::TileDone
}

/// Copy a variable-size attribute's qualifying runs: rewritten offsets into
/// `out_offsets`, value bytes into `out_values`.
///
/// `offsets_tile` holds `cell_num` u64 start offsets into the tile's values
/// payload; a cell's length is the gap to the next offset (the last cell
/// runs to the end of the values tile).
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_var_runs(
    offsets_tile: &[u8],
    values_tile: &[u8],
    cell_num: u64,
    runs: &[(u64, u64)],
    cur: &mut CopyCursor,
    out_offsets: &mut [u8],
    offsets_written: &mut usize,
    out_values: &mut [u8],
    values_written: &mut usize,
) -> CopyOutcome {
    while cur.run_pos < runs.len() {
        let (start, end) = runs[cur.run_pos];
        let mut cell = start + (cur.run_byte / VAR_OFFSET_SIZE) as u64;
        while cell <= end {
            let src_off = read_offset(offsets_tile, cell);
            let next_off = if cell + 1 < cell_num {
                read_offset(offsets_tile, cell + 1)
            } else {
                values_tile.len() as u64
            };
            let len = (next_off - src_off) as usize;

            let offsets_free = out_offsets.len() - *offsets_written;
            let values_free = out_values.len() - *values_written;
            if offsets_free < VAR_OFFSET_SIZE || values_free < len {
                cur.run_byte = (cell - start) as usize * VAR_OFFSET_SIZE;
                return CopyOutcome::BufferFull;
            }

            let dest = *values_written as u64;
            out_offsets[*offsets_written..*offsets_written + VAR_OFFSET_SIZE]
                .copy_from_slice(&dest.to_ne_bytes());
            *offsets_written += VAR_OFFSET_SIZE;

            let src = src_off as usize;
            out_values[*values_written..*values_written + len]
                .copy_from_slice(&values_tile[src..src + len]);
            *values_written += len;

            cell += 1;
        }
        cur.run_pos += 1;
        cur.run_byte = 0;
    }
    CopyOutcome::TileDone
}

/// Rebase raw offsets copied straight from disk so they are relative to the
/// caller's values buffer: the first cell's offset becomes `new_start` and
/// the gaps are preserved.
pub(crate) fn shift_var_offsets(offsets: &mut [u8], cell_num: u64, new_start: u64) {
    if cell_num == 0 {
        return;
    }
    let first = read_offset(offsets, 0);
    for c in 0..cell_num {
        let off = read_offset(offsets, c) - first + new_start;
        let at = c as usize * VAR_OFFSET_SIZE;
        offsets[at..at + VAR_OFFSET_SIZE].copy_from_slice(&off.to_ne_bytes());
    }
}

fn read_offset(offsets: &[u8], cell: u64) -> u64 {
    let at = cell as usize * VAR_OFFSET_SIZE;
    u64::from_ne_bytes(offsets[at..at + VAR_OFFSET_SIZE].try_into().expect("offset width"))
}

// ============================================================================
// Tests
// ============================================================================
