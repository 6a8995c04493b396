//! Tile I/O: reading tile payloads from attribute files.
//!
//! Two backends, selected at construction: buffered (`seek` + `read_exact`
//! into an engine-owned buffer) and mmap (page-aligned read-only maps, with
//! the logical tile starting `offset − aligned_offset` bytes into the map).
//! Compressed tiles read their payload into a shared scratch buffer (or map
//! it), then decompress into the attribute's local tile buffer; the output
//! must match the expected tile size exactly.
//!
//! Each attribute owns a single cache slot ([`AttrTiles`]) holding the
//! currently positioned tile — the fixed part and, for variable-size
//! attributes, the values part. Slots are keyed by tile position and
//! released when the read cursor advances past the tile, which also unmaps
//! any mmap region pinned by the slot.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use tracing::trace;

use crate::book_keeping::Codec;
use crate::error::{FragmentError, Result};
use crate::fragment::{Fragment, IoMode};

// ============================================================================
// Mapped tiles and cache slots
// ============================================================================

/// A read-only mapping of one tile, page-aligned per mmap requirements.
pub(crate) struct MappedTile {
    map: memmap2::Mmap,
    /// Distance from the aligned map start to the tile's first byte.
    delta: usize,
    len: usize,
}

impl MappedTile {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.map[self.delta..self.delta + self.len]
    }
}

/// Single-slot tile cache for one attribute: the currently positioned tile.
#[derive(Default)]
pub(crate) struct AttrTiles {
    /// Local buffer holding the fixed (or offsets) part, when not mapped.
    tile: Vec<u8>,
    tile_len: usize,
    map: Option<MappedTile>,
    /// Tile position the fixed part holds, if any.
    pub(crate) fetched: Option<usize>,

    /// Values part of a variable-size attribute.
    var: Vec<u8>,
    var_len: usize,
    var_map: Option<MappedTile>,
    pub(crate) var_fetched: Option<usize>,
}

impl AttrTiles {
    pub(crate) fn fixed_bytes(&self) -> &[u8] {
        match &self.map {
            Some(m) => m.bytes(),
            None => &self.tile[..self.tile_len],
        }
    }

    pub(crate) fn var_bytes(&self) -> &[u8] {
        match &self.var_map {
            Some(m) => m.bytes(),
            None => &self.var[..self.var_len],
        }
    }

    /// Drop the cached tile (and any pinned mapping); buffer capacity is
    /// kept for reuse.
    pub(crate) fn release(&mut self) {
        self.fetched = None;
        self.var_fetched = None;
        self.map = None;
        self.var_map = None;
        self.tile_len = 0;
        self.var_len = 0;
    }
}

/// Which file of an attribute a fetch addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilePart {
    Fixed,
    Var,
}

// ============================================================================
// Read statistics
// ============================================================================

/// Counters over the engine's lifetime; the observable hook for the direct
/// copy path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Tiles brought into a cache slot (fixed and values parts separately).
    pub tiles_fetched: u64,
    /// Copies that went file → caller buffer without touching a cache slot.
    pub direct_copies: u64,
    /// Payload bytes read or mapped from disk.
    pub bytes_read: u64,
}

// ============================================================================
// TileReader
// ============================================================================

/// Reads tile payloads for every attribute slot of one fragment.
pub(crate) struct TileReader {
    fragment: Fragment,
    io_mode: IoMode,
    codec: Codec,
    page_size: u64,
    /// Shared scratch for compressed payloads (sized to the largest seen).
    scratch: Vec<u8>,
    files: Vec<Option<File>>,
    var_files: Vec<Option<File>>,
    lens: Vec<Option<u64>>,
    var_lens: Vec<Option<u64>>,
    pub(crate) stats: ReadStats,
}

impl TileReader {
    pub(crate) fn new(fragment: Fragment, io_mode: IoMode, codec: Codec, slots: usize) -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size > 0 { page_size as u64 } else { 4096 };
        Self {
            fragment,
            io_mode,
            codec,
            page_size,
            scratch: Vec::new(),
            files: (0..slots).map(|_| None).collect(),
            var_files: (0..slots).map(|_| None).collect(),
            lens: vec![None; slots],
            var_lens: vec![None; slots],
            stats: ReadStats::default(),
        }
    }

    /// Length of an attribute slot's file; 0 when the file was never
    /// written. Cached after the first probe.
    pub(crate) fn attr_len(&mut self, part: FilePart, slot: usize) -> Result<u64> {
        let (cache, path) = match part {
            FilePart::Fixed => (&mut self.lens[slot], self.fragment.attr_path(slot)),
            FilePart::Var => (&mut self.var_lens[slot], self.fragment.var_path(slot)),
        };
        if let Some(len) = *cache {
            return Ok(len);
        }
        let len = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(FragmentError::io(path, e)),
        };
        *cache = Some(len);
        Ok(len)
    }

    /// Fetch the fixed (or offsets) part of a tile into the cache slot.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fetch_fixed(
        &mut self,
        cache: &mut AttrTiles,
        slot: usize,
        pos: usize,
        offset: u64,
        tile_size: usize,
        full_tile_size: usize,
        disk_size: usize,
    ) -> Result<()> {
        if cache.fetched == Some(pos) {
            return Ok(());
        }
        let AttrTiles { tile, tile_len, map, fetched, .. } = cache;
        self.fetch_part(
            FilePart::Fixed,
            slot,
            offset,
            tile_size,
            full_tile_size,
            disk_size,
            tile,
            tile_len,
            map,
        )?;
        *fetched = Some(pos);
        trace!(slot, pos, tile_size, disk_size, "fetched tile");
        Ok(())
    }

    /// Fetch the values part of a variable-size attribute's tile.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fetch_var(
        &mut self,
        cache: &mut AttrTiles,
        slot: usize,
        pos: usize,
        offset: u64,
        tile_size: usize,
        disk_size: usize,
    ) -> Result<()> {
        if cache.var_fetched == Some(pos) {
            return Ok(());
        }
        let AttrTiles { var, var_len, var_map, var_fetched, .. } = cache;
        self.fetch_part(
            FilePart::Var,
            slot,
            offset,
            tile_size,
            tile_size,
            disk_size,
            var,
            var_len,
            var_map,
        )?;
        *var_fetched = Some(pos);
        trace!(slot, pos, tile_size, disk_size, "fetched values tile");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn fetch_part(
        &mut self,
        part: FilePart,
        slot: usize,
        offset: u64,
        tile_size: usize,
        full_tile_size: usize,
        disk_size: usize,
        buf: &mut Vec<u8>,
        buf_len: &mut usize,
        map_slot: &mut Option<MappedTile>,
    ) -> Result<()> {
        *map_slot = None;
        let path = self.part_path(part, slot);
        let files = match part {
            FilePart::Fixed => &mut self.files,
            FilePart::Var => &mut self.var_files,
        };
        if files[slot].is_none() {
            files[slot] =
                Some(File::open(&path).map_err(|e| FragmentError::io(&path, e))?);
        }
        let file = files[slot].as_ref().expect("just opened");

        match (self.codec, self.io_mode) {
            (Codec::None, IoMode::Buffered) => {
                ensure_len(buf, full_tile_size)?;
                read_range(file, &path, offset, &mut buf[..tile_size])?;
                *buf_len = tile_size;
            }
            (Codec::None, IoMode::Mmap) => {
                *map_slot = Some(map_range(file, &path, offset, tile_size, self.page_size)?);
            }
            (codec, IoMode::Buffered) => {
                ensure_len(&mut self.scratch, disk_size)?;
                read_range(file, &path, offset, &mut self.scratch[..disk_size])?;
                decompress_into(codec, &self.scratch[..disk_size], buf, tile_size, &path)?;
                *buf_len = tile_size;
            }
            (codec, IoMode::Mmap) => {
                let mapped = map_range(file, &path, offset, disk_size, self.page_size)?;
                decompress_into(codec, mapped.bytes(), buf, tile_size, &path)?;
                *buf_len = tile_size;
            }
        }

        self.stats.tiles_fetched += 1;
        self.stats.bytes_read += disk_size as u64;
        Ok(())
    }

    /// Read a byte range straight into a caller buffer, bypassing the cache
    /// slot. Used by the direct copy paths (uncompressed tiles only).
    pub(crate) fn read_direct(
        &mut self,
        part: FilePart,
        slot: usize,
        offset: u64,
        out: &mut [u8],
    ) -> Result<()> {
        let path = self.part_path(part, slot);
        let files = match part {
            FilePart::Fixed => &mut self.files,
            FilePart::Var => &mut self.var_files,
        };
        if files[slot].is_none() {
            files[slot] =
                Some(File::open(&path).map_err(|e| FragmentError::io(&path, e))?);
        }
        let file = files[slot].as_ref().expect("just opened");
        read_range(file, &path, offset, out)?;
        self.stats.bytes_read += out.len() as u64;
        Ok(())
    }

    fn part_path(&self, part: FilePart, slot: usize) -> PathBuf {
        match part {
            FilePart::Fixed => self.fragment.attr_path(slot),
            FilePart::Var => self.fragment.var_path(slot),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Grow a buffer to at least `len` bytes, surfacing allocation failure.
fn ensure_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    if buf.len() < len {
        let additional = len - buf.len();
        buf.try_reserve_exact(additional)
            .map_err(|_| FragmentError::OutOfMemory(additional))?;
        buf.resize(len, 0);
    }
    Ok(())
}

fn read_range(file: &File, path: &Path, offset: u64, out: &mut [u8]) -> Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(offset))
        .map_err(|e| FragmentError::io(path, e))?;
    f.read_exact(out).map_err(|e| FragmentError::io(path, e))?;
    Ok(())
}

fn map_range(
    file: &File,
    path: &Path,
    offset: u64,
    len: usize,
    page_size: u64,
) -> Result<MappedTile> {
    let aligned = offset - (offset % page_size);
    let delta = (offset - aligned) as usize;
    let map = unsafe { MmapOptions::new().offset(aligned).len(len + delta).map(file) }
        .map_err(|e| FragmentError::Mmap { path: path.into(), source: e })?;
    Ok(MappedTile { map, delta, len })
}

fn decompress_into(
    codec: Codec,
    src: &[u8],
    out: &mut Vec<u8>,
    expected: usize,
    path: &Path,
) -> Result<()> {
    out.clear();
    match codec {
        Codec::Gzip => {
            out.try_reserve_exact(expected)
                .map_err(|_| FragmentError::OutOfMemory(expected))?;
            let mut decoder = flate2::read::GzDecoder::new(src);
            decoder.read_to_end(out).map_err(|e| FragmentError::Decompress {
                path: path.into(),
                detail: e.to_string(),
            })?;
        }
        Codec::Zstd => {
            let decoded = zstd::bulk::decompress(src, expected).map_err(|e| {
                FragmentError::Decompress { path: path.into(), detail: e.to_string() }
            })?;
            *out = decoded;
        }
        Codec::None => {
            return Err(FragmentError::invariant("decompress requested without a codec"));
        }
    }
    if out.len() != expected {
        return Err(FragmentError::Decompress {
            path: path.into(),
            detail: format!("expected {} bytes, got {}", expected, out.len()),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
