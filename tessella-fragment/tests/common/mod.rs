//! On-disk fragment fixtures for the read scenarios.
//!
//! Builds fragment directories the way a writer would leave them: one tile
//! file per attribute, a values file per variable-size attribute, the
//! coordinates file for sparse fragments, and the matching book-keeping.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tessella_core::{
    ArrayKind, ArraySchema, Attribute, CellOrder, Coord, DomainSpec,
};
use tessella_fragment::{AttributeTiles, BookKeeping, Codec, Fragment};

pub fn encode(codec: Codec, data: &[u8]) -> Vec<u8> {
    match codec {
        Codec::None => data.to_vec(),
        Codec::Gzip => {
            let mut enc =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        Codec::Zstd => zstd::bulk::compress(data, 1).unwrap(),
    }
}

/// Write tiles back to back; returns (offsets, on-disk sizes).
pub fn write_tiles(path: &Path, tiles: &[Vec<u8>], codec: Codec) -> (Vec<u64>, Vec<u64>) {
    let mut f = File::create(path).unwrap();
    let mut offsets = Vec::new();
    let mut sizes = Vec::new();
    let mut at = 0u64;
    for tile in tiles {
        let payload = encode(codec, tile);
        offsets.push(at);
        sizes.push(payload.len() as u64);
        at += payload.len() as u64;
        f.write_all(&payload).unwrap();
    }
    (offsets, sizes)
}

pub fn attr_tiles(offsets: Vec<u64>, sizes: Vec<u64>, codec: Codec) -> AttributeTiles {
    AttributeTiles {
        tile_offsets: offsets,
        tile_compressed_sizes: if codec == Codec::None { Vec::new() } else { sizes },
        ..Default::default()
    }
}

pub fn ne_bytes_i32(vals: &[i32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in vals {
        v.write_ne(&mut out);
    }
    out
}

pub fn read_i32s(bytes: &[u8]) -> Vec<i32> {
    bytes.chunks_exact(4).map(|c| i32::from_ne_bytes(c.try_into().unwrap())).collect()
}

pub fn read_offsets(bytes: &[u8]) -> Vec<u64> {
    bytes.chunks_exact(8).map(|c| u64::from_ne_bytes(c.try_into().unwrap())).collect()
}

pub fn coords_2d<T: Coord>(cells: &[(T, T)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(x, y) in cells {
        x.write_ne(&mut out);
        y.write_ne(&mut out);
    }
    out
}

pub fn mbr_2d<T: Coord>(cells: &[(T, T)]) -> Box<[u8]> {
    let min = |a: T, b: T| if b.total_cmp(&a) == Ordering::Less { b } else { a };
    let max = |a: T, b: T| if b.total_cmp(&a) == Ordering::Greater { b } else { a };
    let (mut x_lo, mut x_hi) = (cells[0].0, cells[0].0);
    let (mut y_lo, mut y_hi) = (cells[0].1, cells[0].1);
    for &(x, y) in cells {
        x_lo = min(x_lo, x);
        x_hi = max(x_hi, x);
        y_lo = min(y_lo, y);
        y_hi = max(y_hi, y);
    }
    let mut out = Vec::new();
    x_lo.write_ne(&mut out);
    x_hi.write_ne(&mut out);
    y_lo.write_ne(&mut out);
    y_hi.write_ne(&mut out);
    out.into()
}

pub fn bounding_2d<T: Coord>(cells: &[(T, T)]) -> Box<[u8]> {
    coords_2d(&[cells[0], *cells.last().unwrap()]).into()
}

/// The scenario array: dense [0,9]x[0,9], 5x5 tiles, row-major, one i32
/// attribute `v` with `v[i,j] = 10*i + j`. Four tiles in row-major tile
/// order.
pub fn dense_fixture(dir: &Path, codec: Codec) -> (Fragment, BookKeeping) {
    let schema = Arc::new(
        ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9), (0, 9)], extents: vec![5, 5] },
            0,
        )
        .unwrap(),
    );

    let tiles = dense_value_tiles();
    let (offsets, sizes) = write_tiles(&dir.join("v.tdb"), &tiles, codec);
    let bk = BookKeeping::new(
        &schema,
        codec,
        4,
        vec![attr_tiles(offsets, sizes, codec)],
        Vec::new(),
        Vec::new(),
        0,
    )
    .unwrap();
    (Fragment::new(dir, schema), bk)
}

pub fn dense_value_tiles() -> Vec<Vec<u8>> {
    let mut tiles = Vec::new();
    for tr in 0..2 {
        for tc in 0..2 {
            let mut cells = Vec::new();
            for i in 0..5 {
                for j in 0..5 {
                    cells.push(10 * (5 * tr + i) + (5 * tc + j));
                }
            }
            tiles.push(ne_bytes_i32(&cells));
        }
    }
    tiles
}

/// Like [`dense_fixture`] but with a second attribute `w` that was never
/// written (no `w.tdb` on disk).
pub fn dense_fixture_with_empty_attr(dir: &Path) -> (Fragment, BookKeeping) {
    let schema = Arc::new(
        ArraySchema::new(
            vec![Attribute::fixed("v", 4), Attribute::fixed("w", 4)],
            ArrayKind::Dense,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9), (0, 9)], extents: vec![5, 5] },
            0,
        )
        .unwrap(),
    );
    let tiles = dense_value_tiles();
    let (offsets, sizes) = write_tiles(&dir.join("v.tdb"), &tiles, Codec::None);
    let bk = BookKeeping::new(
        &schema,
        Codec::None,
        4,
        vec![
            attr_tiles(offsets, sizes, Codec::None),
            attr_tiles(vec![0; 4], Vec::new(), Codec::None),
        ],
        Vec::new(),
        Vec::new(),
        0,
    )
    .unwrap();
    (Fragment::new(dir, schema), bk)
}

/// Sparse fragment with cells {(0,0)=1, (3,7)=2, (5,1)=3, (9,9)=4} in
/// row-major order, capacity 2 (two full tiles).
pub fn sparse_fixture(dir: &Path, codec: Codec) -> (Fragment, BookKeeping) {
    let schema = Arc::new(
        ArraySchema::new(
            vec![Attribute::fixed("v", 4)],
            ArrayKind::Sparse,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9), (0, 9)], extents: vec![5, 5] },
            2,
        )
        .unwrap(),
    );

    let tiles: [&[(i32, i32)]; 2] = [&[(0, 0), (3, 7)], &[(5, 1), (9, 9)]];
    let values = [vec![1, 2], vec![3, 4]];

    let value_tiles: Vec<Vec<u8>> = values.iter().map(|v| ne_bytes_i32(v)).collect();
    let (v_off, v_sizes) = write_tiles(&dir.join("v.tdb"), &value_tiles, codec);

    let coord_tiles: Vec<Vec<u8>> = tiles.iter().map(|t| coords_2d(t)).collect();
    let (c_off, c_sizes) = write_tiles(&dir.join("__coords.tdb"), &coord_tiles, codec);

    let bk = BookKeeping::new(
        &schema,
        codec,
        2,
        vec![attr_tiles(v_off, v_sizes, codec), attr_tiles(c_off, c_sizes, codec)],
        tiles.iter().map(|t| mbr_2d(t)).collect(),
        tiles.iter().map(|t| bounding_2d(t)).collect(),
        2,
    )
    .unwrap();
    (Fragment::new(dir, schema), bk)
}

/// Sparse fragment with a fixed attribute `v` (1..=4) and a variable
/// attribute `s` ("a", "bb", "ccc", "dddd") over the diagonal cells
/// {(0,0), (1,1), (2,2), (3,3)}, one tile of capacity 4.
pub fn sparse_var_fixture(dir: &Path, codec: Codec) -> (Fragment, BookKeeping) {
    sparse_var_fixture_ordered(dir, codec, false)
}

/// Same fragment as [`sparse_var_fixture`] but with `s` declared before
/// `v` in the schema, so the variable attribute drives the tiles first.
pub fn sparse_var_fixture_s_first(dir: &Path, codec: Codec) -> (Fragment, BookKeeping) {
    sparse_var_fixture_ordered(dir, codec, true)
}

fn sparse_var_fixture_ordered(
    dir: &Path,
    codec: Codec,
    s_first: bool,
) -> (Fragment, BookKeeping) {
    let attributes = if s_first {
        vec![Attribute::var("s"), Attribute::fixed("v", 4)]
    } else {
        vec![Attribute::fixed("v", 4), Attribute::var("s")]
    };
    let schema = Arc::new(
        ArraySchema::new(
            attributes,
            ArrayKind::Sparse,
            CellOrder::RowMajor,
            DomainSpec::I32 { ranges: vec![(0, 9), (0, 9)], extents: vec![5, 5] },
            4,
        )
        .unwrap(),
    );

    let cells: &[(i32, i32)] = &[(0, 0), (1, 1), (2, 2), (3, 3)];
    let strings = ["a", "bb", "ccc", "dddd"];

    let (v_off, v_sizes) =
        write_tiles(&dir.join("v.tdb"), &[ne_bytes_i32(&[1, 2, 3, 4])], codec);

    // Offsets tile holds the start of each string in the values tile.
    let mut offs: Vec<u64> = Vec::new();
    let mut var_bytes: Vec<u8> = Vec::new();
    for s in strings {
        offs.push(var_bytes.len() as u64);
        var_bytes.extend_from_slice(s.as_bytes());
    }
    let offs_tile: Vec<u8> = offs.iter().flat_map(|o| o.to_ne_bytes()).collect();
    let (s_off, s_sizes) = write_tiles(&dir.join("s.tdb"), &[offs_tile], codec);
    let var_size = var_bytes.len() as u64;
    let (sv_off, sv_sizes) = write_tiles(&dir.join("s_var.tdb"), &[var_bytes], codec);

    let (c_off, c_sizes) =
        write_tiles(&dir.join("__coords.tdb"), &[coords_2d(cells)], codec);

    let mut s_attr = attr_tiles(s_off, s_sizes, codec);
    s_attr.var_tile_offsets = sv_off;
    s_attr.var_tile_sizes = vec![var_size];
    if codec != Codec::None {
        s_attr.var_tile_compressed_sizes = sv_sizes;
    }

    let v_attr = attr_tiles(v_off, v_sizes, codec);
    let attrs = if s_first {
        vec![s_attr, v_attr, attr_tiles(c_off, c_sizes, codec)]
    } else {
        vec![v_attr, s_attr, attr_tiles(c_off, c_sizes, codec)]
    };
    let bk = BookKeeping::new(
        &schema,
        codec,
        1,
        attrs,
        vec![mbr_2d(cells)],
        vec![bounding_2d(cells)],
        4,
    )
    .unwrap();
    (Fragment::new(dir, schema), bk)
}
