//! Fragment handle and read configuration.
//!
//! A fragment is a directory holding one tile file per attribute
//! (`<attr>.tdb`), a companion values file per variable-size attribute
//! (`<attr>_var.tdb`), and — for sparse fragments — the coordinates file
//! (`__coords.tdb`). Tile boundaries within the files are implicit via
//! book-keeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessella_core::ArraySchema;

/// File name of the sparse coordinates pseudo-attribute.
pub const COORDS_FILE: &str = "__coords.tdb";

/// How tile payloads are brought in from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// `seek` + `read_exact` into engine-owned buffers.
    #[default]
    Buffered,
    /// Page-aligned read-only memory maps.
    Mmap,
}

/// Read-side configuration, passed at engine construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadConfig {
    pub io_mode: IoMode,
}

/// An immutable fragment on disk.
#[derive(Debug, Clone)]
pub struct Fragment {
    dir: PathBuf,
    schema: Arc<ArraySchema>,
}

impl Fragment {
    pub fn new(dir: impl Into<PathBuf>, schema: Arc<ArraySchema>) -> Self {
        Self { dir: dir.into(), schema }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// Tile file for an internal attribute slot. User attributes occupy
    /// slots `0..attribute_num` in schema order; the sparse coordinates
    /// pseudo-attribute is the slot after them.
    pub(crate) fn attr_path(&self, slot: usize) -> PathBuf {
        if slot == self.schema.attribute_num() {
            self.dir.join(COORDS_FILE)
        } else {
            self.dir.join(format!("{}.tdb", self.schema.attribute(slot).name()))
        }
    }

    /// Values file for a variable-size attribute.
    pub(crate) fn var_path(&self, attribute: usize) -> PathBuf {
        self.dir.join(format!("{}_var.tdb", self.schema.attribute(attribute).name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::{ArrayKind, Attribute, CellOrder, DomainSpec};

    #[test]
    fn file_layout() {
        let schema = Arc::new(
            ArraySchema::new(
                vec![Attribute::fixed("v", 4), Attribute::var("s")],
                ArrayKind::Sparse,
                CellOrder::RowMajor,
                DomainSpec::I64 { ranges: vec![(0, 99)], extents: vec![10] },
                8,
            )
            .unwrap(),
        );
        let f = Fragment::new("/data/frag_0", schema);
        assert_eq!(f.attr_path(0), Path::new("/data/frag_0/v.tdb"));
        assert_eq!(f.attr_path(1), Path::new("/data/frag_0/s.tdb"));
        assert_eq!(f.attr_path(2), Path::new("/data/frag_0/__coords.tdb"));
        assert_eq!(f.var_path(1), Path::new("/data/frag_0/s_var.tdb"));
    }
}
