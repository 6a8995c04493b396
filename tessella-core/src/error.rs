//! Error types for schema construction.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("array must have at least one dimension")]
    NoDimensions,

    #[error("array must have at least one attribute")]
    NoAttributes,

    #[error("duplicate attribute name '{0}'")]
    DuplicateAttribute(String),

    #[error("attribute '{0}' has zero cell size")]
    ZeroCellSize(String),

    #[error("dimension {dim}: empty domain range")]
    EmptyDomain { dim: usize },

    #[error("dimension {dim}: non-finite domain bound")]
    NonFiniteDomain { dim: usize },

    #[error("dimension {dim}: tile extent must be positive")]
    BadTileExtent { dim: usize },

    #[error("dimension {dim}: dense domain side is not divisible by its tile extent")]
    UnalignedDomain { dim: usize },

    #[error("dense arrays require an integer domain")]
    DenseFloatDomain,

    #[error("Hilbert cell order is only supported for sparse arrays")]
    DenseHilbertOrder,

    #[error("sparse arrays require a positive tile capacity")]
    ZeroCapacity,

    #[error("tile cell count overflows u64")]
    TileTooLarge,

    #[error("tile extents and domain have different dimension counts")]
    ExtentDimMismatch,
}
