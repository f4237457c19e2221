//! Error types for segmentation image container operations.

use thiserror::Error;

/// Result type alias for this crate's operations.
pub type Result<T> = std::result::Result<T, IronSegmentError>;

/// Errors that can occur while reading or writing a segmentation image container.
#[derive(Error, Debug)]
pub enum IronSegmentError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's leading 8 bytes did not match the container magic number.
    #[error("invalid magic: got {got:#018x}, expected {expected:#018x}")]
    FormatBadMagic { got: u64, expected: u64 },

    /// The major version embedded in the header is not one this library understands.
    #[error("unsupported version: got {got}, expected {expected}")]
    VersionUnsupported { got: u32, expected: u32 },

    /// The section directory ran out of bytes before reaching an END section.
    #[error("truncated container at byte offset {offset}: {detail}")]
    FormatTruncated { offset: u64, detail: String },

    /// An END section was observed without ever seeing a MANIFEST section.
    #[error("no MANIFEST section present before END")]
    ManifestMissing,

    /// The manifest XML failed to parse or violated the schema's structural rules.
    #[error("invalid manifest: {detail}")]
    ManifestInvalid { detail: String },

    /// No IMAGE section carries the requested image identifier.
    #[error("no image section with id {0}")]
    NotFound(u32),

    /// A sampling call was made against an `ImageView` whose semantic cannot produce
    /// the requested value (e.g. `get_object_id` on a color image).
    #[error("semantic mismatch: cannot fetch object id from {0:?}")]
    SemanticMismatch(crate::model::PixelSemantic),

    /// A sample coordinate fell outside the image's declared bounds.
    #[error("{axis} component {value} is out of bounds (limit {limit})")]
    OutOfBounds {
        axis: Axis,
        value: u32,
        limit: u32,
    },

    /// An `ImageID`/`ObjectID` was constructed with a value outside `[1, 2^32-1]`.
    #[error("identifier {0} is out of range [1, {max}]", max = u32::MAX)]
    IdentifierOutOfRange(u32),
}

/// Which coordinate axis an out-of-bounds sample request violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}
