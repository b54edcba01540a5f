use thiserror::Error;

/// Failures the conversion pipeline can surface. Recoverable oddities in the
/// input (dangling point references, lines with fewer than two points,
/// out-of-range segmentation lengths) are repaired or skipped silently and
/// never reach this enum.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("conversion cancelled")]
    Cancelled,
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}
