//! Error type for the re-segmentation engine.

/// Errors produced while parsing or rewriting the ingest stream.
///
/// Stream-level variants ([`MediaError::InvalidBoxSize`],
/// [`MediaError::UnboundedBox`], [`MediaError::OversizedBox`]) are fatal to
/// the pipeline. Fragment-level variants surface from the moof rewriter and
/// are swallowed by the segmenter, which passes the fragment through
/// unmodified.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// A box header declared a size smaller than the header itself.
    #[error("invalid size {size} for box '{box_type}'")]
    InvalidBoxSize { box_type: String, size: u64 },

    /// A box declared size 0 (extends to end of input). Capture streams
    /// are unbounded, so such a box can never complete.
    #[error("box '{box_type}' extends to end of stream")]
    UnboundedBox { box_type: String },

    /// A box declared a size beyond the accumulator limit.
    #[error("box '{box_type}' exceeds maximum size ({size} > {max} bytes)")]
    OversizedBox { box_type: String, size: u64, max: u64 },

    /// A structure ended before a required field.
    #[error("truncated {context}")]
    Truncated { context: &'static str },

    /// A required sub-box was absent.
    #[error("missing '{box_type}' in {parent}")]
    MissingBox {
        box_type: &'static str,
        parent: &'static str,
    },

    /// The ingest task failed outside of parsing (join error, etc.).
    #[error("pipeline task error: {0}")]
    Task(String),
}

/// Result alias using [`MediaError`].
pub type Result<T> = std::result::Result<T, MediaError>;
