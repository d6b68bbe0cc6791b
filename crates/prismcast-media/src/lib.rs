//! prismcast-media: the fMP4 re-segmentation engine.
//!
//! Ingests a continuously-produced ISO BMFF byte stream (`ftyp` + `moov`
//! followed by an unbounded sequence of `moof` + `mdat` fragments),
//! rewrites per-track decode timestamps to keep the media timeline
//! monotonic across capture restarts, groups fragments into HLS media
//! segments, and publishes segments plus a rolling sliding-window playlist
//! to an in-memory store consumed by the HTTP layer.

pub mod boxes;
pub mod clock;
pub mod error;
pub mod keyframes;
pub mod moof;
pub mod moov;
pub mod parser;
pub mod pipeline;
pub mod playlist;
pub mod segmenter;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MediaError, Result};
pub use pipeline::Pipeline;
pub use segmenter::{
    HealthSnapshot, PipelineSeed, PipelineSnapshot, Segmenter, SegmenterSettings,
};
pub use store::{InitSegment, SegmentStore};
