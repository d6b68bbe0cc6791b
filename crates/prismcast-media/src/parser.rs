//! Incremental top-level box extractor.
//!
//! The capture socket delivers bytes with arbitrary chunking, so the parser
//! accumulates into an internal buffer and emits each complete top-level
//! box exactly once. Nested parsing belongs to the inspectors; only the
//! outermost layer is split here.

use bytes::BytesMut;

use crate::boxes::{fourcc_str, parse_box_header, FourCc};
use crate::error::{MediaError, Result};

/// Upper bound on a single top-level box. Anything larger is treated as a
/// corrupt length field rather than buffered indefinitely.
pub const MAX_BOX_SIZE: u64 = 256 * 1024 * 1024;

/// Incremental length-prefixed box extractor.
///
/// `push` appends a chunk and invokes the callback for every complete box
/// now available; a partial box stays buffered until more bytes arrive.
/// Each emitted box is split out of the accumulator without copying.
#[derive(Debug, Default)]
pub struct BoxParser {
    buf: BytesMut,
}

impl BoxParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and deliver every complete top-level box.
    ///
    /// The callback receives the box type and the full box bytes
    /// (header included). A callback error aborts delivery; the failed
    /// box has already been consumed from the accumulator.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_box: F) -> Result<()>
    where
        F: FnMut(FourCc, BytesMut) -> Result<()>,
    {
        self.buf.extend_from_slice(chunk);

        loop {
            let header = match parse_box_header(&self.buf)? {
                Some(h) => h,
                None => return Ok(()),
            };

            if header.size > MAX_BOX_SIZE {
                return Err(MediaError::OversizedBox {
                    box_type: fourcc_str(header.box_type),
                    size: header.size,
                    max: MAX_BOX_SIZE,
                });
            }

            let size = header.size as usize;
            if self.buf.len() < size {
                return Ok(());
            }

            let bytes = self.buf.split_to(size);
            on_box(header.box_type, bytes)?;
        }
    }

    /// Discard any residual partial box.
    pub fn flush(&mut self) {
        if !self.buf.is_empty() {
            tracing::debug!(residual = self.buf.len(), "discarding partial box bytes");
            self.buf.clear();
        }
    }

    /// Bytes currently held waiting for a box to complete.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
