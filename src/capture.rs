//! Capture source abstraction.
//!
//! The browser-automation layer that actually renders streaming sites
//! lives outside this process; its contract here is just "a byte stream
//! of fMP4 per channel". [`FileSource`] is the built-in backend: it reads
//! the path the external capture process writes to (a plain file or a
//! FIFO), which also makes local development and tests trivial.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use prismcast_core::config::ChannelConfig;
use prismcast_core::{Error, Result};

/// Chunked capture byte stream.
pub type CaptureStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A backend able to open the fMP4 byte stream for a channel.
pub trait CaptureSource: Send + Sync {
    fn open(&self, channel: &ChannelConfig) -> Result<CaptureStream>;
}

/// Streams from the channel's configured `source` path.
pub struct FileSource;

const READ_CHUNK_SIZE: usize = 64 * 1024;

impl CaptureSource for FileSource {
    fn open(&self, channel: &ChannelConfig) -> Result<CaptureStream> {
        if channel.source.as_os_str().is_empty() {
            return Err(Error::Capture(format!(
                "channel '{}' has no source path configured",
                channel.id
            )));
        }

        let path = channel.source.clone();
        let stream = futures::stream::once(async move { tokio::fs::File::open(path).await })
            .map_ok(|file| ReaderStream::with_capacity(file, READ_CHUNK_SIZE))
            .try_flatten()
            .boxed();
        Ok(stream)
    }
}
