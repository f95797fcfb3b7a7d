use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_compression::tokio::bufread::BzDecoder;
use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

/// Decompressed body of a release artifact.
///
/// Owns the HTTP response: dropping the stream (or calling
/// [`ArtifactStream::close`]) releases the connection, whether or not the
/// body was read to the end.
pub struct ArtifactStream {
    url: String,
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl ArtifactStream {
    pub(crate) fn bzip2(url: String, response: reqwest::Response) -> Self {
        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Self {
            url,
            inner: Box::pin(BzDecoder::new(body)),
        }
    }

    /// Wrap an already decompressed reader, for callers that fetch artifacts
    /// through their own transport.
    pub fn from_reader(url: impl Into<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            url: url.into(),
            inner: Box::pin(reader),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn close(self) {
        drop(self);
    }
}

impl AsyncRead for ArtifactStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
