//! Input sources for a child's stdin.

use std::fmt;
use std::io;
use std::path::PathBuf;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A stream of byte chunks, as read from a pipe, file or producer.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Where bytes destined for the child's stdin come from.
pub enum Source {
    /// Explicit "no input" marker.
    ///
    /// A lone `Null` gives the child `/dev/null` as stdin. Mixed with other
    /// sources it is ignored.
    Null,
    /// In-memory text or bytes.
    Literal(Bytes),
    /// Any async readable, e.g. a file, a socket or the parent's stdin.
    Handle(Box<dyn AsyncRead + Send + Unpin>),
    /// A file opened at setup time, relative to the working directory.
    File(PathBuf),
    /// A live producer of byte chunks, e.g. another child's output.
    Stream(ByteStream),
}

impl Source {
    /// In-memory text or bytes.
    pub fn literal(data: impl Into<Bytes>) -> Self {
        Self::Literal(data.into())
    }

    /// Read from an async reader until end of file.
    pub fn handle(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Handle(Box::new(reader))
    }

    /// Read the file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Forward the chunks of a stream.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        Self::Stream(stream.boxed())
    }

    /// Forward the chunks of an iterator, one item per chunk.
    pub fn chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::Stream(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into()))).boxed())
    }

    /// Whether this is the null marker.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the bytes are already in memory.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Short name of the variant, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Literal(_) => "literal",
            Self::Handle(_) => "handle",
            Self::File(_) => "file",
            Self::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(bytes) => f.debug_tuple("Literal").field(bytes).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<&'static str> for Source {
    fn from(text: &'static str) -> Self {
        Self::Literal(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Self::Literal(Bytes::from(text))
    }
}

impl From<&'static [u8]> for Source {
    fn from(data: &'static [u8]) -> Self {
        Self::Literal(Bytes::from_static(data))
    }
}

impl From<Vec<u8>> for Source {
    fn from(data: Vec<u8>) -> Self {
        Self::Literal(Bytes::from(data))
    }
}

impl From<Bytes> for Source {
    fn from(data: Bytes) -> Self {
        Self::Literal(data)
    }
}

/// How two consecutive sources are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Drain the left side completely, then the right side.
    Merge,
    /// Take one chunk from each side in turn until both are exhausted.
    Zip,
}

/// One source and the mode joining it to whatever came before it.
#[derive(Debug)]
pub(crate) struct InputPart {
    pub(crate) mode: Option<CombineMode>,
    pub(crate) source: Source,
}

/// An ordered list of sources feeding a child's stdin.
///
/// ```
/// use sluice::stdio::{Input, Source};
///
/// let input = Input::new()
///     .then("header\n")
///     .merge(Source::file("body.txt"))
///     .zip(Source::chunks(["a", "b"]));
/// assert_eq!(input.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Input {
    parts: Vec<InputPart>,
}

impl Input {
    /// Create an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source, joined with the default mode for its neighbours.
    #[must_use]
    pub fn then(self, source: impl Into<Source>) -> Self {
        self.push(None, source.into())
    }

    /// Append a source that starts only after everything before it ends.
    #[must_use]
    pub fn merge(self, source: impl Into<Source>) -> Self {
        self.push(Some(CombineMode::Merge), source.into())
    }

    /// Append a source interleaved chunk by chunk with everything before it.
    #[must_use]
    pub fn zip(self, source: impl Into<Source>) -> Self {
        self.push(Some(CombineMode::Zip), source.into())
    }

    /// Append a source with an optional explicit mode.
    #[must_use]
    pub fn push(mut self, mode: Option<CombineMode>, source: Source) -> Self {
        self.parts.push(InputPart { mode, source });
        self
    }

    /// Number of sources, null markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether no source was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn into_parts(self) -> Vec<InputPart> {
        self.parts
    }
}

impl<S: Into<Source>> FromIterator<S> for Input {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        iter.into_iter().fold(Self::new(), Self::then)
    }
}

/// Turn an async reader into a stream of chunks of at most `chunk_size` bytes.
///
/// The stream ends at end of file, or right after yielding a read error.
pub fn reader_stream<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);
    stream::unfold(Some((reader, BytesMut::new())), move |state| async move {
        let (mut reader, mut buf) = state?;
        buf.reserve(chunk_size);
        match reader.read_buf(&mut (&mut buf).limit(chunk_size)).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.split().freeze()), Some((reader, buf)))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_conversions() {
        assert!(Source::from("text").is_literal());
        assert!(Source::from(vec![1u8, 2, 3]).is_literal());
        assert!(Source::from(String::from("owned")).is_literal());
        assert!(!Source::chunks(["a"]).is_literal());
        assert!(Source::Null.is_null());
    }

    #[test]
    fn input_records_explicit_modes() {
        let input = Input::new().then("a").zip("b").merge("c");
        let modes: Vec<_> = input.into_parts().into_iter().map(|p| p.mode).collect();
        assert_eq!(
            modes,
            vec![None, Some(CombineMode::Zip), Some(CombineMode::Merge)]
        );
    }

    #[test]
    fn input_from_iterator() {
        let input: Input = ["a", "b", "c"].into_iter().collect();
        assert_eq!(input.len(), 3);
    }

    #[tokio::test]
    async fn reader_stream_reads_to_eof() {
        let data = vec![7u8; 10_000];
        let chunks: Vec<Bytes> = reader_stream(std::io::Cursor::new(data.clone()), 4096)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), data);
    }
}
