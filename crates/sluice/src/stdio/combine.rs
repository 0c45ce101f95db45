//! Combining several sources into the one stream a child reads as stdin.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use sluice_common::{SluiceError, SluiceResult, resolve_in};

use super::source::{ByteStream, CombineMode, Input, Source, reader_stream};

/// What the child's stdin is connected to after combining.
pub enum Feed {
    /// No input at all; stdin is `/dev/null`.
    Null,
    /// Everything was in memory and has been concatenated.
    Buffer(Bytes),
    /// At least one live source; bytes arrive as the stream is polled.
    Stream(ByteStream),
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(bytes).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Pick the mode for the junction between two consecutive sources.
///
/// An explicit mode always wins. Otherwise a literal on either side means
/// `Merge` and two live sources mean `Zip`.
#[must_use]
pub const fn resolve_mode(
    explicit: Option<CombineMode>,
    left_is_literal: bool,
    right_is_literal: bool,
) -> CombineMode {
    match explicit {
        Some(mode) => mode,
        None if left_is_literal || right_is_literal => CombineMode::Merge,
        None => CombineMode::Zip,
    }
}

/// Concatenate two streams.
#[must_use]
pub fn merge(first: ByteStream, second: ByteStream) -> ByteStream {
    first.chain(second).boxed()
}

/// Interleave two streams one chunk at a time, `first` going first.
#[must_use]
pub fn zip(first: ByteStream, second: ByteStream) -> ByteStream {
    Zip::new(vec![first, second]).boxed()
}

/// Round-robin interleaving of several streams.
///
/// Sides take turns in declaration order, one chunk each. The side whose turn
/// it is is always awaited, however long it takes; a side leaves the rotation
/// only when it ends.
pub struct Zip {
    sides: Vec<ByteStream>,
    turn: usize,
}

impl Zip {
    /// Interleave `sides` in the given order.
    #[must_use]
    pub const fn new(sides: Vec<ByteStream>) -> Self {
        Self { sides, turn: 0 }
    }
}

impl Stream for Zip {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.sides.is_empty() {
                return Poll::Ready(None);
            }
            let idx = this.turn % this.sides.len();
            match this.sides[idx].poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => {
                    this.turn = (idx + 1) % this.sides.len();
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    drop(this.sides.remove(idx));
                    this.turn = idx;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Build the stdin feed for `input`.
///
/// Files are opened relative to `cwd`. Live sources are read in chunks of
/// `chunk_size` bytes.
pub async fn combine(input: Input, cwd: Option<&Path>, chunk_size: usize) -> SluiceResult<Feed> {
    let mut parts = input.into_parts();

    if parts.len() == 1 && parts[0].source.is_null() {
        return Ok(Feed::Null);
    }
    parts.retain(|part| !part.source.is_null());
    if parts.is_empty() {
        return Err(SluiceError::NoUsableInput);
    }

    if parts.iter().all(|part| part.source.is_literal()) {
        let mut buffer = BytesMut::new();
        for part in parts {
            if let Source::Literal(bytes) = part.source {
                buffer.extend_from_slice(&bytes);
            }
        }
        tracing::debug!(bytes = buffer.len(), "Stdin sources concatenated in memory");
        return Ok(Feed::Buffer(buffer.freeze()));
    }

    let mut parts = parts.into_iter();
    let Some(first) = parts.next() else {
        return Err(SluiceError::NoUsableInput);
    };
    let mut previous_is_literal = first.source.is_literal();
    let mut combined = open(first.source, cwd, chunk_size).await?;

    for part in parts {
        let is_literal = part.source.is_literal();
        let mode = resolve_mode(part.mode, previous_is_literal, is_literal);
        tracing::trace!(?mode, source = part.source.kind(), "Joining stdin source");
        let next = open(part.source, cwd, chunk_size).await?;
        combined = match mode {
            CombineMode::Merge => merge(combined, next),
            CombineMode::Zip => zip(combined, next),
        };
        previous_is_literal = is_literal;
    }

    Ok(Feed::Stream(combined))
}

async fn open(source: Source, cwd: Option<&Path>, chunk_size: usize) -> SluiceResult<ByteStream> {
    Ok(match source {
        Source::Literal(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
        Source::Handle(reader) => reader_stream(reader, chunk_size),
        Source::Stream(stream) => stream,
        Source::File(path) => {
            let path = resolve_in(cwd, &path);
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|source| SluiceError::SourceOpen { path, source })?;
            reader_stream(file, chunk_size)
        }
        Source::Null => {
            return Err(SluiceError::Internal {
                message: "null marker reached the stdin combinator".to_string(),
            });
        }
    })
}
