//! Lossless duplication of one output stream into many.

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::source::ByteStream;

/// Split `source` into two streams that each see every chunk, in order.
///
/// A background task pulls from `source` and hands each chunk to both
/// branches. Each branch buffers at most `capacity` chunks, so the source is
/// never read further ahead than the slower branch can absorb. A branch that
/// is dropped stops receiving; the other keeps going. When both are gone the
/// source is still drained so the producer never blocks on a full pipe.
#[must_use]
pub fn tee(source: ByteStream, capacity: usize) -> (ByteStream, ByteStream) {
    let (left_tx, left_rx) = mpsc::channel(capacity.max(1));
    let (right_tx, right_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(pump(source, left_tx, right_tx));
    (
        ReceiverStream::new(left_rx).boxed(),
        ReceiverStream::new(right_rx).boxed(),
    )
}

type Branch = Option<mpsc::Sender<io::Result<Bytes>>>;

async fn pump(
    mut source: ByteStream,
    left: mpsc::Sender<io::Result<Bytes>>,
    right: mpsc::Sender<io::Result<Bytes>>,
) {
    let mut left: Branch = Some(left);
    let mut right: Branch = Some(right);

    while let Some(item) = source.next().await {
        let (for_left, for_right) = match item {
            Ok(chunk) => (Ok(chunk.clone()), Ok(chunk)),
            Err(e) => (Err(copy_error(&e)), Err(e)),
        };
        let (left_open, right_open) =
            tokio::join!(deliver(&left, for_left), deliver(&right, for_right));
        if !left_open {
            left = None;
        }
        if !right_open {
            right = None;
        }
    }
}

async fn deliver(branch: &Branch, item: io::Result<Bytes>) -> bool {
    match branch {
        Some(tx) => tx.send(item).await.is_ok(),
        None => false,
    }
}

fn copy_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}

/// Breadth-first tree of tees.
///
/// Starts from one stream; each split takes the stream at the front of the
/// queue, tees it, and queues both halves at the back. Splitting level by
/// level keeps every leaf within `ceil(log2(n))` tees of the source, so no
/// single branch becomes a chain that every byte has to cross.
pub struct TeeTree {
    pending: VecDeque<(usize, ByteStream)>,
    capacity: usize,
}

impl TeeTree {
    /// Start a tree whose root is `source`.
    #[must_use]
    pub fn new(source: ByteStream, capacity: usize) -> Self {
        Self {
            pending: VecDeque::from([(0, source)]),
            capacity,
        }
    }

    /// Split until the tree has at least `leaves` leaves.
    pub fn grow_to(&mut self, leaves: usize) {
        while self.pending.len() < leaves {
            let Some((depth, stream)) = self.pending.pop_front() else {
                break;
            };
            let (left, right) = tee(stream, self.capacity);
            self.pending.push_back((depth + 1, left));
            self.pending.push_back((depth + 1, right));
        }
    }

    /// Number of leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the tree has no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Largest number of tees between the source and a leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.pending.iter().map(|(depth, _)| *depth).max().unwrap_or(0)
    }

    /// The leaves, in queue order.
    #[must_use]
    pub fn into_leaves(self) -> Vec<ByteStream> {
        self.pending.into_iter().map(|(_, stream)| stream).collect()
    }
}

/// Produce `count` independent copies of `source`.
///
/// With `count == 0` nothing is duplicated; the source is drained in the
/// background and its bytes discarded.
#[must_use]
pub fn fan_out(source: ByteStream, count: usize, capacity: usize) -> Vec<ByteStream> {
    if count == 0 {
        tokio::spawn(source.for_each(|_| async {}));
        return Vec::new();
    }
    let mut tree = TeeTree::new(source, capacity);
    tree.grow_to(count);
    tracing::debug!(leaves = tree.len(), depth = tree.depth(), "Built tee tree");
    tree.into_leaves()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use proptest::prelude::*;

    fn source(chunks: Vec<Vec<u8>>) -> ByteStream {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
    }

    async fn drain(stream: ByteStream) -> Vec<u8> {
        stream.map(|c| c.unwrap().to_vec()).concat().await
    }

    #[tokio::test]
    async fn tee_duplicates_in_order() {
        let (left, right) = tee(source(vec![b"one".to_vec(), b"two".to_vec()]), 1);
        let (left, right) = tokio::join!(drain(left), drain(right));
        assert_eq!(left, b"onetwo");
        assert_eq!(right, b"onetwo");
    }

    #[tokio::test]
    async fn dropped_branch_does_not_stall_the_other() {
        let chunks: Vec<Vec<u8>> = (0..64u8).map(|i| vec![i; 8]).collect();
        let expected: Vec<u8> = chunks.concat();
        let (left, right) = tee(source(chunks), 2);
        drop(left);
        assert_eq!(drain(right).await, expected);
    }

    #[tokio::test]
    async fn errors_reach_both_branches() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
        ])
        .boxed();
        let (left, right) = tee(failing, 4);
        for branch in [left, right] {
            let items: Vec<_> = branch.collect().await;
            assert_eq!(items.len(), 2);
            assert_eq!(
                items[1].as_ref().unwrap_err().kind(),
                io::ErrorKind::BrokenPipe
            );
        }
    }

    #[tokio::test]
    async fn tree_is_breadth_first() {
        for (leaves, depth) in [(1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            let mut tree = TeeTree::new(source(Vec::new()), 4);
            tree.grow_to(leaves);
            assert_eq!(tree.len(), leaves);
            assert_eq!(tree.depth(), depth, "depth for {leaves} leaves");
        }
    }

    #[tokio::test]
    async fn zero_copies_drains_source() {
        let leaves = fan_out(source(vec![b"discarded".to_vec()]), 0, 4);
        assert!(leaves.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fan_out_is_lossless(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 0..16),
            count in 1usize..9,
            capacity in 1usize..4,
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .build()
                .unwrap();
            let expected: Vec<u8> = chunks.concat();
            let copies = runtime.block_on(async move {
                let leaves = fan_out(source(chunks), count, capacity);
                futures::future::join_all(leaves.into_iter().map(drain)).await
            });
            prop_assert_eq!(copies.len(), count);
            for copy in copies {
                prop_assert_eq!(&copy, &expected);
            }
        }
    }
}
