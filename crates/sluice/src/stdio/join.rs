//! Assigning output copies to sinks and pumping them to their destinations.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use sluice_common::{Captured, SluiceError, SluiceResult};
use tokio::task::JoinHandle;

use super::demand::Demand;
use super::sink::Destination;
use super::source::ByteStream;

/// Take the stream a sink with `demand` should read.
///
/// One-channel sinks get one leaf from that channel's tee tree. Sinks that
/// want both channels get a stdout leaf and a stderr leaf joined by an
/// [`Interleave`], stdout first.
pub fn assign(
    demand: Demand,
    primary: &mut Vec<ByteStream>,
    secondary: &mut Vec<ByteStream>,
) -> SluiceResult<ByteStream> {
    match (demand.primary, demand.secondary) {
        (true, true) => {
            let stdout = take(primary, "stdout")?;
            let stderr = take(secondary, "stderr")?;
            Ok(Interleave::new(stdout, stderr).boxed())
        }
        (true, false) => take(primary, "stdout"),
        (false, true) => take(secondary, "stderr"),
        (false, false) => Err(SluiceError::Internal {
            message: "sink wired without demand".to_string(),
        }),
    }
}

/// Round-robin over a stdout leaf and a stderr leaf that skips a side with
/// nothing ready.
///
/// Both leaves hang off bounded tees, so waiting on a silent channel while
/// the child fills the other would stall every sink on that channel. When
/// both sides are ready the order is the strict rotation of
/// [`Zip`](super::combine::Zip).
pub struct Interleave {
    sides: Vec<ByteStream>,
    turn: usize,
}

impl Interleave {
    /// Interleave `first` and `second`, `first` going first.
    #[must_use]
    pub fn new(first: ByteStream, second: ByteStream) -> Self {
        Self {
            sides: vec![first, second],
            turn: 0,
        }
    }
}

impl Stream for Interleave {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let len = this.sides.len();
            if len == 0 {
                return Poll::Ready(None);
            }

            let mut exhausted = None;
            for offset in 0..len {
                let idx = (this.turn + offset) % len;
                match this.sides[idx].poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => {
                        this.turn = (idx + 1) % len;
                        return Poll::Ready(Some(item));
                    }
                    Poll::Ready(None) => {
                        exhausted = Some(idx);
                        break;
                    }
                    Poll::Pending => {}
                }
            }

            let Some(idx) = exhausted else {
                return Poll::Pending;
            };
            drop(this.sides.remove(idx));
            this.turn = if idx < this.sides.len() { idx } else { 0 };
        }
    }
}

fn take(leaves: &mut Vec<ByteStream>, channel: &str) -> SluiceResult<ByteStream> {
    leaves.pop().ok_or_else(|| SluiceError::Internal {
        message: format!("ran out of {channel} copies"),
    })
}

/// How one sink's delivery ended.
#[derive(Debug)]
pub enum Delivery {
    /// Every byte was written.
    Written,
    /// Every byte was collected.
    Captured(Captured),
    /// Delivery stopped early.
    Failed(String),
}

/// Pump `stream` into `destination` until end of data.
///
/// On a write failure the stream is dropped at once, which releases its tee
/// branch so the sibling sinks keep flowing.
pub async fn deliver(mut stream: ByteStream, destination: Destination, demand: Demand) -> Delivery {
    let name = destination.describe();

    if let Destination::Capture = destination {
        let mut buffer = BytesMut::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => {
                    tracing::warn!(error = %e, "Output read failed, capture is incomplete");
                    break;
                }
            }
        }
        let Some(slot) = demand.capture_slot() else {
            return Delivery::Failed("capture without demand".to_string());
        };
        return Delivery::Captured(Captured {
            slot,
            text: String::from_utf8_lossy(&buffer).into_owned(),
        });
    }

    let mut destination = destination;
    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(sink = %name, error = %e, "Reading child output failed");
                drop(stream);
                return finish(destination, &name, Some(format!("{name}: read failed: {e}"))).await;
            }
        };
        if let Err(e) = destination.write(&chunk).await {
            tracing::warn!(sink = %name, error = %e, "Writing to sink failed, detaching it");
            drop(stream);
            return finish(destination, &name, Some(format!("{name}: write failed: {e}"))).await;
        }
    }

    finish(destination, &name, None).await
}

async fn finish(destination: Destination, name: &str, failure: Option<String>) -> Delivery {
    let flushed = destination.finish().await;
    match (failure, flushed) {
        (Some(failure), _) => Delivery::Failed(failure),
        (None, Err(e)) => {
            tracing::warn!(sink = %name, error = %e, "Flushing sink failed");
            Delivery::Failed(format!("{name}: flush failed: {e}"))
        }
        (None, Ok(())) => {
            tracing::trace!(sink = %name, "Sink delivered");
            Delivery::Written
        }
    }
}

/// Assign a stream to every destination and start delivering.
///
/// `entries` must list each distinct sink once; the leaf vectors must hold
/// exactly as many copies as there are sinks wanting that channel.
pub fn wire(
    entries: Vec<(Destination, Demand)>,
    mut primary: Vec<ByteStream>,
    mut secondary: Vec<ByteStream>,
) -> SluiceResult<Vec<JoinHandle<Delivery>>> {
    let mut branches = Vec::with_capacity(entries.len());
    for (destination, demand) in entries {
        let stream = assign(demand, &mut primary, &mut secondary)?;
        branches.push(tokio::spawn(deliver(stream, destination, demand)));
    }
    Ok(branches)
}

/// What the sinks reported once delivery finished.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Text of the capture sink, if there was one.
    pub captured: Option<Captured>,
    /// One line per sink that failed.
    pub failures: Vec<String>,
}

impl DeliveryReport {
    /// Wait for every branch and gather the results.
    pub async fn collect(branches: Vec<JoinHandle<Delivery>>) -> Self {
        let mut report = Self::default();
        for branch in branches {
            match branch.await {
                Ok(Delivery::Written) => {}
                Ok(Delivery::Captured(captured)) => report.captured = Some(captured),
                Ok(Delivery::Failed(failure)) => report.failures.push(failure),
                Err(e) => report.failures.push(format!("sink task failed: {e}")),
            }
        }
        report
    }
}
