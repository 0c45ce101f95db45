//! The stdio engine.
//!
//! Input sources are combined into one feed for the child's stdin. Each
//! output channel is copied through a tee tree so every sink gets its own
//! stream, and sinks that want both channels read a joined stream.

pub mod combine;
pub mod demand;
pub mod join;
pub mod sink;
pub mod source;
pub mod tee;

pub use combine::{Feed, Zip, combine, merge, zip};
pub use demand::{Demand, DemandMap};
pub use join::{Delivery, DeliveryReport, Interleave, assign, deliver, wire};
pub use sink::{Destination, FileMode, SharedWriter, Sink, SinkKey};
pub use source::{ByteStream, CombineMode, Input, Source, reader_stream};
pub use tee::{TeeTree, fan_out, tee};
