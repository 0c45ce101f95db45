//! Which sink wants which of the child's output channels.

use std::path::Path;

use sluice_common::CaptureSlot;

use super::sink::{Sink, SinkKey};

/// The channels one sink subscribed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demand {
    /// Wants the child's stdout.
    pub primary: bool,
    /// Wants the child's stderr.
    pub secondary: bool,
}

impl Demand {
    /// Whether this sink receives stdout and stderr interleaved.
    #[must_use]
    pub const fn is_joined(&self) -> bool {
        self.primary && self.secondary
    }

    /// The capture slot a capture sink with this demand fills.
    #[must_use]
    pub const fn capture_slot(&self) -> Option<CaptureSlot> {
        match (self.primary, self.secondary) {
            (true, true) => Some(CaptureSlot::Combined),
            (true, false) => Some(CaptureSlot::Stdout),
            (false, true) => Some(CaptureSlot::Stderr),
            (false, false) => None,
        }
    }
}

/// Distinct sinks in first-request order, each with its demand.
///
/// A sink requested several times, for one channel or for both, appears once.
#[derive(Debug, Default)]
pub struct DemandMap {
    entries: Vec<(Sink, Demand)>,
    keys: Vec<SinkKey>,
}

impl DemandMap {
    /// Build the map from the sinks requested for stdout and for stderr.
    #[must_use]
    pub fn build(primary: Vec<Sink>, secondary: Vec<Sink>) -> Self {
        Self::build_in(primary, secondary, None)
    }

    /// Like [`DemandMap::build`], with relative file paths taken against
    /// `cwd` so that two spellings of one file are one sink.
    #[must_use]
    pub fn build_in(primary: Vec<Sink>, secondary: Vec<Sink>, cwd: Option<&Path>) -> Self {
        let mut map = Self::default();
        for sink in primary {
            map.entry(sink, cwd).primary = true;
        }
        for sink in secondary {
            map.entry(sink, cwd).secondary = true;
        }
        map
    }

    fn entry(&mut self, sink: Sink, cwd: Option<&Path>) -> &mut Demand {
        let key = sink.key_in(cwd);
        let idx = match self.keys.iter().position(|k| *k == key) {
            Some(idx) => idx,
            None => {
                self.keys.push(key);
                self.entries.push((sink, Demand::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    /// Number of sinks that need a copy of stdout.
    #[must_use]
    pub fn primary_count(&self) -> usize {
        self.entries.iter().filter(|(_, d)| d.primary).count()
    }

    /// Number of sinks that need a copy of stderr.
    #[must_use]
    pub fn secondary_count(&self) -> usize {
        self.entries.iter().filter(|(_, d)| d.secondary).count()
    }

    /// Number of distinct sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sink was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries, in first-request order.
    #[must_use]
    pub fn entries(&self) -> &[(Sink, Demand)] {
        &self.entries
    }

    /// Consume the map.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Sink, Demand)> {
        self.entries
    }
}
