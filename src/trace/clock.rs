//! Trace clocks and cycle to nanosecond conversion.

use compact_str::CompactString;
use serde_derive::Deserialize;
use serde_derive::Serialize;

const NS_PER_S: i128 = 1_000_000_000;

fn default_freq() -> u64 {
    1_000_000_000
}

/// A clock declared in the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub name: CompactString,
    /// Frequency in Hz.
    #[serde(default = "default_freq")]
    pub freq: u64,
    /// Offset from the epoch, seconds part.
    #[serde(default)]
    pub offset_s: i64,
    /// Offset from the epoch, in cycles, on top of `offset_s`.
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub precision: u64,
    #[serde(default)]
    pub description: Option<CompactString>,
    #[serde(default)]
    pub uuid: Option<uuid::Uuid>,
    #[serde(default)]
    pub absolute: bool,
}

impl Clock {
    pub fn new(name: impl Into<CompactString>, freq: u64) -> Self {
        Self {
            name: name.into(),
            freq,
            offset_s: 0,
            offset: 0,
            precision: 0,
            description: None,
            uuid: None,
            absolute: false,
        }
    }

    fn freq(&self) -> i128 {
        i128::from(self.freq.max(1))
    }

    /// Total offset from the epoch in cycles.
    pub fn offset_cycles(&self) -> i128 {
        i128::from(self.offset_s) * self.freq() + i128::from(self.offset)
    }

    /// Convert a cycle count to nanoseconds since the epoch.
    pub fn cycles_to_nanos(&self, cycles: u64) -> u64 {
        let nanos = (i128::from(cycles) + self.offset_cycles()) * NS_PER_S / self.freq();
        saturate(nanos)
    }

    /// Inverse of [`Self::cycles_to_nanos`] (up to rounding).
    pub fn nanos_to_cycles(&self, nanos: u64) -> u64 {
        let cycles = i128::from(nanos) * self.freq() / NS_PER_S - self.offset_cycles();
        saturate(cycles)
    }
}

fn saturate(value: i128) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(u64::MAX)
}
