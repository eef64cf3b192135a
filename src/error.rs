//! Error type for trace reading.

use compact_str::CompactString;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = CtfError> = std::result::Result<T, E>;

/// Errors produced while opening or decoding a CTF trace.
#[derive(Debug, thiserror::Error)]
pub enum CtfError {
    /// A read went past the end of the buffer.
    #[error("Read of {length} bits at bit {position} is out of bounds (buffer has {capacity} bits)")]
    OutOfBounds {
        position: u64,
        length: u64,
        capacity: u64,
    },
    /// The trace path does not exist or is not a directory.
    #[error("Invalid trace path \"{}\": {reason}", path.display())]
    InvalidTracePath { path: PathBuf, reason: &'static str },
    /// The metadata file is missing or malformed.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    /// A declaration that can not be decoded (e.g. a 65 bit integer).
    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),
    /// A variant tag or sequence length could not be found in scope.
    #[error("Failed to resolve \"{0}\" in the current scope")]
    UnresolvedLookup(CompactString),
    /// The event header referenced an event id the stream does not declare.
    #[error("Incorrect event id: {0}")]
    UnknownEventId(u64),
    /// An event that did not consume any bits.
    #[error("Empty event not allowed, event: {0}")]
    EmptyEvent(CompactString),
    /// A packet that failed validation while being indexed.
    #[error("Invalid packet at byte {offset}: {reason}")]
    InvalidPacket { offset: u64, reason: String },
    /// `read_next_event` called on an exhausted packet.
    #[error("No more events in packet")]
    NoMoreEvents,
    /// An error decoding one specific stream file.
    #[error("Error reading stream \"{}\": {source}", path.display())]
    Stream {
        path: PathBuf,
        #[source]
        source: Box<Self>,
    },
    /// IO error on the trace files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The schema description could not be deserialised.
    #[error("Failed to load schema: {0}")]
    Schema(#[from] serde_json::Error),
}

impl CtfError {
    /// Attach the stream file this error occurred in.
    pub(crate) fn in_stream(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Stream { .. } => self,
            other => Self::Stream {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// True when the error means "the data is not there yet" rather than
    /// "the data is broken". Used for packets that are still being written.
    pub fn is_out_of_bounds(&self) -> bool {
        match self {
            Self::OutOfBounds { .. } => true,
            Self::Stream { source, .. } => source.is_out_of_bounds(),
            _ => false,
        }
    }
}
