//! Streams and their backing files.

use crate::error::CtfError;
use crate::error::Result;
use crate::event::EventDeclaration;
use crate::metadata::StreamMetadata;
use crate::types::StructDeclaration;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A logical channel of a trace with its own event set.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// `None` for the single stream of a trace without stream ids.
    pub id: Option<u64>,
    pub packet_context: Option<StructDeclaration>,
    pub event_header: Option<StructDeclaration>,
    pub event_context: Option<StructDeclaration>,
    events: BTreeMap<u64, Arc<EventDeclaration>>,
}

impl Stream {
    pub fn new(id: Option<u64>) -> Self {
        Self {
            id,
            packet_context: None,
            event_header: None,
            event_context: None,
            events: BTreeMap::new(),
        }
    }

    pub(crate) fn from_metadata(metadata: StreamMetadata) -> Result<Self> {
        let mut stream = Self {
            id: metadata.id,
            packet_context: metadata.packet_context,
            event_header: metadata.event_header,
            event_context: metadata.event_context,
            events: BTreeMap::new(),
        };
        for event in metadata.events {
            stream.add_event(event)?;
        }
        Ok(stream)
    }

    /// Register an event declaration. Event ids are unique per stream.
    pub fn add_event(&mut self, mut event: EventDeclaration) -> Result<()> {
        event.stream_id = self.id;
        if self.events.contains_key(&event.id) {
            return Err(CtfError::InvalidMetadata(format!(
                "Duplicate event id {} ({}) in stream {:?}",
                event.id, event.name, self.id
            )));
        }
        self.events.insert(event.id, Arc::new(event));
        Ok(())
    }

    pub fn event(&self, id: u64) -> Option<&Arc<EventDeclaration>> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &Arc<EventDeclaration>> {
        self.events.values()
    }

    /// The declaration used by packets without event header.
    pub(crate) fn implicit_event(&self) -> Option<&Arc<EventDeclaration>> {
        match self.events.len() {
            1 => self.events.values().next(),
            _ => self.event(0),
        }
    }
}

/// One file backing a stream.
#[derive(Debug, Clone)]
pub struct StreamInput {
    pub path: Arc<Path>,
    pub stream: Arc<Stream>,
    /// CPU derived from the file name (`channel0_3`), used when packets
    /// carry no `cpu_id`.
    pub cpu_hint: Option<u64>,
}

impl StreamInput {
    /// Base name of the file.
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        self.path
            .file_name()
            .map_or_else(|| self.path.to_string_lossy(), |name| name.to_string_lossy())
    }
}
