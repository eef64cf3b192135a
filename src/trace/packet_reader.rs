//! Sequential decoding of the events of one packet.

use super::PacketDescriptor;
use super::Stream;
use super::Trace;
use crate::error::CtfError;
use crate::error::Result;
use crate::event::EventDefinition;
use crate::io::BitReader;
use crate::types::Definition;
use crate::types::IntegerDefinition;
use crate::types::IntegerRole;
use crate::types::LexicalScope;
use crate::types::Scope;
use crate::types::StructDeclaration;
use crate::types::StructDefinition;
use crate::types::decode_struct;
use compact_str::CompactString;
use std::path::Path;
use std::sync::Arc;

/// Decodes the events of one packet, in order.
///
/// The reader owns the packet's bytes. After the last real event, a packet
/// that reports discarded events yields one synthetic lost event.
#[derive(Debug)]
pub struct PacketReader {
    trace: Arc<Trace>,
    stream: Arc<Stream>,
    descriptor: PacketDescriptor,
    stream_file: Arc<Path>,
    data: Vec<u8>,
    /// Bit position of the next event, from the start of the packet.
    position: u64,
    last_timestamp: u64,
    lost_pending: bool,
}

impl PacketReader {
    /// `data` holds the packet starting at its first byte (the packet header).
    pub fn new(
        trace: Arc<Trace>,
        stream: Arc<Stream>,
        descriptor: PacketDescriptor,
        data: Vec<u8>,
        stream_file: Arc<Path>,
    ) -> Self {
        Self {
            trace,
            stream,
            position: descriptor.payload_start_bits,
            last_timestamp: descriptor.timestamp_begin,
            lost_pending: descriptor.lost_events > 0,
            descriptor,
            stream_file,
            data,
        }
    }

    pub fn descriptor(&self) -> &PacketDescriptor {
        &self.descriptor
    }

    /// Replace the packet's bytes with a longer view of the same packet. The
    /// cursor stays where it is.
    pub(crate) fn extend(&mut self, descriptor: PacketDescriptor, data: Vec<u8>) {
        self.descriptor = descriptor;
        self.data = data;
    }

    /// Bit position of the next event.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Timestamp of the last event read (the packet begin before that).
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    fn content_end(&self) -> u64 {
        self.descriptor
            .content_size_bits
            .min(self.data.len() as u64 * 8)
    }

    pub fn has_more_events(&self) -> bool {
        self.position < self.content_end() || self.lost_pending
    }

    /// Decode the next event.
    pub fn read_next_event(&mut self) -> Result<EventDefinition> {
        let content_end = self.content_end();
        if self.position >= content_end {
            if self.lost_pending {
                self.lost_pending = false;
                return Ok(self.lost_event());
            }
            return Err(CtfError::NoMoreEvents);
        }

        let data = &self.data[..content_end.div_ceil(8) as usize];
        let mut reader = BitReader::new(data, self.trace.byte_order());
        reader.set_position(self.position);
        let start = self.position;

        let root = Scope::root();
        let scope = root.child(
            Some(LexicalScope::TracePacketHeader),
            fields_of(self.descriptor.packet_header.as_deref()),
        );
        let scope = scope.child(
            Some(LexicalScope::StreamPacketContext),
            fields_of(self.descriptor.packet_context.as_deref()),
        );

        let header = decode_optional(
            self.stream.event_header.as_ref(),
            &mut reader,
            &scope,
            LexicalScope::StreamEventHeader,
        )?;
        let scope = scope.child(
            Some(LexicalScope::StreamEventHeader),
            fields_of(header.as_ref()),
        );
        let stream_context = decode_optional(
            self.stream.event_context.as_ref(),
            &mut reader,
            &scope,
            LexicalScope::StreamEventContext,
        )?;
        let scope = scope.child(
            Some(LexicalScope::StreamEventContext),
            fields_of(stream_context.as_ref()),
        );

        let declaration = match &header {
            Some(header) => {
                let id = header_integer(header, IntegerRole::EventId)
                    .map_or(0, |i| i.value);
                self.stream
                    .event(id)
                    .ok_or(CtfError::UnknownEventId(id))?
            }
            None => self
                .stream
                .implicit_event()
                .ok_or(CtfError::UnknownEventId(0))?,
        }
        .clone();

        let context = decode_optional(
            declaration.context.as_ref(),
            &mut reader,
            &scope,
            LexicalScope::EventContext,
        )?;
        let scope = scope.child(Some(LexicalScope::EventContext), fields_of(context.as_ref()));
        let fields = decode_optional(
            declaration.fields.as_ref(),
            &mut reader,
            &scope,
            LexicalScope::EventFields,
        )?
        .unwrap_or_default();

        if reader.position() == start {
            return Err(CtfError::EmptyEvent(declaration.name.clone()));
        }
        if reader.position() > content_end {
            return Err(CtfError::OutOfBounds {
                position: start,
                length: reader.position() - start,
                capacity: content_end,
            });
        }
        self.position = reader.position();

        let timestamp = match header
            .as_ref()
            .and_then(|h| header_integer(h, IntegerRole::Timestamp))
        {
            Some(ts) => {
                let (value, length) = (ts.value, ts.declaration.length);
                self.update_timestamp(value, length)
            }
            None => self.last_timestamp,
        };

        Ok(EventDefinition {
            declaration,
            timestamp,
            cpu: self.descriptor.target_id,
            target: self.descriptor.target.clone(),
            stream_id: self.stream.id,
            stream_file: self.stream_file.clone(),
            header,
            stream_context,
            context,
            fields,
            packet_context: self.descriptor.packet_context.clone(),
        })
    }

    /// Extend a possibly truncated timestamp using the previous one. The
    /// result never goes backwards within a packet.
    fn update_timestamp(&mut self, value: u64, length: u32) -> u64 {
        let timestamp = if length >= 64 {
            value
        } else {
            let mask = (1u64 << length) - 1;
            let low = value & mask;
            let mut timestamp = (self.last_timestamp & !mask).wrapping_add(low);
            if low < self.last_timestamp & mask {
                timestamp = timestamp.wrapping_add(1 << length);
            }
            timestamp
        };
        self.last_timestamp = timestamp;
        timestamp
    }

    fn lost_event(&self) -> EventDefinition {
        let timestamp = match self.descriptor.timestamp_end {
            u64::MAX => self.last_timestamp,
            end => end,
        };
        let mut event = EventDefinition::lost(
            timestamp,
            self.descriptor.lost_events,
            self.descriptor.lost_duration,
            self.stream_file.clone(),
        );
        event.cpu = self.descriptor.target_id;
        event.target = self.descriptor.target.clone();
        event.stream_id = self.stream.id;
        event.packet_context = self.descriptor.packet_context.clone();
        event
    }
}

fn fields_of(definition: Option<&StructDefinition>) -> &[(CompactString, Definition)] {
    definition.map_or(&[][..], |d| d.fields.as_slice())
}

fn decode_optional(
    declaration: Option<&StructDeclaration>,
    reader: &mut BitReader<'_>,
    scope: &Scope<'_>,
    label: LexicalScope,
) -> Result<Option<StructDefinition>> {
    declaration
        .map(|decl| decode_struct(decl, reader, scope, Some(label)))
        .transpose()
}

/// Look up a header field. A variant `v` in the header (compact and extended
/// headers) takes precedence over the top level field.
fn header_integer(header: &StructDefinition, role: IntegerRole) -> Option<&IntegerDefinition> {
    let inner = match header.field("v") {
        Some(Definition::Variant(v)) => v
            .value
            .as_struct()
            .and_then(|s| s.integer_by_role(role)),
        _ => None,
    };
    inner.or_else(|| header.integer_by_role(role))
}
