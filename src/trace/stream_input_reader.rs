//! Reading the events of one stream file.

use super::CTF_MAGIC;
use super::PacketDescriptor;
use super::PacketIndex;
use super::PacketReader;
use super::StreamInput;
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
use crate::types::StructDefinition;
use crate::types::decode_struct;
use compact_str::format_compact;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

/// Initial number of bytes read to decode a packet header and context.
const PACKET_PROBE_SIZE: u64 = 4096;

/// Outcome of moving a stream input reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadResponse {
    /// There is a current event.
    Ok,
    /// No event right now, but a live stream may get more data.
    Wait,
    /// The stream is exhausted.
    Finish,
}

/// Cursor over the events of one stream file.
///
/// The packet index is built lazily as events are read. Without live mode
/// only the part of the file that existed when the reader was opened is
/// indexed; in live mode the file is checked for growth whenever the
/// indexed packets run out.
#[derive(Debug)]
pub struct StreamInputReader {
    trace: Arc<Trace>,
    input: StreamInput,
    file: File,
    /// File length as last observed.
    file_len: u64,
    live: bool,
    index: PacketIndex,
    /// Set when the index rejected a packet. Nothing after it is read.
    index_stopped: bool,
    next_packet_offset: u64,
    /// Last value of the cumulative discarded events counter.
    events_discarded: u64,
    uuid_warned: bool,
    packet: Option<PacketReader>,
    /// Index of the packet to load when the current one is exhausted.
    next_packet: usize,
    current: Option<EventDefinition>,
}

impl StreamInputReader {
    pub fn open(trace: Arc<Trace>, input: StreamInput) -> Result<Self> {
        let file = File::open(&input.path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            trace,
            input,
            file,
            file_len,
            live: false,
            index: PacketIndex::new(),
            index_stopped: false,
            next_packet_offset: 0,
            events_discarded: 0,
            uuid_warned: false,
            packet: None,
            next_packet: 0,
            current: None,
        })
    }

    pub fn input(&self) -> &StreamInput {
        &self.input
    }

    pub fn path(&self) -> &Path {
        &self.input.path
    }

    pub fn index(&self) -> &PacketIndex {
        &self.index
    }

    pub fn current_event(&self) -> Option<&EventDefinition> {
        self.current.as_ref()
    }

    /// Descriptor of the packet the current event is in.
    pub fn current_packet(&self) -> Option<&PacketDescriptor> {
        self.packet.as_ref().map(PacketReader::descriptor)
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// Move to the next event.
    pub fn read_next_event(&mut self) -> Result<ReadResponse> {
        loop {
            if let Some(packet) = &mut self.packet
                && packet.has_more_events()
            {
                let growable = self.live && packet.descriptor().sized_by_file;
                match packet.read_next_event() {
                    Ok(event) => {
                        self.current = Some(event);
                        return Ok(ReadResponse::Ok);
                    }
                    // The event is still being written.
                    Err(e) if e.is_out_of_bounds() && growable => {
                        if self.grow_packet()? {
                            continue;
                        }
                        self.current = None;
                        return Ok(ReadResponse::Wait);
                    }
                    Err(e) => return Err(e),
                }
            }
            if self.live
                && self
                    .packet
                    .as_ref()
                    .is_some_and(|p| p.descriptor().sized_by_file)
                && self.grow_packet()?
            {
                continue;
            }
            let next = self.next_packet;
            if next >= self.index.len() && !self.index_next_packet()? {
                self.current = None;
                let response = self.end_response();
                if response == ReadResponse::Finish {
                    self.packet = None;
                }
                return Ok(response);
            }
            self.load_packet(next)?;
            self.next_packet = next + 1;
        }
    }

    /// Move to the first event at or after `timestamp`.
    pub fn seek(&mut self, timestamp: u64) -> Result<ReadResponse> {
        while self.index.max_end().is_none_or(|end| end < timestamp) {
            if !self.index_next_packet()? {
                break;
            }
        }
        self.packet = None;
        self.current = None;
        self.next_packet = self.index.search(timestamp);
        loop {
            let response = self.read_next_event()?;
            match &self.current {
                Some(event) if response == ReadResponse::Ok && event.timestamp < timestamp => {}
                _ => return Ok(response),
            }
        }
    }

    /// Move to the last event of the stream.
    pub fn go_to_last_event(&mut self) -> Result<ReadResponse> {
        self.index_all()?;
        self.packet = None;
        self.current = None;
        self.next_packet = self.index.len();
        for idx in (0..self.index.len()).rev() {
            self.load_packet(idx)?;
            let mut last = None;
            if let Some(packet) = &mut self.packet {
                while packet.has_more_events() {
                    last = Some(packet.read_next_event()?);
                }
            }
            if last.is_some() {
                self.current = last;
                return Ok(ReadResponse::Ok);
            }
        }
        self.packet = None;
        Ok(self.end_response())
    }

    /// Index every packet currently in the file.
    pub fn index_all(&mut self) -> Result<()> {
        while self.index_next_packet()? {}
        Ok(())
    }

    fn end_response(&self) -> ReadResponse {
        if self.live && !self.index_stopped {
            ReadResponse::Wait
        } else {
            ReadResponse::Finish
        }
    }

    fn refresh_file_len(&mut self) -> Result<u64> {
        if self.live {
            self.file_len = self.file.metadata()?.len();
        }
        Ok(self.file_len)
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(len as usize);
        Read::by_ref(&mut self.file)
            .take(len)
            .read_to_end(&mut data)?;
        Ok(data)
    }

    fn load_packet(&mut self, idx: usize) -> Result<()> {
        let descriptor = self
            .index
            .get(idx)
            .cloned()
            .ok_or_else(|| CtfError::InvalidPacket {
                offset: self.next_packet_offset,
                reason: format!("No packet number {idx}"),
            })?;
        let size = descriptor.content_size_bytes();
        let data = self.read_at(descriptor.offset_bytes, size)?;
        if (data.len() as u64) < size {
            return Err(CtfError::InvalidPacket {
                offset: descriptor.offset_bytes,
                reason: "Stream file shrunk below an indexed packet".to_string(),
            });
        }
        self.packet = Some(PacketReader::new(
            self.trace.clone(),
            self.input.stream.clone(),
            descriptor,
            data,
            self.input.path.clone(),
        ));
        Ok(())
    }

    /// Extend the current packet, when it runs to the end of the file, over
    /// data appended since. Returns false if the file did not grow.
    fn grow_packet(&mut self) -> Result<bool> {
        let Some(offset) = self.packet.as_ref().map(|p| p.descriptor().offset_bytes) else {
            return Ok(false);
        };
        if self.index.last().map(|p| p.offset_bytes) != Some(offset) {
            return Ok(false);
        }
        let file_len = self.refresh_file_len()?;
        if file_len <= self.next_packet_offset {
            return Ok(false);
        }
        let size = file_len - offset;
        let data = self.read_at(offset, size)?;
        let size = data.len() as u64;
        let Some(descriptor) = self.index.resize_last(size * 8).cloned() else {
            return Ok(false);
        };
        log::debug!(
            "{}: packet at byte {offset} grew to {size} bytes",
            self.input.name()
        );
        self.next_packet_offset = descriptor.next_offset();
        if let Some(packet) = &mut self.packet {
            packet.extend(descriptor, data);
        }
        Ok(true)
    }

    /// Add the next packet of the file to the index.
    ///
    /// Returns false when there is no complete packet to add: the end of the
    /// file was reached, the packet is still being written, or the index
    /// rejected it.
    fn index_next_packet(&mut self) -> Result<bool> {
        if self.index_stopped {
            return Ok(false);
        }
        let file_len = self.refresh_file_len()?;
        let offset = self.next_packet_offset;
        if offset >= file_len {
            return Ok(false);
        }
        let remaining = file_len - offset;

        let mut probe = remaining.min(PACKET_PROBE_SIZE);
        let (header, context, payload_start) = loop {
            let data = self.read_at(offset, probe)?;
            let mut reader = BitReader::new(&data, self.trace.byte_order());
            match self.decode_packet_prelude(&mut reader, offset) {
                Ok((header, context)) => break (header, context, reader.position()),
                Err(e) if e.is_out_of_bounds() && probe < remaining => {
                    probe = probe.saturating_mul(4).min(remaining);
                }
                Err(e) if e.is_out_of_bounds() => {
                    log::debug!(
                        "{}: packet at byte {offset} is not complete yet",
                        self.input.name()
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        };

        let integer = |role| {
            context
                .as_ref()
                .and_then(|c| c.integer_by_role(role))
        };
        let remaining_bits = remaining.saturating_mul(8);
        let content_size = integer(IntegerRole::ContentSize).map(|i| i.value);
        let packet_size = integer(IntegerRole::PacketSize).map(|i| i.value);
        let content_size_bits = content_size.or(packet_size).unwrap_or(remaining_bits);
        let packet_size_bits = packet_size.or(content_size).unwrap_or(remaining_bits);
        if content_size_bits > packet_size_bits {
            return Err(CtfError::InvalidPacket {
                offset,
                reason: format!(
                    "Content size {content_size_bits} larger than packet size {packet_size_bits}"
                ),
            });
        }
        if packet_size_bits > remaining_bits {
            log::debug!(
                "{}: packet at byte {offset} needs {packet_size_bits} bits, only {remaining_bits} \
                 available",
                self.input.name()
            );
            return Ok(false);
        }
        if payload_start > content_size_bits {
            return Err(CtfError::InvalidPacket {
                offset,
                reason: format!(
                    "Packet header and context ({payload_start} bits) larger than content \
                     ({content_size_bits} bits)"
                ),
            });
        }

        let timestamp_begin = integer(IntegerRole::TimestampBegin).map_or(0, |i| i.value);
        let timestamp_end = integer(IntegerRole::TimestampEnd).map_or(u64::MAX, |i| {
            if is_all_ones(i) { u64::MAX } else { i.value }
        });
        let (lost_events, events_discarded) = match integer(IntegerRole::EventsDiscarded) {
            Some(discarded) => (
                discarded.value.wrapping_sub(self.events_discarded) & width_mask(discarded),
                discarded.value,
            ),
            None => (0, self.events_discarded),
        };
        let lost_duration = self
            .index
            .last()
            .map_or(1, |prev| prev.timestamp_end.abs_diff(timestamp_begin));

        let (target_id, target) = match integer(IntegerRole::CpuId) {
            Some(cpu) => (Some(cpu.value), Some(format_compact!("CPU{}", cpu.value))),
            None => match context
                .as_ref()
                .and_then(|c| c.field("device"))
                .and_then(Definition::as_text)
            {
                Some(device) => (None, Some(format_compact!("{device}"))),
                None => (
                    self.input.cpu_hint,
                    self.input.cpu_hint.map(|cpu| format_compact!("CPU{cpu}")),
                ),
            },
        };
        let packet_seq_num = integer(IntegerRole::PacketSeqNum).map(|i| i.value);

        let attributes: BTreeMap<_, _> = context
            .iter()
            .flat_map(|c| c.fields.iter())
            .filter(|(_, d)| {
                matches!(
                    d,
                    Definition::Integer(_)
                        | Definition::Float(_)
                        | Definition::String(_)
                        | Definition::Enum(_)
                )
            })
            .cloned()
            .collect();

        let descriptor = PacketDescriptor {
            offset_bytes: offset,
            payload_start_bits: payload_start,
            content_size_bits,
            packet_size_bits,
            timestamp_begin,
            timestamp_end,
            lost_events,
            lost_duration,
            stream_id: self.input.stream.id,
            target_id,
            target,
            packet_seq_num,
            sized_by_file: content_size.is_none() && packet_size.is_none(),
            attributes,
            packet_header: header.map(Arc::new),
            packet_context: context.map(Arc::new),
        };
        let next_offset = descriptor.next_offset();
        if !self.index.append(descriptor) {
            log::warn!(
                "{}: stopped indexing at byte {offset}, later packets are ignored",
                self.input.name()
            );
            self.index_stopped = true;
            return Ok(false);
        }
        log::debug!(
            "{}: indexed packet at byte {offset} ({packet_size_bits} bits, \
             {timestamp_begin}..{timestamp_end})",
            self.input.name()
        );
        self.events_discarded = events_discarded;
        self.next_packet_offset = next_offset;
        Ok(true)
    }

    /// Decode and validate the packet header, then decode the packet context.
    fn decode_packet_prelude(
        &mut self,
        reader: &mut BitReader<'_>,
        offset: u64,
    ) -> Result<(Option<StructDefinition>, Option<StructDefinition>)> {
        let header = self.trace.decode_packet_header(reader)?;
        if let Some(header) = &header {
            self.check_packet_header(header, offset)?;
        }
        let context = match &self.input.stream.packet_context {
            Some(decl) => {
                let root = Scope::root();
                let scope = root.child(
                    Some(LexicalScope::TracePacketHeader),
                    header.as_ref().map_or(&[][..], |h| h.fields.as_slice()),
                );
                Some(decode_struct(
                    decl,
                    reader,
                    &scope,
                    Some(LexicalScope::StreamPacketContext),
                )?)
            }
            None => None,
        };
        Ok((header, context))
    }

    fn check_packet_header(&mut self, header: &StructDefinition, offset: u64) -> Result<()> {
        if let Some(magic) = header.integer_by_role(IntegerRole::Magic)
            && magic.value != CTF_MAGIC
        {
            return Err(CtfError::InvalidPacket {
                offset,
                reason: format!("Bad magic {:#x}", magic.value),
            });
        }
        if let Some(stream_id) = header.integer_by_role(IntegerRole::StreamId)
            && Some(stream_id.value) != self.input.stream.id
        {
            return Err(CtfError::InvalidPacket {
                offset,
                reason: format!(
                    "Stream id {} does not match stream {:?} of this file",
                    stream_id.value, self.input.stream.id
                ),
            });
        }
        if let (Some(expected), Some(found)) = (self.trace.uuid(), packet_uuid(header))
            && expected != found
            && !self.uuid_warned
        {
            log::warn!(
                "{}: packet UUID {found} does not match trace UUID {expected}",
                self.input.name()
            );
            self.uuid_warned = true;
        }
        Ok(())
    }
}

fn packet_uuid(header: &StructDefinition) -> Option<uuid::Uuid> {
    let Some(Definition::Array(array)) = header.field("uuid") else {
        return None;
    };
    let bytes = array
        .elements
        .iter()
        .map(|e| e.as_integer().map(|i| i.value as u8))
        .collect::<Option<Vec<u8>>>()?;
    uuid::Uuid::from_slice(&bytes).ok()
}

fn width_mask(integer: &IntegerDefinition) -> u64 {
    match integer.declaration.length {
        64.. => u64::MAX,
        length => (1 << length) - 1,
    }
}

fn is_all_ones(integer: &IntegerDefinition) -> bool {
    integer.value & width_mask(integer) == width_mask(integer)
}
