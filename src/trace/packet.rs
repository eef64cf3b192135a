//! Packet descriptors and the per stream input packet index.

use crate::types::Definition;
use crate::types::StructDefinition;
use compact_str::CompactString;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything known about one packet without decoding its events.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDescriptor {
    /// Offset of the packet in the stream file, in bytes.
    pub offset_bytes: u64,
    /// Offset of the first event, in bits from the start of the packet.
    pub payload_start_bits: u64,
    /// Bits of the packet holding data (header and events).
    pub content_size_bits: u64,
    /// Bits the packet occupies in the file, including padding.
    pub packet_size_bits: u64,
    pub timestamp_begin: u64,
    /// `u64::MAX` when unknown.
    pub timestamp_end: u64,
    /// Events discarded by the tracer since the previous packet.
    pub lost_events: u64,
    /// Time span the lost events were discarded in.
    pub lost_duration: u64,
    pub stream_id: Option<u64>,
    /// Numeric target id, usually the CPU.
    pub target_id: Option<u64>,
    /// Target name, `CPU<n>` or a device name.
    pub target: Option<CompactString>,
    pub packet_seq_num: Option<u64>,
    /// The packet context declares no size, the packet runs to the end of
    /// the file as it was when the packet was indexed.
    pub sized_by_file: bool,
    /// Scalar fields of the packet context by name.
    pub attributes: BTreeMap<CompactString, Definition>,
    pub packet_header: Option<Arc<StructDefinition>>,
    pub packet_context: Option<Arc<StructDefinition>>,
}

impl Default for PacketDescriptor {
    fn default() -> Self {
        Self {
            offset_bytes: 0,
            payload_start_bits: 0,
            content_size_bits: 0,
            packet_size_bits: 0,
            timestamp_begin: 0,
            timestamp_end: u64::MAX,
            lost_events: 0,
            lost_duration: 0,
            stream_id: None,
            target_id: None,
            target: None,
            packet_seq_num: None,
            sized_by_file: false,
            attributes: BTreeMap::new(),
            packet_header: None,
            packet_context: None,
        }
    }
}

impl PacketDescriptor {
    /// True if `timestamp` is within the packet's time range (inclusive).
    pub fn includes(&self, timestamp: u64) -> bool {
        self.timestamp_begin <= timestamp && timestamp <= self.timestamp_end
    }

    /// Offset of the byte following this packet.
    pub fn next_offset(&self) -> u64 {
        self.offset_bytes + self.packet_size_bits.div_ceil(8)
    }

    /// Bytes holding packet content.
    pub fn content_size_bytes(&self) -> u64 {
        self.content_size_bits.div_ceil(8)
    }

    pub fn attribute(&self, name: &str) -> Option<&Definition> {
        self.attributes.get(name)
    }
}

/// Append-only, time sorted list of the packets of one stream input.
#[derive(Debug, Default, Clone)]
pub struct PacketIndex {
    packets: Vec<PacketDescriptor>,
    /// Largest end timestamp up to and including each packet.
    max_end: Vec<u64>,
}

impl PacketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet at the end of the index.
    ///
    /// Returns false, without adding it, if the packet is empty, does not
    /// come after the previous packet in the file, or ends before the
    /// previous packet begins.
    pub fn append(&mut self, packet: PacketDescriptor) -> bool {
        if packet.content_size_bits == 0 {
            log::warn!("Rejecting empty packet at byte {}", packet.offset_bytes);
            return false;
        }
        if let Some(prev) = self.packets.last() {
            if packet.offset_bytes <= prev.offset_bytes {
                log::warn!(
                    "Rejecting packet at byte {}: offset not after previous packet at byte {}",
                    packet.offset_bytes,
                    prev.offset_bytes
                );
                return false;
            }
            if packet.timestamp_end < prev.timestamp_begin {
                log::warn!(
                    "Rejecting packet at byte {}: ends at {} before previous packet begins at {}",
                    packet.offset_bytes,
                    packet.timestamp_end,
                    prev.timestamp_begin
                );
                return false;
            }
        }
        let max_end = self
            .max_end
            .last()
            .map_or(packet.timestamp_end, |&m| m.max(packet.timestamp_end));
        self.max_end.push(max_end);
        self.packets.push(packet);
        true
    }

    /// Grow the last packet, which runs to the end of the file, to
    /// `size_bits`.
    pub(crate) fn resize_last(&mut self, size_bits: u64) -> Option<&PacketDescriptor> {
        let last = self.packets.last_mut()?;
        last.content_size_bits = size_bits;
        last.packet_size_bits = size_bits;
        Some(last)
    }

    /// Index of the packet to start reading from to find events at
    /// `timestamp`.
    ///
    /// This is the first packet whose range contains `timestamp`. If no
    /// packet contains it, it is the last packet that starts before it (or
    /// the first packet if there is none). Timestamps after every range
    /// give the last packet. Packets nested inside an earlier, longer
    /// packet do not hide it.
    pub fn search(&self, timestamp: u64) -> usize {
        let idx = self.max_end.partition_point(|&end| end < timestamp);
        match self.packets.get(idx) {
            None => self.packets.len().saturating_sub(1),
            Some(p) if p.timestamp_begin > timestamp => idx.saturating_sub(1),
            Some(_) => idx,
        }
    }

    pub fn get(&self, idx: usize) -> Option<&PacketDescriptor> {
        self.packets.get(idx)
    }

    pub fn last(&self) -> Option<&PacketDescriptor> {
        self.packets.last()
    }

    /// Largest end timestamp of all packets.
    pub fn max_end(&self) -> Option<u64> {
        self.max_end.last().copied()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketDescriptor> {
        self.packets.iter()
    }
}
