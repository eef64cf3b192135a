//! On disk trace fixtures.
#![allow(dead_code)]

use byteorder::LittleEndian;
use byteorder::WriteBytesExt;
use ctf_reader::Trace;
use ctf_reader::metadata::TraceMetadata;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

pub const TRACE_UUID: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

/// Bytes of packet header and packet context.
pub const PRELUDE_SIZE: usize = 21 + 29;
/// Bytes of one `tick` event.
pub const EVENT_SIZE: usize = 13;

/// A trace with a packet header, packet context and an event header, the
/// layout produced by [`Packet::encode`].
pub const SCHEMA: &str = r#"
{
    "byte_order": "le",
    "uuid": "01020304-0506-0708-090a-0b0c0d0e0f10",
    "clocks": [ { "name": "monotonic", "freq": 1000000000 } ],
    "packet_header": {
        "fields": [
            { "name": "magic", "type": "integer", "length": 32, "base": 16 },
            {
                "name": "uuid",
                "type": "array",
                "length": 16,
                "element": { "type": "integer", "length": 8 }
            },
            { "name": "stream_id", "type": "integer", "length": 8 }
        ]
    },
    "streams": [
        {
            "id": 0,
            "packet_context": {
                "fields": [
                    { "name": "timestamp_begin", "type": "integer", "length": 64 },
                    { "name": "timestamp_end", "type": "integer", "length": 64 },
                    { "name": "content_size", "type": "integer", "length": 32 },
                    { "name": "packet_size", "type": "integer", "length": 32 },
                    { "name": "events_discarded", "type": "integer", "length": 32 },
                    { "name": "cpu_id", "type": "integer", "length": 8 }
                ]
            },
            "event_header": {
                "fields": [
                    { "name": "id", "type": "integer", "length": 8 },
                    { "name": "timestamp", "type": "integer", "length": 64 }
                ]
            },
            "events": [
                {
                    "name": "tick",
                    "id": 0,
                    "fields": {
                        "fields": [ { "name": "value", "type": "integer", "length": 32 } ]
                    }
                }
            ]
        }
    ]
}
"#;

/// A packet of `tick` events in [`SCHEMA`] layout.
#[derive(Debug, Clone)]
pub struct Packet {
    pub magic: u32,
    pub begin: u64,
    pub end: u64,
    pub events_discarded: u32,
    pub cpu: u8,
    /// `(timestamp, value)` of each event.
    pub events: Vec<(u64, u32)>,
    /// Extra bytes after the content.
    pub padding: usize,
    /// Lie about the content size.
    pub content_size_bits: Option<u32>,
}

impl Packet {
    pub fn new(cpu: u8, events: &[(u64, u32)]) -> Self {
        Self {
            magic: 0xC1FC_1FC1,
            begin: events.first().map_or(0, |e| e.0),
            end: events.last().map_or(0, |e| e.0),
            events_discarded: 0,
            cpu,
            events: events.to_vec(),
            padding: 7,
            content_size_bits: None,
        }
    }

    pub fn discarded(mut self, events_discarded: u32) -> Self {
        self.events_discarded = events_discarded;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let content = PRELUDE_SIZE + EVENT_SIZE * self.events.len();
        let size = content + self.padding;
        let mut out = Vec::with_capacity(size);
        out.write_u32::<LittleEndian>(self.magic).unwrap();
        out.extend_from_slice(&TRACE_UUID);
        out.push(0);
        out.write_u64::<LittleEndian>(self.begin).unwrap();
        out.write_u64::<LittleEndian>(self.end).unwrap();
        out.write_u32::<LittleEndian>(self.content_size_bits.unwrap_or(content as u32 * 8))
            .unwrap();
        out.write_u32::<LittleEndian>(size as u32 * 8).unwrap();
        out.write_u32::<LittleEndian>(self.events_discarded).unwrap();
        out.push(self.cpu);
        assert_eq!(out.len(), PRELUDE_SIZE);
        for &(timestamp, value) in &self.events {
            out.push(0);
            out.write_u64::<LittleEndian>(timestamp).unwrap();
            out.write_u32::<LittleEndian>(value).unwrap();
        }
        out.resize(size, 0);
        out
    }
}

/// A trace directory in a temporary location.
pub struct TestTrace {
    pub dir: tempfile::TempDir,
    schema: String,
}

impl TestTrace {
    pub fn new() -> Self {
        Self::with_schema(SCHEMA)
    }

    pub fn with_schema(schema: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata"), "/* CTF 1.8 */\n").unwrap();
        Self {
            dir,
            schema: schema.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a stream file made of `packets`.
    pub fn write_stream(&self, name: &str, packets: &[Packet]) {
        let data: Vec<u8> = packets.iter().flat_map(Packet::encode).collect();
        std::fs::write(self.file(name), data).unwrap();
    }

    /// Append raw bytes to a stream file.
    pub fn append(&self, name: &str, data: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.file(name))
            .unwrap();
        file.write_all(data).unwrap();
    }

    pub fn open(&self) -> Arc<Trace> {
        let metadata = TraceMetadata::from_json(&self.schema).unwrap();
        Arc::new(Trace::open(self.path(), metadata).unwrap())
    }
}

/// `(timestamp, value)` of an event, with `None` as value for lost events.
pub fn summary(event: &ctf_reader::EventDefinition) -> (u64, Option<u64>) {
    let value = event
        .fields
        .lookup_integer("value")
        .map(|i| i.value);
    (event.timestamp, value)
}
