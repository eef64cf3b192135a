//! The trace: streams, clocks and the files backing them.

pub mod clock;
pub mod packet;
pub mod packet_reader;
pub mod stream;
pub mod stream_input_reader;
pub mod trace_reader;

pub use clock::Clock;
pub use packet::PacketDescriptor;
pub use packet::PacketIndex;
pub use packet_reader::PacketReader;
pub use stream::Stream;
pub use stream::StreamInput;
pub use stream_input_reader::ReadResponse;
pub use stream_input_reader::StreamInputReader;
pub use trace_reader::TraceReader;

use crate::error::CtfError;
use crate::error::Result;
use crate::io::BitReader;
use crate::io::ByteOrder;
use crate::metadata::TraceMetadata;
use crate::types::IntegerRole;
use crate::types::LexicalScope;
use crate::types::Scope;
use crate::types::StructDeclaration;
use crate::types::StructDefinition;
use crate::types::decode_struct;
use compact_str::CompactString;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;

/// Magic number at the start of every stream packet.
pub const CTF_MAGIC: u64 = 0xC1FC_1FC1;

/// Bytes read from the start of a stream file to identify its stream.
const HEADER_PROBE_SIZE: u64 = 64 * 1024;

static CPU_SUFFIX_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"_([0-9]+)$").expect("Failed to compile regex"));

/// A CTF trace directory and its schema.
///
/// A trace is immutable once opened and is shared between readers.
#[derive(Debug)]
pub struct Trace {
    path: PathBuf,
    byte_order: ByteOrder,
    major: u32,
    minor: u32,
    uuid: Option<uuid::Uuid>,
    packet_header: Option<StructDeclaration>,
    streams: Vec<Arc<Stream>>,
    clocks: Vec<Clock>,
    environment: BTreeMap<CompactString, serde_json::Value>,
}

impl Trace {
    /// Open the trace in directory `path`, described by `metadata`.
    pub fn open(path: impl AsRef<Path>, metadata: TraceMetadata) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CtfError::InvalidTracePath {
                path: path.to_path_buf(),
                reason: "does not exist",
            });
        }
        if !path.is_dir() {
            return Err(CtfError::InvalidTracePath {
                path: path.to_path_buf(),
                reason: "not a directory",
            });
        }
        if !crate::metadata::looks_like_ctf(path) {
            return Err(CtfError::InvalidTracePath {
                path: path.to_path_buf(),
                reason: "no CTF metadata file",
            });
        }

        if metadata.streams.is_empty() {
            return Err(CtfError::InvalidMetadata("Trace declares no streams".to_string()));
        }
        if metadata.streams.len() > 1 && metadata.streams.iter().any(|s| s.id.is_none()) {
            return Err(CtfError::InvalidMetadata(
                "Every stream needs an id when there are several streams".to_string(),
            ));
        }
        let mut streams: Vec<Arc<Stream>> = Vec::with_capacity(metadata.streams.len());
        for stream in metadata.streams {
            let stream = Stream::from_metadata(stream)?;
            if streams.iter().any(|s| s.id == stream.id) {
                return Err(CtfError::InvalidMetadata(format!(
                    "Duplicate stream id {:?}",
                    stream.id
                )));
            }
            streams.push(Arc::new(stream));
        }

        Ok(Self {
            path: path.to_path_buf(),
            byte_order: metadata.byte_order,
            major: metadata.major,
            minor: metadata.minor,
            uuid: metadata.uuid,
            packet_header: metadata.packet_header,
            streams,
            clocks: metadata.clocks,
            environment: metadata.environment,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn version(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    pub fn uuid(&self) -> Option<uuid::Uuid> {
        self.uuid
    }

    pub fn packet_header(&self) -> Option<&StructDeclaration> {
        self.packet_header.as_ref()
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }

    /// The stream with the given id. A packet without stream id belongs to
    /// the only stream of the trace.
    pub fn stream(&self, id: Option<u64>) -> Option<&Arc<Stream>> {
        match id {
            None if self.streams.len() == 1 => self.streams.first(),
            id => self.streams.iter().find(|s| s.id == id),
        }
    }

    pub fn clocks(&self) -> &[Clock] {
        &self.clocks
    }

    pub fn clock(&self, name: &str) -> Option<&Clock> {
        self.clocks.iter().find(|c| c.name == name)
    }

    pub fn environment(&self) -> &BTreeMap<CompactString, serde_json::Value> {
        &self.environment
    }

    /// The clock used for conversions, if it is unambiguous.
    fn single_clock(&self) -> Option<&Clock> {
        match self.clocks.as_slice() {
            [clock] => Some(clock),
            _ => None,
        }
    }

    /// Convert a timestamp in cycles to nanoseconds since the epoch. Identity
    /// unless the trace has exactly one clock.
    pub fn cycles_to_nanos(&self, cycles: u64) -> u64 {
        self.single_clock()
            .map_or(cycles, |clock| clock.cycles_to_nanos(cycles))
    }

    pub fn nanos_to_cycles(&self, nanos: u64) -> u64 {
        self.single_clock()
            .map_or(nanos, |clock| clock.nanos_to_cycles(nanos))
    }

    /// Candidate stream files: every non empty, non hidden regular file
    /// except the metadata, sorted by name.
    pub fn scan_stream_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == crate::metadata::METADATA_FILE {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }
            files.push(entry.path());
        }
        files.sort();
        Ok(files)
    }

    /// Decode the trace packet header at the reader's position.
    pub(crate) fn decode_packet_header(
        &self,
        reader: &mut BitReader<'_>,
    ) -> Result<Option<StructDefinition>> {
        self.packet_header
            .as_ref()
            .map(|decl| {
                decode_struct(
                    decl,
                    reader,
                    &Scope::root(),
                    Some(LexicalScope::TracePacketHeader),
                )
            })
            .transpose()
    }

    /// Identify the stream of the file at `path` from its first packet
    /// header.
    ///
    /// Returns `None` if the file is not a CTF stream (bad magic).
    pub fn open_stream_input(&self, path: &Path) -> Result<Option<StreamInput>> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        let mut data = Vec::new();
        file.take(len.min(HEADER_PROBE_SIZE))
            .read_to_end(&mut data)?;

        let mut reader = BitReader::new(&data, self.byte_order);
        let header = self.decode_packet_header(&mut reader)?;
        let mut stream_id = None;
        if let Some(header) = &header {
            if let Some(magic) = header.integer_by_role(IntegerRole::Magic)
                && magic.value != CTF_MAGIC
            {
                log::warn!(
                    "Skipping \"{}\": bad packet magic {:#x}",
                    path.display(),
                    magic.value
                );
                return Ok(None);
            }
            stream_id = header
                .integer_by_role(IntegerRole::StreamId)
                .map(|i| i.value);
        }
        let stream = self.stream(stream_id).ok_or_else(|| CtfError::InvalidPacket {
            offset: 0,
            reason: format!("Unknown stream id {stream_id:?}"),
        })?;

        let cpu_hint = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| CPU_SUFFIX_REGEX.captures(name))
            .and_then(|caps| caps[1].parse().ok());

        Ok(Some(StreamInput {
            path: Arc::from(path),
            stream: stream.clone(),
            cpu_hint,
        }))
    }
}
