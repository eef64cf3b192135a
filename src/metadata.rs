//! Trace metadata: the pre-built schema and the `metadata` file.
//!
//! The TSDL text itself is parsed elsewhere; this crate consumes its result,
//! a [`TraceMetadata`] description in JSON. What is handled here is
//! recognising a CTF trace directory and unwrapping the packetized form of
//! the `metadata` file so the text can be handed to a TSDL parser.

use crate::error::CtfError;
use crate::error::Result;
use crate::event::EventDeclaration;
use crate::io::ByteOrder;
use crate::trace::Clock;
use crate::types::StructDeclaration;
use byteorder::BigEndian;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use compact_str::CompactString;
use serde_derive::Deserialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;

/// Name of the metadata file in a trace directory.
pub const METADATA_FILE: &str = "metadata";
/// Magic number of a packetized metadata packet.
pub const TSDL_MAGIC: u32 = 0x75D1_1D57;
/// Start of a plain text metadata file.
pub const TEXT_METADATA_PREFIX: &[u8] = b"/* CTF";
/// Size of a packetized metadata packet header, in bytes.
pub const METADATA_HEADER_SIZE: usize = 37;

fn default_major() -> u32 {
    1
}

fn default_minor() -> u32 {
    8
}

/// Description of a trace, as produced by a TSDL parser.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceMetadata {
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_major")]
    pub major: u32,
    #[serde(default = "default_minor")]
    pub minor: u32,
    #[serde(default)]
    pub uuid: Option<uuid::Uuid>,
    #[serde(default)]
    pub packet_header: Option<StructDeclaration>,
    #[serde(default)]
    pub clocks: Vec<Clock>,
    #[serde(default)]
    pub environment: BTreeMap<CompactString, serde_json::Value>,
    pub streams: Vec<StreamMetadata>,
}

/// Description of one stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMetadata {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub packet_context: Option<StructDeclaration>,
    #[serde(default)]
    pub event_header: Option<StructDeclaration>,
    #[serde(default)]
    pub event_context: Option<StructDeclaration>,
    #[serde(default)]
    pub events: Vec<EventDeclaration>,
}

impl TraceMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Load a schema description from a JSON file.
pub fn load_schema(path: &Path) -> Result<TraceMetadata> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Check if `dir` looks like a CTF trace: it must have a `metadata` file that
/// is either packetized or starts with the TSDL text signature.
pub fn looks_like_ctf(dir: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(dir.join(METADATA_FILE)) else {
        return false;
    };
    let mut start = [0u8; 6];
    if file.read_exact(&mut start).is_err() {
        return false;
    }
    let magic = [start[0], start[1], start[2], start[3]];
    u32::from_le_bytes(magic) == TSDL_MAGIC
        || u32::from_be_bytes(magic) == TSDL_MAGIC
        || start.as_slice() == TEXT_METADATA_PREFIX
}

/// Header of one packet of packetized metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPacketHeader {
    pub byte_order: ByteOrder,
    pub uuid: uuid::Uuid,
    pub checksum: u32,
    /// In bits, including the header.
    pub content_size: u32,
    /// In bits, including the header and padding.
    pub packet_size: u32,
    pub compression_scheme: u8,
    pub encryption_scheme: u8,
    pub checksum_scheme: u8,
    pub major: u8,
    pub minor: u8,
}

macro_rules! read_header {
    ($cursor:expr, $order:ty, $byte_order:expr) => {{
        let cursor = $cursor;
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        MetadataPacketHeader {
            byte_order: $byte_order,
            uuid: uuid::Uuid::from_bytes(uuid),
            checksum: cursor.read_u32::<$order>()?,
            content_size: cursor.read_u32::<$order>()?,
            packet_size: cursor.read_u32::<$order>()?,
            compression_scheme: cursor.read_u8()?,
            encryption_scheme: cursor.read_u8()?,
            checksum_scheme: cursor.read_u8()?,
            major: cursor.read_u8()?,
            minor: cursor.read_u8()?,
        }
    }};
}

impl MetadataPacketHeader {
    /// Parse a header, or `None` if `data` does not start with the packet
    /// magic.
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < METADATA_HEADER_SIZE {
            return Ok(None);
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        let header = if magic == TSDL_MAGIC {
            read_header!(&mut cursor, LittleEndian, ByteOrder::LittleEndian)
        } else if magic.swap_bytes() == TSDL_MAGIC {
            read_header!(&mut cursor, BigEndian, ByteOrder::BigEndian)
        } else {
            return Ok(None);
        };
        Ok(Some(header))
    }
}

/// Read the TSDL text of the trace in `dir`, unwrapping packetized metadata.
pub fn read_metadata_text(dir: &Path) -> Result<String> {
    let data = std::fs::read(dir.join(METADATA_FILE)).map_err(|e| {
        CtfError::InvalidMetadata(format!(
            "Failed to read {}: {e}",
            dir.join(METADATA_FILE).display()
        ))
    })?;
    if MetadataPacketHeader::parse(&data)?.is_none() {
        if !data.starts_with(TEXT_METADATA_PREFIX) {
            return Err(CtfError::InvalidMetadata(
                "Metadata is neither packetized nor TSDL text".to_string(),
            ));
        }
        return Ok(String::from_utf8_lossy(&data).into_owned());
    }

    let mut text = String::new();
    let mut first: Option<MetadataPacketHeader> = None;
    let mut offset = 0;
    while offset < data.len() {
        let header = MetadataPacketHeader::parse(&data[offset..])?.ok_or_else(|| {
            CtfError::InvalidMetadata(format!("Bad metadata packet magic at byte {offset}"))
        })?;
        if header.compression_scheme != 0
            || header.encryption_scheme != 0
            || header.checksum_scheme != 0
        {
            return Err(CtfError::InvalidMetadata(
                "Compressed, encrypted or checksummed metadata is not supported".to_string(),
            ));
        }
        if let Some(first) = &first {
            if first.uuid != header.uuid {
                return Err(CtfError::InvalidMetadata(
                    "UUID mismatch between metadata packets".to_string(),
                ));
            }
            if first.byte_order != header.byte_order {
                return Err(CtfError::InvalidMetadata(
                    "Byte order mismatch between metadata packets".to_string(),
                ));
            }
        }
        let content_end = offset + header.content_size as usize / 8;
        let packet_end = offset + header.packet_size as usize / 8;
        if content_end < offset + METADATA_HEADER_SIZE
            || packet_end < content_end
            || content_end > data.len()
        {
            return Err(CtfError::InvalidMetadata(format!(
                "Bad metadata packet size at byte {offset}"
            )));
        }
        let payload = &data[offset + METADATA_HEADER_SIZE..content_end];
        let end = memchr::memchr(0, payload).unwrap_or(payload.len());
        text.push_str(&String::from_utf8_lossy(&payload[..end]));
        first.get_or_insert(header);
        offset = packet_end;
    }
    Ok(text)
}
