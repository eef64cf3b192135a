//! Reader for Common Trace Format (CTF) traces.
//!
//! A trace is a directory with a `metadata` file and one or more binary
//! stream files. The schema of the trace is provided pre-parsed as a
//! [`metadata::TraceMetadata`]; this crate decodes the packets of the stream
//! files and merges them into one sequence of events ordered by timestamp.
//!
//! ```no_run
//! use ctf_reader::Trace;
//! use ctf_reader::TraceReader;
//! use std::sync::Arc;
//!
//! # fn main() -> ctf_reader::Result<()> {
//! let metadata = ctf_reader::metadata::load_schema("schema.json".as_ref())?;
//! let trace = Arc::new(Trace::open("/path/to/trace", metadata)?);
//! let mut reader = TraceReader::new(trace)?;
//! for event in reader.events() {
//!     let event = event?;
//!     println!("{} {}", event.timestamp, event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod io;
pub mod metadata;
pub mod trace;
pub mod types;

pub use error::CtfError;
pub use error::Result;
pub use event::EventDeclaration;
pub use event::EventDefinition;
pub use trace::PacketDescriptor;
pub use trace::PacketIndex;
pub use trace::ReadResponse;
pub use trace::Stream;
pub use trace::StreamInputReader;
pub use trace::Trace;
pub use trace::TraceReader;
