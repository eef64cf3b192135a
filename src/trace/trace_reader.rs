//! Merging the streams of a trace into one time ordered sequence of events.

use super::ReadResponse;
use super::StreamInput;
use super::StreamInputReader;
use super::Trace;
use crate::error::Result;
use crate::event::EventDeclaration;
use crate::event::EventDefinition;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// One stream input reader and its statistics.
#[derive(Debug)]
struct Slot {
    /// `None` once the reader failed.
    reader: Option<StreamInputReader>,
    input: StreamInput,
    events: u64,
}

/// Cursor over all events of a trace, in timestamp order.
///
/// Events with the same timestamp are ordered by stream file (files are
/// added in name order).
#[derive(Debug)]
pub struct TraceReader {
    trace: Arc<Trace>,
    slots: Vec<Slot>,
    /// Readers with a current event, by (timestamp, slot).
    heap: BinaryHeap<Reverse<(u64, usize)>>,
    /// Live readers that ran out of data and should be polled again.
    waiting: Vec<usize>,
    seen: HashSet<PathBuf>,
    live: bool,
    start_time: Option<u64>,
    end_time: Option<u64>,
}

impl TraceReader {
    /// Open a reader over every stream file of `trace`, positioned on the
    /// first event.
    pub fn new(trace: Arc<Trace>) -> Result<Self> {
        let mut reader = Self::empty(trace);
        reader.update()?;
        reader.start_time = reader.current_event().map(|e| e.timestamp);
        Ok(reader)
    }

    fn empty(trace: Arc<Trace>) -> Self {
        Self {
            trace,
            slots: Vec::new(),
            heap: BinaryHeap::new(),
            waiting: Vec::new(),
            seen: HashSet::new(),
            live: false,
            start_time: None,
            end_time: None,
        }
    }

    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    /// The earliest current event of all streams.
    pub fn current_event(&self) -> Option<&EventDefinition> {
        let Reverse((_, slot)) = self.heap.peek()?;
        self.slots[*slot]
            .reader
            .as_ref()
            .and_then(StreamInputReader::current_event)
    }

    /// Move past the current event.
    ///
    /// Returns false when no stream has an event. A live trace may have more
    /// events on a later call. On error the failing stream is dropped and the
    /// reader can still be advanced.
    pub fn advance(&mut self) -> Result<bool> {
        let waiting = std::mem::take(&mut self.waiting);
        let fetched = match self.heap.pop() {
            Some(Reverse((_, slot))) => self.fetch(slot),
            None => Ok(()),
        };
        let polled = self.poll(waiting);
        fetched?;
        polled?;
        Ok(self.current_event().is_some())
    }

    /// Move every stream to its first event at or after `timestamp`.
    pub fn seek(&mut self, timestamp: u64) -> Result<bool> {
        self.reposition(|reader| reader.seek(timestamp))?;
        Ok(self.current_event().is_some())
    }

    /// Move to the event with the given rank, counting from the first event
    /// of the trace.
    pub fn seek_rank(&mut self, rank: u64) -> Result<bool> {
        if !self.seek(0)? {
            return Ok(false);
        }
        for _ in 0..rank {
            if !self.advance()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Move to the last event of the trace.
    pub fn go_to_last_event(&mut self) -> Result<bool> {
        self.reposition(StreamInputReader::go_to_last_event)?;
        if let Some(last) = self.heap.iter().map(|Reverse(key)| *key).max() {
            self.heap.clear();
            self.heap.push(Reverse(last));
        }
        Ok(self.current_event().is_some())
    }

    /// Add stream files that appeared in the trace directory since the last
    /// call. Returns the number of files added.
    pub fn update(&mut self) -> Result<usize> {
        let mut added = 0;
        for path in self.trace.scan_stream_files()? {
            if !self.seen.contains(&path) && self.add_stream_file(&path)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Add one stream file. Returns false if it was already added, is not a
    /// stream of this trace, or can not be read yet.
    ///
    /// Unreadable files are skipped with a warning rather than failing the
    /// whole trace.
    pub fn add_stream_file(&mut self, path: &Path) -> Result<bool> {
        if self.seen.contains(path) {
            return Ok(false);
        }
        let input = match self.trace.open_stream_input(path) {
            Ok(Some(input)) => input,
            Ok(None) => {
                self.seen.insert(path.to_path_buf());
                return Ok(false);
            }
            Err(e) if e.is_out_of_bounds() => {
                log::debug!("\"{}\" has no complete packet header yet", path.display());
                return Ok(false);
            }
            Err(e) => {
                log::warn!("Skipping \"{}\": {e}", path.display());
                self.seen.insert(path.to_path_buf());
                return Ok(false);
            }
        };
        self.seen.insert(path.to_path_buf());
        self.add_input(input);
        Ok(true)
    }

    fn add_input(&mut self, input: StreamInput) {
        let reader = match StreamInputReader::open(self.trace.clone(), input.clone()) {
            Ok(mut reader) => {
                reader.set_live(self.live);
                Some(reader)
            }
            Err(e) => {
                log::warn!("Skipping \"{}\": {e}", input.path.display());
                None
            }
        };
        let slot = self.slots.len();
        let has_reader = reader.is_some();
        self.slots.push(Slot {
            reader,
            input,
            events: 0,
        });
        if has_reader && let Err(e) = self.fetch(slot) {
            log::warn!("Skipping {e}");
        }
    }

    /// Read the next event of `slot` and file the reader accordingly.
    fn fetch(&mut self, slot: usize) -> Result<()> {
        let Some(reader) = self.slots[slot].reader.as_mut() else {
            return Ok(());
        };
        match reader.read_next_event() {
            Ok(response) => {
                self.file(slot, response);
                Ok(())
            }
            Err(e) => {
                let e = e.in_stream(&*self.slots[slot].input.path);
                self.slots[slot].reader = None;
                Err(e)
            }
        }
    }

    /// Put a reader in the heap or the waiting list after it moved.
    fn file(&mut self, slot: usize, response: ReadResponse) {
        match response {
            ReadResponse::Ok => {
                let Some(event) = self.slots[slot]
                    .reader
                    .as_ref()
                    .and_then(StreamInputReader::current_event)
                else {
                    return;
                };
                let timestamp = event.timestamp;
                self.slots[slot].events += 1;
                self.end_time = Some(self.end_time.map_or(timestamp, |t| t.max(timestamp)));
                self.heap.push(Reverse((timestamp, slot)));
            }
            ReadResponse::Wait => self.waiting.push(slot),
            ReadResponse::Finish => {}
        }
    }

    /// Give live readers that ran out of data another chance.
    fn poll(&mut self, waiting: Vec<usize>) -> Result<()> {
        let mut result = Ok(());
        for slot in waiting {
            if let Err(e) = self.fetch(slot) {
                log::warn!("{e}");
                result = Err(e);
            }
        }
        result
    }

    /// Clear the ordering and rebuild it from every reader moved by `op`.
    fn reposition(
        &mut self,
        mut op: impl FnMut(&mut StreamInputReader) -> Result<ReadResponse>,
    ) -> Result<()> {
        self.heap.clear();
        self.waiting.clear();
        let mut result = Ok(());
        for slot in 0..self.slots.len() {
            let Some(reader) = self.slots[slot].reader.as_mut() else {
                continue;
            };
            match op(reader) {
                Ok(response) => self.file(slot, response),
                Err(e) => {
                    let e = e.in_stream(&*self.slots[slot].input.path);
                    log::warn!("{e}");
                    self.slots[slot].reader = None;
                    result = Err(e);
                }
            }
        }
        result
    }

    /// An independent reader over the same trace and stream files,
    /// positioned on the first event.
    pub fn copy_from(&self) -> Self {
        let mut copy = Self::empty(self.trace.clone());
        copy.live = self.live;
        copy.seen.clone_from(&self.seen);
        for slot in &self.slots {
            copy.add_input(slot.input.clone());
        }
        copy.start_time = self.start_time;
        copy.end_time = self.end_time;
        copy
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// In live mode, running out of data is not the end of a stream.
    pub fn set_live(&mut self, live: bool) {
        self.live = live;
        for reader in self.slots.iter_mut().filter_map(|s| s.reader.as_mut()) {
            reader.set_live(live);
        }
    }

    /// Walk every stream to its last event so every packet is indexed, then
    /// go back to the start.
    pub fn populate_index(&mut self) -> Result<()> {
        self.go_to_last_event()?;
        self.seek(0)?;
        Ok(())
    }

    /// Timestamp of the first event of the trace.
    pub fn start_time(&self) -> Option<u64> {
        self.start_time
    }

    /// Largest timestamp read so far.
    pub fn end_time(&self) -> Option<u64> {
        self.end_time
    }

    /// Stream files being read.
    pub fn stream_inputs(&self) -> impl Iterator<Item = &StreamInput> {
        self.slots
            .iter()
            .filter(|s| s.reader.is_some())
            .map(|s| &s.input)
    }

    /// Number of events each stream file delivered to the merge. Events a
    /// seek skips over inside a stream are not counted.
    pub fn event_counts(&self) -> impl Iterator<Item = (&StreamInput, u64)> {
        self.slots.iter().map(|s| (&s.input, s.events))
    }

    /// Declarations of every event the streams being read can produce.
    pub fn event_declarations(&self) -> Vec<Arc<EventDeclaration>> {
        let mut declarations = BTreeMap::new();
        for input in self.stream_inputs() {
            for event in input.stream.events() {
                declarations
                    .entry((event.stream_id, event.id))
                    .or_insert_with(|| event.clone());
            }
        }
        declarations.into_values().collect()
    }

    /// Log how many events were read per stream file as a bar chart.
    pub fn log_stats(&self, width: usize) {
        let max = self.slots.iter().map(|s| s.events).max().unwrap_or(0);
        let name_width = self
            .slots
            .iter()
            .map(|s| s.input.name().len())
            .max()
            .unwrap_or(0);
        let total: u64 = self.slots.iter().map(|s| s.events).sum();
        log::info!("{total} events in {} stream files", self.slots.len());
        for slot in &self.slots {
            let bar = match max {
                0 => 0,
                max => (u128::from(slot.events) * width as u128 / u128::from(max)) as usize,
            };
            log::info!(
                "{:<name_width$} {:>10} {}",
                slot.input.name(),
                slot.events,
                "#".repeat(bar)
            );
        }
    }

    /// Iterate over the events from the current one on.
    ///
    /// Stop iterating (or drop the iterator) to cancel.
    pub fn events(&mut self) -> Events<'_> {
        Events {
            reader: self,
            started: false,
        }
    }
}

/// Iterator over the events of a [`TraceReader`].
#[derive(Debug)]
pub struct Events<'a> {
    reader: &'a mut TraceReader,
    started: bool,
}

impl Iterator for Events<'_> {
    type Item = Result<EventDefinition>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            match self.reader.advance() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    // The failing stream is gone, the current event is
                    // already the next one.
                    self.started = false;
                    return Some(Err(e));
                }
            }
        }
        self.started = true;
        self.reader.current_event().cloned().map(Ok)
    }
}
