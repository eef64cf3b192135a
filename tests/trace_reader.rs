mod common;

use common::Packet;
use common::TestTrace;
use common::summary;
use ctf_reader::CtfError;
use ctf_reader::TraceReader;
use ctf_reader::event::LOST_EVENT_NAME;

fn collect(reader: &mut TraceReader) -> Vec<ctf_reader::EventDefinition> {
    reader.events().collect::<Result<Vec<_>, _>>().unwrap()
}

fn render(event: &ctf_reader::EventDefinition) -> String {
    ctf_reader::types::Definition::Struct(event.fields.clone()).to_string()
}

/// Two per CPU files with interleaved timestamps.
fn two_cpus() -> TestTrace {
    let trace = TestTrace::new();
    trace.write_stream(
        "channel0_0",
        &[
            Packet::new(0, &[(10, 1), (30, 3), (50, 5)]),
            Packet::new(0, &[(70, 7), (90, 9)]),
        ],
    );
    trace.write_stream(
        "channel0_1",
        &[
            Packet::new(1, &[(20, 2), (30, 33), (40, 4)]),
            Packet::new(1, &[(80, 8), (100, 10)]),
        ],
    );
    trace
}

#[test]
fn test_packet_no_header() {
    let trace = TestTrace::with_schema(indoc::indoc! {r#"
        {
            "streams": [
                {
                    "events": [
                        {
                            "name": "pair",
                            "fields": {
                                "fields": [
                                    { "name": "a", "type": "integer", "length": 16, "byte_order": "le" },
                                    { "name": "b", "type": "integer", "length": 8, "base": 16 }
                                ]
                            }
                        }
                    ]
                }
            ]
        }
    "#});
    std::fs::write(trace.file("stream"), [0x00, 0x00, 0x00, 0xff, 0xff, 0xa5]).unwrap();
    let mut reader = TraceReader::new(trace.open()).unwrap();

    let event = reader.current_event().unwrap();
    insta::assert_snapshot!(render(event), @"{ a = 0, b = 0x0 }");
    assert!(reader.advance().unwrap());
    let event = reader.current_event().unwrap();
    insta::assert_snapshot!(render(event), @"{ a = 65535, b = 0xa5 }");
    assert!(!reader.advance().unwrap());
    assert!(reader.current_event().is_none());
}

#[test]
fn test_merge_order() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();
    let events = collect(&mut reader);
    let summaries: Vec<_> = events.iter().map(summary).map(|(ts, v)| (ts, v.unwrap())).collect();
    assert_eq!(
        summaries,
        [
            (10, 1),
            (20, 2),
            (30, 3),
            (30, 33),
            (40, 4),
            (50, 5),
            (70, 7),
            (80, 8),
            (90, 9),
            (100, 10)
        ]
    );
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(events[0].cpu, Some(0));
    assert_eq!(events[1].cpu, Some(1));
    assert_eq!(events[1].target.as_deref(), Some("CPU1"));
    assert_eq!(events[0].name(), "tick");
    assert_eq!(reader.start_time(), Some(10));
    assert_eq!(reader.end_time(), Some(100));
}

#[test]
fn test_lost_events() {
    let trace = TestTrace::new();
    trace.write_stream(
        "channel0_0",
        &[
            Packet::new(0, &[(10, 1), (20, 2)]).discarded(2),
            Packet::new(0, &[(30, 3)]).discarded(2),
            Packet::new(0, &[(40, 4)]).discarded(5),
        ],
    );
    let mut reader = TraceReader::new(trace.open()).unwrap();
    let events = collect(&mut reader);
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        ["tick", "tick", LOST_EVENT_NAME, "tick", "tick", LOST_EVENT_NAME]
    );
    assert_eq!(events[2].timestamp, 20);
    assert_eq!(events[2].lost_count(), Some(2));
    assert_eq!(events[5].timestamp, 40);
    assert_eq!(events[5].lost_count(), Some(3));
    // Distance from the end of the previous packet.
    assert_eq!(
        events[5]
            .lookup("duration")
            .and_then(ctf_reader::types::Definition::as_integer)
            .map(|i| i.value),
        Some(10)
    );
    insta::assert_snapshot!(
        serde_json::to_string(&events[2].fields).unwrap(),
        @r#"{"Lost events":2,"duration":1}"#
    );
}

#[test]
fn test_seek() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();

    assert!(reader.seek(45).unwrap());
    assert_eq!(reader.current_event().map(summary), Some((50, Some(5))));
    assert!(reader.seek(30).unwrap());
    assert_eq!(reader.current_event().map(summary), Some((30, Some(3))));
    assert!(reader.advance().unwrap());
    assert_eq!(reader.current_event().map(summary), Some((30, Some(33))));
    assert!(reader.seek(75).unwrap());
    assert_eq!(reader.current_event().map(summary), Some((80, Some(8))));
    assert!(!reader.seek(101).unwrap());
    assert!(reader.seek(0).unwrap());
    assert_eq!(reader.current_event().map(summary), Some((10, Some(1))));

    assert!(reader.seek_rank(4).unwrap());
    assert_eq!(reader.current_event().map(summary), Some((40, Some(4))));
    assert!(!reader.seek_rank(10).unwrap());
}

#[test]
fn test_go_to_last_event() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();
    assert!(reader.go_to_last_event().unwrap());
    assert_eq!(reader.current_event().map(summary), Some((100, Some(10))));
    assert!(!reader.advance().unwrap());
}

#[test]
fn test_copy_is_independent() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();
    reader.advance().unwrap();
    reader.advance().unwrap();

    let mut copy = reader.copy_from();
    assert_eq!(copy.current_event().map(summary), Some((10, Some(1))));
    copy.advance().unwrap();
    assert_eq!(copy.current_event().map(summary), Some((20, Some(2))));

    assert_eq!(reader.current_event().map(summary), Some((30, Some(3))));
    reader.advance().unwrap();
    assert_eq!(reader.current_event().map(summary), Some((30, Some(33))));
    assert_eq!(copy.current_event().map(summary), Some((20, Some(2))));
    assert_eq!(collect(&mut copy).len(), 9);
}

#[test]
fn test_skips_foreign_files() {
    let trace = two_cpus();
    std::fs::write(trace.file("notes.txt"), "not a stream").unwrap();
    let mut bad = Packet::new(2, &[(15, 0)]);
    bad.magic = 0xdead_beef;
    trace.write_stream("channel0_2", &[bad]);
    std::fs::write(trace.file(".hidden"), [1u8, 2, 3]).unwrap();

    let mut reader = TraceReader::new(trace.open()).unwrap();
    let names: Vec<_> = reader
        .stream_inputs()
        .map(|input| input.name().into_owned())
        .collect();
    assert_eq!(names, ["channel0_0", "channel0_1"]);
    assert_eq!(collect(&mut reader).len(), 10);
}

#[test]
fn test_corrupt_packet_only_stops_its_stream() {
    let trace = TestTrace::new();
    let mut corrupt = Packet::new(0, &[(60, 6)]);
    corrupt.content_size_bits = Some(1 << 20);
    trace.write_stream(
        "channel0_0",
        &[Packet::new(0, &[(10, 1), (50, 5)]), corrupt],
    );
    trace.write_stream("channel0_1", &[Packet::new(1, &[(20, 2), (70, 7)])]);

    let mut reader = TraceReader::new(trace.open()).unwrap();
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for event in reader.events() {
        match event {
            Ok(event) => values.push(summary(&event).1.unwrap()),
            Err(e) => errors.push(e),
        }
    }
    assert_eq!(values, [1, 2, 5, 7]);
    assert_eq!(errors.len(), 1);
    let CtfError::Stream { path, source } = &errors[0] else {
        panic!("expected a stream error, got {:?}", errors[0]);
    };
    assert_eq!(path, &trace.file("channel0_0"));
    assert!(matches!(**source, CtfError::InvalidPacket { .. }));
}

#[test]
fn test_live_trace_grows() {
    let trace = TestTrace::new();
    trace.write_stream("channel0_0", &[Packet::new(0, &[(10, 1)])]);

    let mut fixed = TraceReader::new(trace.open()).unwrap();
    let mut live = TraceReader::new(trace.open()).unwrap();
    live.set_live(true);
    assert!(!live.advance().unwrap());
    assert!(live.current_event().is_none());

    // Half a packet is not an event yet.
    let packet = Packet::new(0, &[(20, 2)]).encode();
    trace.append("channel0_0", &packet[..30]);
    assert!(!live.advance().unwrap());
    trace.append("channel0_0", &packet[30..]);
    assert!(live.advance().unwrap());
    assert_eq!(live.current_event().map(summary), Some((20, Some(2))));

    // New files are picked up by update.
    trace.write_stream("channel0_1", &[Packet::new(1, &[(30, 3)])]);
    assert_eq!(live.update().unwrap(), 1);
    assert_eq!(live.update().unwrap(), 0);
    assert!(live.advance().unwrap());
    assert_eq!(live.current_event().map(summary), Some((30, Some(3))));

    // A reader that is not live stops at what was there when it started.
    assert_eq!(collect(&mut fixed).len(), 1);
}

#[test]
fn test_populate_index_and_statistics() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();
    reader.populate_index().unwrap();
    assert_eq!(reader.current_event().map(summary), Some((10, Some(1))));
    assert_eq!(reader.end_time(), Some(100));

    let declarations = reader.event_declarations();
    assert_eq!(declarations.len(), 1);
    assert_eq!(declarations[0].name, "tick");

    let mut reader = TraceReader::new(trace.open()).unwrap();
    collect(&mut reader);
    let counts: Vec<_> = reader
        .event_counts()
        .map(|(input, count)| (input.name().into_owned(), count))
        .collect();
    assert_eq!(
        counts,
        [("channel0_0".to_string(), 5), ("channel0_1".to_string(), 5)]
    );
    reader.log_stats(40);
}

#[test]
fn test_nanosecond_conversion() {
    let trace = two_cpus();
    let trace = trace.open();
    assert_eq!(trace.cycles_to_nanos(10), 10);
    assert_eq!(trace.uuid().map(|u| u.as_bytes()[0]), Some(1));
}

#[test]
fn test_counts_after_seek() {
    let trace = two_cpus();
    let mut reader = TraceReader::new(trace.open()).unwrap();
    let counts = |reader: &TraceReader| -> Vec<u64> {
        reader.event_counts().map(|(_, count)| count).collect()
    };
    assert_eq!(counts(&reader), [1, 1]);
    // Both streams land on one event, the skipped ones do not count.
    assert!(reader.seek(45).unwrap());
    assert_eq!(counts(&reader), [2, 2]);
}
