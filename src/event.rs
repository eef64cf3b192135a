//! Event declarations and decoded events.

use crate::types::Definition;
use crate::types::IntegerDeclaration;
use crate::types::IntegerDefinition;
use crate::types::LexicalScope;
use crate::types::StructDeclaration;
use crate::types::StructDefinition;
use compact_str::CompactString;
use serde::ser::SerializeMap;
use serde_derive::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

/// Name of the synthetic event reporting discarded events.
pub const LOST_EVENT_NAME: &str = "Lost event";
/// Field of the lost event holding the number of discarded events.
pub const LOST_EVENTS_FIELD: &str = "Lost events";
/// Field of the lost event holding the time span the events were lost in.
pub const LOST_DURATION_FIELD: &str = "duration";
/// Id of the lost event. Never used by a real event declaration.
pub const LOST_EVENT_ID: u64 = u64::MAX;

/// Schema of one kind of event in a stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventDeclaration {
    pub name: CompactString,
    #[serde(default)]
    pub id: u64,
    /// Set when the declaration is attached to its stream.
    #[serde(skip)]
    pub stream_id: Option<u64>,
    #[serde(default)]
    pub context: Option<StructDeclaration>,
    #[serde(default)]
    pub fields: Option<StructDeclaration>,
    #[serde(default)]
    pub log_level: Option<i64>,
}

impl EventDeclaration {
    pub fn new(name: impl Into<CompactString>, id: u64, fields: StructDeclaration) -> Self {
        Self {
            name: name.into(),
            id,
            stream_id: None,
            context: None,
            fields: Some(fields),
            log_level: None,
        }
    }

    /// The shared declaration of synthetic lost events.
    pub fn lost() -> Arc<Self> {
        LOST_EVENT.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.id == LOST_EVENT_ID && self.name == LOST_EVENT_NAME
    }
}

static LOST_EVENT: LazyLock<Arc<EventDeclaration>> = LazyLock::new(|| {
    Arc::new(EventDeclaration::new(
        LOST_EVENT_NAME,
        LOST_EVENT_ID,
        StructDeclaration::new([
            (LOST_EVENTS_FIELD, IntegerDeclaration::unsigned(64).into()),
            (LOST_DURATION_FIELD, IntegerDeclaration::unsigned(64).into()),
        ]),
    ))
});

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    pub declaration: Arc<EventDeclaration>,
    /// Full timestamp in clock cycles.
    pub timestamp: u64,
    /// CPU the event was recorded on, if the stream input is per CPU.
    pub cpu: Option<u64>,
    /// Target name of the packet, e.g. `CPU3`.
    pub target: Option<CompactString>,
    pub stream_id: Option<u64>,
    /// File the event was read from.
    pub stream_file: Arc<Path>,
    pub header: Option<StructDefinition>,
    pub stream_context: Option<StructDefinition>,
    pub context: Option<StructDefinition>,
    pub fields: StructDefinition,
    pub packet_context: Option<Arc<StructDefinition>>,
}

impl EventDefinition {
    /// Build a synthetic lost event.
    pub(crate) fn lost(
        timestamp: u64,
        count: u64,
        duration: u64,
        stream_file: Arc<Path>,
    ) -> Self {
        let field = |value| {
            Definition::Integer(IntegerDefinition::new(
                IntegerDeclaration::unsigned(64),
                value,
            ))
        };
        Self {
            declaration: EventDeclaration::lost(),
            timestamp,
            cpu: None,
            target: None,
            stream_id: None,
            stream_file,
            header: None,
            stream_context: None,
            context: None,
            fields: StructDefinition {
                fields: vec![
                    (LOST_EVENTS_FIELD.into(), field(count)),
                    (LOST_DURATION_FIELD.into(), field(duration)),
                ],
            },
            packet_context: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn id(&self) -> u64 {
        self.declaration.id
    }

    pub fn is_lost(&self) -> bool {
        self.declaration.is_lost()
    }

    /// Number of discarded events, for a lost event.
    pub fn lost_count(&self) -> Option<u64> {
        if !self.is_lost() {
            return None;
        }
        self.fields.lookup_integer(LOST_EVENTS_FIELD).map(|i| i.value)
    }

    /// Resolve a field by path.
    ///
    /// Paths prefixed with a dynamic scope (`event.fields.`, `stream.event.header.`,
    /// `stream.packet.context.`, ...) are resolved in that scope only. Other
    /// paths are searched in the payload first and then outward.
    pub fn lookup(&self, path: &str) -> Option<&Definition> {
        let scopes = [
            (LexicalScope::EventFields, Some(&self.fields)),
            (LexicalScope::EventContext, self.context.as_ref()),
            (LexicalScope::StreamEventContext, self.stream_context.as_ref()),
            (LexicalScope::StreamEventHeader, self.header.as_ref()),
            (
                LexicalScope::StreamPacketContext,
                self.packet_context.as_deref(),
            ),
        ];
        for (scope, fields) in &scopes {
            for prefix in scope.paths() {
                if let Some(rest) = path
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('.'))
                {
                    return fields.and_then(|f| f.lookup(rest));
                }
            }
        }
        scopes
            .iter()
            .filter_map(|(_, fields)| *fields)
            .find_map(|f| f.lookup(path))
    }
}

impl serde::Serialize for EventDefinition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", self.name())?;
        map.serialize_entry("id", &self.id())?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        if let Some(stream_id) = self.stream_id {
            map.serialize_entry("stream_id", &stream_id)?;
        }
        if let Some(cpu) = self.cpu {
            map.serialize_entry("cpu", &cpu)?;
        }
        map.serialize_entry("stream_file", &self.stream_file.to_string_lossy())?;
        if let Some(context) = &self.stream_context {
            map.serialize_entry("stream_context", context)?;
        }
        if let Some(context) = &self.context {
            map.serialize_entry("context", context)?;
        }
        map.serialize_entry("fields", &self.fields)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: u64) -> Definition {
        Definition::Integer(IntegerDefinition::new(IntegerDeclaration::unsigned(32), value))
    }

    fn sample() -> EventDefinition {
        EventDefinition {
            declaration: Arc::new(EventDeclaration::new(
                "sched_switch",
                4,
                StructDeclaration::default(),
            )),
            timestamp: 1000,
            cpu: Some(2),
            target: Some("CPU2".into()),
            stream_id: Some(0),
            stream_file: Arc::from(Path::new("/tmp/trace/channel0_2")),
            header: Some(StructDefinition {
                fields: vec![("id".into(), int(4))],
            }),
            stream_context: None,
            context: Some(StructDefinition {
                fields: vec![("tid".into(), int(12))],
            }),
            fields: StructDefinition {
                fields: vec![("prev_tid".into(), int(12)), ("next_tid".into(), int(13))],
            },
            packet_context: Some(Arc::new(StructDefinition {
                fields: vec![("cpu_id".into(), int(2))],
            })),
        }
    }

    #[test]
    fn test_lookup() {
        let event = sample();
        let value = |path| event.lookup(path).and_then(Definition::as_integer).map(|i| i.value);
        assert_eq!(value("next_tid"), Some(13));
        assert_eq!(value("event.fields.prev_tid"), Some(12));
        assert_eq!(value("tid"), Some(12));
        assert_eq!(value("event.context.tid"), Some(12));
        assert_eq!(value("stream.event.header.id"), Some(4));
        assert_eq!(value("stream.packet.context.cpu_id"), Some(2));
        assert_eq!(value("cpu_id"), Some(2));
        assert_eq!(value("event.fields.tid"), None);
        assert_eq!(value("stream.event.context.tid"), None);
    }

    #[test]
    fn test_lost_event() {
        let event = EventDefinition::lost(50, 2, 7, Arc::from(Path::new("s")));
        assert!(event.is_lost());
        assert_eq!(event.name(), LOST_EVENT_NAME);
        assert_eq!(event.lost_count(), Some(2));
        assert_eq!(
            event
                .lookup(LOST_DURATION_FIELD)
                .and_then(Definition::as_integer)
                .map(|i| i.value),
            Some(7)
        );
        assert_eq!(sample().lost_count(), None);
    }

    #[test]
    fn test_serialize() {
        insta::assert_snapshot!(
            serde_json::to_string(&sample()).unwrap(),
            @r#"{"name":"sched_switch","id":4,"timestamp":1000,"stream_id":0,"cpu":2,"stream_file":"/tmp/trace/channel0_2","context":{"tid":12},"fields":{"prev_tid":12,"next_tid":13}}"#
        );
    }
}
