//! Lexical scopes for resolving sequence lengths and variant tags.
//!
//! A scope is a stack of decoded field tables. Each frame borrows the fields
//! decoded so far at one nesting level; lookups walk from the innermost frame
//! outward. Frames for the well known dynamic scopes (packet header, event
//! header, ...) carry a label so that absolute paths like
//! `stream.event.header.id` can be resolved as well.

use super::definition::Definition;
use super::definition::lookup_in_fields;
use compact_str::CompactString;

/// The dynamic scopes of a CTF trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexicalScope {
    TracePacketHeader,
    StreamPacketContext,
    StreamEventHeader,
    StreamEventContext,
    EventContext,
    EventFields,
}

impl LexicalScope {
    /// Path prefixes that name this scope.
    pub fn paths(self) -> &'static [&'static str] {
        match self {
            Self::TracePacketHeader => &["trace.packet.header", "packet.header"],
            Self::StreamPacketContext => &["stream.packet.context", "packet.context"],
            Self::StreamEventHeader => &["stream.event.header", "event.header"],
            Self::StreamEventContext => &["stream.event.context"],
            Self::EventContext => &["event.context"],
            Self::EventFields => &["event.fields"],
        }
    }

    /// Canonical path of this scope.
    pub fn path(self) -> &'static str {
        self.paths()[0]
    }
}

/// One frame of the scope stack.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    label: Option<LexicalScope>,
    fields: &'a [(CompactString, Definition)],
    parent: Option<&'a Scope<'a>>,
}

impl Default for Scope<'_> {
    fn default() -> Self {
        Self::root()
    }
}

impl<'a> Scope<'a> {
    /// An empty scope.
    pub fn root() -> Self {
        Self {
            label: None,
            fields: &[],
            parent: None,
        }
    }

    /// Push a frame on top of this one.
    pub fn child<'b>(
        &'b self,
        label: Option<LexicalScope>,
        fields: &'b [(CompactString, Definition)],
    ) -> Scope<'b>
    where
        'a: 'b,
    {
        Scope {
            label,
            fields,
            parent: Some(self),
        }
    }

    fn frames(&self) -> impl Iterator<Item = &Scope<'a>> {
        std::iter::successors(Some(self), |s| s.parent)
    }

    /// Resolve `path`, either absolute (prefixed by a scope path) or relative
    /// to the innermost frame that has a matching field.
    pub fn lookup(&self, path: &str) -> Option<&'a Definition> {
        for frame in self.frames() {
            let Some(label) = frame.label else {
                continue;
            };
            for prefix in label.paths() {
                if let Some(rest) = path
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('.'))
                {
                    return lookup_in_fields(frame.fields, rest);
                }
            }
        }
        self.frames()
            .find_map(|frame| lookup_in_fields(frame.fields, path))
    }
}
