//! Raw events from the watch backend and their classification.

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// Operation bitmask carried by a raw event.
    ///
    /// A single event may have several bits set at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Op: u32 {
        const CREATE = 1 << 0;
        const WRITE = 1 << 1;
        const RENAME = 1 << 2;
        const REMOVE = 1 << 3;
        const CHMOD = 1 << 4;
    }
}

/// The change category a raw event is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Create,
    Write,
    Rename,
    Remove,
    Chmod,
}

impl EventKind {
    /// All kinds, in classification priority order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Create,
        EventKind::Write,
        EventKind::Rename,
        EventKind::Remove,
        EventKind::Chmod,
    ];

    /// The bit in [`Op`] that selects this kind.
    pub fn op(self) -> Op {
        match self {
            EventKind::Create => Op::CREATE,
            EventKind::Write => Op::WRITE,
            EventKind::Rename => Op::RENAME,
            EventKind::Remove => Op::REMOVE,
            EventKind::Chmod => Op::CHMOD,
        }
    }

    /// Classify an operation bitmask into exactly one kind.
    ///
    /// The first matching bit in `Create > Write > Rename > Remove > Chmod`
    /// wins. Returns `None` for an empty mask.
    pub fn classify(op: Op) -> Option<EventKind> {
        Self::ALL.into_iter().find(|kind| op.contains(kind.op()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Write => "write",
            EventKind::Rename => "rename",
            EventKind::Remove => "remove",
            EventKind::Chmod => "chmod",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change reported by the watch backend for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub op: Op,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, op: Op) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Classified kind of this event, see [`EventKind::classify`].
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::classify(self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_single_bits() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::classify(kind.op()), Some(kind));
        }
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(
            EventKind::classify(Op::CREATE | Op::WRITE),
            Some(EventKind::Create)
        );
        assert_eq!(
            EventKind::classify(Op::WRITE | Op::CHMOD),
            Some(EventKind::Write)
        );
        assert_eq!(
            EventKind::classify(Op::REMOVE | Op::RENAME),
            Some(EventKind::Rename)
        );
        assert_eq!(EventKind::classify(Op::all()), Some(EventKind::Create));
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(EventKind::classify(Op::empty()), None);
        assert_eq!(RawEvent::new("/tmp/a.txt", Op::empty()).kind(), None);
    }
}
