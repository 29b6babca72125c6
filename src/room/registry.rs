//! Remote stream registry.
//!
//! Tracks which remote media streams are on screen. Entries can disappear
//! through two independent paths (the transport noticing a stream ended, or a
//! `{left}` notice over signaling) so every removal is a no-op when the entry
//! is already gone.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Opaque handle a front end uses to address one remote video tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Grid used to tile the local and remote videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub columns: usize,
    pub rows: usize,
}

impl GridLayout {
    /// `columns = min(n, 2)`, `rows = ceil(n / columns)`; `n` counts the
    /// local participant and is never less than one.
    pub fn for_participants(n: usize) -> Self {
        let n = n.max(1);
        let columns = n.min(2);
        Self {
            columns,
            rows: (n + columns - 1) / columns,
        }
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::for_participants(1)
    }
}

pub struct RemoteStreams {
    entries: HashMap<String, DisplayHandle>,
    next_handle: u64,
    layout: GridLayout,
}

impl RemoteStreams {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_handle: 1,
            layout: GridLayout::default(),
        }
    }

    /// Records a stream the first time it is seen. Returns the new handle, or
    /// `None` when the stream already has one (each track of a stream fires).
    pub fn on_stream_added(&mut self, stream_id: &str) -> Option<DisplayHandle> {
        let added = if self.entries.contains_key(stream_id) {
            None
        } else {
            let handle = DisplayHandle(self.next_handle);
            self.next_handle += 1;
            self.entries.insert(stream_id.to_string(), handle);
            debug!(stream_id, handle = handle.0, "Remote stream added");
            Some(handle)
        };
        self.relayout();
        added
    }

    pub fn on_stream_removed(&mut self, stream_id: &str) -> Option<DisplayHandle> {
        let removed = self.entries.remove(stream_id);
        if let Some(handle) = removed {
            debug!(stream_id, handle = handle.0, "Remote stream removed");
        }
        self.relayout();
        removed
    }

    /// A peer's stream id is its relay identity, so a departure notice
    /// removes through the same path as a transport-level removal.
    pub fn on_peer_left(&mut self, sender_id: &str) -> Option<DisplayHandle> {
        self.on_stream_removed(sender_id)
    }

    pub fn clear_all(&mut self) -> Vec<DisplayHandle> {
        let handles = self.entries.drain().map(|(_, handle)| handle).collect();
        self.relayout();
        handles
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.entries.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remote entries plus the local participant.
    pub fn participants(&self) -> usize {
        self.entries.len() + 1
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn relayout(&mut self) {
        self.layout = GridLayout::for_participants(self.participants());
    }
}

impl Default for RemoteStreams {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn layout_for_small_calls() {
        assert_eq!(GridLayout::for_participants(1), GridLayout { columns: 1, rows: 1 });
        assert_eq!(GridLayout::for_participants(2), GridLayout { columns: 2, rows: 1 });
        assert_eq!(GridLayout::for_participants(3), GridLayout { columns: 2, rows: 2 });
        assert_eq!(GridLayout::for_participants(0), GridLayout { columns: 1, rows: 1 });
    }

    #[test]
    fn duplicate_track_events_keep_one_entry() {
        let mut streams = RemoteStreams::new();
        let first = streams.on_stream_added("peer-b");
        assert!(first.is_some());
        assert_eq!(streams.on_stream_added("peer-b"), None);
        assert_eq!(streams.len(), 1);
        assert_eq!(streams.layout(), GridLayout { columns: 2, rows: 1 });
    }

    #[test]
    fn left_and_stream_ended_race_removes_once() {
        let mut streams = RemoteStreams::new();
        let handle = streams.on_stream_added("peer-b").unwrap();

        assert_eq!(streams.on_peer_left("peer-b"), Some(handle));
        assert_eq!(streams.on_stream_removed("peer-b"), None);
        assert!(streams.is_empty());
        assert_eq!(streams.participants(), 1);
        assert_eq!(streams.layout(), GridLayout { columns: 1, rows: 1 });
    }

    #[test]
    fn clear_all_returns_every_handle() {
        let mut streams = RemoteStreams::new();
        streams.on_stream_added("a");
        streams.on_stream_added("b");
        assert_eq!(streams.layout(), GridLayout { columns: 2, rows: 2 });

        let handles = streams.clear_all();
        assert_eq!(handles.len(), 2);
        assert!(streams.is_empty());
        assert_eq!(streams.layout(), GridLayout::default());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Removed(u8),
        Left(u8),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Add),
            (0u8..4).prop_map(Op::Removed),
            (0u8..4).prop_map(Op::Left),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn registry_matches_model(ops in proptest::collection::vec(op(), 0..40)) {
            let mut streams = RemoteStreams::new();
            let mut model = std::collections::BTreeSet::new();

            for op in ops {
                match op {
                    Op::Add(id) => {
                        let fresh = model.insert(id.to_string());
                        prop_assert_eq!(streams.on_stream_added(&id.to_string()).is_some(), fresh);
                    }
                    Op::Removed(id) => {
                        let present = model.remove(&id.to_string());
                        prop_assert_eq!(streams.on_stream_removed(&id.to_string()).is_some(), present);
                    }
                    Op::Left(id) => {
                        let present = model.remove(&id.to_string());
                        prop_assert_eq!(streams.on_peer_left(&id.to_string()).is_some(), present);
                    }
                    Op::Clear => {
                        prop_assert_eq!(streams.clear_all().len(), model.len());
                        model.clear();
                    }
                }
                prop_assert_eq!(streams.stream_ids(), model.iter().cloned().collect::<Vec<_>>());
                prop_assert_eq!(streams.layout(), GridLayout::for_participants(model.len() + 1));
            }
        }
    }
}
