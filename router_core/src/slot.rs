//! Slots: one end of a connection attached to a signal, local or remote.

use crate::boundary::Bounds;
use crate::history::HistoryRing;
use crate::link::LinkId;
use crate::router_signal::RouterSignalId;

/// Which end of a connection this slot is. For a *local* slot this also
/// tells `process_signal` which direction data is moving: a `Source` slot
/// sends data outward from this device, a `Destination` slot receives data
/// inbound. A router-signal only ever indexes local slots, so kind and
/// direction coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Source,
    Destination,
}

/// A non-local signal this slot references: `/device/signal`, split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSignal {
    pub device: String,
    pub signal: String,
}

impl RemoteSignal {
    pub fn path(&self) -> String {
        format!("/{}/{}", self.device, self.signal)
    }
}

/// One source or destination slot of a connection.
///
/// Invariant: `local` xor `remote`. A local slot's `router_signal` is
/// always `Some`; a remote slot's `link` and `remote` are always `Some`.
#[derive(Debug, Clone)]
pub struct Slot {
    pub kind: SlotKind,
    pub value_type: char,
    pub length: usize,
    pub num_instances: usize,
    pub cause_update: bool,
    pub bounds: Bounds,
    pub remote: Option<RemoteSignal>,
    /// Source-slot id assigned by the destination side to disambiguate
    /// multiple sources sharing one connection. `None` for destination
    /// slots.
    pub slot_id: Option<u32>,
    pub router_signal: Option<RouterSignalId>,
    pub link: Option<LinkId>,
    history: Vec<HistoryRing>,
    history_capacity: usize,
}

impl Slot {
    pub fn new_local(
        kind: SlotKind,
        value_type: char,
        length: usize,
        num_instances: usize,
        router_signal: RouterSignalId,
        history_capacity: usize,
    ) -> Self {
        Self {
            kind,
            value_type,
            length,
            num_instances,
            cause_update: true,
            bounds: Bounds::none(),
            remote: None,
            slot_id: None,
            router_signal: Some(router_signal),
            link: None,
            history: (0..num_instances)
                .map(|_| HistoryRing::new(length, history_capacity))
                .collect(),
            history_capacity,
        }
    }

    pub fn new_remote(
        kind: SlotKind,
        value_type: char,
        length: usize,
        num_instances: usize,
        remote: RemoteSignal,
        link: LinkId,
        history_capacity: usize,
    ) -> Self {
        Self {
            kind,
            value_type,
            length,
            num_instances,
            cause_update: true,
            bounds: Bounds::none(),
            remote: Some(remote),
            slot_id: None,
            router_signal: None,
            link: Some(link),
            history: (0..num_instances)
                .map(|_| HistoryRing::new(length, history_capacity))
                .collect(),
            history_capacity,
        }
    }

    pub fn is_local(&self) -> bool {
        self.router_signal.is_some()
    }

    /// True iff this slot's updates carry per-instance origin/id tags
    /// (`num_instances > 1`).
    pub fn send_as_instance(&self) -> bool {
        self.num_instances > 1
    }

    pub fn history(&self, id: usize) -> Option<&HistoryRing> {
        self.history.get(id)
    }

    pub fn history_mut(&mut self, id: usize) -> Option<&mut HistoryRing> {
        self.history.get_mut(id)
    }

    pub fn num_history_instances(&self) -> usize {
        self.history.len()
    }

    /// Grow the per-instance history count to at least `size`. Never
    /// shrinks; new rings start empty.
    pub fn grow_instances(&mut self, size: usize) {
        if size > self.num_instances {
            self.num_instances = size;
        }
        while self.history.len() < size {
            self.history
                .push(HistoryRing::new(self.length, self.history_capacity));
        }
    }

    /// Reset one instance's history to empty, zeroed buffers (release
    /// handling).
    pub fn reset_instance(&mut self, id: usize) {
        if let Some(ring) = self.history.get_mut(id) {
            ring.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Arena;
    use crate::router_signal::RouterSignal;

    fn fake_router_signal_id() -> RouterSignalId {
        let mut arena: Arena<RouterSignal> = Arena::new();
        arena.insert(RouterSignal::new("sig".to_string(), 1))
    }

    #[test]
    fn send_as_instance_tracks_num_instances() {
        let rs = fake_router_signal_id();
        let slot = Slot::new_local(SlotKind::Source, 'f', 1, 1, rs, 4);
        assert!(!slot.send_as_instance());
        let mut slot2 = Slot::new_local(SlotKind::Source, 'f', 1, 1, rs, 4);
        slot2.grow_instances(2);
        assert!(slot2.send_as_instance());
    }

    #[test]
    fn grow_instances_never_shrinks_and_adds_empty_rings() {
        let rs = fake_router_signal_id();
        let mut slot = Slot::new_local(SlotKind::Source, 'f', 2, 1, rs, 4);
        slot.history_mut(0).unwrap().push(&[1.0, 2.0], crate::clock::Timetag::new(1, 0));
        slot.grow_instances(3);
        assert_eq!(slot.num_history_instances(), 3);
        assert!(!slot.history(0).unwrap().is_empty());
        assert!(slot.history(1).unwrap().is_empty());
        slot.grow_instances(1);
        assert_eq!(slot.num_history_instances(), 3);
    }

    #[test]
    fn reset_instance_zeroes_that_rings_buffers_only() {
        let rs = fake_router_signal_id();
        let mut slot = Slot::new_local(SlotKind::Source, 'f', 1, 2, rs, 4);
        slot.history_mut(0).unwrap().push(&[5.0], crate::clock::Timetag::new(1, 0));
        slot.history_mut(1).unwrap().push(&[7.0], crate::clock::Timetag::new(1, 0));
        slot.reset_instance(0);
        assert!(slot.history(0).unwrap().is_empty());
        assert!(!slot.history(1).unwrap().is_empty());
    }
}
