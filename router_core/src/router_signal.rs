//! Router-signal: the per-local-signal index of every slot that touches it.

use crate::connection::ConnectionId;
use crate::ids::Id;

pub type RouterSignalId = Id<RouterSignal>;

/// Which slot of a connection a router-signal entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Source(usize),
    Destination,
}

/// A non-owning back-reference into one connection's slot, held by a
/// router-signal. Tombstoned to `None` on removal so every other entry's
/// index stays stable.
pub type SlotHandle = (ConnectionId, SlotRef);

/// Index of all slots -- source or destination, of any connection -- that
/// touch one local signal. The array is tombstoned rather than compacted:
/// removing a slot writes `None` in place so connections holding a handle
/// into this array by index never have it silently point at something
/// else.
pub struct RouterSignal {
    pub signal_name: String,
    slots: Vec<Option<SlotHandle>>,
    /// Id counter for disambiguating multiple sources of one connection,
    /// handed out by the destination side: when this signal anchors an
    /// `Incoming` connection, each of that connection's source slots
    /// (local or remote) draws its `slot_id` from this counter.
    id_counter: u32,
    /// Per-instance origin-device hash, indexed by instance id. Instance
    /// `id` == its index here, simplified to a direct index since the
    /// router never needs to reassign an instance's slot once allocated.
    instance_origins: Vec<u32>,
}

impl RouterSignal {
    /// Initial slot-array length is 1, growing by doubling (1 -> 2 -> 4 ->
    /// ...) to keep indices stable across growth.
    pub fn new(signal_name: String, local_device_hash: u32) -> Self {
        Self {
            signal_name,
            slots: vec![None],
            id_counter: 0,
            instance_origins: vec![local_device_hash],
        }
    }

    pub fn slots(&self) -> &[Option<SlotHandle>] {
        &self.slots
    }

    pub fn next_source_slot_id(&mut self) -> u32 {
        let id = self.id_counter;
        self.id_counter += 1;
        id
    }

    /// `store_slot`: place `handle` in the first tombstoned entry, or
    /// double the array and append at the former end if none exists.
    pub fn store_slot(&mut self, handle: SlotHandle) -> usize {
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            self.slots[idx] = Some(handle);
            return idx;
        }
        let idx = self.slots.len();
        let new_len = self.slots.len() * 2;
        self.slots.resize(new_len, None);
        self.slots[idx] = Some(handle);
        idx
    }

    /// Tombstone every entry belonging to `connection`, preserving array
    /// length and all other entries.
    pub fn clear_connection(&mut self, connection: ConnectionId) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some((c, _)) if *c == connection) {
                *slot = None;
            }
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instance_origins.len()
    }

    pub fn origin(&self, instance: usize) -> Option<u32> {
        self.instance_origins.get(instance).copied()
    }

    /// `num_instances_changed`: grow the origin table, new instances
    /// inheriting `local_device_hash` until told otherwise. Never shrinks.
    pub fn grow_instances(&mut self, size: usize, local_device_hash: u32) {
        while self.instance_origins.len() < size {
            self.instance_origins.push(local_device_hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Arena;

    fn fake_connection_id() -> ConnectionId {
        let mut arena: Arena<crate::connection::Connection> = Arena::new();
        arena.insert(crate::connection::Connection::new_for_test())
    }

    #[test]
    fn store_slot_fills_first_tombstone_before_growing() {
        let mut rs = RouterSignal::new("sig".to_string(), 0);
        let c = fake_connection_id();
        let i0 = rs.store_slot((c, SlotRef::Destination));
        assert_eq!(i0, 0);
        assert_eq!(rs.slots().len(), 1);
        // array is full (len 1), next store doubles to 2
        let i1 = rs.store_slot((c, SlotRef::Source(0)));
        assert_eq!(i1, 1);
        assert_eq!(rs.slots().len(), 2);
    }

    #[test]
    fn clear_connection_tombstones_without_shrinking() {
        let mut rs = RouterSignal::new("sig".to_string(), 0);
        let c1 = fake_connection_id();
        let c2 = fake_connection_id();
        rs.store_slot((c1, SlotRef::Destination));
        rs.store_slot((c2, SlotRef::Destination));
        let len_before = rs.slots().len();
        rs.clear_connection(c1);
        assert_eq!(rs.slots().len(), len_before);
        assert_eq!(rs.slots()[0], None);
        assert!(rs.slots()[1].is_some());
    }

    #[test]
    fn instance_table_grows_monotonically() {
        let mut rs = RouterSignal::new("sig".to_string(), 42);
        assert_eq!(rs.num_instances(), 1);
        rs.grow_instances(4, 42);
        assert_eq!(rs.num_instances(), 4);
        assert_eq!(rs.origin(3), Some(42));
        rs.grow_instances(2, 42);
        assert_eq!(rs.num_instances(), 4);
    }
}
