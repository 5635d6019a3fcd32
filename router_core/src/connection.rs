//! Connections: N source slots mapped through an expression to one
//! destination slot.

use crate::expression::CompiledProgram;
use crate::ids::Id;
use crate::slot::Slot;
use smallvec::SmallVec;

pub type ConnectionId = Id<Connection>;

/// Where expression evaluation runs. Defaults to `Source` when every
/// source slot shares one link (`one_source`), else `Destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLocation {
    Source,
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Undefined,
    Raw,
    Expression,
}

/// Which side anchored `add_connection`: determines how `sig` and the
/// remote-name arguments are interpreted. Every call site needs it, so it
/// is kept here rather than re-derived from slot shape each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Outgoing,
    Incoming,
}

/// Monotonic status progression: `0` -> `TYPE_KNOWN|LENGTH_KNOWN` -> `READY`
/// -> `ACTIVE`. Only `ACTIVE` connections move data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus(u8);

impl ConnectionStatus {
    pub const TYPE_KNOWN: u8 = 1 << 0;
    pub const LENGTH_KNOWN: u8 = 1 << 1;
    pub const READY: u8 = 1 << 2;
    pub const ACTIVE: u8 = 1 << 3;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn set(&mut self, bits: u8) {
        self.0 |= bits;
    }

    pub fn has(&self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    pub fn is_ready(&self) -> bool {
        self.has(Self::READY)
    }

    pub fn is_active(&self) -> bool {
        self.has(Self::ACTIVE)
    }
}

/// Set of `(name, hash)` pairs controlling which instance origins may
/// traverse a connection. Hash `0` is a wildcard admitting all origins.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: Vec<(String, u32)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, hash: u32) {
        if !self.entries.iter().any(|(_, h)| *h == hash) {
            self.entries.push((name.into(), hash));
        }
    }

    pub fn wildcard() -> Self {
        let mut s = Self::new();
        s.insert("*", 0);
        s
    }

    /// Monotone in set containment; hash 0 admits everything.
    pub fn admits(&self, hash: u32) -> bool {
        self.entries.iter().any(|(_, h)| *h == 0 || *h == hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A directed mapping from one or more source slots to one destination
/// slot with an expression, boundary policies, and scope.
pub struct Connection {
    pub direction: ConnectionDirection,
    pub sources: SmallVec<[Slot; 4]>,
    pub destination: Slot,
    pub process_location: ProcessLocation,
    pub mode: ConnectionMode,
    pub expression: String,
    pub compiled: Option<CompiledProgram>,
    /// Per-instance scratch persisted across evaluations, one row per
    /// instance with `num_expr_vars` elements. Modeled as plain persisted
    /// scalars rather than full ring buffers: the compiled expression only
    /// ever needs its last value, and temporal context (if any) comes from
    /// the source histories already passed into `evaluate`.
    pub(crate) expr_vars: Vec<Vec<f64>>,
    pub muted: bool,
    /// Peer-visible connection id: assigned on `Incoming`, left at -1 on
    /// `Outgoing` until negotiated over the admin bus.
    pub remote_id: i64,
    pub status: ConnectionStatus,
    pub is_local: bool,
    pub is_admin: bool,
    pub one_source: bool,
    pub scope: Scope,
}

impl Connection {
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Grow every slot's per-instance history (and the expression variable
    /// scratch) to at least `size` instances. Deferred until the
    /// connection is `ACTIVE` if type/length aren't known yet.
    pub fn grow_instances(&mut self, size: usize, num_expr_vars: usize) {
        for src in self.sources.iter_mut() {
            src.grow_instances(size);
        }
        self.destination.grow_instances(size);
        if self.status.is_active() {
            while self.expr_vars.len() < size {
                self.expr_vars.push(vec![0.0; num_expr_vars]);
            }
        }
    }

    /// Grow `expr_vars` so row `instance` exists, without borrowing it --
    /// callers that also need `self.compiled` mutably at the same time index
    /// `self.expr_vars[instance]` directly afterward instead of going
    /// through a method that would hold the whole field borrowed.
    pub(crate) fn ensure_expr_vars_row(&mut self, instance: usize, num_expr_vars: usize) {
        while self.expr_vars.len() <= instance {
            self.expr_vars.push(vec![0.0; num_expr_vars]);
        }
    }

    /// Activate once type/length are known on every slot and the
    /// expression has compiled: allocates expression-variable scratch for
    /// every instance already known about.
    pub fn activate(&mut self, compiled: CompiledProgram) {
        let num_instances = self.destination.num_history_instances().max(1);
        self.compiled = None;
        self.expr_vars = (0..num_instances)
            .map(|_| vec![0.0; compiled.num_vars])
            .collect();
        self.compiled = Some(compiled);
        self.status.set(ConnectionStatus::ACTIVE);
    }

    pub fn reset_destination_instance(&mut self, id: usize) {
        self.destination.reset_instance(id);
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        use crate::ids::Arena;
        use crate::router_signal::RouterSignal;
        use crate::slot::SlotKind;

        let mut arena: Arena<RouterSignal> = Arena::new();
        let rs = arena.insert(RouterSignal::new("sig".to_string(), 0));
        Self {
            direction: ConnectionDirection::Outgoing,
            sources: SmallVec::from_elem(Slot::new_local(SlotKind::Source, 'f', 1, 1, rs, 1), 1),
            destination: Slot::new_local(SlotKind::Destination, 'f', 1, 1, rs, 1),
            process_location: ProcessLocation::Source,
            mode: ConnectionMode::Undefined,
            expression: String::new(),
            compiled: None,
            expr_vars: Vec::new(),
            muted: false,
            remote_id: -1,
            status: ConnectionStatus::empty(),
            is_local: true,
            is_admin: false,
            one_source: true,
            scope: Scope::wildcard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionCompiler;

    #[test]
    fn scope_wildcard_admits_everything() {
        let scope = Scope::wildcard();
        assert!(scope.admits(12345));
        assert!(scope.admits(0));
    }

    #[test]
    fn scope_admits_only_listed_hashes() {
        let mut scope = Scope::new();
        scope.insert("dev-a", 111);
        assert!(scope.admits(111));
        assert!(!scope.admits(222));
    }

    #[test]
    fn status_progresses_monotonically() {
        let mut status = ConnectionStatus::empty();
        assert!(!status.is_ready());
        status.set(ConnectionStatus::TYPE_KNOWN | ConnectionStatus::LENGTH_KNOWN);
        assert!(!status.is_ready());
        status.set(ConnectionStatus::READY);
        assert!(status.is_ready());
        assert!(!status.is_active());
        status.set(ConnectionStatus::ACTIVE);
        assert!(status.is_active());
    }

    #[test]
    fn activate_allocates_expr_vars_per_known_instance() {
        let mut conn = Connection::new_for_test();
        conn.destination.grow_instances(3);
        let program = crate::expression::LinearExpressionCompiler
            .compile("y=x", 1, 1)
            .unwrap();
        conn.activate(program);
        assert!(conn.status.is_active());
        assert_eq!(conn.expr_vars.len(), 3);
    }
}
