//! The router itself: owns the signal index and link arena, dispatches
//! `process_signal`, `send_query`, `start_queue`, `send_queue`, and performs
//! all connection add/remove/find.
//!
//! Generic over four external collaborators so a host crate plugs in its
//! real admin bus, expression engine, wire transport, and clock; this
//! crate's own tests use the fakes in [`crate::admin`], [`crate::expression`],
//! [`crate::wire`], and [`crate::clock`].

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::admin::AdminBus;
use crate::boundary::Bounds;
use crate::clock::{Clock, Timetag};
use crate::config::RouterConfig;
use crate::connection::{
    Connection, ConnectionDirection, ConnectionId, ConnectionMode, ConnectionStatus,
    ProcessLocation, Scope,
};
use crate::error::{RouterError, RouterResult};
use crate::expression::ExpressionCompiler;
use crate::history::HistoryRing;
use crate::ids::Arena;
use crate::link::{LinkId, PeerLink};
use crate::message::{build_message, build_query_message, vector_typestring};
use crate::metrics::{AtomicRouterMetrics, RouterMetrics};
use crate::path::{device_name_prefix, hash_device_name, parse_signal_path};
use crate::router_signal::{RouterSignal, RouterSignalId, SlotHandle, SlotRef};
use crate::slot::{RemoteSignal, Slot, SlotKind};
use crate::wire::{Bundle, Message, WireSink};

/// One end of a connection as supplied to [`Router::add_connection`]: either
/// one of this device's own signals, or a signal owned by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(String),
    Remote(RemoteSignal),
}

impl Endpoint {
    pub fn remote(path: &str) -> RouterResult<Self> {
        let (device, signal) = parse_signal_path(path)?;
        Ok(Endpoint::Remote(RemoteSignal {
            device: device.to_string(),
            signal: signal.to_string(),
        }))
    }
}

pub struct Router<A: AdminBus, X: ExpressionCompiler, W: WireSink, C: Clock> {
    device_name: String,
    device_hash: u32,
    local_port: u16,
    config: RouterConfig,
    links: Arena<PeerLink>,
    signals: Arena<RouterSignal>,
    connections: Arena<Connection>,
    signal_index: HashMap<String, RouterSignalId>,
    id_counter: u64,
    admin_bus: A,
    expr_compiler: X,
    wire_sink: W,
    clock: C,
    metrics: AtomicRouterMetrics,
}

impl<A: AdminBus, X: ExpressionCompiler, W: WireSink, C: Clock> Router<A, X, W, C> {
    pub fn new(
        device_name: impl Into<String>,
        local_port: u16,
        admin_bus: A,
        expr_compiler: X,
        wire_sink: W,
        clock: C,
        config: RouterConfig,
    ) -> Self {
        let device_name = device_name.into();
        let device_hash = hash_device_name(&device_name);
        Self {
            device_name,
            device_hash,
            local_port,
            config,
            links: Arena::new(),
            signals: Arena::new(),
            connections: Arena::new(),
            signal_index: HashMap::new(),
            id_counter: 0,
            admin_bus,
            expr_compiler,
            wire_sink,
            clock,
            metrics: AtomicRouterMetrics::new(),
        }
    }

    pub fn metrics(&self) -> RouterMetrics {
        self.metrics.snapshot()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_hash(&self) -> u32 {
        self.device_hash
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    fn local_path(&self, signal: &str) -> String {
        format!("/{}/{}", self.device_name, signal)
    }

    /// Full `/device/signal` path a slot refers to: its own device for a
    /// local slot, the stored remote name for a remote one.
    fn slot_path(&self, slot: &Slot) -> String {
        if let Some(remote) = &slot.remote {
            return remote.path();
        }
        slot.router_signal
            .and_then(|rs_id| self.signals.get(rs_id))
            .map(|rs| self.local_path(&rs.signal_name))
            .unwrap_or_default()
    }

    fn get_or_create_router_signal(&mut self, name: &str) -> RouterSignalId {
        if let Some(id) = self.signal_index.get(name) {
            return *id;
        }
        let id = self.signals.insert(RouterSignal::new(name.to_string(), self.device_hash));
        self.signal_index.insert(name.to_string(), id);
        id
    }

    // ---- link lookup (§4.1 find_link_by_remote_*) ----

    pub fn find_link_by_remote_name(&self, name: &str) -> Option<LinkId> {
        let prefix = device_name_prefix(name);
        self.links
            .iter()
            .find(|(_, l)| l.remote_name == prefix)
            .map(|(id, _)| id)
    }

    pub fn find_link_by_remote_hash(&self, hash: u32) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, l)| l.remote_hash == hash)
            .map(|(id, _)| id)
    }

    pub fn find_link_by_remote_address(&self, host: &str, port: u16) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, l)| l.data_port == Some(port) && l.host.as_deref() == Some(host))
            .map(|(id, _)| id)
    }

    /// Resolve (or create as an addressless stub) the link to `remote_device`,
    /// publishing a subscription request on the admin bus the first time it
    /// is created without known addresses.
    fn get_or_create_link(&mut self, remote_device: &str) -> LinkId {
        if let Some(id) = self.find_link_by_remote_name(remote_device) {
            return id;
        }
        let self_link = remote_device == self.device_name;
        let mut link = PeerLink::new_stub(remote_device, self_link);
        link.clock_sync.response_deadline = Some(
            self.clock
                .now()
                .plus_seconds(self.config.link_liveness_timeout.as_secs() as u32),
        );
        let id = self.links.insert(link);
        if let Err(e) = self
            .admin_bus
            .publish(&format!("/{remote_device}/subscribe"), "device")
        {
            warn!("failed to publish subscription request for {remote_device}: {e}");
        }
        id
    }

    /// Deferred to the admin subsystem, deliberately a no-op: link GC
    /// happens from an external housekeeping pass, never from the data path
    /// or from `remove_connection`.
    pub fn check_link(&self, _link: LinkId) {}

    /// Materialize a previously-addressless link's addresses (the admin-bus
    /// response to the subscription request issued by `get_or_create_link`).
    pub fn update_link(&mut self, link: LinkId, host: String, data_port: u16, admin_port: u16) -> RouterResult<()> {
        let link = self.links.get_mut(link).ok_or(RouterError::UnknownLink(link))?;
        link.update(host, data_port, admin_port);
        Ok(())
    }

    /// Read-only access to a connection's current state: sources,
    /// destination, scope, status, and history -- used by administrative
    /// tooling and by tests to observe the data path without a real
    /// transport.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Replace a connection's scope set. Administrative: never called from
    /// the data path.
    pub fn set_scope(&mut self, id: ConnectionId, scope: Scope) -> RouterResult<()> {
        let conn = self.connections.get_mut(id).ok_or(RouterError::UnknownConnection(id))?;
        conn.scope = scope;
        Ok(())
    }

    /// Replace one source slot's boundary policy. Administrative: never
    /// called from the data path.
    pub fn set_source_bounds(&mut self, id: ConnectionId, src_idx: usize, bounds: Bounds) -> RouterResult<()> {
        let conn = self.connections.get_mut(id).ok_or(RouterError::UnknownConnection(id))?;
        let slot = conn
            .sources
            .get_mut(src_idx)
            .ok_or(RouterError::UnknownConnection(id))?;
        slot.bounds = bounds;
        Ok(())
    }

    /// Replace the destination slot's boundary policy. Administrative: never
    /// called from the data path.
    pub fn set_destination_bounds(&mut self, id: ConnectionId, bounds: Bounds) -> RouterResult<()> {
        let conn = self.connections.get_mut(id).ok_or(RouterError::UnknownConnection(id))?;
        conn.destination.bounds = bounds;
        Ok(())
    }

    // ---- add_connection (§4.1) ----

    #[allow(clippy::too_many_arguments)]
    pub fn add_connection(
        &mut self,
        direction: ConnectionDirection,
        sources: Vec<Endpoint>,
        destination: Endpoint,
        value_type: char,
        length: usize,
        mode: ConnectionMode,
        expression: &str,
    ) -> RouterResult<ConnectionId> {
        if sources.len() > self.config.max_connection_sources {
            warn!(
                "rejecting connection with {} sources, exceeding the configured maximum of {}",
                sources.len(),
                self.config.max_connection_sources
            );
            return Err(RouterError::TooManySources {
                found: sources.len(),
                max: self.config.max_connection_sources,
            });
        }

        let (source_slots, destination_slot, scope) = match direction {
            ConnectionDirection::Outgoing => {
                self.build_outgoing(sources, destination, value_type, length)?
            }
            ConnectionDirection::Incoming => {
                self.build_incoming(sources, destination, value_type, length)?
            }
        };

        let one_source = source_slots
            .first()
            .map(|first: &Slot| source_slots.iter().all(|s| s.link == first.link))
            .unwrap_or(true);
        let process_location = if one_source {
            ProcessLocation::Source
        } else {
            ProcessLocation::Destination
        };

        let remote_id = if direction == ConnectionDirection::Incoming {
            let id = self.id_counter;
            self.id_counter += 1;
            id as i64
        } else {
            -1
        };

        let mut status = ConnectionStatus::empty();
        status.set(ConnectionStatus::TYPE_KNOWN | ConnectionStatus::LENGTH_KNOWN | ConnectionStatus::READY);

        let is_local = source_slots.iter().all(Slot::is_local) && destination_slot.is_local();

        let mut connection = Connection {
            direction,
            sources: source_slots.into(),
            destination: destination_slot,
            process_location,
            mode,
            expression: expression.to_string(),
            compiled: None,
            expr_vars: Vec::new(),
            muted: false,
            remote_id,
            status,
            is_local,
            is_admin: true,
            one_source,
            scope,
        };

        match mode {
            ConnectionMode::Undefined => {}
            ConnectionMode::Raw => {
                let compiled = self
                    .expr_compiler
                    .compile("y=x", connection.num_sources(), length)?;
                connection.activate(compiled);
            }
            ConnectionMode::Expression => {
                let compiled =
                    self.expr_compiler
                        .compile(expression, connection.num_sources(), length)?;
                connection.activate(compiled);
            }
        }

        let connection_id = self.connections.insert(connection);

        // Register every local slot into its router-signal's slot array.
        let conn = self.connections.get(connection_id).expect("just inserted");
        let mut registrations: Vec<(RouterSignalId, SlotHandle)> = Vec::new();
        for (i, src) in conn.sources.iter().enumerate() {
            if let Some(rs_id) = src.router_signal {
                registrations.push((rs_id, (connection_id, SlotRef::Source(i))));
            }
        }
        if let Some(rs_id) = conn.destination.router_signal {
            registrations.push((rs_id, (connection_id, SlotRef::Destination)));
        }
        drop(conn);
        for (rs_id, handle) in registrations {
            if let Some(rs) = self.signals.get_mut(rs_id) {
                rs.store_slot(handle);
            }
        }
        self.metrics.set_active_connections(self.count_active_connections());
        Ok(connection_id)
    }

    fn count_active_connections(&self) -> u64 {
        self.connections
            .iter()
            .filter(|(_, c)| c.status.is_active())
            .count() as u64
    }

    #[allow(clippy::type_complexity)]
    fn build_outgoing(
        &mut self,
        sources: Vec<Endpoint>,
        destination: Endpoint,
        value_type: char,
        length: usize,
    ) -> RouterResult<(Vec<Slot>, Slot, Scope)> {
        let mut source_slots = Vec::with_capacity(sources.len());
        for src in sources {
            match src {
                Endpoint::Local(name) => {
                    let rs_id = self.get_or_create_router_signal(&name);
                    source_slots.push(Slot::new_local(
                        SlotKind::Source,
                        value_type,
                        length,
                        1,
                        rs_id,
                        self.config.history_capacity,
                    ));
                }
                Endpoint::Remote(_) => {
                    return Err(RouterError::BadName(
                        "outgoing connection sources must be local signals".to_string(),
                    ));
                }
            }
        }

        let remote = match destination {
            Endpoint::Remote(r) => r,
            Endpoint::Local(_) => {
                return Err(RouterError::BadName(
                    "outgoing connection destination must be a remote signal".to_string(),
                ));
            }
        };
        let link_id = self.get_or_create_link(&remote.device);
        let destination_slot = Slot::new_remote(
            SlotKind::Destination,
            value_type,
            length,
            1,
            remote,
            link_id,
            self.config.history_capacity,
        );

        let mut scope = Scope::new();
        scope.insert(self.device_name.clone(), self.device_hash);

        Ok((source_slots, destination_slot, scope))
    }

    #[allow(clippy::type_complexity)]
    fn build_incoming(
        &mut self,
        sources: Vec<Endpoint>,
        destination: Endpoint,
        value_type: char,
        length: usize,
    ) -> RouterResult<(Vec<Slot>, Slot, Scope)> {
        let dest_name = match destination {
            Endpoint::Local(name) => name,
            Endpoint::Remote(_) => {
                return Err(RouterError::BadName(
                    "incoming connection destination must be a local signal".to_string(),
                ));
            }
        };
        let dest_rs_id = self.get_or_create_router_signal(&dest_name);
        let mut destination_slot = Slot::new_local(
            SlotKind::Destination,
            value_type,
            length,
            1,
            dest_rs_id,
            self.config.history_capacity,
        );

        let mut scope = Scope::new();
        let mut local_scope_added = false;
        let mut source_slots = Vec::with_capacity(sources.len());
        let mut any_remote = false;

        for src in sources {
            match src {
                Endpoint::Local(name) => {
                    let rs_id = self.get_or_create_router_signal(&name);
                    let mut slot = Slot::new_local(
                        SlotKind::Source,
                        value_type,
                        length,
                        1,
                        rs_id,
                        self.config.history_capacity,
                    );
                    // Local sources still resolve a (self-)link: every source
                    // gets a link regardless of locality, and `one_source` is
                    // decided by comparing those links.
                    slot.link = Some(self.get_or_create_link(&self.device_name.clone()));
                    if !local_scope_added {
                        scope.insert(self.device_name.clone(), self.device_hash);
                        local_scope_added = true;
                    }
                    source_slots.push(slot);
                }
                Endpoint::Remote(remote) => {
                    any_remote = true;
                    let link_id = self.get_or_create_link(&remote.device);
                    let hash = hash_device_name(&remote.device);
                    scope.insert(remote.device.clone(), hash);
                    source_slots.push(Slot::new_remote(
                        SlotKind::Source,
                        value_type,
                        length,
                        1,
                        remote,
                        link_id,
                        self.config.history_capacity,
                    ));
                }
            }
        }

        // "ready": every source is local -> destination reuses the (self-)
        // link of the first source, matching the C original's loopback send
        // for fully-local connections (see PeerLink::self_link).
        if !any_remote {
            if let Some(first) = source_slots.first() {
                destination_slot.link = first.link;
            }
        }

        if let Some(rs) = self.signals.get_mut(dest_rs_id) {
            for slot in source_slots.iter_mut() {
                slot.slot_id = Some(rs.next_source_slot_id());
            }
        }

        Ok((source_slots, destination_slot, scope))
    }

    // ---- remove (§4.1) ----

    pub fn remove_connection(&mut self, id: ConnectionId) -> RouterResult<()> {
        let conn = self.connections.remove(id).ok_or(RouterError::UnknownConnection(id))?;

        if let Some(rs_id) = conn.destination.router_signal {
            if let Some(rs) = self.signals.get_mut(rs_id) {
                rs.clear_connection(id);
            }
        }
        if conn.status.is_ready() {
            if let Some(link_id) = conn.destination.link {
                if let Some(link) = self.links.get_mut(link_id) {
                    if conn.destination.is_local() {
                        link.num_connections_in = link.num_connections_in.saturating_sub(1);
                    } else {
                        link.num_connections_out = link.num_connections_out.saturating_sub(1);
                    }
                }
                self.check_link(link_id);
            }
        }

        for src in conn.sources.iter() {
            if let Some(rs_id) = src.router_signal {
                if let Some(rs) = self.signals.get_mut(rs_id) {
                    rs.clear_connection(id);
                }
            }
            if conn.status.is_ready() {
                if let Some(link_id) = src.link {
                    if let Some(link) = self.links.get_mut(link_id) {
                        link.num_connections_out = link.num_connections_out.saturating_sub(1);
                    }
                    self.check_link(link_id);
                }
            }
        }

        self.metrics.set_active_connections(self.count_active_connections());
        Ok(())
    }

    pub fn remove_link(&mut self, id: LinkId) -> RouterResult<()> {
        let affected: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.destination.link == Some(id) || c.sources.iter().any(|s| s.link == Some(id))
            })
            .map(|(cid, _)| cid)
            .collect();
        for cid in affected {
            self.remove_connection(cid)?;
        }
        self.links.remove(id).ok_or(RouterError::UnknownLink(id))?;
        Ok(())
    }

    // ---- find (§4.1) ----

    fn match_slot(&self, slot: &Slot, full_name: Option<&str>) -> bool {
        let Some(full_name) = full_name else {
            return true;
        };
        let Ok((device, signal)) = parse_signal_path(full_name) else {
            return true;
        };
        let local_device = if slot.is_local() {
            &self.device_name
        } else {
            match slot.link.and_then(|l| self.links.get(l)) {
                Some(link) => &link.remote_name,
                None => return false,
            }
        };
        if local_device != device {
            return false;
        }
        match &slot.remote {
            Some(r) => r.signal == signal,
            None => false,
        }
    }

    pub fn find_outgoing_connection(
        &self,
        local_src: &str,
        src_names: &[Option<&str>],
        dest_name: &str,
    ) -> Option<ConnectionId> {
        let rs_id = *self.signal_index.get(local_src)?;
        let rs = self.signals.get(rs_id)?;
        for handle in rs.slots().iter().flatten() {
            let (cid, slot_ref) = *handle;
            if !matches!(slot_ref, SlotRef::Source(_)) {
                continue;
            }
            let conn = self.connections.get(cid)?;
            if !self.match_slot(&conn.destination, Some(dest_name)) {
                continue;
            }
            let anchor_idx = match slot_ref {
                SlotRef::Source(i) => i,
                SlotRef::Destination => usize::MAX,
            };
            let all_match = conn.sources.iter().enumerate().all(|(j, s)| {
                j == anchor_idx || self.match_slot(s, src_names.get(j).copied().flatten())
            });
            if all_match {
                return Some(cid);
            }
        }
        None
    }

    pub fn find_incoming_connection(
        &self,
        local_dest: &str,
        src_names: &[Option<&str>],
    ) -> Option<ConnectionId> {
        let rs_id = *self.signal_index.get(local_dest)?;
        let rs = self.signals.get(rs_id)?;
        for handle in rs.slots().iter().flatten() {
            let (cid, slot_ref) = *handle;
            if !matches!(slot_ref, SlotRef::Destination) {
                continue;
            }
            let conn = self.connections.get(cid)?;
            let all_match = conn
                .sources
                .iter()
                .enumerate()
                .all(|(j, s)| self.match_slot(s, src_names.get(j).copied().flatten()));
            if all_match {
                return Some(cid);
            }
        }
        None
    }

    pub fn find_incoming_connection_by_id(&self, local_dest: &str, remote_id: i64) -> Option<ConnectionId> {
        let rs_id = *self.signal_index.get(local_dest)?;
        let rs = self.signals.get(rs_id)?;
        rs.slots().iter().flatten().find_map(|(cid, slot_ref)| {
            if !matches!(slot_ref, SlotRef::Destination) {
                return None;
            }
            let conn = self.connections.get(*cid)?;
            (conn.remote_id == remote_id).then_some(*cid)
        })
    }

    pub fn find_outgoing_connection_by_id(
        &self,
        local_src: &str,
        dest_name: &str,
        remote_id: i64,
    ) -> Option<ConnectionId> {
        let rs_id = *self.signal_index.get(local_src)?;
        let rs = self.signals.get(rs_id)?;
        rs.slots().iter().flatten().find_map(|(cid, slot_ref)| {
            if !matches!(slot_ref, SlotRef::Source(_)) {
                return None;
            }
            let conn = self.connections.get(*cid)?;
            if conn.remote_id != remote_id {
                return None;
            }
            self.match_slot(&conn.destination, Some(dest_name)).then_some(*cid)
        })
    }

    pub fn find_connection_slot(&self, local_dest: &str, slot_id: u32) -> Option<(ConnectionId, usize)> {
        let rs_id = *self.signal_index.get(local_dest)?;
        let rs = self.signals.get(rs_id)?;
        rs.slots().iter().flatten().find_map(|(cid, slot_ref)| {
            if !matches!(slot_ref, SlotRef::Destination) {
                return None;
            }
            let conn = self.connections.get(*cid)?;
            conn.sources
                .iter()
                .position(|s| s.slot_id == Some(slot_id))
                .map(|idx| (*cid, idx))
        })
    }

    // ---- resize (§4.3) ----

    pub fn num_instances_changed(&mut self, sig: &str, size: usize) {
        let Some(&rs_id) = self.signal_index.get(sig) else {
            trace!("num_instances_changed on unmapped signal {sig}");
            return;
        };
        let handles: Vec<SlotHandle> = match self.signals.get_mut(rs_id) {
            Some(rs) => {
                rs.grow_instances(size, self.device_hash);
                rs.slots().iter().filter_map(|s| *s).collect()
            }
            None => return,
        };
        let mut seen = std::collections::HashSet::new();
        for (cid, _) in handles {
            if !seen.insert(cid) {
                continue;
            }
            if let Some(conn) = self.connections.get_mut(cid) {
                let num_expr_vars = conn.compiled.as_ref().map(|c| c.num_vars).unwrap_or(0);
                conn.grow_instances(size, num_expr_vars);
            }
        }
    }

    // ---- bundling (§4.4) ----

    pub fn start_queue(&mut self, tt: Timetag) {
        for (_, link) in self.links.iter_mut() {
            link.open_pending(tt);
        }
    }

    pub fn send_queue(&mut self, tt: Timetag) -> RouterResult<()> {
        let link_ids: Vec<LinkId> = self.links.iter().map(|(id, _)| id).collect();
        for link_id in link_ids {
            let Some(link) = self.links.get_mut(link_id) else { continue };
            let Some(bundle) = link.take_pending(tt) else { continue };
            if bundle.is_empty() {
                continue;
            }
            self.transmit(link_id, bundle)?;
        }
        Ok(())
    }

    fn transmit(&mut self, link_id: LinkId, bundle: Bundle) -> RouterResult<()> {
        let Some(link) = self.links.get(link_id) else {
            return Ok(());
        };
        let Some(addr) = link.data_addr() else {
            debug!(
                "discarding bundle of {} message(s) for link {:?}: no address known yet",
                bundle.messages.len(),
                link_id
            );
            self.metrics.record_dropped();
            return Ok(());
        };
        let count = bundle.messages.len() as u64;
        self.wire_sink.send_bundle(&addr, &bundle)?;
        for _ in 0..count {
            self.metrics.record_sent();
        }
        Ok(())
    }

    /// Append to an already-open pending bundle for `tt`, or send a fresh
    /// one-message bundle immediately.
    fn send_or_bundle(&mut self, link_id: LinkId, msg: Message, tt: Timetag) -> RouterResult<()> {
        let Some(link) = self.links.get_mut(link_id) else {
            return Ok(());
        };
        match link.append_or_build(tt, msg) {
            None => Ok(()),
            Some(bundle) => self.transmit(link_id, bundle),
        }
    }

    // ---- data path (§4.2) ----

    pub fn process_signal(
        &mut self,
        sig: &str,
        instance: usize,
        value: Option<&[f64]>,
        count: usize,
        tt: Timetag,
    ) -> RouterResult<()> {
        let Some(&rs_id) = self.signal_index.get(sig) else {
            trace!("process_signal on unmapped signal {sig}");
            return Ok(());
        };
        let Some(rs) = self.signals.get(rs_id) else {
            return Ok(());
        };
        let origin = rs.origin(instance).unwrap_or(self.device_hash);
        let handles: Vec<SlotHandle> = rs.slots().iter().filter_map(|s| *s).collect();

        match value {
            None => self.process_release(instance, origin, &handles, tt),
            Some(value) => self.process_update(instance, origin, &handles, value, count, tt),
        }
    }

    fn process_release(
        &mut self,
        instance: usize,
        origin: u32,
        handles: &[SlotHandle],
        tt: Timetag,
    ) -> RouterResult<()> {
        for &(cid, slot_ref) in handles {
            let Some(conn) = self.connections.get(cid) else { continue };
            if !conn.status.is_active() {
                continue;
            }
            match slot_ref {
                SlotRef::Source(_) => {
                    let send_as_instance = conn.destination.send_as_instance();
                    let in_scope = conn.scope.admits(origin);
                    let link_id = conn.destination.link;
                    let dest_path = self.slot_path(&conn.destination);

                    let conn = self.connections.get_mut(cid).expect("checked above");
                    if let Some(hist) = conn.destination.history_mut(instance) {
                        hist.reset();
                    }

                    let should_send = !send_as_instance || in_scope;
                    if should_send {
                        let msg = build_message(
                            &dest_path,
                            "",
                            None,
                            send_as_instance.then_some((origin, instance as u32)),
                        );
                        if let Some(link_id) = link_id {
                            self.send_or_bundle(link_id, msg, tt)?;
                        } else {
                            trace!("release for outgoing-side slot has no link; discarding");
                        }
                    }
                }
                SlotRef::Destination => {
                    if !conn.scope.admits(origin) {
                        continue;
                    }
                    let num_sources = conn.num_sources();
                    for j in 0..num_sources {
                        let conn = self.connections.get(cid).expect("checked above");
                        let src = &conn.sources[j];
                        if !src.send_as_instance() {
                            continue;
                        }
                        let link_id = src.link;
                        let path = self.slot_path(src);
                        let msg = build_message(&path, "", None, Some((origin, instance as u32)));

                        let conn = self.connections.get_mut(cid).expect("checked above");
                        if let Some(hist) = conn.sources[j].history_mut(instance) {
                            hist.reset();
                        }
                        if let Some(link_id) = link_id {
                            self.send_or_bundle(link_id, msg, tt)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_update(
        &mut self,
        instance: usize,
        origin: u32,
        handles: &[SlotHandle],
        value: &[f64],
        count: usize,
        tt: Timetag,
    ) -> RouterResult<()> {
        for &(cid, slot_ref) in handles {
            let Some(conn) = self.connections.get(cid) else { continue };
            if !conn.status.is_active() {
                continue;
            }

            let touching_send_as_instance = match slot_ref {
                SlotRef::Source(i) => conn.sources[i].send_as_instance(),
                SlotRef::Destination => conn.destination.send_as_instance(),
            };
            let in_scope = conn.scope.admits(origin);
            if touching_send_as_instance && !in_scope {
                trace!("dropping out-of-scope instance update on connection {cid:?}");
                continue;
            }

            match slot_ref {
                SlotRef::Destination => {
                    // Populate history only; a local destination's own
                    // direct updates never forward onward.
                    let conn = self.connections.get_mut(cid).expect("checked above");
                    let bounds = conn.destination.bounds.clone();
                    for j in 0..count {
                        let sample = &value[j * conn.destination.length..(j + 1) * conn.destination.length];
                        let Some(hist) = conn.destination.history_mut(instance) else { continue };
                        hist.push(sample, tt);
                        if crate::boundary::apply_boundary(hist, &bounds) {
                            hist.rollback();
                        }
                    }
                }
                SlotRef::Source(src_idx) => {
                    self.process_source_update(cid, src_idx, instance, origin, in_scope, value, count, tt)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_source_update(
        &mut self,
        cid: ConnectionId,
        src_idx: usize,
        instance: usize,
        origin: u32,
        in_scope: bool,
        value: &[f64],
        count: usize,
        tt: Timetag,
    ) -> RouterResult<()> {
        let dest_length = self.connections.get(cid).expect("connection exists").destination.length;
        let value_type = self.connections.get(cid).expect("connection exists").destination.value_type;
        let typestring = vector_typestring(value_type, dest_length * count);

        let mut accepted: Vec<f64> = Vec::new();
        let mut accepted_count = 0usize;
        let send_as_instance;
        let process_location;
        let cause_update;
        let link_id;
        let dest_path;
        let direction;
        {
            let conn = self.connections.get(cid).expect("connection exists");
            send_as_instance = conn.sources[src_idx].send_as_instance();
            process_location = conn.process_location;
            cause_update = conn.sources[src_idx].cause_update;
            link_id = conn.destination.link;
            dest_path = self.slot_path(&conn.destination);
            direction = conn.direction;
        }
        let batch_vectorized = count > 1 && direction == ConnectionDirection::Outgoing;
        let src_length = self.connections.get(cid).unwrap().sources[src_idx].length;

        for j in 0..count {
            let sample = &value[j * src_length..(j + 1) * src_length];

            let dropped = {
                let conn = self.connections.get_mut(cid).expect("connection exists");
                let bounds = conn.sources[src_idx].bounds.clone();
                let Some(hist) = conn.sources[src_idx].history_mut(instance) else {
                    continue;
                };
                hist.push(sample, tt);
                let dropped = crate::boundary::apply_boundary(hist, &bounds);
                if dropped {
                    hist.rollback();
                }
                dropped
            };
            if dropped {
                trace!("sample dropped by source boundary on connection {cid:?}");
                continue;
            }

            if process_location == ProcessLocation::Source && !cause_update {
                continue;
            }

            let result = self.evaluate_connection(cid, instance, tt)?;
            let Some(mut result) = result else {
                trace!("expression produced no output this sample on connection {cid:?}");
                continue;
            };

            if process_location == ProcessLocation::Source {
                let conn = self.connections.get_mut(cid).expect("connection exists");
                let bounds = conn.destination.bounds.clone();
                let Some(hist) = conn.destination.history_mut(instance) else {
                    continue;
                };
                if crate::boundary::apply_boundary(hist, &bounds) {
                    hist.rollback();
                    trace!("sample dropped by destination boundary on connection {cid:?}");
                    continue;
                }
                // Clamp/Wrap mutate the ring's latest value in place without
                // dropping; the message payload must reflect that, not the
                // pre-boundary expression output.
                if let Some((latest, _)) = hist.latest() {
                    result = latest.to_vec();
                }
            }

            if batch_vectorized {
                accepted.extend_from_slice(&result);
                accepted_count += 1;
            } else {
                let msg = build_message(
                    &dest_path,
                    &typestring,
                    Some(&result),
                    send_as_instance.then_some((origin, instance as u32)),
                );
                if let Some(link_id) = link_id {
                    self.send_or_bundle(link_id, msg, tt)?;
                }
            }
        }

        if batch_vectorized && (!send_as_instance || in_scope) && accepted_count > 0 {
            let typestring = vector_typestring(value_type, dest_length * accepted_count);
            let msg = build_message(
                &dest_path,
                &typestring,
                Some(&accepted),
                send_as_instance.then_some((origin, instance as u32)),
            );
            if let Some(link_id) = link_id {
                self.send_or_bundle(link_id, msg, tt)?;
            }
        }
        Ok(())
    }

    /// Feed every source's latest history sample for `instance` into the
    /// compiled evaluator, write the result into the destination history
    /// ring, and return it.
    fn evaluate_connection(
        &mut self,
        cid: ConnectionId,
        instance: usize,
        tt: Timetag,
    ) -> RouterResult<Option<Vec<f64>>> {
        let conn = self.connections.get(cid).expect("connection exists");
        let num_vars = conn.compiled.as_ref().map(|c| c.num_vars).unwrap_or(0);
        let inputs: Vec<Vec<f64>> = conn
            .sources
            .iter()
            .map(|s| Self::source_input(s, instance))
            .collect();

        let conn = self.connections.get_mut(cid).expect("connection exists");
        conn.ensure_expr_vars_row(instance, num_vars);
        let input_refs: Vec<&[f64]> = inputs.iter().map(|v| v.as_slice()).collect();
        let Some(program) = conn.compiled.as_mut() else {
            return Ok(None);
        };
        let vars = &mut conn.expr_vars[instance];
        let Some(result) = program.evaluator.evaluate(&input_refs, vars) else {
            return Ok(None);
        };

        if let Some(hist) = conn.destination.history_mut(instance) {
            hist.push(&result, tt);
        }
        Ok(Some(result))
    }

    fn source_input(slot: &Slot, instance: usize) -> Vec<f64> {
        slot.history(instance)
            .and_then(HistoryRing::latest)
            .map(|(v, _)| v.to_vec())
            .unwrap_or_else(|| vec![0.0; slot.length])
    }

    // ---- query surface (§6) ----

    pub fn send_query(&mut self, sig: &str, tt: Timetag) -> RouterResult<usize> {
        let Some(&rs_id) = self.signal_index.get(sig) else {
            return Ok(0);
        };
        let Some(rs) = self.signals.get(rs_id) else {
            return Ok(0);
        };
        let response_path = format!("{}/got", self.local_path(sig));
        let handles: Vec<SlotHandle> = rs.slots().iter().filter_map(|s| *s).collect();

        let mut sent = 0usize;
        for (cid, slot_ref) in handles {
            let Some(conn) = self.connections.get(cid) else { continue };
            if !conn.status.is_active() {
                continue;
            }
            match slot_ref {
                SlotRef::Source(_) => {
                    let path = conn.destination.remote.as_ref().map(|r| r.path());
                    let link_id = conn.destination.link;
                    let length = conn.destination.length;
                    let value_type = conn.destination.value_type;
                    if let (Some(path), Some(link_id)) = (path, link_id) {
                        let msg = build_query_message(&format!("{path}/get"), &response_path, length, value_type);
                        self.send_or_bundle(link_id, msg, tt)?;
                    }
                }
                SlotRef::Destination => {
                    let num_sources = conn.num_sources();
                    for j in 0..num_sources {
                        let conn = self.connections.get(cid).expect("checked above");
                        let src = &conn.sources[j];
                        let Some(path) = src.remote.as_ref().map(|r| r.path()) else { continue };
                        let Some(link_id) = src.link else { continue };
                        let length = src.length;
                        let value_type = src.value_type;
                        let msg = build_query_message(&format!("{path}/get"), &response_path, length, value_type);
                        self.send_or_bundle(link_id, msg, tt)?;
                    }
                }
            }
            sent += 1;
        }
        Ok(sent)
    }
}
