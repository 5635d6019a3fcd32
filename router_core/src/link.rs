//! Peer link: one remote device's addresses, pending outgoing bundles, and
//! liveness state.

use crate::clock::Timetag;
use crate::ids::Id;
use crate::path::hash_device_name;
use crate::wire::{Bundle, Message};
use std::collections::HashMap;

pub type LinkId = Id<PeerLink>;

/// Clock-sync sub-state used purely for link liveness: an external
/// housekeeping pass, not the router itself, watches `response_deadline`
/// and prunes links that miss it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockSync {
    pub last_sent_id: u64,
    pub last_response_id: u64,
    pub response_deadline: Option<Timetag>,
}

/// One remote device. Created as a nameless stub the first time a
/// connection references a peer we haven't seen before; addresses arrive
/// later from the admin bus via [`PeerLink::update`].
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub remote_name: String,
    pub remote_hash: u32,
    pub host: Option<String>,
    pub data_port: Option<u16>,
    pub admin_port: Option<u16>,
    /// True for a link pointing back at this device itself (loopback).
    pub self_link: bool,
    pub num_connections_in: u32,
    pub num_connections_out: u32,
    pub clock_sync: ClockSync,
    pending: HashMap<Timetag, Bundle>,
}

impl PeerLink {
    pub fn new_stub(remote_name: &str, self_link: bool) -> Self {
        Self {
            remote_name: remote_name.to_string(),
            remote_hash: hash_device_name(remote_name),
            host: None,
            data_port: None,
            admin_port: None,
            self_link,
            num_connections_in: 0,
            num_connections_out: 0,
            clock_sync: ClockSync::default(),
            pending: HashMap::new(),
        }
    }

    pub fn has_addresses(&self) -> bool {
        self.host.is_some() && self.data_port.is_some()
    }

    pub fn data_addr(&self) -> Option<String> {
        let host = self.host.as_ref()?;
        let port = self.data_port?;
        Some(format!("{host}:{port}"))
    }

    pub fn admin_addr(&self) -> Option<String> {
        let host = self.host.as_ref()?;
        let port = self.admin_port?;
        Some(format!("{host}:{port}"))
    }

    /// Materialize (or replace) this link's addresses wholesale rather than
    /// mutating fields independently -- the old `String`s are simply
    /// dropped.
    pub fn update(&mut self, host: String, data_port: u16, admin_port: u16) {
        self.host = Some(host);
        self.data_port = Some(data_port);
        self.admin_port = Some(admin_port);
    }

    /// Idempotently opens a pending bundle stamped `tt` (`start_queue`).
    pub fn open_pending(&mut self, tt: Timetag) {
        self.pending.entry(tt).or_insert_with(|| Bundle::new(tt));
    }

    /// `send_or_bundle_message`: append to an already-open pending bundle
    /// for `tt`, or hand back a fresh single-message bundle the caller must
    /// transmit immediately. Never leaves a bundle behind when it returns
    /// `Some` -- the immediate path is not accumulated here.
    pub fn append_or_build(&mut self, tt: Timetag, msg: Message) -> Option<Bundle> {
        if let Some(bundle) = self.pending.get_mut(&tt) {
            bundle.messages.push(msg);
            None
        } else {
            let mut bundle = Bundle::new(tt);
            bundle.messages.push(msg);
            Some(bundle)
        }
    }

    /// `send_queue`: remove and return the pending bundle stamped `tt`, if
    /// any was ever opened.
    pub fn take_pending(&mut self, tt: Timetag) -> Option<Bundle> {
        self.pending.remove(&tt)
    }

    pub fn has_pending(&self, tt: Timetag) -> bool {
        self.pending.contains_key(&tt)
    }
}
