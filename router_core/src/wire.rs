//! Wire message/bundle types and the transport collaborator.
//!
//! Framing itself (one bundle stamped with a timetag, carrying zero or more
//! typed messages) is defined here; actual byte-level encoding and the
//! datagram transport are external collaborators. This module
//! defines the bundle/message shapes the router builds and a [`WireSink`]
//! trait a host crate implements against its real OSC/UDP stack. An
//! in-memory fake is provided for this crate's own tests.

use crate::clock::Timetag;
use crate::error::RouterResult;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Instance lineage tag appended to instance-bearing messages so the peer
/// can associate an update with a specific instance origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceTag {
    pub origin_hash: u32,
    pub instance_id: u32,
}

/// One `(path, typestring, args...)` triple. An empty `args` vector paired
/// with `instance = Some(_)` is the release convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub path: String,
    pub typestring: String,
    pub args: Vec<f64>,
    pub instance: Option<InstanceTag>,
    /// Local response path carried by `/get` query messages; `None` for
    /// ordinary data messages.
    pub response_path: Option<String>,
}

impl Message {
    pub fn is_release(&self) -> bool {
        self.args.is_empty() && self.instance.is_some()
    }
}

/// A timetag plus an ordered list of messages, delivered as one datagram.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub tt: Timetag,
    pub messages: Vec<Message>,
}

impl Bundle {
    pub fn new(tt: Timetag) -> Self {
        Self {
            tt,
            messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Framing + transport collaborator: encodes a [`Bundle`] and ships it to a
/// peer's data address. Implementations are expected to be non-blocking
/// best-effort -- a failed send is logged, never retried by the router.
pub trait WireSink {
    fn send_bundle(&mut self, data_addr: &str, bundle: &Bundle) -> RouterResult<()>;
}

/// In-memory fake transport: records every bundle sent, keyed by the
/// destination address, instead of touching a real socket. Used by this
/// crate's integration tests to assert on what the router would have put on
/// the wire.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    sent: Rc<RefCell<HashMap<String, Vec<Bundle>>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All bundles sent to `addr`, in send order.
    pub fn sent_to(&self, addr: &str) -> Vec<Bundle> {
        self.sent
            .borrow()
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    /// Total bundles sent across every address.
    pub fn total_bundles(&self) -> usize {
        self.sent.borrow().values().map(Vec::len).sum()
    }
}

impl WireSink for RecordingSink {
    fn send_bundle(&mut self, data_addr: &str, bundle: &Bundle) -> RouterResult<()> {
        self.sent
            .borrow_mut()
            .entry(data_addr.to_string())
            .or_default()
            .push(bundle.clone());
        Ok(())
    }
}
