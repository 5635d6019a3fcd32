//! Administrative bus collaborator.
//!
//! The admin bus is a pub/sub control channel used to discover peers and
//! negotiate connection metadata. The router only ever
//! *publishes* on it -- subscription requests when a link's addresses are
//! still unknown -- and expects address updates to arrive out of band and
//! be applied via [`crate::link::PeerLink::update`]. This module defines the
//! narrow publish-only interface the router needs plus a recording fake for
//! tests.

use crate::error::RouterResult;
use std::cell::RefCell;
use std::rc::Rc;

/// One message published to the admin bus: a path plus a single string
/// payload, mirroring the `/<device>/subscribe "device"` convention.
pub trait AdminBus {
    fn publish(&mut self, path: &str, payload: &str) -> RouterResult<()>;
}

/// Records every publish instead of touching a real bus. Used by tests to
/// assert a subscription request was issued when a link's addresses were
/// unknown.
#[derive(Debug, Default, Clone)]
pub struct RecordingAdminBus {
    published: Rc<RefCell<Vec<(String, String)>>>,
}

impl RecordingAdminBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.borrow().clone()
    }
}

impl AdminBus for RecordingAdminBus {
    fn publish(&mut self, path: &str, payload: &str) -> RouterResult<()> {
        self.published
            .borrow_mut()
            .push((path.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_bus_keeps_publish_order() {
        let mut bus = RecordingAdminBus::new();
        bus.publish("/peera/subscribe", "device").unwrap();
        bus.publish("/peerb/subscribe", "device").unwrap();
        assert_eq!(
            bus.published(),
            vec![
                ("/peera/subscribe".to_string(), "device".to_string()),
                ("/peerb/subscribe".to_string(), "device".to_string()),
            ]
        );
    }
}
