//! # router_core
//!
//! A per-device signal-mapping router: forwards transformed updates from
//! local signals to remote peers (and vice versa) over typed, expression-
//! driven connections.
//!
//! Connections describe a mapping from one or more source slots to one
//! destination slot, evaluated through a pluggable expression engine and
//! shaped by per-slot boundary policies, scopes, and instance lineage. The
//! router itself owns no transport, expression language, or admin protocol:
//! those are external collaborators supplied as generic parameters on
//! [`Router`], so a host crate plugs in its real OSC/UDP stack, expression
//! compiler, and admin bus while this crate owns the connection graph and
//! data-path semantics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use router_core::{
//!     ConnectionDirection, ConnectionMode, Endpoint, ManualClock, RecordingAdminBus,
//!     RecordingSink, LinearExpressionCompiler, Router, RouterConfig, Timetag,
//! };
//!
//! let mut router = Router::new(
//!     "mydevice",
//!     9000,
//!     RecordingAdminBus::new(),
//!     LinearExpressionCompiler,
//!     RecordingSink::new(),
//!     ManualClock::new(Timetag::new(1, 0)),
//!     RouterConfig::default(),
//! );
//!
//! router
//!     .add_connection(
//!         ConnectionDirection::Outgoing,
//!         vec![Endpoint::Local("outsig".to_string())],
//!         Endpoint::remote("/peer/insig").unwrap(),
//!         'f',
//!         1,
//!         ConnectionMode::Raw,
//!         "",
//!     )
//!     .unwrap();
//! ```

pub mod admin;
pub mod boundary;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod expression;
pub mod history;
pub mod ids;
pub mod link;
pub mod message;
pub mod metrics;
pub mod path;
pub mod router;
pub mod router_signal;
pub mod slot;
pub mod wire;

pub use admin::{AdminBus, RecordingAdminBus};
pub use boundary::{BoundaryAction, Bounds};
pub use clock::{Clock, ManualClock, Timetag};
pub use config::RouterConfig;
pub use connection::{
    Connection, ConnectionDirection, ConnectionId, ConnectionMode, ConnectionStatus,
    ProcessLocation, Scope,
};
pub use error::{RouterError, RouterResult};
pub use expression::{CompiledExpression, CompiledProgram, ExpressionCompiler, LinearExpressionCompiler};
pub use ids::{Arena, Id};
pub use link::{LinkId, PeerLink};
pub use metrics::{AtomicRouterMetrics, RouterMetrics};
pub use router::{Endpoint, Router};
pub use router_signal::{RouterSignal, RouterSignalId};
pub use slot::{RemoteSignal, Slot, SlotKind};
pub use wire::{Bundle, Message, RecordingSink, WireSink};
