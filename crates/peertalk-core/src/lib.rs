//! PeerTalk: peer discovery, framed reliable streams over swappable
//! transports (TCP, UDP, AppleTalk ADSP/NBP), priority/coalescing send
//! queues, and a single-threaded, non-suspending poll driver.
//!
//! # Quick usage example
//!
//! ```no_run
//! use peertalk_core::{Config, Context};
//!
//! # fn transport_ops() -> Box<dyn peertalk_core::TransportOps> { unimplemented!() }
//! let ctx = &mut Context::init(Config::default(), transport_ops());
//! ctx.start_discovery().unwrap();
//! loop {
//!     ctx.poll();
//!     # break;
//! }
//! ```
//!
//! # Overview
//! [`Context`] owns every pool, counter, and config value the core needs;
//! there is no global or static state. Applications drive it by calling
//! [`Context::poll`] from a single thread and issuing API calls (`connect`,
//! `send`, ...) between polls. `poll` never blocks and never allocates on
//! its steady-state path; all allocation happens at `Context::init` time.

pub mod active_set;
pub mod callbacks;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod peer;
pub mod peer_id;
pub mod peer_manager;
pub mod poll;
pub mod receive_pipeline;
pub mod send_queue;
pub mod stats;
pub mod transport;

pub use callbacks::Callbacks;
pub use config::Config;
pub use context::{Context, SendFlags};
pub use error::{Error, Result};
pub use peer::{DisconnectReason, PeerInfo, PeerState, TransportPreference};
pub use peer_id::{PeerId, Tick};
pub use receive_pipeline::BatchEntry;
pub use send_queue::{CoalesceKey, CoalescePolicy, Priority};
pub use stats::{GlobalStats, PeerStats};
pub use transport::{ConnectOutcome, Endpoint, RecvOutcome, SendOutcome, TransportKind, TransportOps, TransportSet};
