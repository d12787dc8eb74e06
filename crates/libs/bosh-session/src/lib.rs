//! # bosh-session
//!
//! Session layer tunnelling an XMPP stream over synchronous HTTP long-poll
//! requests (BOSH).
//!
//! Each [`BoshSession`] accepts `<body/>` requests, forwards the stanzas they
//! carry to a [`Router`], and answers held requests with queued server
//! stanzas when data arrives or the negotiated wait expires. Request ids are
//! tracked in a [`RidWindow`] so retransmitted requests are ignored and a
//! second client reusing a session is cut off.
//!
//! The crate does no I/O of its own. The host supplies:
//!
//! - a [`Transport`] that writes one response per held connection
//! - a [`Scheduler`] running the wait and inactivity timers
//! - a [`Router`] receiving client stanzas and stream lifecycle events
//! - optionally a [`FailureResponder`] (defaults to [`StanzaErrorResponder`])
//!
//! ## Example
//!
//! ```rust,ignore
//! let collab = Collaborators::new(transport, scheduler, router);
//! let request = Element::parse(&http_body)?;
//! let session = BoshSession::create(&request, connection, &BoshConfig::default(), collab)?;
//! ```

pub mod body;
pub mod cache;
pub mod config;
pub mod error;
pub mod failure;
pub mod fingerprint;
pub mod outbound;
pub mod pool;
pub mod rid_window;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod timers;
pub mod transport;

pub use body::{Element, Node};
pub use cache::{CacheAction, SessionCache};
pub use config::{BoshConfig, SessionConfig, MAX_PACKETS};
pub use error::{BoshError, TransportError};
pub use failure::{ErrorCondition, FailureResponder, StanzaErrorResponder};
pub use fingerprint::Fingerprint;
pub use outbound::OutboundQueue;
pub use pool::{ConnectionId, ConnectionPool};
pub use rid_window::{RidStatus, RidWindow};
pub use router::{Router, StreamEvent};
pub use scheduler::{Scheduler, TimerHandle, TimerKind, TimerTarget};
pub use session::{BoshSession, Collaborators, SessionPhase};
pub use timers::TimerSet;
pub use transport::Transport;
