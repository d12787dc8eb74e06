//! Tokio glue for `bosh_session`.
//!
//! [`TokioScheduler`] runs session timers as spawned sleeps, [`ChannelRouter`]
//! hands client stanzas and stream events to the XMPP side over an unbounded
//! channel, and [`SessionManager`] maps `sid`s to live sessions and routes raw
//! HTTP bodies to them.

pub mod error;
pub mod manager;
pub mod router;
pub mod scheduler;

pub use error::RuntimeError;
pub use manager::{Dispatch, SessionManager};
pub use router::{ChannelRouter, UpstreamEvent};
pub use scheduler::TokioScheduler;
