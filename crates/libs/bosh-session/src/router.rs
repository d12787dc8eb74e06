use crate::body::Element;

/// Lifecycle notifications for the stream carried by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened {
        sid: String,
        session_id: String,
        hostname: String,
        lang: String,
    },
    /// Sent exactly once per session.
    Closed { sid: String, session_id: String },
    /// Client asked for stream features again (`restart="true"`).
    Restart { sid: String, session_id: String },
}

/// The XMPP routing layer behind the sessions.
///
/// Called with the session lock held, in the order the session produced the
/// stanzas and events. Implementations hand them off (a queue, a channel)
/// and must not call back into the same session synchronously.
pub trait Router: Send + Sync {
    /// A stanza leaving the session: client payload, or a delivery failure
    /// generated on the client's behalf.
    fn forward(&self, sid: &str, stanza: Element);

    fn stream_event(&self, event: StreamEvent);
}
