//! Registry of live sessions keyed by `sid`.
//!
//! The HTTP front end hands every request body here together with its
//! connection. Bodies without a `sid` create a session; the rest are routed
//! to theirs. Requests the registry cannot route are answered right away
//! with a terminal binding error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bosh_session::body::{terminal_error_body, SID_ATTR};
use bosh_session::{
    BoshConfig, BoshError, BoshSession, Collaborators, ConnectionId, Element, Transport,
};

/// Where a request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A new session was created and its creation response written.
    Created { sid: String },
    /// The request is held (or already answered) by an existing session.
    Routed {
        sid: String,
        connection: ConnectionId,
    },
}

pub struct SessionManager<T: Transport> {
    config: BoshConfig,
    collab: Collaborators<T>,
    sessions: Mutex<HashMap<String, Arc<BoshSession<T>>>>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(config: BoshConfig, collab: Collaborators<T>) -> Self {
        Self {
            config,
            collab,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BoshConfig {
        &self.config
    }

    /// Parses one HTTP request body and dispatches it.
    ///
    /// Unparseable XML gets a terminal `bad-request`, an unknown `sid` a
    /// terminal `item-not-found`; both are returned as errors after the
    /// connection has been answered. A session the request closed is
    /// dropped from the registry before this returns.
    pub fn handle_request(
        &self,
        xml: &str,
        connection: T::Connection,
    ) -> Result<Dispatch, BoshError> {
        let body = match Element::parse(xml) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("bosh: unparseable request: {err}");
                self.reject(connection, "bad-request");
                return Err(err);
            }
        };

        let Some(sid) = body.attr(SID_ATTR).map(str::to_owned) else {
            let session =
                BoshSession::create(&body, connection, &self.config, self.collab.clone())?;
            let sid = session.sid().to_owned();
            log::debug!("bosh: registered session {sid}");
            self.lock_sessions().insert(sid.clone(), session);
            return Ok(Dispatch::Created { sid });
        };

        match self.get(&sid) {
            Some(session) => {
                let connection = session.process_request(body, connection);
                self.forget_if_closed(&session);
                Ok(Dispatch::Routed { sid, connection })
            }
            None => {
                log::info!("bosh: request for unknown session {sid}");
                self.reject(connection, "item-not-found");
                Err(BoshError::UnknownSession { sid })
            }
        }
    }

    /// Hands a server stanza to the session it is addressed to.
    pub fn deliver(&self, sid: &str, stanza: Element) -> Result<(), BoshError> {
        let session = self.session(sid)?;
        session.deliver(stanza);
        self.forget_if_closed(&session);
        Ok(())
    }

    pub fn disconnected(&self, sid: &str, connection: ConnectionId) -> Result<(), BoshError> {
        self.session(sid)?.disconnected(connection);
        Ok(())
    }

    /// Terminates a session from the server side and drops it.
    pub fn close(&self, sid: &str) -> Result<(), BoshError> {
        let session = self.session(sid)?;
        session.close();
        self.lock_sessions().remove(sid);
        Ok(())
    }

    /// Drops sessions that have closed on a timer. Returns how many.
    pub fn reap_closed(&self) -> usize {
        let mut sessions = self.lock_sessions();
        let before = sessions.len();
        sessions.retain(|sid, session| {
            let open = !session.is_closed();
            if !open {
                log::debug!("bosh: reaping closed session {sid}");
            }
            open
        });
        before - sessions.len()
    }

    pub fn get(&self, sid: &str) -> Option<Arc<BoshSession<T>>> {
        self.lock_sessions().get(sid).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    fn session(&self, sid: &str) -> Result<Arc<BoshSession<T>>, BoshError> {
        self.get(sid).ok_or_else(|| BoshError::UnknownSession {
            sid: sid.to_owned(),
        })
    }

    fn forget_if_closed(&self, session: &BoshSession<T>) {
        if !session.is_closed() {
            return;
        }
        let sid = session.sid();
        if self.lock_sessions().remove(sid).is_some() {
            log::debug!("bosh: unregistered closed session {sid}");
        }
    }

    fn reject(&self, mut connection: T::Connection, condition: &str) {
        let reply = terminal_error_body(condition).to_xml();
        let transport = &self.collab.transport;
        let content_type = &self.config.content_type;
        if let Err(err) = transport.write(&mut connection, content_type, reply.as_bytes()) {
            log::warn!("bosh: exception during writing to connection: {err}");
        }
        transport.close(connection);
    }

    // session methods are never called with this guard held
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<BoshSession<T>>>> {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
    }
}
