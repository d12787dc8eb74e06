//! Per-session protocol state machine.
//!
//! A session owns the held connections, the outbound queue, the rid window
//! and the two timers of one client binding. All mutation happens under the
//! state mutex; the rid window has its own narrower mutex so duplicate checks
//! can be made without the state lock. Lock order is state, then rids.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::body::{
    invalid_body_reason, is_body, response_body, rewrite_to_client, terminal_error_body, Element,
    ACK_ATTR, AUTHID_ATTR, BODY_EL_NAME, BOSH_VERSION, BOSH_XMLNS, CACHE_ATTR, CACHE_ID_ATTR,
    FROM_ATTR, HOLD_ATTR, INACTIVITY_ATTR, MAXPAUSE_ATTR, POLLING_ATTR, REQUESTS_ATTR,
    RESTART_ATTR, RID_ATTR, SECURE_ATTR, SID_ATTR, STREAM_XMLNS, TYPE_ATTR, TYPE_TERMINATE,
    VER_ATTR, WAIT_ATTR, XBOSH_XMLNS, XMPP_VERSION,
};
use crate::cache::{CacheAction, SessionCache};
use crate::config::{BoshConfig, SessionConfig};
use crate::error::BoshError;
use crate::failure::{ErrorCondition, FailureResponder, StanzaErrorResponder};
use crate::fingerprint::Fingerprint;
use crate::outbound::OutboundQueue;
use crate::pool::{ConnectionId, ConnectionPool, HeldConnection};
use crate::rid_window::{RidStatus, RidWindow};
use crate::router::{Router, StreamEvent};
use crate::scheduler::{Scheduler, TimerHandle, TimerKind, TimerTarget};
use crate::timers::TimerSet;
use crate::transport::Transport;

const DISCONNECTED_TEXT: &str = "Bosh = disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Active,
    Terminating,
    Closed,
}

/// Everything a session talks to.
pub struct Collaborators<T: Transport> {
    pub transport: Arc<T>,
    pub scheduler: Arc<dyn Scheduler>,
    pub router: Arc<dyn Router>,
    pub responder: Arc<dyn FailureResponder>,
}

impl<T: Transport> Collaborators<T> {
    pub fn new(transport: Arc<T>, scheduler: Arc<dyn Scheduler>, router: Arc<dyn Router>) -> Self {
        Self {
            transport,
            scheduler,
            router,
            responder: Arc::new(StanzaErrorResponder),
        }
    }

    #[must_use]
    pub fn with_responder(mut self, responder: Arc<dyn FailureResponder>) -> Self {
        self.responder = responder;
        self
    }
}

impl<T: Transport> Clone for Collaborators<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            scheduler: self.scheduler.clone(),
            router: self.router.clone(),
            responder: self.responder.clone(),
        }
    }
}

struct SessionState<C> {
    phase: SessionPhase,
    config: SessionConfig,
    pool: ConnectionPool<C>,
    queue: OutboundQueue,
    cache: Option<SessionCache>,
    cache_on: bool,
    timers: TimerSet,
    next_connection: u64,
}

impl<C> SessionState<C> {
    fn next_connection_id(&mut self) -> ConnectionId {
        self.next_connection += 1;
        ConnectionId(self.next_connection)
    }
}

pub struct BoshSession<T: Transport> {
    sid: String,
    session_id: String,
    me: Weak<BoshSession<T>>,
    collab: Collaborators<T>,
    rids: Mutex<RidWindow>,
    state: Mutex<SessionState<T::Connection>>,
}

impl<T: Transport> BoshSession<T> {
    /// Creates a session from its first request and answers that request with
    /// the negotiated parameters.
    ///
    /// A request that is not a `<body/>` in the envelope namespace is answered
    /// with a terminal `bad-request` and no session is created.
    pub fn create(
        request: &Element,
        mut connection: T::Connection,
        server: &BoshConfig,
        collab: Collaborators<T>,
    ) -> Result<Arc<Self>, BoshError> {
        if !is_body(request) {
            let reason = invalid_body_reason(request);
            log::warn!("bosh: rejecting session creation: {reason}");
            let reply = terminal_error_body("bad-request").to_xml();
            let transport = &collab.transport;
            let content_type = &server.content_type;
            if let Err(err) = transport.write(&mut connection, content_type, reply.as_bytes()) {
                log::warn!("bosh: exception during writing to connection: {err}");
            }
            transport.close(connection);
            return Err(BoshError::InvalidBody { reason });
        }

        let config = SessionConfig::negotiate(server, request);
        let mut rids = RidWindow::new(config.concurrent_requests);
        match request.attr(RID_ATTR).map(str::parse::<i64>) {
            Some(Ok(rid)) => rids.record(rid, Fingerprint::of(request.children())),
            Some(Err(_)) => {
                log::warn!("bosh: incorrect RID value: {:?}", request.attr(RID_ATTR));
            }
            None => {}
        }
        let cache_on = request.attr(CACHE_ATTR) == Some("on");

        let session = Arc::new_cyclic(|me| Self {
            sid: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
            me: me.clone(),
            collab,
            rids: Mutex::new(rids),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Init,
                config,
                pool: ConnectionPool::default(),
                queue: OutboundQueue::new(),
                cache: cache_on.then(SessionCache::new),
                cache_on,
                timers: TimerSet::default(),
                next_connection: 0,
            }),
        });
        session.open(connection);
        Ok(session)
    }

    fn open(&self, connection: T::Connection) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.cache_on {
            log::debug!("bosh({}): session cache set to ON", self.sid);
        }

        let config = &state.config;
        let mut body = Element::new(BODY_EL_NAME)
            .with_attr(WAIT_ATTR, config.max_wait.to_string())
            .with_attr(INACTIVITY_ATTR, config.max_inactivity.to_string())
            .with_attr(POLLING_ATTR, config.min_polling.to_string())
            .with_attr(REQUESTS_ATTR, config.concurrent_requests.to_string())
            .with_attr(HOLD_ATTR, config.hold_requests.to_string())
            .with_attr(MAXPAUSE_ATTR, config.max_pause.to_string())
            .with_attr(SID_ATTR, self.sid.as_str())
            .with_attr(VER_ATTR, BOSH_VERSION)
            .with_attr(FROM_ATTR, config.domain.as_str())
            .with_attr(SECURE_ATTR, "true")
            .with_attr("xmpp:version", XMPP_VERSION)
            .with_attr("xmlns:xmpp", XBOSH_XMLNS)
            .with_attr("xmlns:stream", STREAM_XMLNS)
            .with_attr(AUTHID_ATTR, self.session_id.as_str());
        if let Some(rid) = self.lock_rids().take_unacked() {
            body.set_attr(ACK_ATTR, rid.to_string());
        }
        body.set_attr("xmlns", BOSH_XMLNS);

        state.phase = SessionPhase::Active;
        self.write_and_close(state, connection, &body);
        log::info!(
            "bosh({}): session opened for {}",
            self.sid,
            state.config.domain
        );
        self.collab.router.stream_event(StreamEvent::Opened {
            sid: self.sid.clone(),
            session_id: self.session_id.clone(),
            hostname: state.config.domain.clone(),
            lang: state.config.lang.clone(),
        });
        self.arm_inactivity(state);
    }

    /// Opaque session secret clients echo in `sid`.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Stream id announced to the client as `authid`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock_state().phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    pub fn config(&self) -> SessionConfig {
        self.lock_state().config.clone()
    }

    pub fn held_connections(&self) -> usize {
        self.lock_state().pool.len()
    }

    pub fn queued(&self) -> usize {
        self.lock_state().queue.len()
    }

    pub fn is_cache_on(&self) -> bool {
        self.lock_state().cache_on
    }

    pub fn previous_received_rid(&self) -> Option<i64> {
        self.lock_rids().previous_received_rid()
    }

    /// Checks a rid against the window without taking the session lock.
    pub fn check_rid<'a>(
        &self,
        rid: i64,
        payload: impl IntoIterator<Item = &'a Element>,
    ) -> RidStatus {
        self.lock_rids().classify(rid, Fingerprint::of(payload))
    }

    /// Handles one client request. The connection is held until a response
    /// is due; the returned id identifies it for [`Self::disconnected`].
    pub fn process_request(&self, body: Element, connection: T::Connection) -> ConnectionId {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        log::trace!("bosh({}) [{}]: << {}", self.sid, state.pool.len(), body);

        let scheduler = self.collab.scheduler.as_ref();
        state.timers.cancel(scheduler, TimerKind::Wait);
        state.timers.cancel(scheduler, TimerKind::Inactivity);
        let id = state.next_connection_id();

        if state.phase == SessionPhase::Closed {
            log::debug!("bosh({}): request on a closed session", self.sid);
            let mut reply = response_body(&state.config.domain);
            reply.set_attr(TYPE_ATTR, TYPE_TERMINATE);
            self.write_and_close(state, connection, &reply);
            return id;
        }

        if !is_body(&body) {
            let reason = invalid_body_reason(&body);
            log::warn!(
                "bosh({}) [{}]: unexpected packet from the network: {reason}",
                self.sid,
                state.pool.len()
            );
            let responder = self.collab.responder.as_ref();
            if let Some(error) = responder.respond(&body, ErrorCondition::BadRequest, &reason) {
                state.queue.enqueue(error);
            }
            state.pool.push(HeldConnection {
                id,
                rid: None,
                connection,
            });
            state.phase = SessionPhase::Terminating;
            self.flush_after_request(state);
            return id;
        }

        let mut body = body;
        let children = body.take_children();
        let fingerprint = Fingerprint::of(&children);

        let mut rid = None;
        let mut duplicate = false;
        match body.attr(RID_ATTR).map(str::parse::<i64>) {
            Some(Ok(value)) => {
                let mut rids = self.lock_rids();
                let status = rids.classify(value, fingerprint);
                match status {
                    RidStatus::Conflict => {
                        drop(rids);
                        log::info!(
                            "bosh({}): duplicate client at rid {value}, closing session",
                            self.sid
                        );
                        let mut reply = response_body(&state.config.domain);
                        reply.set_attr(TYPE_ATTR, TYPE_TERMINATE);
                        self.write_and_close(state, connection, &reply);
                        self.terminate(state);
                        return id;
                    }
                    RidStatus::Retransmission => duplicate = true,
                    RidStatus::New => rids.record(value, fingerprint),
                }
                rid = Some(value);
            }
            Some(Err(_)) => {
                log::warn!(
                    "bosh({}): incorrect RID value: {:?}",
                    self.sid,
                    body.attr(RID_ATTR)
                );
            }
            None => {}
        }

        state.pool.push(HeldConnection {
            id,
            rid,
            connection,
        });

        if duplicate {
            log::info!("bosh({}): duplicated request rid={rid:?}", self.sid);
        } else {
            if body.attr(TYPE_ATTR) == Some(TYPE_TERMINATE) {
                log::debug!("bosh({}): client requested termination", self.sid);
                state.phase = SessionPhase::Terminating;
            }
            if body.attr(RESTART_ATTR) == Some("true") {
                log::debug!("bosh({}): found stream restart instruction", self.sid);
                self.collab.router.stream_event(StreamEvent::Restart {
                    sid: self.sid.clone(),
                    session_id: self.session_id.clone(),
                });
            }
            match body.attr(CACHE_ATTR) {
                Some(action) => {
                    let cache_id = body.attr(CACHE_ID_ATTR);
                    self.apply_cache_action(state, action, cache_id, children);
                }
                None => self.forward_payload(state, children),
            }
        }

        self.flush_after_request(state);
        id
    }

    /// Queues a stanza for the client and answers a held connection with it
    /// if one is available.
    pub fn deliver(&self, stanza: Element) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        log::trace!(
            "bosh({}) [{}]: processing packet {}",
            self.sid,
            state.pool.len(),
            stanza
        );

        if state.phase == SessionPhase::Closed {
            self.bounce(&stanza);
            return;
        }
        if state.cache_on {
            let cache = state.cache.get_or_insert_with(SessionCache::new);
            cache.classify(&stanza);
        }
        state.queue.enqueue(stanza);
        self.flush_pending(state);
        self.arm_wait_if_idle(state);
    }

    /// The client went away from a held connection without an answer.
    pub fn disconnected(&self, id: ConnectionId) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if let Some(held) = state.pool.remove(id) {
            log::debug!("bosh({}): {} disconnected", self.sid, held.id);
            self.collab.transport.close(held.connection);
        }
        if state.pool.is_empty() && state.phase == SessionPhase::Active {
            let scheduler = self.collab.scheduler.as_ref();
            state.timers.cancel(scheduler, TimerKind::Wait);
            self.arm_inactivity(state);
        }
    }

    /// Closes the session from the server side.
    pub fn close(&self) {
        let mut guard = self.lock_state();
        log::debug!("bosh({}): close requested", self.sid);
        self.terminate(&mut guard);
    }

    fn forward_payload(&self, state: &mut SessionState<T::Connection>, children: Vec<Element>) {
        for mut stanza in children {
            rewrite_to_client(&mut stanza);
            if state.cache_on && stanza.name() == "message" {
                let cache = state.cache.get_or_insert_with(SessionCache::new);
                cache.add_message(stanza.clone());
            }
            log::trace!("bosh({}): sending out packet {}", self.sid, stanza);
            self.collab.router.forward(&self.sid, stanza);
        }
    }

    fn apply_cache_action(
        &self,
        state: &mut SessionState<T::Connection>,
        raw: &str,
        cache_id: Option<&str>,
        children: Vec<Element>,
    ) {
        let action = match raw.parse::<CacheAction>() {
            Ok(action) => action,
            Err(err) => {
                log::warn!("bosh({}): incorrect cache action: {err}", self.sid);
                return;
            }
        };
        if !state.cache_on && action != CacheAction::On {
            log::debug!("bosh({}): cache is off, ignoring {action:?}", self.sid);
            return;
        }

        let cache = state.cache.get_or_insert_with(SessionCache::new);
        let keyed = |action: CacheAction| {
            if cache_id.is_none() {
                log::warn!(
                    "bosh({}): cache action {action:?} without {CACHE_ID_ATTR}",
                    self.sid
                );
            }
            cache_id
        };
        let result = match action {
            CacheAction::On => {
                state.cache_on = true;
                log::debug!("bosh({}): session cache set to ON", self.sid);
                None
            }
            CacheAction::Off => {
                state.cache_on = false;
                log::debug!("bosh({}): session cache set to OFF", self.sid);
                None
            }
            CacheAction::Set => {
                if let Some(id) = keyed(action) {
                    cache.set(id, children);
                }
                None
            }
            CacheAction::Add => {
                if let Some(id) = keyed(action) {
                    cache.add(id, children);
                }
                None
            }
            CacheAction::Get => keyed(action).and_then(|id| cache.get(id)),
            CacheAction::Remove => {
                if let Some(id) = keyed(action) {
                    cache.remove(id);
                }
                None
            }
            CacheAction::GetAll => Some(cache.get_all()),
        };
        if let Some(stanzas) = result {
            state.queue.extend(stanzas);
        }
    }

    fn flush_after_request(&self, state: &mut SessionState<T::Connection>) {
        self.flush_pending(state);
        while state.phase == SessionPhase::Active
            && state.pool.len() > state.config.hold_requests as usize
        {
            let Some(held) = state.pool.pop_oldest() else {
                break;
            };
            self.send_body(state, held);
        }
        self.arm_wait_if_idle(state);
    }

    fn flush_pending(&self, state: &mut SessionState<T::Connection>) {
        if state.pool.is_empty() {
            return;
        }
        if state.phase == SessionPhase::Terminating {
            self.terminate(state);
            return;
        }
        while !state.queue.is_empty() {
            let Some(held) = state.pool.pop_oldest() else {
                break;
            };
            self.send_body(state, held);
        }
    }

    /// Writes one response to `held`: ack, next batch, terminate marker.
    fn send_body(
        &self,
        state: &mut SessionState<T::Connection>,
        held: HeldConnection<T::Connection>,
    ) {
        let mut body = response_body(&state.config.domain);
        if let Some(rid) = self.lock_rids().take_unacked() {
            body.set_attr(ACK_ATTR, rid.to_string());
        }
        let max_packets = state.config.max_packets;
        for stanza in state.queue.drain_batch(max_packets) {
            body.add_child(stanza);
        }
        if state.phase == SessionPhase::Terminating {
            body.set_attr(TYPE_ATTR, TYPE_TERMINATE);
        }

        log::trace!(
            "bosh({}): {} answered (rid={:?})",
            self.sid,
            held.id,
            held.rid
        );
        self.write_and_close(state, held.connection, &body);

        let scheduler = self.collab.scheduler.as_ref();
        if state.timers.cancel(scheduler, TimerKind::Wait) {
            log::trace!("bosh({}): canceling wait timer", self.sid);
        }
        if state.pool.is_empty() && state.phase == SessionPhase::Active {
            self.arm_inactivity(state);
        }
    }

    fn write_and_close(
        &self,
        state: &SessionState<T::Connection>,
        mut connection: T::Connection,
        body: &Element,
    ) {
        let xml = body.to_xml();
        let transport = &self.collab.transport;
        let content_type = &state.config.content_type;
        if let Err(err) = transport.write(&mut connection, content_type, xml.as_bytes()) {
            log::warn!(
                "bosh({}) [{}]: exception during writing to connection: {err}",
                self.sid,
                state.pool.len()
            );
        }
        transport.close(connection);
    }

    /// Answers every held connection with a terminate body, then closes.
    fn terminate(&self, state: &mut SessionState<T::Connection>) {
        if state.phase == SessionPhase::Closed {
            return;
        }
        state.phase = SessionPhase::Terminating;
        while let Some(held) = state.pool.pop_oldest() {
            self.send_body(state, held);
        }
        self.finish(state);
    }

    /// Bounces what is still queued, stops the timers and reports the stream
    /// closed. Runs at most once per session.
    fn finish(&self, state: &mut SessionState<T::Connection>) {
        if state.phase == SessionPhase::Closed {
            return;
        }
        state.phase = SessionPhase::Terminating;
        for stanza in state.queue.drain_all() {
            self.bounce(&stanza);
        }
        state.timers.cancel_all(self.collab.scheduler.as_ref());
        while let Some(held) = state.pool.pop_oldest() {
            self.collab.transport.close(held.connection);
        }
        state.phase = SessionPhase::Closed;

        log::info!("bosh({}): closing session", self.sid);
        self.collab.router.stream_event(StreamEvent::Closed {
            sid: self.sid.clone(),
            session_id: self.session_id.clone(),
        });
    }

    fn bounce(&self, stanza: &Element) {
        let condition = ErrorCondition::RecipientUnavailable;
        let responder = self.collab.responder.as_ref();
        if let Some(failure) = responder.respond(stanza, condition, DISCONNECTED_TEXT) {
            self.collab.router.forward(&self.sid, failure);
        }
    }

    fn arm_wait_if_idle(&self, state: &mut SessionState<T::Connection>) {
        if state.phase != SessionPhase::Active || state.pool.is_empty() || !state.queue.is_empty() {
            return;
        }
        let delay = state.config.wait();
        log::trace!(
            "bosh({}): setting wait timer for {}s",
            self.sid,
            delay.as_secs()
        );
        self.arm(state, TimerKind::Wait, delay);
    }

    fn arm_inactivity(&self, state: &mut SessionState<T::Connection>) {
        let delay = state.config.inactivity();
        log::trace!(
            "bosh({}): setting inactivity timer for {}s",
            self.sid,
            delay.as_secs()
        );
        self.arm(state, TimerKind::Inactivity, delay);
    }

    fn arm(&self, state: &mut SessionState<T::Connection>, kind: TimerKind, delay: Duration) {
        let scheduler = self.collab.scheduler.as_ref();
        let target: Weak<dyn TimerTarget> = self.me.clone();
        state.timers.arm(scheduler, target, kind, delay);
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState<T::Connection>> {
        self.state.lock().expect("session state mutex poisoned")
    }

    fn lock_rids(&self) -> MutexGuard<'_, RidWindow> {
        self.rids.lock().expect("rid window mutex poisoned")
    }
}

impl<T: Transport> TimerTarget for BoshSession<T> {
    fn on_timer(&self, handle: TimerHandle) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        match state.timers.claim(handle) {
            Some(TimerKind::Wait) => {
                log::trace!("bosh({}): wait timer fired", self.sid);
                if state.phase == SessionPhase::Active {
                    if let Some(held) = state.pool.pop_oldest() {
                        self.send_body(state, held);
                    }
                    self.arm_wait_if_idle(state);
                }
            }
            Some(TimerKind::Inactivity) => {
                if state.pool.is_empty() && state.phase != SessionPhase::Closed {
                    log::info!("bosh({}): inactivity timeout expired", self.sid);
                    self.finish(state);
                }
            }
            None => log::trace!("bosh({}): ignoring stale {handle}", self.sid),
        }
    }
}

impl<T: Transport> std::fmt::Debug for BoshSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoshSession")
            .field("sid", &self.sid)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
