//! In-memory collaborators for driving sessions in tests: a transport that
//! records what it writes, a router that records what it receives, and a
//! scheduler whose timers fire only when told to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bosh_session::{
    BoshConfig, BoshSession, Collaborators, Element, Router, Scheduler, StreamEvent, TimerHandle,
    TimerKind, TimerTarget, Transport, TransportError,
};

static LOGGING: OnceLock<()> = OnceLock::new();

/// Routes `log` output through the test harness once per process.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("test-support mutex poisoned")
}

/// A fake HTTP connection, identified by a label chosen by the test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    pub label: String,
}

pub fn conn(label: &str) -> MockConnection {
    MockConnection {
        label: label.to_owned(),
    }
}

/// `id` attributes of the stanzas inside a response body, in order.
pub fn stanza_ids(body: &Element) -> Vec<String> {
    body.children()
        .filter_map(|stanza| stanza.attr("id").map(str::to_owned))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Written {
    pub connection: String,
    pub content_type: String,
    pub body: String,
}

impl Written {
    pub fn element(&self) -> Element {
        Element::parse(&self.body)
            .unwrap_or_else(|err| panic!("unparseable response {}: {err}", self.body))
    }
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<Written>>,
    closed: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following write fail, as if the client hung up.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<Written> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Responses written to `label`, parsed.
    pub fn responses_to(&self, label: &str) -> Vec<Element> {
        lock(&self.writes)
            .iter()
            .filter(|written| written.connection == label)
            .map(Written::element)
            .collect()
    }

    /// The single response written to `label`.
    pub fn response_to(&self, label: &str) -> Element {
        let mut responses = self.responses_to(label);
        assert_eq!(
            responses.len(),
            1,
            "expected exactly one response to {label}"
        );
        responses.remove(0)
    }

    pub fn closed(&self) -> Vec<String> {
        lock(&self.closed).clone()
    }

    pub fn is_closed(&self, label: &str) -> bool {
        lock(&self.closed).iter().any(|closed| closed == label)
    }
}

impl Transport for RecordingTransport {
    type Connection = MockConnection;

    fn write(
        &self,
        connection: &mut MockConnection,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        lock(&self.writes).push(Written {
            connection: connection.label.clone(),
            content_type: content_type.to_owned(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
        Ok(())
    }

    fn close(&self, connection: MockConnection) {
        lock(&self.closed).push(connection.label);
    }
}

#[derive(Debug, Default)]
pub struct RecordingRouter {
    forwarded: Mutex<Vec<(String, Element)>>,
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn forwarded(&self) -> Vec<Element> {
        lock(&self.forwarded)
            .iter()
            .map(|(_, stanza)| stanza.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        lock(&self.events).clone()
    }

    pub fn closed_events(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, StreamEvent::Closed { .. }))
            .count()
    }
}

impl Router for RecordingRouter {
    fn forward(&self, sid: &str, stanza: Element) {
        lock(&self.forwarded).push((sid.to_owned(), stanza));
    }

    fn stream_event(&self, event: StreamEvent) {
        lock(&self.events).push(event);
    }
}

struct PendingTimer {
    handle: TimerHandle,
    kind: TimerKind,
    delay: Duration,
    target: Weak<dyn TimerTarget>,
}

/// Timers that only fire when a test calls [`ManualScheduler::fire`].
#[derive(Default)]
pub struct ManualScheduler {
    next: AtomicU64,
    pending: Mutex<Vec<PendingTimer>>,
    cancelled: Mutex<HashSet<TimerHandle>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay of the armed timer of `kind`, if any.
    pub fn armed(&self, kind: TimerKind) -> Option<Duration> {
        self.latest(kind).map(|(_, delay)| delay)
    }

    pub fn armed_handle(&self, kind: TimerKind) -> Option<TimerHandle> {
        self.latest(kind).map(|(handle, _)| handle)
    }

    fn latest(&self, kind: TimerKind) -> Option<(TimerHandle, Duration)> {
        lock(&self.pending)
            .iter()
            .rev()
            .find(|timer| timer.kind == kind)
            .map(|timer| (timer.handle, timer.delay))
    }

    pub fn was_cancelled(&self, handle: TimerHandle) -> bool {
        lock(&self.cancelled).contains(&handle)
    }

    /// Fires the armed timer of `kind`. Returns false when none is armed.
    pub fn fire(&self, kind: TimerKind) -> bool {
        let timer = {
            let mut pending = lock(&self.pending);
            match pending.iter().rposition(|timer| timer.kind == kind) {
                Some(idx) => pending.remove(idx),
                None => return false,
            }
        };
        log::trace!("manual scheduler: firing {} ({kind:?})", timer.handle);
        match timer.target.upgrade() {
            Some(target) => {
                target.on_timer(timer.handle);
                true
            }
            None => false,
        }
    }

    /// Delivers `handle` to `target` regardless of cancellation, the way a
    /// fire racing a cancel would.
    pub fn fire_stale(&self, target: &Arc<dyn TimerTarget>, handle: TimerHandle) {
        target.on_timer(handle);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(
        &self,
        target: Weak<dyn TimerTarget>,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next.fetch_add(1, Ordering::SeqCst));
        lock(&self.pending).push(PendingTimer {
            handle,
            kind,
            delay,
            target,
        });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        lock(&self.pending).retain(|timer| timer.handle != handle);
        lock(&self.cancelled).insert(handle);
    }
}

/// A transport, router and scheduler wired together.
pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub router: Arc<RecordingRouter>,
    pub scheduler: Arc<ManualScheduler>,
    pub config: BoshConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(BoshConfig::default())
    }
}

impl Harness {
    pub fn new(config: BoshConfig) -> Self {
        init_logging();
        Self {
            transport: RecordingTransport::new(),
            router: RecordingRouter::new(),
            scheduler: ManualScheduler::new(),
            config,
        }
    }

    pub fn collaborators(&self) -> Collaborators<RecordingTransport> {
        Collaborators::new(
            self.transport.clone(),
            self.scheduler.clone(),
            self.router.clone(),
        )
    }

    /// Creates a session from `xml`, answered on connection `"create"`.
    pub fn create(&self, xml: &str) -> Arc<BoshSession<RecordingTransport>> {
        let request = Element::parse(xml).unwrap_or_else(|err| panic!("bad request {xml}: {err}"));
        BoshSession::create(&request, conn("create"), &self.config, self.collaborators())
            .unwrap_or_else(|err| panic!("session creation failed: {err}"))
    }
}

/// `<body/>` request in the envelope namespace with the given rid and
/// payload.
pub fn request(rid: i64, payload: &str) -> Element {
    let xml = format!(
        "<body rid='{rid}' sid='s' xmlns='http://jabber.org/protocol/httpbind'>{payload}</body>"
    );
    Element::parse(&xml).unwrap_or_else(|err| panic!("bad request {xml}: {err}"))
}
