use std::sync::Arc;
use std::time::Duration;

use bosh_runtime::{ChannelRouter, Dispatch, SessionManager, TokioScheduler, UpstreamEvent};
use bosh_session::{BoshConfig, BoshError, Collaborators, Element, StreamEvent};
use bosh_test_support::{conn, init_logging, RecordingTransport};
use tokio::sync::mpsc::UnboundedReceiver;

const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";
const CREATE: &str = "<body rid='1' xmlns='http://jabber.org/protocol/httpbind'/>";

struct Fixture {
    manager: SessionManager<RecordingTransport>,
    transport: Arc<RecordingTransport>,
    upstream: UnboundedReceiver<UpstreamEvent>,
}

fn fixture() -> Fixture {
    init_logging();
    let transport = RecordingTransport::new();
    let scheduler = Arc::new(TokioScheduler::current().expect("runtime"));
    let (router, upstream) = ChannelRouter::channel();
    let collab = Collaborators::new(transport.clone(), scheduler, Arc::new(router));
    Fixture {
        manager: SessionManager::new(BoshConfig::default(), collab),
        transport,
        upstream,
    }
}

fn create(fixture: &Fixture) -> String {
    let created = fixture
        .manager
        .handle_request(CREATE, conn("create"))
        .expect("create");
    match created {
        Dispatch::Created { sid } => sid,
        other => panic!("expected a new session, got {other:?}"),
    }
}

fn routed_body(sid: &str, rid: i64, attrs: &str) -> String {
    format!("<body rid='{rid}' sid='{sid}'{attrs} xmlns='{HTTPBIND}'/>")
}

fn drain(upstream: &mut UnboundedReceiver<UpstreamEvent>) -> Vec<UpstreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = upstream.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn request_without_sid_creates_and_registers_a_session() {
    let mut fixture = fixture();
    let sid = create(&fixture);

    assert_eq!(fixture.manager.len(), 1);
    let response = fixture.transport.response_to("create");
    assert_eq!(response.attr("sid"), Some(sid.as_str()));
    let events = drain(&mut fixture.upstream);
    assert!(matches!(
        events.as_slice(),
        [UpstreamEvent::Stream(StreamEvent::Opened { sid: opened, .. })] if *opened == sid
    ));
}

#[tokio::test(start_paused = true)]
async fn request_with_sid_is_routed_and_payload_goes_upstream() {
    let mut fixture = fixture();
    let sid = create(&fixture);
    drain(&mut fixture.upstream);

    let xml = format!(
        "<body rid='2' sid='{sid}' xmlns='http://jabber.org/protocol/httpbind'>\
         <message to='bob@example.com'><body>hi</body></message></body>"
    );
    let routed = fixture
        .manager
        .handle_request(&xml, conn("r1"))
        .expect("route");

    assert!(matches!(
        routed,
        Dispatch::Routed { sid: ref routed_sid, .. } if *routed_sid == sid
    ));
    let events = drain(&mut fixture.upstream);
    assert_eq!(events.len(), 1);
    match &events[0] {
        UpstreamEvent::Forward { sid: from, stanza } => {
            assert_eq!(*from, sid);
            assert_eq!(stanza.name(), "message");
            assert_eq!(stanza.xmlns(), Some("jabber:client"));
        }
        other => panic!("expected a forwarded stanza, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_sid_gets_item_not_found() {
    let fixture = fixture();

    let err = fixture
        .manager
        .handle_request(
            "<body rid='2' sid='nope' xmlns='http://jabber.org/protocol/httpbind'/>",
            conn("stray"),
        )
        .expect_err("unknown sid");

    assert!(matches!(
        err,
        BoshError::UnknownSession { ref sid } if sid == "nope"
    ));
    let response = fixture.transport.response_to("stray");
    assert_eq!(response.attr("type"), Some("terminate"));
    assert_eq!(response.attr("condition"), Some("item-not-found"));
    assert!(fixture.transport.is_closed("stray"));
}

#[tokio::test(start_paused = true)]
async fn unparseable_request_gets_bad_request() {
    let fixture = fixture();

    let err = fixture
        .manager
        .handle_request("<body", conn("junk"))
        .expect_err("parse error");

    assert!(matches!(err, BoshError::Xml(_)));
    let response = fixture.transport.response_to("junk");
    assert_eq!(response.attr("condition"), Some("bad-request"));
    assert!(fixture.manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn wait_timer_answers_held_request_on_the_runtime() {
    let fixture = fixture();
    let sid = create(&fixture);
    let xml = routed_body(&sid, 2, "");
    fixture
        .manager
        .handle_request(&xml, conn("r1"))
        .expect("route");
    assert!(fixture.transport.responses_to("r1").is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;

    let response = fixture.transport.response_to("r1");
    assert!(response.nodes().is_empty());
    assert_eq!(response.attr("ack"), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_and_is_reaped() {
    let mut fixture = fixture();
    let sid = create(&fixture);
    let stanza = Element::new("message").with_attr("from", "bob@example.com");
    fixture.manager.deliver(&sid, stanza).expect("deliver");

    tokio::time::sleep(Duration::from_secs(11)).await;

    let session = fixture.manager.get(&sid).expect("still registered");
    assert!(session.is_closed());
    let events = drain(&mut fixture.upstream);
    let closed = events
        .iter()
        .filter(|event| matches!(event, UpstreamEvent::Stream(StreamEvent::Closed { .. })))
        .count();
    assert_eq!(closed, 1);
    assert!(events.iter().any(|event| matches!(
        event,
        UpstreamEvent::Forward { stanza, .. } if stanza.attr("type") == Some("error")
    )));

    assert_eq!(fixture.manager.reap_closed(), 1);
    assert!(fixture.manager.is_empty());
    assert!(matches!(
        fixture.manager.deliver(&sid, Element::new("message")),
        Err(BoshError::UnknownSession { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn server_close_terminates_and_unregisters() {
    let mut fixture = fixture();
    let sid = create(&fixture);
    let xml = routed_body(&sid, 2, "");
    fixture
        .manager
        .handle_request(&xml, conn("r1"))
        .expect("route");

    fixture.manager.close(&sid).expect("close");

    let response = fixture.transport.response_to("r1");
    assert_eq!(response.attr("type"), Some("terminate"));
    assert!(fixture.manager.get(&sid).is_none());
    assert!(drain(&mut fixture.upstream)
        .iter()
        .any(|event| matches!(event, UpstreamEvent::Stream(StreamEvent::Closed { .. }))));
    let again = fixture.manager.close(&sid);
    assert!(matches!(again, Err(BoshError::UnknownSession { .. })));
}

#[tokio::test(start_paused = true)]
async fn disconnected_connection_is_released() {
    let fixture = fixture();
    let sid = create(&fixture);
    let xml = routed_body(&sid, 2, "");
    let routed = fixture
        .manager
        .handle_request(&xml, conn("r1"))
        .expect("route");
    let Dispatch::Routed { connection, .. } = routed else {
        panic!("expected a routed request");
    };

    fixture
        .manager
        .disconnected(&sid, connection)
        .expect("disconnect");

    assert!(fixture.transport.is_closed("r1"));
    let session = fixture.manager.get(&sid).expect("registered");
    assert_eq!(session.held_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn client_terminate_unregisters_the_session() {
    let mut fixture = fixture();
    let sid = create(&fixture);
    let xml = routed_body(&sid, 2, " type='terminate'");

    fixture
        .manager
        .handle_request(&xml, conn("bye"))
        .expect("route");

    let response = fixture.transport.response_to("bye");
    assert_eq!(response.attr("type"), Some("terminate"));
    assert!(fixture.manager.get(&sid).is_none());
    assert!(fixture.manager.is_empty());
    assert_eq!(fixture.manager.reap_closed(), 0);
    let late = fixture.manager.deliver(&sid, Element::new("message"));
    assert!(matches!(late, Err(BoshError::UnknownSession { .. })));
    let closed = drain(&mut fixture.upstream)
        .iter()
        .filter(|event| matches!(event, UpstreamEvent::Stream(StreamEvent::Closed { .. })))
        .count();
    assert_eq!(closed, 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_body_for_a_known_session_unregisters_it() {
    let fixture = fixture();
    let sid = create(&fixture);
    let xml = format!("<stream rid='2' sid='{sid}' xmlns='jabber:client'/>");

    fixture
        .manager
        .handle_request(&xml, conn("r1"))
        .expect("route");

    let response = fixture.transport.response_to("r1");
    assert_eq!(response.attr("type"), Some("terminate"));
    assert!(fixture.manager.get(&sid).is_none());
    let xml = routed_body(&sid, 3, "");
    let retry = fixture.manager.handle_request(&xml, conn("r2"));
    assert!(matches!(retry, Err(BoshError::UnknownSession { .. })));
    let rejected = fixture.transport.response_to("r2");
    assert_eq!(rejected.attr("condition"), Some("item-not-found"));
}
