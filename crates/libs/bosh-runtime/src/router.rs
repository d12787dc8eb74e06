use bosh_session::{Element, Router, StreamEvent};
use tokio::sync::mpsc;

/// What sessions send towards the XMPP side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Forward { sid: String, stanza: Element },
    Stream(StreamEvent),
}

/// [`Router`] that hands everything to an unbounded channel. Sending never
/// blocks, so it is safe to call under the session lock.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::UnboundedSender<UpstreamEvent>,
}

impl ChannelRouter {
    pub fn new(tx: mpsc::UnboundedSender<UpstreamEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpstreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: UpstreamEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("router: upstream receiver dropped, discarding event");
        }
    }
}

impl Router for ChannelRouter {
    fn forward(&self, sid: &str, stanza: Element) {
        self.send(UpstreamEvent::Forward {
            sid: sid.to_owned(),
            stanza,
        });
    }

    fn stream_event(&self, event: StreamEvent) {
        self.send(UpstreamEvent::Stream(event));
    }
}
