use crate::body::{Element, FROM_ATTR, TO_ATTR, TYPE_ATTR};

pub const STANZAS_XMLNS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCondition {
    BadRequest,
    RecipientUnavailable,
}

impl ErrorCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::RecipientUnavailable => "recipient-unavailable",
        }
    }

    pub fn error_type(self) -> &'static str {
        match self {
            Self::BadRequest => "modify",
            Self::RecipientUnavailable => "wait",
        }
    }
}

/// Builds the error reply for a stanza the session could not handle.
pub trait FailureResponder: Send + Sync {
    /// `None` when no reply must be generated, e.g. for an error stanza.
    fn respond(&self, stanza: &Element, condition: ErrorCondition, text: &str) -> Option<Element>;
}

/// Standard XMPP stanza error: addresses swapped, `type="error"`, original
/// payload kept, `<error/>` appended.
#[derive(Debug, Clone, Copy, Default)]
pub struct StanzaErrorResponder;

impl FailureResponder for StanzaErrorResponder {
    fn respond(&self, stanza: &Element, condition: ErrorCondition, text: &str) -> Option<Element> {
        if stanza.attr(TYPE_ATTR) == Some("error") {
            return None;
        }

        let mut reply = Element::new(stanza.name());
        for (key, value) in stanza.attributes() {
            match key {
                TO_ATTR => reply.set_attr(FROM_ATTR, value),
                FROM_ATTR => reply.set_attr(TO_ATTR, value),
                TYPE_ATTR => {}
                _ => reply.set_attr(key, value),
            }
        }
        reply.set_attr(TYPE_ATTR, "error");
        for node in stanza.nodes() {
            reply.add_node(node.clone());
        }

        let defined = Element::new(condition.as_str()).with_attr("xmlns", STANZAS_XMLNS);
        let mut error = Element::new("error")
            .with_attr(TYPE_ATTR, condition.error_type())
            .with_child(defined);
        if !text.is_empty() {
            let text = Element::new("text")
                .with_attr("xmlns", STANZAS_XMLNS)
                .with_text(text);
            error.add_child(text);
        }
        reply.add_child(error);
        Some(reply)
    }
}
