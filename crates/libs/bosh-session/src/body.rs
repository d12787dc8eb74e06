//! `<body/>` wrapper elements and the small XML element model they carry.
//!
//! Only what the session layer needs is modelled: a name, ordered attributes
//! and an ordered list of child nodes (elements and character data).
//! Namespace declarations are plain attributes (`xmlns`, `xmlns:prefix`).

use std::fmt::{self, Write as _};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::BoshError;

/// Root element name of every request and response.
pub const BODY_EL_NAME: &str = "body";
/// Namespace of the transport envelope.
pub const BOSH_XMLNS: &str = "http://jabber.org/protocol/httpbind";
/// Namespace stanzas are rewritten to when they leave the envelope.
pub const CLIENT_XMLNS: &str = "jabber:client";
pub const XBOSH_XMLNS: &str = "urn:xmpp:xbosh";
pub const STREAM_XMLNS: &str = "http://etherx.jabber.org/streams";
pub const BOSH_VERSION: &str = "1.6";
pub const XMPP_VERSION: &str = "1.0";

pub const RID_ATTR: &str = "rid";
pub const SID_ATTR: &str = "sid";
pub const ACK_ATTR: &str = "ack";
pub const WAIT_ATTR: &str = "wait";
pub const HOLD_ATTR: &str = "hold";
pub const POLLING_ATTR: &str = "polling";
pub const INACTIVITY_ATTR: &str = "inactivity";
pub const REQUESTS_ATTR: &str = "requests";
pub const MAXPAUSE_ATTR: &str = "maxpause";
pub const CONTENT_ATTR: &str = "content";
pub const TO_ATTR: &str = "to";
pub const FROM_ATTR: &str = "from";
pub const LANG_ATTR: &str = "xml:lang";
pub const VER_ATTR: &str = "ver";
pub const SECURE_ATTR: &str = "secure";
pub const AUTHID_ATTR: &str = "authid";
pub const RESTART_ATTR: &str = "restart";
pub const TYPE_ATTR: &str = "type";
pub const CONDITION_ATTR: &str = "condition";
pub const CACHE_ATTR: &str = "cache";
pub const CACHE_ID_ATTR: &str = "cacheId";

pub const TYPE_TERMINATE: &str = "terminate";

/// A child of an element: either a nested element or a run of character data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Element(_) => None,
        }
    }

    fn into_element(self) -> Option<Element> {
        match self {
            Self::Element(element) => Some(element),
            Self::Text(_) => None,
        }
    }
}

/// An XML element. Child elements and character data keep their document
/// order; adjacent runs of text are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.add_child(child);
        self
    }

    /// Appends character data after the current children.
    #[must_use]
    pub fn with_text(mut self, text: impl AsRef<str>) -> Self {
        self.push_text(text.as_ref());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Sets an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn xmlns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    pub fn set_xmlns(&mut self, xmlns: impl Into<String>) {
        self.set_attr("xmlns", xmlns);
    }

    /// Child elements and text in document order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Child elements only, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(Node::as_element)
    }

    pub fn add_child(&mut self, child: Element) {
        self.nodes.push(Node::Element(child));
    }

    pub fn add_node(&mut self, node: Node) {
        match node {
            Node::Element(child) => self.add_child(child),
            Node::Text(text) => self.push_text(&text),
        }
    }

    /// Removes every child node and returns the elements among them.
    /// Character data between the elements is dropped.
    pub fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.nodes)
            .into_iter()
            .filter_map(Node::into_element)
            .collect()
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().find(|child| child.name == name)
    }

    /// True if a direct child named `name` declares namespace `xmlns`.
    pub fn has_child_ns(&self, name: &str, xmlns: &str) -> bool {
        self.children()
            .any(|child| child.name == name && child.xmlns() == Some(xmlns))
    }

    /// Character data directly inside this element, concatenated.
    pub fn text(&self) -> String {
        self.nodes.iter().filter_map(Node::as_text).collect()
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.nodes.last_mut() {
            Some(Node::Text(last)) => last.push_str(text),
            _ => self.nodes.push(Node::Text(text.to_owned())),
        }
    }

    /// Parses a single element from a string. Leading declarations, comments
    /// and processing instructions are skipped; trailing content is ignored.
    /// Character data is kept verbatim, whitespace included.
    pub fn parse(input: &str) -> Result<Self, BoshError> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<Element> = Vec::new();
        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    if let Some(current) = stack.last_mut() {
                        current.push_text(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.push_text(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(element) = stack.pop() else {
                        return Err(BoshError::Xml("unexpected closing tag".into()));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.add_child(element),
                        None => return Ok(element),
                    }
                }
                Event::Eof => return Err(BoshError::Xml("unexpected end of document".into())),
                _ => {}
            }
        }
    }

    /// Canonical serialization: attributes in insertion order, double-quoted,
    /// child nodes in document order, empty elements self-closed.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {key}=\"");
            escape_into(out, value, true);
            out.push('"');
        }
        if self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.nodes {
            match node {
                Node::Element(child) => child.write_xml(out),
                Node::Text(text) => escape_into(out, text, false),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

fn xml_error(err: impl fmt::Display) -> BoshError {
    BoshError::Xml(err.to_string())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, BoshError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn escape_into(out: &mut String, value: &str, attribute: bool) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\'' if attribute => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
}

/// True if `element` is a `<body/>` in the envelope namespace.
pub fn is_body(element: &Element) -> bool {
    element.name() == BODY_EL_NAME && element.xmlns() == Some(BOSH_XMLNS)
}

/// Describes why `element` is not an acceptable request body.
pub fn invalid_body_reason(element: &Element) -> String {
    let mut reason = String::from("Invalid body element");
    if element.name() != BODY_EL_NAME {
        let _ = write!(reason, ", incorrect root element name, use {BODY_EL_NAME}");
    }
    if element.xmlns() != Some(BOSH_XMLNS) {
        let _ = write!(reason, ", incorrect xmlns, use {BOSH_XMLNS}");
    }
    reason
}

/// Skeleton of every response after session creation.
pub fn response_body(domain: &str) -> Element {
    Element::new(BODY_EL_NAME)
        .with_attr(FROM_ATTR, domain)
        .with_attr(SECURE_ATTR, "true")
        .with_attr("xmpp:version", XMPP_VERSION)
        .with_attr("xmlns:xmpp", XBOSH_XMLNS)
        .with_attr("xmlns:stream", STREAM_XMLNS)
        .with_attr("xmlns", BOSH_XMLNS)
}

/// Terminal binding error, sent when no session can answer a request.
pub fn terminal_error_body(condition: &str) -> Element {
    Element::new(BODY_EL_NAME)
        .with_attr(TYPE_ATTR, TYPE_TERMINATE)
        .with_attr(CONDITION_ATTR, condition)
        .with_attr("xmlns", BOSH_XMLNS)
}

/// Moves a payload stanza out of the envelope namespace. Children without an
/// explicit namespace inherit the envelope one, so both cases are rewritten.
pub fn rewrite_to_client(stanza: &mut Element) {
    match stanza.xmlns() {
        None | Some(BOSH_XMLNS) => stanza.set_xmlns(CLIENT_XMLNS),
        Some(_) => {}
    }
}
