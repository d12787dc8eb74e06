//! Session-side stanza cache.
//!
//! Lets a client that reloads its page pick the stream back up: the roster,
//! the bound resource, last presences and recent messages are kept under
//! well-known keys, and clients can store their own lists under any key.

use std::collections::HashMap;
use std::str::FromStr;

use crate::body::{Element, FROM_ATTR};

pub const RESOURCE_BIND_ID: &str = "bosh-resource-bind";
pub const ROSTER_ID: &str = "bosh-roster";
pub const PRESENCE_ID: &str = "bosh-presence";
pub const MESSAGE_ID: &str = "bosh-message";

pub const ROSTER_XMLNS: &str = "jabber:iq:roster";
pub const BIND_XMLNS: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// Message history kept under [`MESSAGE_ID`]; older entries are dropped.
pub const MAX_CACHED_MESSAGES: usize = 100;

const WELL_KNOWN: [&str; 4] = [RESOURCE_BIND_ID, ROSTER_ID, PRESENCE_ID, MESSAGE_ID];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    On,
    Off,
    Set,
    Add,
    Get,
    Remove,
    GetAll,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache action: {0}")]
pub struct UnknownCacheAction(pub String);

impl FromStr for CacheAction {
    type Err = UnknownCacheAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "set" => Ok(Self::Set),
            "add" => Ok(Self::Add),
            "get" => Ok(Self::Get),
            "remove" => Ok(Self::Remove),
            "get_all" => Ok(Self::GetAll),
            other => Err(UnknownCacheAction(other.to_owned())),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, Vec<Element>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: &str, stanzas: Vec<Element>) {
        self.entries.insert(id.to_owned(), stanzas);
    }

    pub fn add(&mut self, id: &str, stanzas: Vec<Element>) {
        let entry = self.entries.entry(id.to_owned()).or_default();
        entry.extend(stanzas);
    }

    pub fn get(&self, id: &str) -> Option<Vec<Element>> {
        self.entries.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Vec<Element>> {
        self.entries.remove(id)
    }

    /// Everything cached: bind, roster, presences and messages first, then
    /// client keys in key order.
    pub fn get_all(&self) -> Vec<Element> {
        let is_custom = |key: &&String| !WELL_KNOWN.contains(&key.as_str());
        let mut custom: Vec<&String> = self.entries.keys().filter(is_custom).collect();
        custom.sort();

        WELL_KNOWN
            .iter()
            .copied()
            .chain(custom.into_iter().map(String::as_str))
            .filter_map(|key| self.entries.get(key))
            .flatten()
            .cloned()
            .collect()
    }

    /// Keeps the latest presence per sender.
    pub fn add_presence(&mut self, presence: Element) {
        let presences = self.entries.entry(PRESENCE_ID.to_owned()).or_default();
        let from = presence.attr(FROM_ATTR).map(str::to_owned);
        let same_sender = |cached: &Element| cached.attr(FROM_ATTR) == from.as_deref();
        match presences.iter_mut().find(|cached| same_sender(cached)) {
            Some(slot) => *slot = presence,
            None => presences.push(presence),
        }
    }

    pub fn add_message(&mut self, message: Element) {
        let messages = self.entries.entry(MESSAGE_ID.to_owned()).or_default();
        messages.push(message);
        if messages.len() > MAX_CACHED_MESSAGES {
            let excess = messages.len() - MAX_CACHED_MESSAGES;
            messages.drain(..excess);
        }
    }

    pub fn set_roster(&mut self, roster: Element) {
        self.set(ROSTER_ID, vec![roster]);
    }

    pub fn set_resource_bind(&mut self, bind: Element) {
        self.set(RESOURCE_BIND_ID, vec![bind]);
    }

    /// Stores `stanza` under its well-known key, if it has one.
    pub fn classify(&mut self, stanza: &Element) {
        match stanza.name() {
            "presence" => self.add_presence(stanza.clone()),
            "message" => self.add_message(stanza.clone()),
            "iq" if stanza.has_child_ns("query", ROSTER_XMLNS) => self.set_roster(stanza.clone()),
            "iq" if stanza.has_child_ns("bind", BIND_XMLNS) => {
                self.set_resource_bind(stanza.clone())
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stanzas: &[Element]) -> Vec<&str> {
        stanzas.iter().map(Element::name).collect()
    }

    fn presence(from: &str, show: &str) -> Element {
        Element::new("presence")
            .with_attr("from", from)
            .with_child(Element::new("show").with_text(show))
    }

    #[test]
    fn parses_actions() {
        assert_eq!("get_all".parse::<CacheAction>(), Ok(CacheAction::GetAll));
        assert_eq!("on".parse::<CacheAction>(), Ok(CacheAction::On));
        assert_eq!(
            "flush".parse::<CacheAction>(),
            Err(UnknownCacheAction("flush".into()))
        );
    }

    #[test]
    fn set_add_get_remove() {
        let mut cache = SessionCache::new();
        cache.set("notes", vec![Element::new("a")]);
        cache.add("notes", vec![Element::new("b")]);
        let notes = cache.get("notes").expect("notes");
        assert_eq!(names(&notes), ["a", "b"]);

        cache.set("notes", vec![Element::new("c")]);
        assert_eq!(cache.get("notes").map(|v| v.len()), Some(1));
        assert!(cache.remove("notes").is_some());
        assert!(cache.get("notes").is_none());
    }

    #[test]
    fn presence_replaced_per_sender() {
        let mut cache = SessionCache::new();
        cache.classify(&presence("a@x/1", "away"));
        cache.classify(&presence("b@x/1", "chat"));
        cache.classify(&presence("a@x/1", "dnd"));

        let presences = cache.get(PRESENCE_ID).expect("presences");
        assert_eq!(presences.len(), 2);
        let show = presences[0].child("show").map(Element::text);
        assert_eq!(show.as_deref(), Some("dnd"));
    }

    #[test]
    fn classifies_roster_and_bind() {
        let mut cache = SessionCache::new();
        let roster = Element::new("iq")
            .with_attr("type", "result")
            .with_child(Element::new("query").with_attr("xmlns", ROSTER_XMLNS));
        let bind = Element::new("iq")
            .with_attr("type", "result")
            .with_child(Element::new("bind").with_attr("xmlns", BIND_XMLNS));
        cache.classify(&roster);
        cache.classify(&bind);
        cache.classify(&Element::new("iq").with_child(Element::new("ping")));

        assert_eq!(cache.get(ROSTER_ID), Some(vec![roster.clone()]));
        assert_eq!(cache.get(RESOURCE_BIND_ID), Some(vec![bind.clone()]));
        assert_eq!(cache.get_all(), vec![bind, roster]);
    }

    #[test]
    fn message_history_is_bounded() {
        let mut cache = SessionCache::new();
        for i in 0..(MAX_CACHED_MESSAGES + 5) {
            cache.add_message(Element::new("message").with_attr("id", i.to_string()));
        }
        let messages = cache.get(MESSAGE_ID).expect("messages");
        assert_eq!(messages.len(), MAX_CACHED_MESSAGES);
        assert_eq!(messages[0].attr("id"), Some("5"));
    }

    #[test]
    fn get_all_orders_well_known_first() {
        let mut cache = SessionCache::new();
        cache.set("zeta", vec![Element::new("z")]);
        cache.set("alpha", vec![Element::new("a")]);
        cache.add_message(Element::new("message"));

        assert_eq!(names(&cache.get_all()), ["message", "a", "z"]);
    }
}
