use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::body::{Element, CONTENT_ATTR, HOLD_ATTR, LANG_ATTR, TO_ATTR, WAIT_ATTR};
use crate::error::BoshError;

pub const DEFAULT_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
pub const DEFAULT_LANG: &str = "en";
/// Stanzas carried by a single response body.
pub const MAX_PACKETS: usize = 2;

/// Server-side limits and defaults, the starting point of every negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoshConfig {
    pub domain: String,
    pub max_wait: u64,
    pub min_polling: u64,
    pub max_inactivity: u64,
    pub concurrent_requests: u32,
    pub hold_requests: u32,
    pub max_pause: u64,
    pub content_type: String,
    pub max_packets: usize,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".into(),
            max_wait: 30,
            min_polling: 10,
            max_inactivity: 10,
            concurrent_requests: 2,
            hold_requests: 1,
            max_pause: 120,
            content_type: DEFAULT_CONTENT_TYPE.into(),
            max_packets: MAX_PACKETS,
        }
    }
}

impl BoshConfig {
    pub fn from_toml(input: &str) -> Result<Self, BoshError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BoshError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

/// Values fixed for one session by its creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub domain: String,
    pub lang: String,
    pub max_wait: u64,
    pub min_polling: u64,
    pub max_inactivity: u64,
    pub concurrent_requests: u32,
    pub hold_requests: u32,
    pub max_pause: u64,
    pub content_type: String,
    pub max_packets: usize,
}

impl SessionConfig {
    /// Applies the creation request on top of the server configuration.
    ///
    /// `wait` may lower the server bound but never raise it, `hold` may only
    /// raise it. Unparseable numbers fall back to the server value.
    pub fn negotiate(server: &BoshConfig, request: &Element) -> Self {
        let max_wait = parse_or(request, WAIT_ATTR, server.max_wait).min(server.max_wait);
        let hold_requests =
            parse_or(request, HOLD_ATTR, server.hold_requests).max(server.hold_requests);

        Self {
            domain: attr_or(request, TO_ATTR, &server.domain),
            lang: attr_or(request, LANG_ATTR, DEFAULT_LANG),
            max_wait,
            min_polling: server.min_polling,
            max_inactivity: server.max_inactivity,
            concurrent_requests: server.concurrent_requests,
            hold_requests,
            max_pause: server.max_pause,
            content_type: attr_or(request, CONTENT_ATTR, &server.content_type),
            max_packets: server.max_packets.max(1),
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.max_wait)
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.max_inactivity)
    }
}

fn attr_or(request: &Element, attr: &str, default: &str) -> String {
    request.attr(attr).unwrap_or(default).to_owned()
}

fn parse_or<T: FromStr + Copy>(request: &Element, attr: &str, default: T) -> T {
    match request.attr(attr) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::debug!("bosh: ignoring unparseable {attr}={raw:?}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_request_is_bare() {
        let server = BoshConfig::default();
        let negotiated = SessionConfig::negotiate(&server, &Element::new("body"));
        assert_eq!(negotiated.domain, "localhost");
        assert_eq!(negotiated.lang, "en");
        assert_eq!(negotiated.max_wait, 30);
        assert_eq!(negotiated.hold_requests, 1);
        assert_eq!(negotiated.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(negotiated.max_packets, MAX_PACKETS);
    }

    #[test]
    fn request_overrides_within_bounds() {
        let server = BoshConfig::default();
        let request = Element::new("body")
            .with_attr("wait", "20")
            .with_attr("hold", "2")
            .with_attr("to", "example.com")
            .with_attr("xml:lang", "de")
            .with_attr("content", "text/xml");
        let negotiated = SessionConfig::negotiate(&server, &request);
        assert_eq!(negotiated.max_wait, 20);
        assert_eq!(negotiated.hold_requests, 2);
        assert_eq!(negotiated.domain, "example.com");
        assert_eq!(negotiated.lang, "de");
        assert_eq!(negotiated.content_type, "text/xml");
    }

    #[test]
    fn wait_is_clamped_and_hold_floored() {
        let server = BoshConfig::default();
        let request = Element::new("body")
            .with_attr("wait", "600")
            .with_attr("hold", "0");
        let negotiated = SessionConfig::negotiate(&server, &request);
        assert_eq!(negotiated.max_wait, 30);
        assert_eq!(negotiated.hold_requests, 1);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let server = BoshConfig::default();
        let request = Element::new("body")
            .with_attr("wait", "soon")
            .with_attr("hold", "-");
        let negotiated = SessionConfig::negotiate(&server, &request);
        assert_eq!(negotiated.max_wait, 30);
        assert_eq!(negotiated.hold_requests, 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = "domain = \"chat.example\"\nmax_wait = 60\n";
        let cfg = BoshConfig::from_toml(toml).expect("parse");
        assert_eq!(cfg.domain, "chat.example");
        assert_eq!(cfg.max_wait, 60);
        assert_eq!(cfg.hold_requests, 1);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(matches!(
            BoshConfig::from_toml("max_wait = \"long\""),
            Err(BoshError::Config(_))
        ));
    }
}
